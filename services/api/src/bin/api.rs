//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{DbAdapter, PasswordAuthAdapter},
    config::Config,
    error::ApiError,
    web::{
        attendance::{
            invalidate_token_handler, issue_token_handler, list_classes_handler,
            missing_token_handler, scan_handler, upcoming_classes_handler,
        },
        auth::{login_handler, logout_handler, resend_confirmation_handler, signup_handler},
        profile::{get_profile_handler, redirect_handler, update_profile_handler, vote_handler},
        require_auth,
        rest::ApiDoc,
        state::{AppState, SessionRegistry},
    },
};
use axum::{
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use chrono::Duration;
use nipo_core::{AttendancePolicy, AttendanceTokenService, SessionConfig};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let db_adapter = DbAdapter::new(db_pool);
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize Adapters and Core Services ---
    let db = Arc::new(db_adapter.clone());
    let auth_adapter = Arc::new(PasswordAuthAdapter::new(
        db_adapter,
        Duration::days(config.auth_session_ttl_days),
        config.require_email_confirmation,
    ));

    let session_config = SessionConfig {
        profile_cache_ttl: config.profile_cache_ttl,
        signup_profile_wait: config.signup_profile_wait,
        ..SessionConfig::default()
    };
    let sessions = SessionRegistry::new(auth_adapter, db.clone(), session_config);

    let attendance = Arc::new(AttendanceTokenService::new(
        db,
        AttendancePolicy {
            allow_past_classes: config.allow_past_class_scans,
        },
    ));
    match attendance.refresh().await {
        Ok(classes) => info!("Loaded {} classes.", classes.len()),
        Err(e) => warn!("Initial class load failed, continuing: {}", e),
    }

    // --- 4. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        config: config.clone(),
        attendance,
        sessions,
    });

    // --- 5. Create the Web Router ---
    let origin = config.cors_origin.parse::<HeaderValue>().map_err(|e| {
        ApiError::Internal(format!("Invalid CORS origin '{}': {}", config.cors_origin, e))
    })?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/auth/signup", post(signup_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/logout", post(logout_handler))
        .route("/auth/resend-confirmation", post(resend_confirmation_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route(
            "/me/profile",
            get(get_profile_handler).patch(update_profile_handler),
        )
        .route("/me/vote", post(vote_handler))
        .route("/me/redirect", get(redirect_handler))
        .route("/aulas", get(list_classes_handler))
        .route("/aulas/upcoming", get(upcoming_classes_handler))
        .route("/aulas/missing-token", get(missing_token_handler))
        .route("/aulas/{aula}/token", post(issue_token_handler))
        .route("/aulas/{aula}/token/invalidate", post(invalidate_token_handler))
        .route("/attendance/scan", post(scan_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    // Combine API routes
    let api_router = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
