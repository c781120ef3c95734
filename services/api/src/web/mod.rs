pub mod attendance;
pub mod auth;
pub mod middleware;
pub mod profile;
pub mod rest;
pub mod state;

pub use middleware::require_auth;
