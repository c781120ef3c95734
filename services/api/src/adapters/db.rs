//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `ProfileStore` and `AttendanceStore` ports from the `core` crate. It also
//! persists the credentials and login sessions used by the password auth adapter.
//! It handles all interactions with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use nipo_core::domain::{
    ClassSession, Enrollment, NewPresence, PresenceRecord, Profile, ProfileSeed, ProfileUpdate,
    TokenRecord,
};
use nipo_core::ports::{AttendanceStore, PortError, PortResult, ProfileStore};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// Postgres error code raised by `generate_attendance_token` for an unknown class.
const NO_DATA_FOUND: &str = "P0002";
const UNIQUE_VIOLATION: &str = "23505";

/// Enrollment status that allows presence registration.
const ACTIVE_ENROLLMENT: &str = "ativa";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the store ports.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

/// Maps a `sqlx` error onto the port error, naming the missing item on `RowNotFound`.
fn port_err(e: sqlx::Error, what: impl FnOnce() -> String) -> PortError {
    match e {
        sqlx::Error::RowNotFound => PortError::NotFound(what()),
        sqlx::Error::Database(ref db) if db.code().as_deref() == Some(NO_DATA_FOUND) => {
            PortError::NotFound(what())
        }
        sqlx::Error::Database(ref db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            PortError::Conflict(what())
        }
        _ => PortError::Unexpected(e.to_string()),
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct ProfileRecord {
    id: Uuid,
    email: String,
    full_name: Option<String>,
    tipo_usuario: String,
    has_voted: bool,
}
impl ProfileRecord {
    fn to_domain(self) -> PortResult<Profile> {
        Ok(Profile {
            user_id: self.id,
            email: self.email,
            full_name: self.full_name,
            role: self.tipo_usuario.parse().map_err(PortError::Unexpected)?,
            has_voted: self.has_voted,
        })
    }
}

#[derive(FromRow)]
struct ClassRecord {
    id: Uuid,
    numero: i32,
    titulo: String,
    data_programada: NaiveDate,
    objetivo_didatico: Option<String>,
    resumo_atividade: Option<String>,
    desafio_alpha: Option<String>,
    status: String,
    qr_code: Option<String>,
    qr_ativo: bool,
    qr_gerado_em: Option<DateTime<Utc>>,
    qr_invalidado_em: Option<DateTime<Utc>>,
}
impl ClassRecord {
    fn to_domain(self) -> PortResult<ClassSession> {
        Ok(ClassSession {
            id: self.id,
            number: self.numero,
            title: self.titulo,
            scheduled_for: self.data_programada,
            objective: self.objetivo_didatico,
            activity_summary: self.resumo_atividade,
            challenge: self.desafio_alpha,
            status: self.status.parse().map_err(PortError::Unexpected)?,
            attendance: TokenRecord {
                token: self.qr_code,
                active: self.qr_ativo,
                issued_at: self.qr_gerado_em,
                invalidated_at: self.qr_invalidado_em,
            },
        })
    }
}

const CLASS_COLUMNS: &str = "id, numero, titulo, data_programada, objetivo_didatico, \
     resumo_atividade, desafio_alpha, status, qr_code, qr_ativo, qr_gerado_em, qr_invalidado_em";

#[derive(FromRow)]
struct EnrollmentRecord {
    id: Uuid,
    aluno_id: Uuid,
    status: String,
}
impl EnrollmentRecord {
    fn to_domain(self) -> Enrollment {
        Enrollment {
            id: self.id,
            student_id: self.aluno_id,
            active: self.status == ACTIVE_ENROLLMENT,
        }
    }
}

#[derive(FromRow)]
struct PresenceRow {
    id: Uuid,
    matricula_id: Uuid,
    data_aula: NaiveDate,
    presente: bool,
    observacoes: String,
    criado_em: DateTime<Utc>,
}
impl PresenceRow {
    fn to_domain(self) -> PresenceRecord {
        PresenceRecord {
            id: self.id,
            enrollment_id: self.matricula_id,
            date: self.data_aula,
            present: self.presente,
            note: self.observacoes,
            recorded_at: self.criado_em,
        }
    }
}

const PRESENCE_COLUMNS: &str = "id, matricula_id, data_aula, presente, observacoes, criado_em";

/// Login data for a user. Contains the password hash, so it never leaves the adapters.
#[derive(Debug, Clone, FromRow)]
pub struct UserCredentials {
    pub id: Uuid,
    pub email: String,
    pub hashed_password: String,
    pub email_confirmed_at: Option<DateTime<Utc>>,
    pub disabled: bool,
}

//=========================================================================================
// Credentials and Login Sessions
//=========================================================================================

impl DbAdapter {
    /// Creates the user row and its profile in one transaction.
    pub async fn create_user_with_profile(
        &self,
        email: &str,
        hashed_password: &str,
        email_confirmed_at: Option<DateTime<Utc>>,
        seed: &ProfileSeed,
    ) -> PortResult<Uuid> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let user_id = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO users (email, hashed_password, email_confirmed_at) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(email)
        .bind(hashed_password)
        .bind(email_confirmed_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| port_err(e, || format!("User {} already registered", email)))?;

        sqlx::query("INSERT INTO profiles (id, email, full_name, tipo_usuario) VALUES ($1, $2, $3, $4)")
            .bind(user_id)
            .bind(email)
            .bind(&seed.full_name)
            .bind(seed.role.as_str())
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;

        tx.commit().await.map_err(unexpected)?;
        Ok(user_id)
    }

    pub async fn get_credentials_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        sqlx::query_as::<_, UserCredentials>(
            "SELECT id, email, hashed_password, email_confirmed_at, disabled FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| port_err(e, || format!("User {} not found", email)))
    }

    pub async fn mark_confirmation_sent(&self, email: &str) -> PortResult<()> {
        let result = sqlx::query("UPDATE users SET confirmation_sent_at = now() WHERE email = $1")
            .bind(email)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("User {} not found", email)));
        }
        Ok(())
    }

    pub async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        sqlx::query("INSERT INTO auth_sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(session_id)
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    /// Returns the user id and email behind a live, unexpired session.
    pub async fn validate_auth_session(&self, session_id: &str) -> PortResult<Option<(Uuid, String)>> {
        sqlx::query_as::<_, (Uuid, String)>(
            "SELECT u.id, u.email FROM auth_sessions s JOIN users u ON u.id = s.user_id \
             WHERE s.id = $1 AND s.expires_at > now() AND NOT u.disabled",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)
    }

    pub async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM auth_sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }
}

//=========================================================================================
// `ProfileStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl ProfileStore for DbAdapter {
    async fn get_profile(&self, user_id: Uuid) -> PortResult<Profile> {
        sqlx::query_as::<_, ProfileRecord>(
            "SELECT id, email, full_name, tipo_usuario, has_voted FROM profiles WHERE id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| port_err(e, || format!("Profile {} not found", user_id)))?
        .to_domain()
    }

    async fn record_vote(&self, user_id: Uuid) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE profiles SET has_voted = TRUE, updated_at = now() WHERE id = $1",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Profile {} not found", user_id)));
        }
        Ok(())
    }

    async fn update_profile(&self, user_id: Uuid, update: &ProfileUpdate) -> PortResult<Profile> {
        sqlx::query_as::<_, ProfileRecord>(
            "UPDATE profiles SET full_name = COALESCE($2, full_name), updated_at = now() \
             WHERE id = $1 RETURNING id, email, full_name, tipo_usuario, has_voted",
        )
        .bind(user_id)
        .bind(&update.full_name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| port_err(e, || format!("Profile {} not found", user_id)))?
        .to_domain()
    }
}

//=========================================================================================
// `AttendanceStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl AttendanceStore for DbAdapter {
    async fn list_classes(&self) -> PortResult<Vec<ClassSession>> {
        let records = sqlx::query_as::<_, ClassRecord>(&format!(
            "SELECT {} FROM aulas ORDER BY data_programada ASC, numero ASC",
            CLASS_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn get_class_by_id(&self, class_id: Uuid) -> PortResult<ClassSession> {
        sqlx::query_as::<_, ClassRecord>(&format!("SELECT {} FROM aulas WHERE id = $1", CLASS_COLUMNS))
            .bind(class_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| port_err(e, || format!("Class {} not found", class_id)))?
            .to_domain()
    }

    async fn get_class_by_number(&self, number: i32) -> PortResult<ClassSession> {
        sqlx::query_as::<_, ClassRecord>(&format!(
            "SELECT {} FROM aulas WHERE numero = $1",
            CLASS_COLUMNS
        ))
        .bind(number)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| port_err(e, || format!("Class #{} not found", number)))?
        .to_domain()
    }

    async fn generate_attendance_token(&self, number: i32) -> PortResult<String> {
        sqlx::query_scalar::<_, String>("SELECT generate_attendance_token($1)")
            .bind(number)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| port_err(e, || format!("Class #{} not found", number)))
    }

    async fn invalidate_attendance_token(
        &self,
        class_id: Uuid,
        invalidated_at: DateTime<Utc>,
    ) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE aulas SET qr_ativo = FALSE, qr_invalidado_em = $2 WHERE id = $1",
        )
        .bind(class_id)
        .bind(invalidated_at)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Class {} not found", class_id)));
        }
        Ok(())
    }

    async fn find_active_enrollment(&self, student_id: Uuid) -> PortResult<Option<Enrollment>> {
        let record = sqlx::query_as::<_, EnrollmentRecord>(
            "SELECT id, aluno_id, status FROM matriculas \
             WHERE aluno_id = $1 AND status = $2 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(student_id)
        .bind(ACTIVE_ENROLLMENT)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(|r| r.to_domain()))
    }

    async fn find_presence(
        &self,
        enrollment_id: Uuid,
        date: NaiveDate,
    ) -> PortResult<Option<PresenceRecord>> {
        let record = sqlx::query_as::<_, PresenceRow>(&format!(
            "SELECT {} FROM presencas WHERE matricula_id = $1 AND data_aula = $2",
            PRESENCE_COLUMNS
        ))
        .bind(enrollment_id)
        .bind(date)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(|r| r.to_domain()))
    }

    async fn insert_presence(&self, presence: NewPresence) -> PortResult<PresenceRecord> {
        // A concurrent scan may have inserted the row since the lookup; the unique
        // constraint turns that into an update.
        let record = sqlx::query_as::<_, PresenceRow>(&format!(
            "INSERT INTO presencas (matricula_id, data_aula, presente, observacoes, criado_em) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (matricula_id, data_aula) DO UPDATE SET \
             presente = EXCLUDED.presente, observacoes = EXCLUDED.observacoes, criado_em = EXCLUDED.criado_em \
             RETURNING {}",
            PRESENCE_COLUMNS
        ))
        .bind(presence.enrollment_id)
        .bind(presence.date)
        .bind(presence.present)
        .bind(&presence.note)
        .bind(presence.recorded_at)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn update_presence(
        &self,
        presence_id: Uuid,
        present: bool,
        note: &str,
        recorded_at: DateTime<Utc>,
    ) -> PortResult<PresenceRecord> {
        let record = sqlx::query_as::<_, PresenceRow>(&format!(
            "UPDATE presencas SET presente = $2, observacoes = $3, criado_em = $4 \
             WHERE id = $1 RETURNING {}",
            PRESENCE_COLUMNS
        ))
        .bind(presence_id)
        .bind(present)
        .bind(note)
        .bind(recorded_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| port_err(e, || format!("Presence {} not found", presence_id)))?;
        Ok(record.to_domain())
    }
}
