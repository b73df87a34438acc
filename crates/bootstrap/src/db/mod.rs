//! Account storage.
//!
//! # Record sets
//!
//! - `users` - Application accounts (passwordless until enrollment)
//! - `admins` - Privilege records, each referencing one user
//!
//! Both sets are reached through the [`UserStore`] and [`AdminStore`]
//! traits. Two backends implement them:
//!
//! - [`PgStore`] - `PostgreSQL` via sqlx (the production backend)
//! - [`MemoryStore`] - in-process maps with the same integrity rules
//!
//! # Migrations
//!
//! Migrations live in `crates/bootstrap/migrations/` and are applied by
//! [`init_schema`] during startup, before the bootstrap runs.

pub mod admins;
pub mod memory;
pub mod users;

use std::time::Duration;

use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use first_admin_core::{Admin, AdminId, Email, PasswordReset, User, UserId};

pub use memory::MemoryStore;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed.
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., unique username).
    #[error("constraint violation: {0}")]
    Conflict(String),

    /// A record references another record that does not exist.
    #[error("referential integrity violation: {0}")]
    ReferentialIntegrity(String),
}

impl RepositoryError {
    /// Classify a failed write by the constraint it violated.
    pub(crate) fn from_write(e: sqlx::Error) -> Self {
        match e.as_database_error() {
            Some(db) if db.is_foreign_key_violation() => {
                Self::ReferentialIntegrity(db.message().to_string())
            }
            Some(db) if db.is_unique_violation() => Self::Conflict(db.message().to_string()),
            _ => Self::Database(e),
        }
    }
}

/// A user to be created without a password.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: Email,
}

/// Access to the `users` record set.
#[allow(async_fn_in_trait)]
pub trait UserStore {
    /// Number of users.
    async fn count_users(&self) -> Result<u64, RepositoryError>;

    /// Get a user by ID.
    async fn get_user(&self, id: UserId) -> Result<Option<User>, RepositoryError>;

    /// Get a user by username.
    async fn find_user_by_username(&self, username: &str)
    -> Result<Option<User>, RepositoryError>;

    /// Returns true if a user with this ID exists.
    async fn user_exists(&self, id: UserId) -> Result<bool, RepositoryError> {
        Ok(self.get_user(id).await?.is_some())
    }

    /// Insert a passwordless user with one unverified email.
    ///
    /// Fails with `RepositoryError::Conflict` if the username is taken.
    async fn insert_user(&self, user: NewUser) -> Result<UserId, RepositoryError>;

    /// Set first and last name. Returns the number of records modified.
    async fn set_names(
        &self,
        id: UserId,
        first_name: &str,
        last_name: &str,
    ) -> Result<u64, RepositoryError>;

    /// Attach a password reset record, keeping any existing hash.
    /// Returns the number of records modified.
    async fn set_password_reset(
        &self,
        id: UserId,
        reset: &PasswordReset,
    ) -> Result<u64, RepositoryError>;

    /// Delete a user. Returns the number of records removed.
    async fn remove_user(&self, id: UserId) -> Result<u64, RepositoryError>;
}

/// Access to the `admins` record set.
#[allow(async_fn_in_trait)]
pub trait AdminStore {
    /// Number of admins.
    async fn count_admins(&self) -> Result<u64, RepositoryError>;

    /// Returns true if an admin with this ID exists.
    async fn admin_exists(&self, id: AdminId) -> Result<bool, RepositoryError>;

    /// List all admins in creation order.
    async fn list_admins(&self) -> Result<Vec<Admin>, RepositoryError>;

    /// Insert an admin record.
    ///
    /// Fails with `RepositoryError::ReferentialIntegrity` if `user_id` does
    /// not reference an existing user; nothing is written in that case.
    async fn insert_admin(&self, user_id: UserId) -> Result<AdminId, RepositoryError>;

    /// Delete an admin. Returns the number of records removed.
    async fn remove_admin(&self, id: AdminId) -> Result<u64, RepositoryError>;
}

/// `PostgreSQL`-backed store for both record sets.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns the underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Create a `PostgreSQL` connection pool.
///
/// The bootstrap issues one statement at a time, so the pool stays small.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(2)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

/// Apply the bundled migrations.
///
/// # Errors
///
/// Returns `RepositoryError::Migrate` if a migration fails.
pub async fn init_schema(pool: &PgPool) -> Result<(), RepositoryError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("schema up to date");
    Ok(())
}

fn count_from_db(count: i64) -> Result<u64, RepositoryError> {
    u64::try_from(count)
        .map_err(|_| RepositoryError::DataCorruption(format!("negative count {count}")))
}
