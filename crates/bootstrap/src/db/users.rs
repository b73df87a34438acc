//! `PostgreSQL` implementation of [`UserStore`].

use chrono::{DateTime, Utc};
use sqlx::types::Json;

use first_admin_core::{PasswordReset, User, UserEmail, UserId, UserServices};

use super::{NewUser, PgStore, RepositoryError, UserStore, count_from_db};

/// Internal row type for `PostgreSQL` user queries.
#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: i32,
    created_at: DateTime<Utc>,
    first_name: Option<String>,
    last_name: Option<String>,
    username: String,
    emails: Json<Vec<UserEmail>>,
    services: Option<Json<UserServices>>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: UserId::new(row.id),
            created_at: row.created_at,
            first_name: row.first_name,
            last_name: row.last_name,
            username: row.username,
            emails: row.emails.0,
            services: row.services.map(|s| s.0),
        }
    }
}

const SELECT_USER: &str = r"
    SELECT id, created_at, first_name, last_name, username, emails, services
    FROM users
";

impl UserStore for PgStore {
    async fn count_users(&self) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(self.pool())
            .await?;
        count_from_db(count)
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query_as::<_, UserRow>(&format!("{SELECT_USER} WHERE id = $1"))
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        Ok(row.map(Into::into))
    }

    async fn find_user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query_as::<_, UserRow>(&format!("{SELECT_USER} WHERE username = $1"))
            .bind(username)
            .fetch_optional(self.pool())
            .await?;

        Ok(row.map(Into::into))
    }

    async fn user_exists(&self, id: UserId) -> Result<bool, RepositoryError> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
            .bind(id)
            .fetch_one(self.pool())
            .await?;
        Ok(exists)
    }

    async fn insert_user(&self, user: NewUser) -> Result<UserId, RepositoryError> {
        let emails = vec![UserEmail::unverified(user.email.into_inner())];

        let id: i32 = sqlx::query_scalar(
            r"
            INSERT INTO users (username, emails)
            VALUES ($1, $2)
            RETURNING id
            ",
        )
        .bind(&user.username)
        .bind(Json(&emails))
        .fetch_one(self.pool())
        .await
        .map_err(RepositoryError::from_write)?;

        Ok(UserId::new(id))
    }

    async fn set_names(
        &self,
        id: UserId,
        first_name: &str,
        last_name: &str,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query("UPDATE users SET first_name = $2, last_name = $3 WHERE id = $1")
            .bind(id)
            .bind(first_name)
            .bind(last_name)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected())
    }

    async fn set_password_reset(
        &self,
        id: UserId,
        reset: &PasswordReset,
    ) -> Result<u64, RepositoryError> {
        // Merge into services.password so an existing bcrypt hash survives.
        let result = sqlx::query(
            r"
            UPDATE users
            SET services = COALESCE(services, '{}'::jsonb) || jsonb_build_object(
                'password',
                COALESCE(services -> 'password', '{}'::jsonb)
                    || jsonb_build_object('reset', $2::jsonb)
            )
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(Json(reset))
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }

    async fn remove_user(&self, id: UserId) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(RepositoryError::from_write)?;

        Ok(result.rows_affected())
    }
}
