//! `PostgreSQL` implementation of [`AdminStore`].
//!
//! Referential integrity comes from the `admins.user_id` foreign key; a
//! violation surfaces as `RepositoryError::ReferentialIntegrity`.

use first_admin_core::{Admin, AdminId, UserId};

use super::{AdminStore, PgStore, RepositoryError, count_from_db};

/// Internal row type for `PostgreSQL` admin queries.
#[derive(Debug, sqlx::FromRow)]
struct AdminRow {
    id: i32,
    user_id: i32,
}

impl From<AdminRow> for Admin {
    fn from(row: AdminRow) -> Self {
        Self {
            id: AdminId::new(row.id),
            user_id: UserId::new(row.user_id),
        }
    }
}

impl AdminStore for PgStore {
    async fn count_admins(&self) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM admins")
            .fetch_one(self.pool())
            .await?;
        count_from_db(count)
    }

    async fn admin_exists(&self, id: AdminId) -> Result<bool, RepositoryError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM admins WHERE id = $1)")
                .bind(id)
                .fetch_one(self.pool())
                .await?;
        Ok(exists)
    }

    async fn list_admins(&self) -> Result<Vec<Admin>, RepositoryError> {
        let rows = sqlx::query_as::<_, AdminRow>("SELECT id, user_id FROM admins ORDER BY id")
            .fetch_all(self.pool())
            .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn insert_admin(&self, user_id: UserId) -> Result<AdminId, RepositoryError> {
        let id: i32 = sqlx::query_scalar("INSERT INTO admins (user_id) VALUES ($1) RETURNING id")
            .bind(user_id)
            .fetch_one(self.pool())
            .await
            .map_err(|e| match RepositoryError::from_write(e) {
                RepositoryError::ReferentialIntegrity(_) => RepositoryError::ReferentialIntegrity(
                    format!("admin references user {user_id}, which does not exist"),
                ),
                other => other,
            })?;

        Ok(AdminId::new(id))
    }

    async fn remove_admin(&self, id: AdminId) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM admins WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected())
    }
}
