//! In-process store for both record sets.
//!
//! Enforces the same rules as the `PostgreSQL` schema: unique usernames and
//! admins that must reference an existing user. Used by the test suites and
//! by embedders that have no database.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;

use first_admin_core::{
    Admin, AdminId, PasswordReset, PasswordService, User, UserEmail, UserId, UserServices,
};

use super::{AdminStore, NewUser, RepositoryError, UserStore};

#[derive(Debug, Default)]
struct Collections {
    users: BTreeMap<UserId, User>,
    admins: BTreeMap<AdminId, Admin>,
    last_user_id: i32,
    last_admin_id: i32,
}

/// Both record sets behind one lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Collections>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Collections> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of every user, in ID order.
    #[must_use]
    pub fn users(&self) -> Vec<User> {
        self.lock().users.values().cloned().collect()
    }

    /// Snapshot of every admin, in ID order.
    #[must_use]
    pub fn admins(&self) -> Vec<Admin> {
        self.lock().admins.values().copied().collect()
    }
}

impl UserStore for MemoryStore {
    async fn count_users(&self) -> Result<u64, RepositoryError> {
        Ok(self.lock().users.len() as u64)
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.lock().users.get(&id).cloned())
    }

    async fn find_user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<User>, RepositoryError> {
        Ok(self
            .lock()
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn insert_user(&self, user: NewUser) -> Result<UserId, RepositoryError> {
        let mut inner = self.lock();
        if inner.users.values().any(|u| u.username == user.username) {
            return Err(RepositoryError::Conflict(format!(
                "username '{}' already exists",
                user.username
            )));
        }

        inner.last_user_id += 1;
        let id = UserId::new(inner.last_user_id);
        inner.users.insert(
            id,
            User {
                id,
                created_at: Utc::now(),
                first_name: None,
                last_name: None,
                username: user.username,
                emails: vec![UserEmail::unverified(user.email.into_inner())],
                services: None,
            },
        );
        Ok(id)
    }

    async fn set_names(
        &self,
        id: UserId,
        first_name: &str,
        last_name: &str,
    ) -> Result<u64, RepositoryError> {
        let mut inner = self.lock();
        let Some(user) = inner.users.get_mut(&id) else {
            return Ok(0);
        };
        user.first_name = Some(first_name.to_owned());
        user.last_name = Some(last_name.to_owned());
        Ok(1)
    }

    async fn set_password_reset(
        &self,
        id: UserId,
        reset: &PasswordReset,
    ) -> Result<u64, RepositoryError> {
        let mut inner = self.lock();
        let Some(user) = inner.users.get_mut(&id) else {
            return Ok(0);
        };
        let password = user
            .services
            .get_or_insert_with(UserServices::default)
            .password
            .get_or_insert_with(PasswordService::default);
        password.reset = Some(reset.clone());
        Ok(1)
    }

    async fn remove_user(&self, id: UserId) -> Result<u64, RepositoryError> {
        let mut inner = self.lock();
        if inner.admins.values().any(|a| a.user_id == id) {
            return Err(RepositoryError::ReferentialIntegrity(format!(
                "user {id} is still referenced by an admin"
            )));
        }
        Ok(u64::from(inner.users.remove(&id).is_some()))
    }
}

impl AdminStore for MemoryStore {
    async fn count_admins(&self) -> Result<u64, RepositoryError> {
        Ok(self.lock().admins.len() as u64)
    }

    async fn admin_exists(&self, id: AdminId) -> Result<bool, RepositoryError> {
        Ok(self.lock().admins.contains_key(&id))
    }

    async fn list_admins(&self) -> Result<Vec<Admin>, RepositoryError> {
        Ok(self.admins())
    }

    async fn insert_admin(&self, user_id: UserId) -> Result<AdminId, RepositoryError> {
        let mut inner = self.lock();
        if !inner.users.contains_key(&user_id) {
            return Err(RepositoryError::ReferentialIntegrity(format!(
                "admin references user {user_id}, which does not exist"
            )));
        }

        inner.last_admin_id += 1;
        let id = AdminId::new(inner.last_admin_id);
        inner.admins.insert(id, Admin { id, user_id });
        Ok(id)
    }

    async fn remove_admin(&self, id: AdminId) -> Result<u64, RepositoryError> {
        Ok(u64::from(self.lock().admins.remove(&id).is_some()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use first_admin_core::{Email, ResetReason};

    fn new_user(username: &str) -> NewUser {
        NewUser {
            username: username.to_owned(),
            email: Email::parse(&format!("{username}@x.tld")).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_insert_user_is_passwordless() {
        let store = MemoryStore::new();
        let id = store.insert_user(new_user("u1")).await.unwrap();

        let user = store.get_user(id).await.unwrap().unwrap();
        assert_eq!(user.username, "u1");
        assert_eq!(user.primary_email(), Some("u1@x.tld"));
        assert!(user.services.is_none());
        assert_eq!(store.count_users().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_username_conflicts() {
        let store = MemoryStore::new();
        store.insert_user(new_user("u1")).await.unwrap();
        let err = store.insert_user(new_user("u1")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
        assert_eq!(store.count_users().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_admin_requires_existing_user() {
        let store = MemoryStore::new();
        let err = store.insert_admin(UserId::new(99)).await.unwrap_err();
        assert!(matches!(err, RepositoryError::ReferentialIntegrity(_)));
        assert_eq!(store.count_admins().await.unwrap(), 0);
        assert_eq!(store.count_users().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_referenced_user_cannot_be_removed() {
        let store = MemoryStore::new();
        let user_id = store.insert_user(new_user("u1")).await.unwrap();
        let admin_id = store.insert_admin(user_id).await.unwrap();

        assert!(store.remove_user(user_id).await.is_err());
        assert_eq!(store.remove_admin(admin_id).await.unwrap(), 1);
        assert_eq!(store.remove_user(user_id).await.unwrap(), 1);
        assert_eq!(store.remove_user(user_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_set_names_and_reset_on_missing_user_modify_nothing() {
        let store = MemoryStore::new();
        let missing = UserId::new(5);
        assert_eq!(store.set_names(missing, "A", "B").await.unwrap(), 0);

        let reset = PasswordReset {
            token: "t".to_owned(),
            email: "u1@x.tld".to_owned(),
            when: Utc::now(),
            reason: ResetReason::Enroll,
        };
        assert_eq!(store.set_password_reset(missing, &reset).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_password_reset_keeps_existing_hash() {
        let store = MemoryStore::new();
        let id = store.insert_user(new_user("u1")).await.unwrap();
        {
            let mut inner = store.lock();
            let user = inner.users.get_mut(&id).unwrap();
            user.services = Some(UserServices {
                password: Some(PasswordService {
                    bcrypt: Some("$2b$10$hash".to_owned()),
                    reset: None,
                }),
            });
        }

        let reset = PasswordReset {
            token: "t".to_owned(),
            email: "u1@x.tld".to_owned(),
            when: Utc::now(),
            reason: ResetReason::Reset,
        };
        store.set_password_reset(id, &reset).await.unwrap();

        let user = store.get_user(id).await.unwrap().unwrap();
        assert!(user.has_password());
        assert_eq!(user.pending_reset(), Some(&reset));
    }
}
