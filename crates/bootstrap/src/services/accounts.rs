//! Account creation and enrollment.
//!
//! Accounts are created without a password. Their owner sets one through an
//! enrollment link: a reset record with reason `enroll` is stored on the user
//! and its token is embedded in a URL under the configured root URL.

use chrono::Utc;
use rand::Rng;
use rand::distr::Alphanumeric;
use thiserror::Error;
use url::Url;

use first_admin_core::{Email, PasswordReset, ResetReason, UserId};

use super::email::{EmailError, EnrollmentMailer, EnrollmentMessage};
use crate::db::{NewUser, RepositoryError, UserStore};

/// Length of generated enrollment tokens.
pub const TOKEN_LENGTH: usize = 43;

/// Errors from the account collaborator.
#[derive(Debug, Error)]
pub enum AccountError {
    /// Invalid email format.
    #[error("invalid email: {0}")]
    InvalidEmail(#[from] first_admin_core::EmailError),

    /// Username already taken.
    #[error("username already exists: {0}")]
    UsernameTaken(String),

    /// User not found.
    #[error("user not found: {0}")]
    UserNotFound(UserId),

    /// User has no email to send to.
    #[error("user {0} has no email address")]
    NoEmail(UserId),

    /// The reset record could not be attached.
    #[error("failed to store enrollment token for user {0}")]
    TokenNotStored(UserId),

    /// Email delivery failed.
    #[error("email error: {0}")]
    Email(#[from] EmailError),

    /// Repository/database error.
    #[error("database error: {0}")]
    Repository(#[from] RepositoryError),
}

/// An account to create.
#[derive(Debug, Clone)]
pub struct NewAccount<'a> {
    pub username: &'a str,
    pub email: &'a str,
}

/// A dispatched enrollment link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentLink {
    pub user_id: UserId,
    pub email: String,
    pub token: String,
    pub url: String,
}

/// Creates passwordless accounts and sends enrollment links.
pub struct AccountService<'a, S, M> {
    users: &'a S,
    mailer: &'a M,
    root_url: Url,
}

impl<'a, S: UserStore, M: EnrollmentMailer> AccountService<'a, S, M> {
    /// Create an account service.
    #[must_use]
    pub const fn new(users: &'a S, mailer: &'a M, root_url: Url) -> Self {
        Self {
            users,
            mailer,
            root_url,
        }
    }

    /// Create a user with no password.
    ///
    /// # Errors
    ///
    /// Returns `AccountError::InvalidEmail` for a malformed address,
    /// `AccountError::UsernameTaken` if the username exists, or
    /// `AccountError::Repository` if the insert fails.
    pub async fn create_user(&self, account: NewAccount<'_>) -> Result<UserId, AccountError> {
        let email = Email::parse(account.email)?;

        if self
            .users
            .find_user_by_username(account.username)
            .await?
            .is_some()
        {
            return Err(AccountError::UsernameTaken(account.username.to_owned()));
        }

        let id = self
            .users
            .insert_user(NewUser {
                username: account.username.to_owned(),
                email,
            })
            .await
            .map_err(|e| match e {
                RepositoryError::Conflict(_) => {
                    AccountError::UsernameTaken(account.username.to_owned())
                }
                other => AccountError::Repository(other),
            })?;

        tracing::info!(user_id = %id, username = account.username, "created passwordless user");
        Ok(id)
    }

    /// Issue an enrollment token for a user and send the link to their first
    /// email address.
    ///
    /// # Errors
    ///
    /// Returns `AccountError::UserNotFound` or `AccountError::NoEmail` if the
    /// user cannot receive a link, `AccountError::TokenNotStored` if the
    /// reset record was not written, and `AccountError::Email` if delivery
    /// fails.
    pub async fn send_enrollment_email(
        &self,
        user_id: UserId,
    ) -> Result<EnrollmentLink, AccountError> {
        let user = self
            .users
            .get_user(user_id)
            .await?
            .ok_or(AccountError::UserNotFound(user_id))?;
        let email = user
            .primary_email()
            .ok_or(AccountError::NoEmail(user_id))?
            .to_owned();

        let token = generate_token();
        let reset = PasswordReset {
            token: token.clone(),
            email: email.clone(),
            when: Utc::now(),
            reason: ResetReason::Enroll,
        };
        if self.users.set_password_reset(user_id, &reset).await? == 0 {
            return Err(AccountError::TokenNotStored(user_id));
        }

        let url = enrollment_url(&self.root_url, &token);
        self.mailer
            .send_enrollment(&EnrollmentMessage {
                to: email.clone(),
                username: user.username,
                url: url.clone(),
            })
            .await?;

        tracing::info!(user_id = %user_id, "enrollment link dispatched");
        Ok(EnrollmentLink {
            user_id,
            email,
            token,
            url,
        })
    }
}

/// Build the enrollment URL for a token.
#[must_use]
pub fn enrollment_url(root_url: &Url, token: &str) -> String {
    format!(
        "{}/#/enroll-account/{token}",
        root_url.as_str().trim_end_matches('/')
    )
}

/// Generate a random alphanumeric enrollment token.
#[must_use]
pub fn generate_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::services::email::LogMailer;

    fn root() -> Url {
        Url::parse("http://localhost:3000/").unwrap()
    }

    #[test]
    fn test_generate_token_format() {
        let token = generate_token();
        assert_eq!(token.len(), TOKEN_LENGTH);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(token, generate_token());
    }

    #[test]
    fn test_enrollment_url() {
        assert_eq!(
            enrollment_url(&root(), "abc"),
            "http://localhost:3000/#/enroll-account/abc"
        );
        let nested = Url::parse("https://app.example.org/base/").unwrap();
        assert_eq!(
            enrollment_url(&nested, "abc"),
            "https://app.example.org/base/#/enroll-account/abc"
        );
    }

    #[tokio::test]
    async fn test_create_user_rejects_bad_email_before_writing() {
        let store = MemoryStore::new();
        let accounts = AccountService::new(&store, &LogMailer, root());
        let err = accounts
            .create_user(NewAccount {
                username: "u1",
                email: "not-an-email",
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AccountError::InvalidEmail(_)));
        assert_eq!(store.count_users().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_create_user_rejects_taken_username() {
        let store = MemoryStore::new();
        let accounts = AccountService::new(&store, &LogMailer, root());
        let account = NewAccount {
            username: "u1",
            email: "u1@x.tld",
        };
        accounts.create_user(account.clone()).await.unwrap();
        let err = accounts.create_user(account).await.unwrap_err();
        assert!(matches!(err, AccountError::UsernameTaken(name) if name == "u1"));
    }

    #[tokio::test]
    async fn test_enrollment_stores_reset_record() {
        let store = MemoryStore::new();
        let accounts = AccountService::new(&store, &LogMailer, root());
        let id = accounts
            .create_user(NewAccount {
                username: "u1",
                email: "u1@x.tld",
            })
            .await
            .unwrap();

        let link = accounts.send_enrollment_email(id).await.unwrap();
        assert_eq!(link.email, "u1@x.tld");
        assert!(link.url.ends_with(&link.token));

        let user = store.get_user(id).await.unwrap().unwrap();
        assert!(!user.has_password());
        let reset = user.pending_reset().unwrap();
        assert_eq!(reset.token, link.token);
        assert_eq!(reset.email, "u1@x.tld");
        assert_eq!(reset.reason, ResetReason::Enroll);
    }

    #[tokio::test]
    async fn test_enrollment_for_missing_user() {
        let store = MemoryStore::new();
        let accounts = AccountService::new(&store, &LogMailer, root());
        let err = accounts
            .send_enrollment_email(UserId::new(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AccountError::UserNotFound(_)));
    }
}
