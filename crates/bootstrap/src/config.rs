//! Configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `DATABASE_URL` - `PostgreSQL` connection string
//!
//! ## Optional
//! - `ROOT_URL` - Public URL enrollment links point at (default: <http://localhost:3000>)
//! - `SETTINGS_VAR` - Name of the variable holding the JSON settings tree (default: `APP_SETTINGS`)
//! - `APP_SETTINGS` - JSON settings tree; its `admin` block carries the first admin's identity
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name
//!
//! ## Optional (SMTP - enrollment links are logged when unset)
//! - `SMTP_HOST` - SMTP server hostname
//! - `SMTP_PORT` - SMTP port (default: 587)
//! - `SMTP_USERNAME` - SMTP authentication username
//! - `SMTP_PASSWORD` - SMTP authentication password
//! - `SMTP_FROM` - Email sender address
//!
//! # Settings tree
//!
//! ```json
//! {
//!   "admin": {
//!     "firstName": "Ada",
//!     "lastName": "Lovelace",
//!     "username": "ada",
//!     "email": "ada@example.org"
//!   },
//!   "public": { "...": "..." }
//! }
//! ```
//!
//! The `admin` block is consumed by the bootstrap and must not outlive it:
//! [`Settings::without_admin`] produces the redacted tree, and the
//! application is started with that tree in its settings variable (see
//! [`crate::launch`]). This process's own environment is never modified.

use std::fmt;

use secrecy::SecretString;
use serde_json::{Map, Value};
use thiserror::Error;
use url::Url;

/// Key of the credential block inside the settings tree.
pub const ADMIN_KEY: &str = "admin";

/// Default name of the settings environment variable.
pub const DEFAULT_SETTINGS_VAR: &str = "APP_SETTINGS";

const DEFAULT_ROOT_URL: &str = "http://localhost:3000";

/// Required admin fields, in validation order.
pub const ADMIN_FIELDS: [&str; 4] = ["firstName", "lastName", "username", "email"];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Invalid settings JSON: {0}")]
    InvalidSettings(String),
    #[error(transparent)]
    AdminSettings(#[from] AdminSettingsError),
}

/// A violation in the `admin` settings block.
///
/// Each variant names the offending key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdminSettingsError {
    #[error("admin settings: expected an object under 'admin', got {found}")]
    NotAnObject { found: &'static str },
    #[error("admin settings: missing key '{0}'")]
    MissingKey(&'static str),
    #[error("admin settings: expected a string for '{key}', got {found}")]
    NotAString { key: &'static str, found: &'static str },
    #[error("admin settings: '{0}' must not be empty")]
    Empty(&'static str),
    #[error("admin settings: unknown key '{0}'")]
    UnknownKey(String),
}

impl AdminSettingsError {
    /// The settings key this error is about.
    #[must_use]
    pub fn field(&self) -> &str {
        match self {
            Self::NotAnObject { .. } => ADMIN_KEY,
            Self::MissingKey(key) | Self::Empty(key) | Self::NotAString { key, .. } => *key,
            Self::UnknownKey(key) => key.as_str(),
        }
    }
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// =============================================================================
// Settings tree
// =============================================================================

/// The application's JSON settings tree.
///
/// Implements `Debug` manually so the admin block never reaches a log line.
#[derive(Clone, Default, PartialEq)]
pub struct Settings {
    tree: Map<String, Value>,
}

impl Settings {
    /// Parse a settings tree. The top level must be a JSON object.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidSettings` if the input is not valid JSON
    /// or not an object.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(tree)) => Ok(Self { tree }),
            Ok(other) => Err(ConfigError::InvalidSettings(format!(
                "expected an object, got {}",
                json_kind(&other)
            ))),
            Err(e) => Err(ConfigError::InvalidSettings(e.to_string())),
        }
    }

    /// Read the settings tree from an environment variable.
    ///
    /// An unset or blank variable yields empty settings.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidSettings` if the variable holds
    /// something other than a JSON object.
    pub fn from_env(var: &str) -> Result<Self, ConfigError> {
        match get_optional_env(var) {
            Some(raw) if !raw.trim().is_empty() => Self::from_json(&raw),
            _ => Ok(Self::default()),
        }
    }

    /// Look up a top-level key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.tree.get(key)
    }

    /// Returns true if the credential block is still present.
    #[must_use]
    pub fn has_admin(&self) -> bool {
        self.tree.contains_key(ADMIN_KEY)
    }

    /// The redacted tree: everything except the credential block.
    #[must_use]
    pub fn without_admin(mut self) -> Self {
        self.tree.remove(ADMIN_KEY);
        self
    }

    /// Serialize the tree back to compact JSON.
    #[must_use]
    pub fn to_json(&self) -> String {
        Value::Object(self.tree.clone()).to_string()
    }
}

impl From<Map<String, Value>> for Settings {
    fn from(tree: Map<String, Value>) -> Self {
        Self { tree }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, value) in &self.tree {
            if key == ADMIN_KEY {
                map.entry(key, &"[REDACTED]");
            } else {
                map.entry(key, value);
            }
        }
        map.finish()
    }
}

// =============================================================================
// Admin credential block
// =============================================================================

/// Identity of the first administrator, taken from the `admin` block.
///
/// Implements `Debug` manually to redact personal data.
#[derive(Clone, PartialEq, Eq)]
pub struct AdminSettings {
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub email: String,
}

impl fmt::Debug for AdminSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminSettings")
            .field("first_name", &"[REDACTED]")
            .field("last_name", &"[REDACTED]")
            .field("username", &self.username)
            .field("email", &"[REDACTED]")
            .finish()
    }
}

impl AdminSettings {
    /// Extract and validate the `admin` block.
    ///
    /// Every field must be a JSON string of non-zero length; a type check
    /// alone would accept `""`. Fields are checked in [`ADMIN_FIELDS`] order
    /// and the first violation is reported. Keys outside that list are
    /// rejected.
    ///
    /// # Errors
    ///
    /// Returns the `AdminSettingsError` naming the first offending key.
    pub fn from_settings(settings: &Settings) -> Result<Self, AdminSettingsError> {
        let block = match settings.get(ADMIN_KEY) {
            Some(Value::Object(block)) => block,
            Some(other) => {
                return Err(AdminSettingsError::NotAnObject {
                    found: json_kind(other),
                });
            }
            None => return Err(AdminSettingsError::NotAnObject { found: "nothing" }),
        };

        let [first_name, last_name, username, email] =
            ADMIN_FIELDS.map(|key| non_empty(block, key));
        let admin = Self {
            first_name: first_name?,
            last_name: last_name?,
            username: username?,
            email: email?,
        };

        if let Some(unknown) = block.keys().find(|k| !ADMIN_FIELDS.contains(&k.as_str())) {
            return Err(AdminSettingsError::UnknownKey(unknown.clone()));
        }

        Ok(admin)
    }
}

fn non_empty(block: &Map<String, Value>, key: &'static str) -> Result<String, AdminSettingsError> {
    match block.get(key) {
        None => Err(AdminSettingsError::MissingKey(key)),
        Some(Value::String(s)) if s.is_empty() => Err(AdminSettingsError::Empty(key)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(AdminSettingsError::NotAString {
            key,
            found: json_kind(other),
        }),
    }
}

// =============================================================================
// Application configuration
// =============================================================================

/// Startup configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// Base URL for enrollment links
    pub root_url: Url,
    /// Name of the environment variable holding the settings tree
    pub settings_var: String,
    /// Settings tree as read at startup (still carrying the admin block)
    pub settings: Settings,
    /// SMTP configuration (optional - links are logged when absent)
    pub email: Option<EmailConfig>,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment (e.g., "development", "production")
    pub sentry_environment: Option<String>,
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid,
    /// or if the settings variable does not hold a JSON object.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let database_url = SecretString::from(get_required_env("DATABASE_URL")?);
        let root_url = Url::parse(&get_env_or_default("ROOT_URL", DEFAULT_ROOT_URL))
            .map_err(|e| ConfigError::InvalidEnvVar("ROOT_URL".to_string(), e.to_string()))?;
        let settings_var = get_env_or_default("SETTINGS_VAR", DEFAULT_SETTINGS_VAR);
        let settings = Settings::from_env(&settings_var)?;

        Ok(Self {
            database_url,
            root_url,
            settings_var,
            settings,
            email: EmailConfig::from_env()?,
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
        })
    }
}

/// Email (SMTP) configuration.
///
/// Implements `Debug` manually to redact the password.
#[derive(Clone)]
pub struct EmailConfig {
    /// SMTP server hostname
    pub smtp_host: String,
    /// SMTP server port
    pub smtp_port: u16,
    /// SMTP authentication username
    pub smtp_username: String,
    /// SMTP authentication password
    pub smtp_password: SecretString,
    /// Email sender address (From header)
    pub from_address: String,
}

impl fmt::Debug for EmailConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailConfig")
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("smtp_username", &self.smtp_username)
            .field("smtp_password", &"[REDACTED]")
            .field("from_address", &self.from_address)
            .finish()
    }
}

impl EmailConfig {
    /// `SMTP_HOST`, `SMTP_USERNAME`, `SMTP_PASSWORD` and `SMTP_FROM` must be
    /// set together or not at all.
    fn from_env() -> Result<Option<Self>, ConfigError> {
        let host = get_optional_env("SMTP_HOST");
        let username = get_optional_env("SMTP_USERNAME");
        let password = get_optional_env("SMTP_PASSWORD");
        let from = get_optional_env("SMTP_FROM");

        match (host, username, password, from) {
            (Some(smtp_host), Some(smtp_username), Some(password), Some(from_address)) => {
                let smtp_port = get_env_or_default("SMTP_PORT", "587")
                    .parse::<u16>()
                    .map_err(|e| {
                        ConfigError::InvalidEnvVar("SMTP_PORT".to_string(), e.to_string())
                    })?;
                Ok(Some(Self {
                    smtp_host,
                    smtp_port,
                    smtp_username,
                    smtp_password: SecretString::from(password),
                    from_address,
                }))
            }
            (None, None, None, None) => Ok(None),
            _ => Err(ConfigError::InvalidEnvVar(
                "SMTP_*".to_string(),
                "SMTP_HOST, SMTP_USERNAME, SMTP_PASSWORD and SMTP_FROM must be set together"
                    .to_string(),
            )),
        }
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
