use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_PATH: &str = "settings.toml";
pub const PASSWORD_ENV: &str = "MAILQ_SMTP_PASSWORD";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub defaults: MessageDefaults,
    #[serde(default)]
    pub queue: QueueConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:mailq.db?mode=rwc".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    #[default]
    Plain,
    Login,
    Xoauth2,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    #[default]
    Starttls,
    Tls,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub auth: AuthMode,
    pub tls: TlsMode,
    pub timeout_secs: u64,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 587,
            username: None,
            password: None,
            auth: AuthMode::default(),
            tls: TlsMode::default(),
            timeout_secs: 10,
        }
    }
}

/// Addresses applied when a payload leaves `from` or `sender` unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageDefaults {
    pub from: String,
    pub sender: String,
}

impl Default for MessageDefaults {
    fn default() -> Self {
        Self {
            from: "no-reply@localhost.localdomain".to_string(),
            sender: "no-reply@localhost.localdomain".to_string(),
        }
    }
}

/// Which date a dispatch attempt records as `send_date`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendDatePolicy {
    /// The day the attempt ran.
    #[default]
    Dispatch,
    /// The day the job was enqueued, as the legacy queue recorded it.
    Insert,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub insert_user: String,
    pub send_date: SendDatePolicy,
    /// Jobs that already used this many attempts are reported, not sent.
    pub max_attempts: Option<u32>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            insert_user: "mailq".to_string(),
            send_date: SendDatePolicy::default(),
            max_attempts: None,
        }
    }
}

impl Config {
    /// Load `settings.toml` from the working directory. A missing file means
    /// the built-in defaults; an unparsable one is an error.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::load_from(DEFAULT_PATH) {
            Err(ConfigError::Read { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                tracing::warn!("{DEFAULT_PATH} not found, using default configuration");
                let mut config = Self::default();
                config.apply_env();
                Ok(config)
            }
            other => other,
        }
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.apply_env();
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    fn apply_env(&mut self) {
        if let Ok(password) = std::env::var(PASSWORD_ENV) {
            self.smtp.password = Some(password);
        }
    }
}
