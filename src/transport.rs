use crate::compose::ComposedMessage;
use crate::config::{AuthMode, SmtpConfig, TlsMode};
use async_trait::async_trait;
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport setup failed: {0}")]
    Setup(String),
    #[error("SMTP error: {0}")]
    Smtp(String),
}

/// Delivers composed messages.
///
/// Implement this for alternative backends or for test doubles.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, message: &ComposedMessage) -> Result<(), TransportError>;
}

/// SMTP delivery through lettre. Host and credentials are fixed at
/// construction.
#[derive(Clone)]
pub struct SmtpTransport {
    inner: Arc<AsyncSmtpTransport<Tokio1Executor>>,
}

impl SmtpTransport {
    pub fn from_config(config: &SmtpConfig) -> Result<Self, TransportError> {
        let mut builder = match config.tls {
            TlsMode::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host),
            TlsMode::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| TransportError::Setup(e.to_string()))?,
            TlsMode::Starttls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| TransportError::Setup(e.to_string()))?,
        };

        builder = builder
            .port(config.port)
            .timeout(Some(Duration::from_secs(config.timeout_secs)))
            .authentication(vec![mechanism(config.auth)]);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            inner: Arc::new(builder.build()),
        })
    }
}

fn mechanism(auth: AuthMode) -> Mechanism {
    match auth {
        AuthMode::Plain => Mechanism::Plain,
        AuthMode::Login => Mechanism::Login,
        AuthMode::Xoauth2 => Mechanism::Xoauth2,
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn send(&self, message: &ComposedMessage) -> Result<(), TransportError> {
        self.inner
            .send(message.message().clone())
            .await
            .map_err(|e| TransportError::Smtp(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_builds_from_config_for_every_tls_mode() {
        for tls in [TlsMode::None, TlsMode::Tls, TlsMode::Starttls] {
            let config = SmtpConfig {
                host: "localhost".to_string(),
                username: Some("queue".to_string()),
                password: Some("secret".to_string()),
                tls,
                ..SmtpConfig::default()
            };
            assert!(SmtpTransport::from_config(&config).is_ok());
        }
    }

    #[test]
    fn test_auth_modes_map_to_mechanisms() {
        assert_eq!(mechanism(AuthMode::Plain), Mechanism::Plain);
        assert_eq!(mechanism(AuthMode::Login), Mechanism::Login);
        assert_eq!(mechanism(AuthMode::Xoauth2), Mechanism::Xoauth2);
    }
}
