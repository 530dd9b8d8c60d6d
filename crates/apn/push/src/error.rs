//! Push errors.

use apn_core::{AppId, CodecError, NotificationId};

/// Errors raised while talking to the gateway or feedback service.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("failed to connect to {host}: {source}")]
    Connection {
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write frame: {0}")]
    Write(#[source] std::io::Error),
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("payload of notification {id} is {len} bytes")]
    PayloadTooLarge { id: NotificationId, len: usize },
    #[error("gave up after {attempts} attempts with {pending} notifications pending")]
    RetryBudgetExceeded { attempts: u32, pending: usize },
    #[error("app {app} has no push certificate")]
    MissingCertificate { app: AppId },
    #[error("certificate error: {0}")]
    Certificate(#[from] apn_crypto::CertError),
    #[error("config error: {0}")]
    Config(#[from] crate::ConfigError),
    #[error("storage error: {0:#}")]
    Storage(color_eyre::eyre::Report),
}

impl From<color_eyre::eyre::Report> for PushError {
    fn from(report: color_eyre::eyre::Report) -> Self {
        Self::Storage(report)
    }
}

impl PushError {
    /// Map a frame codec error, attributing size errors to `id`.
    pub fn from_codec(id: NotificationId, error: CodecError) -> Self {
        match error {
            CodecError::PayloadTooLarge { len } => Self::PayloadTooLarge { id, len },
            CodecError::MalformedFrame(reason) => Self::MalformedFrame(reason),
        }
    }
}
