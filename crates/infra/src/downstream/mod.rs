//! Downstream record-store adapters.
//!
//! The engine only needs one capability from the external service: apply a
//! field update to a target record. Everything else (auth, schema) belongs
//! to the adapter.

pub mod http;
pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use bulkpatch_core::Operation;

pub use http::{HttpRecordUpdater, HttpUpdaterConfig};
pub use memory::InMemoryRecordTarget;

/// Failure of a single downstream call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DownstreamError {
    /// The service asked us to slow down, optionally saying for how long.
    #[error("rate limited by downstream")]
    RateLimited { retry_after: Option<Duration> },

    #[error("downstream server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Connection reset, timeout, DNS and similar transport failures.
    #[error("network error: {0}")]
    Network(String),

    /// Non-transient rejection; never retried.
    #[error("downstream rejected request ({status}): {message}")]
    Client { status: u16, message: String },
}

impl DownstreamError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, DownstreamError::RateLimited { .. })
    }

    /// Whether the retry policy may try again.
    pub fn is_transient(&self) -> bool {
        !matches!(self, DownstreamError::Client { .. })
    }

    /// Stable error category recorded on results and in drain histograms.
    pub fn code(&self) -> &'static str {
        match self {
            DownstreamError::RateLimited { .. } => "rate_limited",
            DownstreamError::Server { .. } => "server_error",
            DownstreamError::Network(_) => "network_error",
            DownstreamError::Client { status: 401 | 403, .. } => "auth_error",
            DownstreamError::Client { status: 400 | 422, .. } => "validation_error",
            DownstreamError::Client { status: 404, .. } => "not_found",
            DownstreamError::Client { .. } => "client_error",
        }
    }

    /// Map a non-success HTTP status to an error.
    pub fn from_status(status: u16, message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        match status {
            429 => DownstreamError::RateLimited { retry_after },
            500..=599 => DownstreamError::Server {
                status,
                message: message.into(),
            },
            _ => DownstreamError::Client {
                status,
                message: message.into(),
            },
        }
    }
}

/// Apply one operation to the downstream service.
#[async_trait]
pub trait RecordUpdater: Send + Sync {
    async fn apply(&self, operation: &Operation) -> Result<(), DownstreamError>;
}

#[async_trait]
impl<U> RecordUpdater for Arc<U>
where
    U: RecordUpdater + ?Sized,
{
    async fn apply(&self, operation: &Operation) -> Result<(), DownstreamError> {
        (**self).apply(operation).await
    }
}
