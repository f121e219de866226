// src/errors.rs

use std::time::Duration;

/// Failure of a call to an external collaborator (embedding model, scoring
/// oracle, fine-tuning routine). Every variant has a defined local fallback.
#[derive(Debug, thiserror::Error)]
pub enum ExternalError {
    #[error("{service} unavailable: {reason}")]
    Unavailable {
        service: &'static str,
        reason: String,
    },

    #[error("{service} timed out after {timeout:?}")]
    Timeout {
        service: &'static str,
        timeout: Duration,
    },

    #[error("{service} returned a malformed response: {reason}")]
    MalformedResponse {
        service: &'static str,
        reason: String,
    },

    #[error("{service} failed: {reason}")]
    Failed {
        service: &'static str,
        reason: String,
    },
}

impl ExternalError {
    pub fn unavailable(service: &'static str, reason: impl ToString) -> Self {
        ExternalError::Unavailable {
            service,
            reason: reason.to_string(),
        }
    }

    pub fn malformed(service: &'static str, reason: impl ToString) -> Self {
        ExternalError::MalformedResponse {
            service,
            reason: reason.to_string(),
        }
    }

    pub fn failed(service: &'static str, reason: impl ToString) -> Self {
        ExternalError::Failed {
            service,
            reason: reason.to_string(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ExternalError::Timeout { .. })
    }
}

/// Runs `fut` under `timeout`, mapping elapsed time to [`ExternalError::Timeout`].
pub async fn with_timeout<T, F>(
    service: &'static str,
    timeout: Duration,
    fut: F,
) -> Result<T, ExternalError>
where
    F: std::future::Future<Output = Result<T, ExternalError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(ExternalError::Timeout { service, timeout }),
    }
}
