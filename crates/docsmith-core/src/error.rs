//! Error types for docsmith.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Malformed job input. Terminal.
    #[error("invalid job: {0}")]
    Validation(String),

    /// Entitlement or publish-configuration denial. Terminal.
    #[error("not authorized: {0}")]
    Authorization(String),

    #[error("build failed: {0}")]
    Build(String),

    #[error("source control failed: {0}")]
    SourceControl(String),

    /// Deploy-stage failure. Terminal by policy.
    #[error("deploy failed: {0}")]
    Deploy(String),

    /// A job store call exceeded its deadline. Affects the poll loop only.
    #[error("storage timeout: {0}")]
    StorageTimeout(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("cdn error: {0}")]
    Cdn(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a job hitting this error should go back on the queue
    /// (subject to the failure-count threshold).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Build(_) | Error::SourceControl(_) | Error::Timeout(_)
        )
    }

    /// Whether this error comes from the job store rather than the job.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Error::StorageTimeout(_) | Error::Storage(_) | Error::NotFound(_)
        )
    }

    /// The bare message, without the category prefix added by `Display`.
    pub fn message(&self) -> &str {
        match self {
            Error::Validation(m)
            | Error::Authorization(m)
            | Error::Build(m)
            | Error::SourceControl(m)
            | Error::Deploy(m)
            | Error::StorageTimeout(m)
            | Error::Storage(m)
            | Error::NotFound(m)
            | Error::InvalidState(m)
            | Error::Cdn(m)
            | Error::Timeout(m)
            | Error::Internal(m) => m,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_taxonomy() {
        assert!(Error::Build("make failed".into()).is_retryable());
        assert!(Error::SourceControl("clone failed".into()).is_retryable());
        assert!(!Error::Deploy("upload failed".into()).is_retryable());
        assert!(!Error::Validation("bad branch".into()).is_retryable());
        assert!(!Error::Authorization("not entitled".into()).is_retryable());
        assert!(!Error::StorageTimeout("claim".into()).is_retryable());
    }

    #[test]
    fn test_invalid_state_displays_bare_message() {
        let err = Error::InvalidState("abc is stopped".into());
        assert_eq!(err.to_string(), "abc is stopped");
        assert_eq!(err.message(), "abc is stopped");
    }
}
