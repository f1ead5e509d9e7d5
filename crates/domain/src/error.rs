/// Shared error type used across all ModelGate crates.
///
/// Variants map 1:1 onto the HTTP error taxonomy in the gateway: the API
/// layer converts them without inspecting messages.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid request: {param}: {message}")]
    InvalidRequest { param: String, message: String },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// Model activation rejected: the record's format cannot be served
    /// by the local engine.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Model activation rejected: the record points at a remote provider.
    #[error("not a local model: {0}")]
    NotLocal(String),

    #[error("model not found on disk: {0}")]
    ModelNotFoundOnDisk(String),

    /// The engine subprocess died while we were waiting for readiness.
    #[error("subprocess exited: {0}")]
    SubprocessExited(String),

    /// Readiness heuristic triggered: the engine is up but never became
    /// healthy.
    #[error("stuck: {0}")]
    Stuck(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable code for event payloads and API bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidRequest { .. } => "invalid_request",
            Error::Forbidden(_) => "forbidden",
            Error::NotFound(_) | Error::ModelNotFoundOnDisk(_) => "not_found",
            Error::PreconditionFailed(_) => "precondition_failed",
            Error::UnsupportedFormat(_) => "unsupported_format",
            Error::NotLocal(_) => "not_local",
            Error::SubprocessExited(_) => "subprocess_exited",
            Error::Stuck(_) => "stuck",
            Error::Timeout(_) => "timeout",
            Error::Cancelled(_) => "cancelled",
            _ => "internal",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(
            Error::InvalidRequest {
                param: "messages".into(),
                message: "must not be empty".into()
            }
            .code(),
            "invalid_request"
        );
        assert_eq!(Error::Stuck("readiness".into()).code(), "stuck");
        assert_eq!(
            Error::SubprocessExited("code 1".into()).code(),
            "subprocess_exited"
        );
        assert_eq!(Error::Internal("boom".into()).code(), "internal");
    }

    #[test]
    fn cancelled_predicate() {
        assert!(Error::Cancelled("user".into()).is_cancelled());
        assert!(!Error::Timeout("240s".into()).is_cancelled());
    }
}
