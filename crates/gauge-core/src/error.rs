use thiserror::Error;

pub type MetricsResult<T> = std::result::Result<T, MetricsError>;

#[derive(Debug, Error)]
pub enum MetricsError {
    /// A mean was requested from an accumulator with no records.
    #[error("empty aggregate: mean requested before any value was recorded")]
    EmptyAggregate,

    /// The registry cell already holds an instance.
    #[error("metrics registry already exists; use the shared instance instead of creating another")]
    DuplicateSingleton,

    /// A telemetry operation was attempted before `initialize` succeeded.
    #[error("telemetry backend is not active; call initialize first")]
    NotActive,

    /// A telemetry operation was attempted after `finish`.
    #[error("telemetry backend run is finished")]
    BackendFinished,

    /// `initialize` was called on a backend that already has an open run.
    #[error("telemetry backend is already active")]
    AlreadyActive,

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("run creation failed: {0}")]
    RunCreation(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("invalid precision spec: {0}")]
    InvalidPrecision(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl MetricsError {
    /// True for errors raised because a telemetry backend is outside its valid state window.
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, Self::NotActive | Self::BackendFinished | Self::AlreadyActive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: MetricsError = io_err.into();
        match err {
            MetricsError::Io(_) => {}
            other => panic!("Expected Io error variant, got {other:?}"),
        }
    }

    #[test]
    fn test_lifecycle_classification() {
        assert!(MetricsError::NotActive.is_lifecycle());
        assert!(MetricsError::BackendFinished.is_lifecycle());
        assert!(!MetricsError::EmptyAggregate.is_lifecycle());
        assert!(!MetricsError::Publish("503".to_string()).is_lifecycle());
    }

    #[test]
    fn test_display_includes_context() {
        let err = MetricsError::Authentication("invalid api key".to_string());
        assert_eq!(err.to_string(), "authentication failed: invalid api key");
    }
}
