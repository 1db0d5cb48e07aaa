use std::fmt;
use thiserror::Error;
use tokio::time::Duration;

#[derive(Error, Debug)]
pub enum StdError {
    #[error("JsonSerializationError: {0}")]
    JsonSerializationError(#[source] serde_json::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[source] kube::Error),

    #[error("MetadataMissing: {0}")]
    MetadataMissing(String),

    #[error("InvalidArgument: {0}")]
    InvalidArgument(String),
}

impl StdError {
    pub fn metric_label(&self) -> String {
        match self {
            StdError::JsonSerializationError(_) => "jsonserializationerror".to_string(),
            StdError::KubeError(_) => "kubeerror".to_string(),
            StdError::MetadataMissing(_) => "metadatamissing".to_string(),
            StdError::InvalidArgument(_) => "invalidargument".to_string(),
        }
    }
}

/// An error the host runtime should absorb by calling reconcile again after `duration`.
#[derive(Error, Debug)]
pub struct ErrorWithRequeue {
    pub duration: Duration,
    pub error: StdError,
}

impl ErrorWithRequeue {
    pub fn new(error: StdError, duration: Duration) -> ErrorWithRequeue {
        ErrorWithRequeue { error, duration }
    }

    pub fn metric_label(&self) -> String {
        self.error.metric_label()
    }
}

impl fmt::Display for ErrorWithRequeue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} (retry in {:?})", self.error, self.duration)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Standard Error: {0}")]
    StdError(#[source] StdError),

    #[error("Error With Requeue: {0}")]
    ErrorWithRequeue(#[source] ErrorWithRequeue),
}

impl Error {
    pub fn metric_label(&self) -> String {
        match self {
            Error::StdError(e) => e.metric_label(),
            Error::ErrorWithRequeue(e) => e.metric_label(),
        }
    }

    /// True when the API server answered with the given HTTP status code.
    pub fn is_api_code(&self, code: u16) -> bool {
        let inner = match self {
            Error::StdError(e) => e,
            Error::ErrorWithRequeue(e) => &e.error,
        };
        matches!(inner, StdError::KubeError(kube::Error::Api(err)) if err.code == code)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
