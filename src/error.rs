//! Error types for the visa console.

use std::time::Duration;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Failures talking to the backend.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Transport failure: no response was received.
    #[error("Request to {endpoint} failed: {reason}")]
    Network { endpoint: String, reason: String },

    /// Response received with a failure status.
    #[error("{endpoint} returned {status}: {message}")]
    Status {
        endpoint: String,
        status: u16,
        message: String,
    },

    /// Response received but its body is unusable.
    #[error("Invalid response from {endpoint}: {reason}")]
    InvalidResponse { endpoint: String, reason: String },

    #[error("Request to {endpoint} timed out after {timeout:?}")]
    Timeout { endpoint: String, timeout: Duration },
}

impl ApiError {
    /// Message shown to the operator.
    pub fn user_message(&self) -> String {
        match self {
            Self::Status {
                status, message, ..
            } => format!("Error: {status} - {message}"),
            Self::Network { reason, .. } => format!("Error: {reason}"),
            Self::InvalidResponse { reason, .. } => format!("Error: {reason}"),
            Self::Timeout { timeout, .. } => {
                format!("Error: request timed out after {}s", timeout.as_secs())
            }
        }
    }

    /// Whether no response was received at all.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Timeout { .. })
    }
}

/// Application flow controller errors.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("Validation failed: {field} is required")]
    Validation { field: &'static str },

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("OTP expired. Please request a new OTP.")]
    Expired,

    #[error("OTP verification failed.")]
    VerificationFailed,

    #[error("Cannot {operation} while {stage}")]
    InvalidStage {
        operation: &'static str,
        stage: String,
    },

    #[error("Another request ({operation}) is still in flight")]
    RequestInFlight { operation: &'static str },

    #[error("Cannot {operation}: the session was reset while the request was in flight")]
    Superseded { operation: &'static str },
}

impl FlowError {
    /// Message shown to the operator.
    pub fn user_message(&self) -> String {
        match self {
            Self::Api(e) => e.user_message(),
            other => other.to_string(),
        }
    }
}

/// Account directory errors.
#[derive(Debug, thiserror::Error)]
pub enum AccountsError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Email already exists. Please use a different email.")]
    DuplicateEmail { email: String },

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AccountsError {
    /// Message shown to the operator.
    pub fn user_message(&self) -> String {
        match self {
            Self::Api(e) => e.user_message(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_renders_like_the_console() {
        let err = ApiError::Status {
            endpoint: "/api/send-otp".into(),
            status: 404,
            message: "Token not found".into(),
        };
        assert_eq!(err.user_message(), "Error: 404 - Token not found");
        assert!(!err.is_network());
    }

    #[test]
    fn network_error_renders_reason_only() {
        let err = ApiError::Network {
            endpoint: "/captcha".into(),
            reason: "connection refused".into(),
        };
        assert_eq!(err.user_message(), "Error: connection refused");
        assert!(err.is_network());
    }

    #[test]
    fn flow_error_unwraps_api_message() {
        let err = FlowError::from(ApiError::Status {
            endpoint: "/visa-application".into(),
            status: 500,
            message: "boom".into(),
        });
        assert_eq!(err.user_message(), "Error: 500 - boom");
        assert_eq!(
            FlowError::Expired.user_message(),
            "OTP expired. Please request a new OTP."
        );
    }
}
