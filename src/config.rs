//! Configuration types.

use std::time::Duration;

use crate::error::ConfigError;

/// Default Mastercard hosted checkout base used to build payment links.
pub const DEFAULT_CHECKOUT_URL: &str = "https://eu.gateway.mastercard.com/checkout/pay";

/// Console configuration.
#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    /// Base URL of the backend REST API (no trailing slash).
    pub api_base_url: String,
    /// Advisory OTP countdown window.
    pub otp_window: Duration,
    /// Per-request HTTP timeout.
    pub http_timeout: Duration,
    /// Hosted checkout base; the payment session id is appended to it.
    pub checkout_url: String,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3000".to_string(),
            otp_window: Duration::from_secs(120), // 2 minutes
            http_timeout: Duration::from_secs(30),
            checkout_url: DEFAULT_CHECKOUT_URL.to_string(),
        }
    }
}

impl ConsoleConfig {
    /// Config pointing at `api_base_url` with defaults for everything else.
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: normalize_base_url(&api_base_url.into()),
            ..Self::default()
        }
    }

    /// Build config from environment variables.
    ///
    /// `VISA_CONSOLE_API_URL` is required; the rest fall back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_base_url = std::env::var("VISA_CONSOLE_API_URL")
            .map_err(|_| ConfigError::MissingEnvVar("VISA_CONSOLE_API_URL".to_string()))?;
        if api_base_url.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "VISA_CONSOLE_API_URL".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        let otp_window = env_secs("VISA_CONSOLE_OTP_WINDOW_SECS", 120)?;
        let http_timeout = env_secs("VISA_CONSOLE_HTTP_TIMEOUT_SECS", 30)?;
        let checkout_url = std::env::var("VISA_CONSOLE_CHECKOUT_URL")
            .unwrap_or_else(|_| DEFAULT_CHECKOUT_URL.to_string());

        Ok(Self {
            api_base_url: normalize_base_url(&api_base_url),
            otp_window,
            http_timeout,
            checkout_url: checkout_url.trim_end_matches('/').to_string(),
        })
    }

    /// Hosted checkout link for a payment session.
    pub fn payment_url(&self, session_id: &str) -> String {
        format!(
            "{}/{session_id}?checkoutVersion=1.0.0",
            self.checkout_url.trim_end_matches('/')
        )
    }
}

fn env_secs(key: &str, default: u64) -> Result<Duration, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .ok_or_else(|| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected a positive number of seconds, got {raw:?}"),
            }),
        Err(_) => Ok(Duration::from_secs(default)),
    }
}

fn normalize_base_url(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_window_is_two_minutes() {
        let config = ConsoleConfig::default();
        assert_eq!(config.otp_window, Duration::from_secs(120));
        assert_eq!(config.checkout_url, DEFAULT_CHECKOUT_URL);
    }

    #[test]
    fn new_strips_trailing_slash() {
        let config = ConsoleConfig::new("https://api.example.com/ ");
        assert_eq!(config.api_base_url, "https://api.example.com");
    }

    #[test]
    fn payment_url_appends_session() {
        let config = ConsoleConfig::default();
        assert_eq!(
            config.payment_url("SESSION0001"),
            "https://eu.gateway.mastercard.com/checkout/pay/SESSION0001?checkoutVersion=1.0.0"
        );
    }
}
