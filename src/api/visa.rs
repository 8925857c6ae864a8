//! Visa/OTP API: token issuance, OTP send/verify, application data,
//! captcha and final submission.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::ApiClient;
use crate::error::ApiError;

/// Opaque application record owned by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApplicationData(pub serde_json::Value);

impl ApplicationData {
    /// Phone number the OTP is delivered to, if the record exposes one.
    pub fn phone_number(&self) -> Option<&str> {
        ["phone_number", "phoneNumber", "phone"]
            .iter()
            .find_map(|key| self.0.get(*key).and_then(|v| v.as_str()))
    }
}

/// `GET /visa-application?email=` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub token: String,
    #[serde(default)]
    pub visa_application_data: Option<ApplicationData>,
    #[serde(default)]
    pub token_expires_at: Option<DateTime<Utc>>,
}

/// `POST /api/verify-otp` response.
#[derive(Debug, Clone, Deserialize)]
pub struct VerifyResponse {
    #[serde(default)]
    pub message: serde_json::Value,
}

impl VerifyResponse {
    /// The backend signals success with a literal `true` message.
    pub fn is_verified(&self) -> bool {
        self.message == serde_json::Value::Bool(true)
    }
}

/// `POST /api/submit-visa` request body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest<'a> {
    pub token: &'a str,
    pub application_data: &'a ApplicationData,
    pub recaptcha_token: &'a str,
}

/// `POST /api/submit-visa` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    #[serde(default)]
    pub message: Option<serde_json::Value>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub reservation_link: Option<String>,
}

#[derive(Debug, Serialize)]
struct TokenBody<'a> {
    token: &'a str,
}

#[derive(Debug, Serialize)]
struct VerifyBody<'a> {
    token: &'a str,
    otp: &'a str,
}

#[derive(Debug, Serialize)]
struct StoredOtpBody<'a> {
    email: &'a str,
    otp: &'a str,
}

#[derive(Debug, Deserialize)]
struct CaptchaResponse {
    value: String,
}

/// Backend operations the application flow depends on.
#[async_trait]
pub trait VisaApi: Send + Sync {
    /// Issue a session token and return the current application snapshot.
    async fn issue_token(&self, email: &str) -> Result<TokenResponse, ApiError>;

    /// Re-fetch the application snapshot for an email.
    async fn fetch_application(&self, email: &str) -> Result<Option<ApplicationData>, ApiError> {
        Ok(self.issue_token(email).await?.visa_application_data)
    }

    /// Dispatch an OTP to the applicant.
    async fn send_otp(&self, token: &SecretString) -> Result<(), ApiError>;

    /// Check an OTP against the session token.
    async fn verify_otp(&self, token: &SecretString, otp: &str)
    -> Result<VerifyResponse, ApiError>;

    /// Record the verified OTP against the application.
    async fn update_stored_otp(&self, email: &str, otp: &str) -> Result<(), ApiError>;

    /// Obtain an anti-automation token for submission.
    async fn captcha(&self) -> Result<String, ApiError>;

    /// Submit the finalized application and create the payment session.
    async fn submit(
        &self,
        token: &SecretString,
        application: &ApplicationData,
        captcha_token: &str,
    ) -> Result<SubmitResponse, ApiError>;
}

/// `VisaApi` over HTTP/JSON.
#[derive(Debug, Clone)]
pub struct HttpVisaApi {
    client: ApiClient,
}

impl HttpVisaApi {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl VisaApi for HttpVisaApi {
    async fn issue_token(&self, email: &str) -> Result<TokenResponse, ApiError> {
        const ENDPOINT: &str = "/visa-application";
        let request = self
            .client
            .http()
            .get(self.client.url(ENDPOINT))
            .query(&[("email", email)]);
        self.client.send_json(ENDPOINT, request).await
    }

    async fn send_otp(&self, token: &SecretString) -> Result<(), ApiError> {
        const ENDPOINT: &str = "/api/send-otp";
        let request = self
            .client
            .http()
            .post(self.client.url(ENDPOINT))
            .json(&TokenBody {
                token: token.expose_secret(),
            });
        self.client.send(ENDPOINT, request).await?;
        Ok(())
    }

    async fn verify_otp(
        &self,
        token: &SecretString,
        otp: &str,
    ) -> Result<VerifyResponse, ApiError> {
        const ENDPOINT: &str = "/api/verify-otp";
        let request = self
            .client
            .http()
            .post(self.client.url(ENDPOINT))
            .json(&VerifyBody {
                token: token.expose_secret(),
                otp,
            });
        self.client.send_json(ENDPOINT, request).await
    }

    async fn update_stored_otp(&self, email: &str, otp: &str) -> Result<(), ApiError> {
        const ENDPOINT: &str = "/visa-application/otp";
        let request = self
            .client
            .http()
            .put(self.client.url(ENDPOINT))
            .json(&StoredOtpBody { email, otp });
        self.client.send(ENDPOINT, request).await?;
        Ok(())
    }

    async fn captcha(&self) -> Result<String, ApiError> {
        const ENDPOINT: &str = "/captcha";
        let request = self.client.http().get(self.client.url(ENDPOINT));
        let body: CaptchaResponse = self.client.send_json(ENDPOINT, request).await?;
        Ok(body.value)
    }

    async fn submit(
        &self,
        token: &SecretString,
        application: &ApplicationData,
        captcha_token: &str,
    ) -> Result<SubmitResponse, ApiError> {
        const ENDPOINT: &str = "/api/submit-visa";
        let request = self
            .client
            .http()
            .post(self.client.url(ENDPOINT))
            .json(&SubmitRequest {
                token: token.expose_secret(),
                application_data: application,
                recaptcha_token: captcha_token,
            });
        self.client.send_json(ENDPOINT, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn token_response_parses_backend_shape() {
        let parsed: TokenResponse = serde_json::from_value(json!({
            "token": "t1",
            "visaApplicationData": { "phone_number": "+15550100", "name": "A" },
            "tokenExpiresAt": "2026-10-19T12:00:00Z"
        }))
        .unwrap();

        assert_eq!(parsed.token, "t1");
        let data = parsed.visa_application_data.unwrap();
        assert_eq!(data.phone_number(), Some("+15550100"));
        assert!(parsed.token_expires_at.is_some());
    }

    #[test]
    fn token_response_tolerates_null_application() {
        let parsed: TokenResponse = serde_json::from_value(json!({
            "token": "t1",
            "visaApplicationData": null
        }))
        .unwrap();
        assert!(parsed.visa_application_data.is_none());
        assert!(parsed.token_expires_at.is_none());
    }

    #[test]
    fn verify_requires_literal_true() {
        let ok: VerifyResponse = serde_json::from_value(json!({ "message": true })).unwrap();
        let no: VerifyResponse = serde_json::from_value(json!({ "message": false })).unwrap();
        let text: VerifyResponse =
            serde_json::from_value(json!({ "message": "OTP is valid" })).unwrap();
        let missing: VerifyResponse = serde_json::from_value(json!({})).unwrap();

        assert!(ok.is_verified());
        assert!(!no.is_verified());
        assert!(!text.is_verified());
        assert!(!missing.is_verified());
    }

    #[test]
    fn submit_request_uses_camel_case() {
        let data = ApplicationData(json!({ "phoneNumber": "1" }));
        let body = serde_json::to_value(SubmitRequest {
            token: "t1",
            application_data: &data,
            recaptcha_token: "cap",
        })
        .unwrap();
        assert_eq!(
            body,
            json!({
                "token": "t1",
                "applicationData": { "phoneNumber": "1" },
                "recaptchaToken": "cap"
            })
        );
    }
}
