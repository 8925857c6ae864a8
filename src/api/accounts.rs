//! Accounts API: CRUD, existence check, token purge, bulk enable and
//! spreadsheet import.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};

use super::ApiClient;
use crate::error::ApiError;

/// An account as stored by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub email: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub is_disabled: bool,
    #[serde(default)]
    pub hit_count: i64,
    #[serde(default)]
    pub id_user: String,
    #[serde(default)]
    pub last_hit_at: Option<DateTime<Utc>>,
}

/// Create/update payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountDraft {
    pub email: String,
    pub password: String,
    pub is_disabled: bool,
    pub hit_count: i64,
    pub id_user: String,
}

impl From<&Account> for AccountDraft {
    fn from(account: &Account) -> Self {
        Self {
            email: account.email.clone(),
            password: account.password.clone().unwrap_or_default(),
            is_disabled: account.is_disabled,
            hit_count: account.hit_count,
            id_user: account.id_user.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExistsResponse {
    #[serde(default)]
    exists: bool,
}

#[derive(Debug, Serialize)]
struct EnableBody {
    /// The backend takes the form value as typed, a decimal string.
    minutes: String,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    #[serde(default)]
    message: Option<String>,
}

/// Backend operations behind the account views.
#[async_trait]
pub trait AccountsApi: Send + Sync {
    async fn list(&self) -> Result<Vec<Account>, ApiError>;

    async fn create(&self, draft: &AccountDraft) -> Result<(), ApiError>;

    async fn update(&self, id: i64, draft: &AccountDraft) -> Result<(), ApiError>;

    async fn delete(&self, id: i64) -> Result<(), ApiError>;

    async fn email_exists(&self, email: &str) -> Result<bool, ApiError>;

    /// Delete every token issued to `id_user`.
    async fn delete_tokens(&self, id_user: &str) -> Result<(), ApiError>;

    /// Re-enable accounts disabled for at least `minutes`. Returns the
    /// backend's confirmation message.
    async fn enable_disabled(&self, minutes: u32) -> Result<String, ApiError>;

    /// Upload a spreadsheet of accounts for bulk creation.
    async fn upload_spreadsheet(&self, file_name: &str, bytes: Vec<u8>) -> Result<(), ApiError>;
}

/// `AccountsApi` over HTTP/JSON.
#[derive(Debug, Clone)]
pub struct HttpAccountsApi {
    client: ApiClient,
}

impl HttpAccountsApi {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AccountsApi for HttpAccountsApi {
    async fn list(&self) -> Result<Vec<Account>, ApiError> {
        const ENDPOINT: &str = "/accounts";
        let request = self.client.http().get(self.client.url(ENDPOINT));
        self.client.send_json(ENDPOINT, request).await
    }

    async fn create(&self, draft: &AccountDraft) -> Result<(), ApiError> {
        const ENDPOINT: &str = "/accounts";
        let request = self.client.http().post(self.client.url(ENDPOINT)).json(draft);
        self.client.send(ENDPOINT, request).await?;
        Ok(())
    }

    async fn update(&self, id: i64, draft: &AccountDraft) -> Result<(), ApiError> {
        let endpoint = format!("/accounts/{id}");
        let request = self.client.http().put(self.client.url(&endpoint)).json(draft);
        self.client.send(&endpoint, request).await?;
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<(), ApiError> {
        let endpoint = format!("/accounts/{id}");
        let request = self.client.http().delete(self.client.url(&endpoint));
        self.client.send(&endpoint, request).await?;
        Ok(())
    }

    async fn email_exists(&self, email: &str) -> Result<bool, ApiError> {
        const ENDPOINT: &str = "/accounts/check-email";
        let request = self
            .client
            .http()
            .get(self.client.url(ENDPOINT))
            .query(&[("email", email)]);
        let body: ExistsResponse = self.client.send_json(ENDPOINT, request).await?;
        Ok(body.exists)
    }

    async fn delete_tokens(&self, id_user: &str) -> Result<(), ApiError> {
        let endpoint = format!("/tokens/{id_user}");
        let request = self.client.http().delete(self.client.url(&endpoint));
        self.client.send(&endpoint, request).await?;
        Ok(())
    }

    async fn enable_disabled(&self, minutes: u32) -> Result<String, ApiError> {
        const ENDPOINT: &str = "/enable-accounts";
        let request = self
            .client
            .http()
            .post(self.client.url(ENDPOINT))
            .json(&EnableBody {
                minutes: minutes.to_string(),
            });
        let body: MessageResponse = self.client.send_json(ENDPOINT, request).await?;
        Ok(body
            .message
            .unwrap_or_else(|| "Accounts enabled.".to_string()))
    }

    async fn upload_spreadsheet(&self, file_name: &str, bytes: Vec<u8>) -> Result<(), ApiError> {
        const ENDPOINT: &str = "/upload-excel";
        let part = Part::bytes(bytes).file_name(file_name.to_string());
        let form = Form::new().part("file", part);
        let request = self
            .client
            .http()
            .post(self.client.url(ENDPOINT))
            .multipart(form);
        self.client.send(ENDPOINT, request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn account_parses_with_missing_optionals() {
        let account: Account = serde_json::from_value(json!({
            "id": 7,
            "email": "ops@example.com",
            "id_user": "u-7"
        }))
        .unwrap();
        assert_eq!(account.id, 7);
        assert!(!account.is_disabled);
        assert_eq!(account.hit_count, 0);
        assert!(account.last_hit_at.is_none());
    }

    #[test]
    fn draft_from_account_keeps_fields() {
        let account = Account {
            id: 1,
            email: "a@b.com".into(),
            password: Some("pw".into()),
            is_disabled: true,
            hit_count: 4,
            id_user: "u1".into(),
            last_hit_at: None,
        };
        let draft = AccountDraft::from(&account);
        assert_eq!(draft.email, "a@b.com");
        assert_eq!(draft.password, "pw");
        assert!(draft.is_disabled);
        assert_eq!(draft.hit_count, 4);
        assert_eq!(draft.id_user, "u1");
    }
}
