//! Account directory: cached account list plus the management actions the
//! console exposes on top of the Accounts API.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::api::{Account, AccountDraft, AccountsApi};
use crate::error::AccountsError;

/// Counts shown above the account list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AccountSummary {
    pub total: usize,
    pub disabled: usize,
    pub enabled: usize,
}

impl AccountSummary {
    pub fn of(accounts: &[Account]) -> Self {
        let total = accounts.len();
        let disabled = accounts.iter().filter(|a| a.is_disabled).count();
        Self {
            total,
            disabled,
            enabled: total - disabled,
        }
    }
}

/// Whether `save` created a new account or updated an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Created,
    Updated,
}

impl SaveOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Created => "Account created successfully.",
            Self::Updated => "Account updated successfully.",
        }
    }
}

/// Order accounts by most recent hit first; never-hit accounts go last.
pub fn sort_by_recent_hit(accounts: &mut [Account]) {
    accounts.sort_by(|a, b| b.last_hit_at.cmp(&a.last_hit_at));
}

/// In-memory view of the backend's accounts.
pub struct AccountDirectory {
    api: Arc<dyn AccountsApi>,
    accounts: RwLock<Vec<Account>>,
}

impl AccountDirectory {
    pub fn new(api: Arc<dyn AccountsApi>) -> Self {
        Self {
            api,
            accounts: RwLock::new(Vec::new()),
        }
    }

    /// Reload the list from the backend. Returns the number of accounts.
    pub async fn refresh(&self) -> Result<usize, AccountsError> {
        let mut fetched = self.api.list().await?;
        sort_by_recent_hit(&mut fetched);
        let count = fetched.len();
        *self.accounts.write().await = fetched;
        debug!(count, "Account list refreshed");
        Ok(count)
    }

    /// Cached accounts, most recently hit first.
    pub async fn accounts(&self) -> Vec<Account> {
        self.accounts.read().await.clone()
    }

    pub async fn find(&self, id: i64) -> Option<Account> {
        self.accounts
            .read()
            .await
            .iter()
            .find(|a| a.id == id)
            .cloned()
    }

    pub async fn summary(&self) -> AccountSummary {
        AccountSummary::of(&self.accounts.read().await)
    }

    /// Create an account, or update `selected` when editing.
    ///
    /// Rejects an email that already belongs to another account. A failed
    /// existence check is treated as "not taken".
    pub async fn save(
        &self,
        draft: AccountDraft,
        selected: Option<&Account>,
    ) -> Result<SaveOutcome, AccountsError> {
        validate_draft(&draft)?;

        let exists = match self.api.email_exists(&draft.email).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!(error = %e, "Email existence check failed; assuming it is free");
                false
            }
        };
        let own_email = selected.is_some_and(|account| account.email == draft.email);
        if exists && !own_email {
            return Err(AccountsError::DuplicateEmail { email: draft.email });
        }

        let outcome = match selected {
            Some(account) => {
                self.api.update(account.id, &draft).await?;
                info!(id = account.id, email = %draft.email, "Account updated");
                SaveOutcome::Updated
            }
            None => {
                self.api.create(&draft).await?;
                info!(email = %draft.email, "Account created");
                SaveOutcome::Created
            }
        };

        self.refresh_quietly().await;
        Ok(outcome)
    }

    /// Delete one account and drop it from the cached list.
    pub async fn delete(&self, id: i64) -> Result<(), AccountsError> {
        self.api.delete(id).await?;
        self.accounts.write().await.retain(|a| a.id != id);
        info!(id, "Account deleted");
        Ok(())
    }

    /// Delete every token issued to `id_user`.
    pub async fn delete_tokens(&self, id_user: &str) -> Result<(), AccountsError> {
        let id_user = id_user.trim();
        if id_user.is_empty() {
            return Err(AccountsError::Validation("id_user is required".to_string()));
        }
        self.api.delete_tokens(id_user).await?;
        info!(id_user, "User tokens deleted");
        self.refresh_quietly().await;
        Ok(())
    }

    /// Re-enable accounts that have been disabled for at least `minutes`.
    pub async fn enable_disabled(&self, minutes: u32) -> Result<String, AccountsError> {
        if minutes == 0 {
            return Err(AccountsError::Validation(
                "minutes must be greater than zero".to_string(),
            ));
        }
        let message = self.api.enable_disabled(minutes).await?;
        info!(minutes, "Disabled accounts re-enabled");
        self.refresh_quietly().await;
        Ok(message)
    }

    /// Upload a spreadsheet of accounts for bulk creation.
    pub async fn upload_spreadsheet(&self, path: &Path) -> Result<(), AccountsError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AccountsError::Validation("Please select a file.".to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("accounts.xlsx");

        self.api.upload_spreadsheet(file_name, bytes).await?;
        info!(file = file_name, "Spreadsheet uploaded");
        self.refresh_quietly().await;
        Ok(())
    }

    async fn refresh_quietly(&self) {
        if let Err(e) = self.refresh().await {
            warn!(error = %e, "Failed to refresh accounts");
        }
    }
}

fn validate_draft(draft: &AccountDraft) -> Result<(), AccountsError> {
    if draft.email.trim().is_empty() {
        return Err(AccountsError::Validation("email is required".to_string()));
    }
    if draft.id_user.trim().is_empty() {
        return Err(AccountsError::Validation("id_user is required".to_string()));
    }
    if draft.hit_count < 0 {
        return Err(AccountsError::Validation(
            "hit_count cannot be negative".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    use crate::error::ApiError;

    #[derive(Default)]
    struct StubAccountsApi {
        accounts: Mutex<Vec<Account>>,
        taken_emails: Vec<String>,
        fail_exists_check: bool,
        calls: Mutex<Vec<String>>,
    }

    impl StubAccountsApi {
        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AccountsApi for StubAccountsApi {
        async fn list(&self) -> Result<Vec<Account>, ApiError> {
            self.record("list");
            Ok(self.accounts.lock().unwrap().clone())
        }

        async fn create(&self, draft: &AccountDraft) -> Result<(), ApiError> {
            self.record(format!("create {}", draft.email));
            let mut accounts = self.accounts.lock().unwrap();
            let id = accounts.len() as i64 + 1;
            accounts.push(account(id, &draft.email, false, None));
            Ok(())
        }

        async fn update(&self, id: i64, draft: &AccountDraft) -> Result<(), ApiError> {
            self.record(format!("update {id} {}", draft.email));
            Ok(())
        }

        async fn delete(&self, id: i64) -> Result<(), ApiError> {
            self.record(format!("delete {id}"));
            Ok(())
        }

        async fn email_exists(&self, email: &str) -> Result<bool, ApiError> {
            self.record("email_exists");
            if self.fail_exists_check {
                return Err(ApiError::Network {
                    endpoint: "/accounts/check-email".into(),
                    reason: "connection reset".into(),
                });
            }
            Ok(self.taken_emails.iter().any(|e| e == email))
        }

        async fn delete_tokens(&self, id_user: &str) -> Result<(), ApiError> {
            self.record(format!("delete_tokens {id_user}"));
            Ok(())
        }

        async fn enable_disabled(&self, minutes: u32) -> Result<String, ApiError> {
            self.record(format!("enable {minutes}"));
            Ok(format!("Enabled accounts disabled for {minutes} minutes"))
        }

        async fn upload_spreadsheet(
            &self,
            file_name: &str,
            bytes: Vec<u8>,
        ) -> Result<(), ApiError> {
            self.record(format!("upload {file_name} {}", bytes.len()));
            Ok(())
        }
    }

    fn account(id: i64, email: &str, disabled: bool, hit_hour: Option<u32>) -> Account {
        Account {
            id,
            email: email.to_string(),
            password: None,
            is_disabled: disabled,
            hit_count: 0,
            id_user: format!("u{id}"),
            last_hit_at: hit_hour.map(|h| Utc.with_ymd_and_hms(2026, 10, 1, h, 0, 0).unwrap()),
        }
    }

    fn draft(email: &str) -> AccountDraft {
        AccountDraft {
            email: email.to_string(),
            id_user: "u-new".to_string(),
            ..Default::default()
        }
    }

    fn directory(api: StubAccountsApi) -> (AccountDirectory, Arc<StubAccountsApi>) {
        let api = Arc::new(api);
        let dyn_api: Arc<dyn AccountsApi> = api.clone();
        (AccountDirectory::new(dyn_api), api)
    }

    #[tokio::test]
    async fn refresh_sorts_most_recent_hit_first() {
        let stub = StubAccountsApi::default();
        *stub.accounts.lock().unwrap() = vec![
            account(1, "old@x.com", false, Some(1)),
            account(2, "never@x.com", true, None),
            account(3, "new@x.com", false, Some(9)),
        ];
        let (dir, _api) = directory(stub);

        assert_eq!(dir.refresh().await.unwrap(), 3);
        let emails: Vec<_> = dir.accounts().await.into_iter().map(|a| a.email).collect();
        assert_eq!(emails, ["new@x.com", "old@x.com", "never@x.com"]);
    }

    #[tokio::test]
    async fn summary_counts_disabled_and_enabled() {
        let stub = StubAccountsApi::default();
        *stub.accounts.lock().unwrap() = vec![
            account(1, "a@x.com", true, None),
            account(2, "b@x.com", false, None),
            account(3, "c@x.com", true, None),
        ];
        let (dir, _api) = directory(stub);
        dir.refresh().await.unwrap();

        assert_eq!(
            dir.summary().await,
            AccountSummary {
                total: 3,
                disabled: 2,
                enabled: 1
            }
        );
        assert_eq!(AccountSummary::of(&[]), AccountSummary::default());
    }

    #[tokio::test]
    async fn create_rejects_taken_email() {
        let (dir, api) = directory(StubAccountsApi {
            taken_emails: vec!["dup@x.com".to_string()],
            ..Default::default()
        });

        let err = dir.save(draft("dup@x.com"), None).await.unwrap_err();
        assert!(matches!(err, AccountsError::DuplicateEmail { .. }));
        assert_eq!(
            err.user_message(),
            "Email already exists. Please use a different email."
        );
        assert_eq!(api.calls(), vec!["email_exists"]);
    }

    #[tokio::test]
    async fn update_keeps_own_email() {
        let (dir, api) = directory(StubAccountsApi {
            taken_emails: vec!["mine@x.com".to_string()],
            ..Default::default()
        });
        let selected = account(4, "mine@x.com", false, None);

        let outcome = dir.save(draft("mine@x.com"), Some(&selected)).await.unwrap();
        assert_eq!(outcome, SaveOutcome::Updated);
        assert_eq!(outcome.message(), "Account updated successfully.");
        assert!(api.calls().contains(&"update 4 mine@x.com".to_string()));
    }

    #[tokio::test]
    async fn create_proceeds_when_existence_check_fails() {
        let (dir, api) = directory(StubAccountsApi {
            fail_exists_check: true,
            ..Default::default()
        });

        let outcome = dir.save(draft("fresh@x.com"), None).await.unwrap();
        assert_eq!(outcome, SaveOutcome::Created);
        assert_eq!(
            api.calls(),
            vec!["email_exists", "create fresh@x.com", "list"]
        );
        assert_eq!(dir.summary().await.total, 1);
    }

    #[tokio::test]
    async fn save_requires_email_and_user_id() {
        let (dir, api) = directory(StubAccountsApi::default());

        let mut missing_user = draft("a@x.com");
        missing_user.id_user.clear();
        assert!(matches!(
            dir.save(missing_user, None).await,
            Err(AccountsError::Validation(_))
        ));
        assert!(matches!(
            dir.save(draft(""), None).await,
            Err(AccountsError::Validation(_))
        ));
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn delete_drops_account_from_cache() {
        let stub = StubAccountsApi::default();
        *stub.accounts.lock().unwrap() = vec![
            account(1, "a@x.com", false, None),
            account(2, "b@x.com", false, None),
        ];
        let (dir, _api) = directory(stub);
        dir.refresh().await.unwrap();

        dir.delete(1).await.unwrap();
        assert!(dir.find(1).await.is_none());
        assert!(dir.find(2).await.is_some());
    }

    #[tokio::test]
    async fn enable_and_token_purge_validate_input() {
        let (dir, api) = directory(StubAccountsApi::default());

        assert!(matches!(
            dir.enable_disabled(0).await,
            Err(AccountsError::Validation(_))
        ));
        assert!(matches!(
            dir.delete_tokens("  ").await,
            Err(AccountsError::Validation(_))
        ));

        let message = dir.enable_disabled(30).await.unwrap();
        assert_eq!(message, "Enabled accounts disabled for 30 minutes");
        dir.delete_tokens("u-9").await.unwrap();
        assert_eq!(
            api.calls(),
            vec!["enable 30", "list", "delete_tokens u-9", "list"]
        );
    }

    #[tokio::test]
    async fn upload_requires_an_existing_file() {
        let (dir, api) = directory(StubAccountsApi::default());
        let missing = std::env::temp_dir().join("visa-console-no-such-file.xlsx");

        let err = dir.upload_spreadsheet(&missing).await.unwrap_err();
        assert_eq!(err.user_message(), "Validation failed: Please select a file.");

        let dir_path = tempfile::tempdir().unwrap();
        let path = dir_path.path().join("accounts.xlsx");
        std::fs::write(&path, b"PK\x03\x04fake").unwrap();
        dir.upload_spreadsheet(&path).await.unwrap();
        assert_eq!(api.calls(), vec!["upload accounts.xlsx 8", "list"]);
    }
}
