//! Monitored Account Registry
//!
//! The roster of accounts the sync scheduler works through. Registrations
//! live in `accounts.json` under the data directory and survive restarts.
//! A registration may carry an expiry; expired accounts are skipped by the
//! scheduler but kept on file so re-registration restores their history
//! seamlessly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredAccount {
    pub account_id: String,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl RegisteredAccount {
    /// Eligible for the sync cycle: enabled and not expired
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.expires_at.map(|expiry| expiry > now).unwrap_or(true)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    accounts: Vec<RegisteredAccount>,
}

pub struct AccountRegistry {
    path: PathBuf,
    accounts: RwLock<Vec<RegisteredAccount>>,
}

impl AccountRegistry {
    /// Load the registry from `<data_dir>/accounts.json`, creating an empty
    /// one when the file does not exist
    pub fn load(data_dir: &Path) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let path = data_dir.join("accounts.json");

        let accounts = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            let file: RegistryFile = serde_json::from_str(&contents)
                .map_err(|e| format!("Malformed registry file {}: {}", path.display(), e))?;
            file.accounts
        } else {
            Vec::new()
        };

        log::info!(
            "Loaded account registry with {} registration(s)",
            accounts.len()
        );

        Ok(Self {
            path,
            accounts: RwLock::new(accounts),
        })
    }

    async fn persist(
        &self,
        accounts: &[RegisteredAccount],
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let file = RegistryFile {
            accounts: accounts.to_vec(),
        };
        let contents = serde_json::to_string_pretty(&file)?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, contents)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// Register an account (or update an existing registration)
    pub async fn register(
        &self,
        account_id: &str,
        enabled: bool,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<RegisteredAccount, Box<dyn std::error::Error + Send + Sync>> {
        let mut accounts = self.accounts.write().await;
        let now = Utc::now();

        let account = match accounts.iter_mut().find(|a| a.account_id == account_id) {
            Some(existing) => {
                existing.enabled = enabled;
                existing.expires_at = expires_at;
                existing.updated_at = now;
                existing.clone()
            }
            None => {
                let account = RegisteredAccount {
                    account_id: account_id.to_string(),
                    enabled,
                    expires_at,
                    created_at: now,
                    updated_at: now,
                    last_synced_at: None,
                };
                accounts.push(account.clone());
                accounts.sort_by(|a, b| a.account_id.cmp(&b.account_id));
                account
            }
        };

        self.persist(&accounts).await?;
        Ok(account)
    }

    pub async fn list(&self) -> Vec<RegisteredAccount> {
        self.accounts.read().await.clone()
    }

    /// Accounts the scheduler should process this cycle, least recently
    /// synced first so no account starves
    pub async fn eligible(&self) -> Vec<RegisteredAccount> {
        let now = Utc::now();
        let mut eligible: Vec<RegisteredAccount> = self
            .accounts
            .read()
            .await
            .iter()
            .filter(|a| a.is_eligible(now))
            .cloned()
            .collect();
        eligible.sort_by_key(|a| a.last_synced_at);
        eligible
    }

    pub async fn remove(
        &self,
        account_id: &str,
    ) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
        let mut accounts = self.accounts.write().await;
        let before = accounts.len();
        accounts.retain(|a| a.account_id != account_id);

        if accounts.len() == before {
            return Ok(false);
        }

        self.persist(&accounts).await?;
        Ok(true)
    }

    /// Record a completed sync pass for an account
    pub async fn touch_synced(
        &self,
        account_id: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut accounts = self.accounts.write().await;
        if let Some(account) = accounts.iter_mut().find(|a| a.account_id == account_id) {
            account.last_synced_at = Some(Utc::now());
            self.persist(&accounts).await?;
        }
        Ok(())
    }
}
