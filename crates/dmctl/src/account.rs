use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The user this data directory is signed in as
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Path to the account file
    #[serde(skip)]
    pub path: PathBuf,
}

impl Account {
    /// Load the account from the data directory
    pub fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join("account.json");

        if path.exists() {
            let content =
                std::fs::read_to_string(&path).context("Failed to read account file")?;
            let mut account: Account =
                serde_json::from_str(&content).context("Failed to parse account file")?;
            account.path = path;
            Ok(account)
        } else {
            Ok(Account {
                path,
                ..Default::default()
            })
        }
    }

    pub fn save(&self) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize account")?;
        std::fs::write(&self.path, content).context("Failed to write account file")?;
        Ok(())
    }

    pub fn set(&mut self, user_id: &str, email: &str) -> Result<()> {
        self.user_id = Some(user_id.to_string());
        self.email = Some(email.to_string());
        self.save()
    }

    pub fn clear(&mut self) -> Result<()> {
        self.user_id = None;
        self.email = None;
        self.save()
    }

    pub fn is_signed_in(&self) -> bool {
        self.user_id.is_some()
    }

    /// The signed-in user id, or an error telling the operator to sign in
    pub fn require_user(&self) -> Result<&str> {
        self.user_id
            .as_deref()
            .context("Not signed in. Use 'dmctl sign-in <user-id> <email>' first.")
    }
}
