use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use super::types::AccountInfo;

/// Resolves account ids to display names, email addresses, and admin status.
/// Account management itself belongs to the host platform; the monitor only
/// needs this lookup at notification time.
pub trait AccountDirectory: Send + Sync {
    fn lookup(&self, account_id: &str) -> Option<AccountInfo>;
    fn admins(&self) -> Vec<AccountInfo>;
}

/// Directory backed by a snapshot loaded once at startup, either from a JSON
/// file exported by the host platform or from an in-process list.
pub struct StaticAccountDirectory {
    accounts: HashMap<String, AccountInfo>,
}

impl StaticAccountDirectory {
    pub fn new(accounts: Vec<AccountInfo>) -> Self {
        let accounts = accounts
            .into_iter()
            .map(|account| (account.id.clone(), account))
            .collect();
        Self { accounts }
    }

    pub fn empty() -> Self {
        Self {
            accounts: HashMap::new(),
        }
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("unable to read accounts file {}", path.display()))?;
        let accounts: Vec<AccountInfo> = serde_json::from_str(&raw)
            .with_context(|| format!("accounts file {} is not valid JSON", path.display()))?;
        Ok(Self::new(accounts))
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

impl AccountDirectory for StaticAccountDirectory {
    fn lookup(&self, account_id: &str) -> Option<AccountInfo> {
        self.accounts.get(account_id).cloned()
    }

    fn admins(&self) -> Vec<AccountInfo> {
        let mut admins: Vec<AccountInfo> = self
            .accounts
            .values()
            .filter(|account| account.admin)
            .cloned()
            .collect();
        admins.sort_by(|a, b| a.id.cmp(&b.id));
        admins
    }
}
