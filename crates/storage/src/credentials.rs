use std::{
    fmt,
    path::{Path, PathBuf},
};

use anyhow::Result;
use serde::{
    de::{MapAccess, Visitor},
    Deserialize, Deserializer, Serialize, Serializer,
};
use shared::domain::{Phone, SessionCredential};
use tracing::{error, info};

use crate::{load_document, write_document};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredAccount {
    pub phone: Phone,
    #[serde(alias = "session_string")]
    pub session_credential: SessionCredential,
}

/// Phone -> account JSON object whose entries keep document order.
#[derive(Debug, Default)]
struct AccountDocument(Vec<StoredAccount>);

impl AccountDocument {
    fn position(&self, phone: &Phone) -> Option<usize> {
        self.0.iter().position(|account| &account.phone == phone)
    }

    /// Replaces in place when the phone is known, otherwise appends.
    fn upsert(&mut self, account: StoredAccount) -> Option<StoredAccount> {
        match self.position(&account.phone) {
            Some(index) => Some(std::mem::replace(&mut self.0[index], account)),
            None => {
                self.0.push(account);
                None
            }
        }
    }
}

impl Serialize for AccountDocument {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|account| (&account.phone, account)))
    }
}

impl<'de> Deserialize<'de> for AccountDocument {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DocumentVisitor;

        impl<'de> Visitor<'de> for DocumentVisitor {
            type Value = AccountDocument;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of phone to stored account")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut document = AccountDocument::default();
                while let Some((_, account)) = map.next_entry::<String, StoredAccount>()? {
                    document.upsert(account);
                }
                Ok(document)
            }
        }

        deserializer.deserialize_map(DocumentVisitor)
    }
}

/// Phone -> credential document. Iteration follows document order, so the
/// first onboarded account comes first; that is the pool order every
/// executor walks.
#[derive(Debug)]
pub struct CredentialStore {
    path: PathBuf,
    accounts: AccountDocument,
}

impl CredentialStore {
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let accounts: AccountDocument = load_document(&path, "credential store").await;
        info!(path = %path.display(), accounts = accounts.0.len(), "credential store loaded");
        Self { path, accounts }
    }

    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            accounts: AccountDocument::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn accounts(&self) -> impl Iterator<Item = &StoredAccount> {
        self.accounts.0.iter()
    }

    pub fn get(&self, phone: &Phone) -> Option<&StoredAccount> {
        self.accounts.position(phone).map(|index| &self.accounts.0[index])
    }

    pub fn contains(&self, phone: &Phone) -> bool {
        self.accounts.position(phone).is_some()
    }

    pub fn len(&self) -> usize {
        self.accounts.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.0.is_empty()
    }

    /// A known phone keeps its position; a new one goes last.
    pub fn insert(&mut self, account: StoredAccount) -> Option<StoredAccount> {
        self.accounts.upsert(account)
    }

    pub fn remove(&mut self, phone: &Phone) -> Option<StoredAccount> {
        let index = self.accounts.position(phone)?;
        Some(self.accounts.0.remove(index))
    }

    pub async fn save(&self) -> Result<()> {
        write_document(&self.path, &self.accounts).await
    }

    /// Saves and logs instead of failing; returns whether the write landed.
    pub async fn persist(&self) -> bool {
        match self.save().await {
            Ok(()) => true,
            Err(err) => {
                error!(path = %self.path.display(), error = %format!("{err:#}"), "credential store save failed");
                false
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/credentials_tests.rs"]
mod tests;
