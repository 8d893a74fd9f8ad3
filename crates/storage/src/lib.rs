//! JSON-document persistence for the account pool and the subscription
//! ledger.
//!
//! Both documents load softly: a missing, unreadable or corrupt file yields
//! an empty document and a log line instead of an error. Saves replace the
//! file atomically; callers decide whether a failed save is fatal (it never
//! is for the running service, whose in-memory state stays authoritative).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;
use tracing::warn;

mod credentials;
mod ledger;

pub use credentials::{CredentialStore, StoredAccount};
pub use ledger::{
    subscription_stats, upsert_membership, ChannelMembership, LedgerDocument, SubscriptionLedger,
    STATS_SHOWN_PER_PHONE,
};

/// Creates the parent directory of a document path so the first save
/// cannot fail on a fresh install.
pub fn prepare_document_path(path: &Path) -> Result<PathBuf> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| {
            format!(
                "failed to create parent directory '{}' for '{}'",
                parent.display(),
                path.display()
            )
        })?;
    }
    Ok(path.to_path_buf())
}

async fn load_document<T>(path: &Path, label: &str) -> T
where
    T: DeserializeOwned + Default,
{
    let raw = match fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return T::default(),
        Err(error) => {
            warn!(path = %path.display(), %error, "{label}: read failed, starting empty");
            return T::default();
        }
    };

    match serde_json::from_str(&raw) {
        Ok(document) => document,
        Err(error) => {
            warn!(path = %path.display(), %error, "{label}: parse failed, starting empty");
            T::default()
        }
    }
}

async fn write_document<T>(path: &Path, document: &T) -> Result<()>
where
    T: Serialize,
{
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create '{}'", parent.display()))?;
    }

    let encoded = serde_json::to_vec_pretty(document).context("failed to encode document")?;
    let staging = PathBuf::from(format!("{}.tmp", path.display()));
    fs::write(&staging, encoded)
        .await
        .with_context(|| format!("failed to write '{}'", staging.display()))?;
    fs::rename(&staging, path)
        .await
        .with_context(|| format!("failed to replace '{}'", path.display()))?;
    Ok(())
}
