use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use anyhow::Result;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use shared::{
    domain::{ChatId, Phone},
    protocol::{MembershipLabel, SubscriptionStats},
};
use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::{load_document, write_document};

pub const STATS_SHOWN_PER_PHONE: usize = 4;
const UNKNOWN_TITLE: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMembership {
    /// Link exactly as the operator typed it.
    pub link: String,
    pub chat_id: ChatId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    /// UTC wall time of the join that created the entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joined_at: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub already_member: Option<bool>,
}

impl ChannelMembership {
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(UNKNOWN_TITLE)
    }

    fn merge_from(&mut self, update: ChannelMembership) {
        self.link = update.link;
        self.chat_id = update.chat_id;
        self.title = update.title;
        self.username = update.username;
        if update.joined_at.is_some() {
            self.joined_at = update.joined_at;
        }
        if update.already_member.is_some() {
            self.already_member = update.already_member;
        }
    }
}

pub type LedgerDocument = BTreeMap<Phone, Vec<ChannelMembership>>;

/// Merges into the first entry sharing the link or the chat id, otherwise
/// appends. Returns `true` when an existing entry was updated.
pub fn upsert_membership(entries: &mut Vec<ChannelMembership>, membership: ChannelMembership) -> bool {
    match entries
        .iter_mut()
        .find(|entry| entry.link == membership.link || entry.chat_id == membership.chat_id)
    {
        Some(existing) => {
            existing.merge_from(membership);
            true
        }
        None => {
            entries.push(membership);
            false
        }
    }
}

pub fn subscription_stats(document: &LedgerDocument, shown: usize) -> Vec<SubscriptionStats> {
    document
        .iter()
        .map(|(phone, entries)| SubscriptionStats {
            phone: phone.clone(),
            shown: entries
                .iter()
                .take(shown)
                .map(|entry| MembershipLabel {
                    title: entry.display_title().to_string(),
                    username: entry.username.clone(),
                    chat_id: entry.chat_id,
                })
                .collect(),
            hidden: entries.len().saturating_sub(shown),
        })
        .collect()
}

/// Persisted record of memberships created by mass actions.
///
/// Every mutation reads, changes and writes the document while holding one
/// lock, so concurrent executors cannot interleave their read-modify-write
/// cycles on the file.
pub struct SubscriptionLedger {
    path: PathBuf,
    document: Mutex<LedgerDocument>,
}

impl SubscriptionLedger {
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let document: LedgerDocument = load_document(&path, "subscription ledger").await;
        Self {
            path,
            document: Mutex::new(document),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn record(&self, phone: &Phone, membership: ChannelMembership) {
        let mut document = self.document.lock().await;
        let updated = upsert_membership(document.entry(phone.clone()).or_default(), membership);
        debug!(%phone, updated, "ledger: membership recorded");
        self.persist_locked(&document).await;
    }

    pub async fn chat_for_link(&self, phone: &Phone, link: &str) -> Option<ChatId> {
        self.document
            .lock()
            .await
            .get(phone)?
            .iter()
            .find(|entry| entry.link == link)
            .map(|entry| entry.chat_id)
    }

    /// Drops every entry of `phone` whose link equals `link`.
    pub async fn remove_link(&self, phone: &Phone, link: &str) -> usize {
        let mut document = self.document.lock().await;
        let Some(entries) = document.get_mut(phone) else {
            return 0;
        };
        let before = entries.len();
        entries.retain(|entry| entry.link != link);
        let removed = before - entries.len();
        if removed > 0 {
            self.persist_locked(&document).await;
        }
        removed
    }

    pub async fn forget_phone(&self, phone: &Phone) -> usize {
        let mut document = self.document.lock().await;
        let removed = document.remove(phone).map(|entries| entries.len());
        if removed.is_some() {
            self.persist_locked(&document).await;
        }
        removed.unwrap_or(0)
    }

    pub async fn entries(&self, phone: &Phone) -> Vec<ChannelMembership> {
        self.document
            .lock()
            .await
            .get(phone)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn snapshot(&self) -> LedgerDocument {
        self.document.lock().await.clone()
    }

    pub async fn stats(&self) -> Vec<SubscriptionStats> {
        subscription_stats(&*self.document.lock().await, STATS_SHOWN_PER_PHONE)
    }

    pub async fn save(&self) -> Result<()> {
        let document = self.document.lock().await;
        write_document(&self.path, &*document).await
    }

    async fn persist_locked(&self, document: &LedgerDocument) {
        if let Err(err) = write_document(&self.path, document).await {
            error!(path = %self.path.display(), error = %format!("{err:#}"), "ledger save failed");
        }
    }
}

#[cfg(test)]
#[path = "tests/ledger_tests.rs"]
mod tests;
