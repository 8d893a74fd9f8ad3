use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use shared::{
    domain::{Phone, SessionCredential},
    error::ValidationError,
    protocol::AccountStatus,
};
use storage::{CredentialStore, StoredAccount};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::remote::{RemoteClient, RemoteClientFactory, RemoteError, RemoteResult};

/// One pooled account and its client handle.
pub struct AccountSession {
    phone: Phone,
    client: Arc<dyn RemoteClient>,
    // Serializes connect/reconnect so concurrent tasks never race one handle.
    connection: Mutex<()>,
    // Set once the account leaves the pool; a retired handle never connects.
    retired: AtomicBool,
}

impl AccountSession {
    pub fn new(phone: Phone, client: Arc<dyn RemoteClient>) -> Self {
        Self {
            phone,
            client,
            connection: Mutex::new(()),
            retired: AtomicBool::new(false),
        }
    }

    pub fn phone(&self) -> &Phone {
        &self.phone
    }

    pub fn client(&self) -> &dyn RemoteClient {
        self.client.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    fn refuse_if_retired(&self) -> RemoteResult<()> {
        if self.is_retired() {
            return Err(RemoteError::other(format!(
                "account {} was removed from the pool",
                self.phone
            )));
        }
        Ok(())
    }

    /// Connects unless the handle already is; idempotent.
    pub async fn ensure_connected(&self) -> RemoteResult<()> {
        let _guard = self.connection.lock().await;
        self.refuse_if_retired()?;
        if self.client.is_connected() {
            return Ok(());
        }
        self.client.connect().await?;
        info!(phone = %self.phone, "account connected");
        Ok(())
    }

    /// Full disconnect-then-connect cycle for a handle that looks alive but
    /// is not.
    pub async fn reconnect(&self) -> RemoteResult<()> {
        let _guard = self.connection.lock().await;
        self.refuse_if_retired()?;
        if self.client.is_connected() {
            if let Err(error) = self.client.disconnect().await {
                warn!(phone = %self.phone, %error, "disconnect before reconnect failed");
            }
        }
        self.client.connect().await?;
        info!(phone = %self.phone, "account reconnected");
        Ok(())
    }

    pub async fn disconnect(&self) -> RemoteResult<()> {
        let _guard = self.connection.lock().await;
        if !self.client.is_connected() {
            return Ok(());
        }
        self.client.disconnect().await
    }

    /// Marks the handle unusable and closes it. Waits for any in-flight
    /// connect, so no connection can be opened after this returns.
    pub async fn retire(&self) -> RemoteResult<()> {
        let _guard = self.connection.lock().await;
        self.retired.store(true, Ordering::Release);
        if !self.client.is_connected() {
            return Ok(());
        }
        self.client.disconnect().await
    }
}

/// Connectable handles for every stored account, in credential document
/// order. Newly committed accounts go last.
pub struct SessionPool {
    factory: Arc<dyn RemoteClientFactory>,
    credentials: Mutex<CredentialStore>,
    accounts: RwLock<Vec<Arc<AccountSession>>>,
}

impl SessionPool {
    pub fn new(credentials: CredentialStore, factory: Arc<dyn RemoteClientFactory>) -> Self {
        let accounts = credentials
            .accounts()
            .map(|stored| {
                let client = factory.client_for(&stored.phone, Some(&stored.session_credential));
                Arc::new(AccountSession::new(stored.phone.clone(), client))
            })
            .collect();
        Self {
            factory,
            credentials: Mutex::new(credentials),
            accounts: RwLock::new(accounts),
        }
    }

    pub fn factory(&self) -> &dyn RemoteClientFactory {
        self.factory.as_ref()
    }

    /// Connects every account in order, pausing `stagger` between accounts.
    /// A failing account is logged and skipped. Returns how many are up.
    pub async fn connect_all(&self, stagger: Duration) -> usize {
        let accounts = self.accounts().await;
        let mut connected = 0;
        for (index, account) in accounts.iter().enumerate() {
            if index > 0 && !stagger.is_zero() {
                tokio::time::sleep(stagger).await;
            }
            match account.ensure_connected().await {
                Ok(()) => connected += 1,
                Err(error) => warn!(phone = %account.phone(), %error, "startup connect failed"),
            }
        }
        info!(connected, total = accounts.len(), "startup connect finished");
        connected
    }

    /// Snapshot of the pool in iteration order.
    pub async fn accounts(&self) -> Vec<Arc<AccountSession>> {
        self.accounts.read().await.clone()
    }

    pub async fn get(&self, phone: &Phone) -> Option<Arc<AccountSession>> {
        self.accounts
            .read()
            .await
            .iter()
            .find(|account| account.phone() == phone)
            .cloned()
    }

    pub async fn contains(&self, phone: &Phone) -> bool {
        self.get(phone).await.is_some()
    }

    pub async fn len(&self) -> usize {
        self.accounts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.accounts.read().await.is_empty()
    }

    pub async fn statuses(&self) -> Vec<AccountStatus> {
        self.accounts
            .read()
            .await
            .iter()
            .map(|account| AccountStatus {
                phone: account.phone().clone(),
                connected: account.is_connected(),
            })
            .collect()
    }

    /// Adds a freshly authenticated account and persists the credential
    /// store. The handle keeps whatever connection onboarding opened.
    pub async fn commit(
        &self,
        phone: Phone,
        credential: SessionCredential,
        client: Arc<dyn RemoteClient>,
    ) -> Result<Arc<AccountSession>, ValidationError> {
        let mut credentials = self.credentials.lock().await;
        let mut accounts = self.accounts.write().await;
        if accounts.iter().any(|account| account.phone() == &phone) || credentials.contains(&phone)
        {
            return Err(ValidationError::DuplicatePhone(phone.to_string()));
        }

        credentials.insert(StoredAccount {
            phone: phone.clone(),
            session_credential: credential,
        });
        let account = Arc::new(AccountSession::new(phone.clone(), client));
        accounts.push(Arc::clone(&account));
        drop(accounts);

        credentials.persist().await;
        info!(%phone, "account committed");
        Ok(account)
    }

    /// Retires and forgets an account, persisting the credential store.
    /// Tasks still holding the handle can no longer reconnect it.
    pub async fn remove(&self, phone: &Phone) -> Option<Arc<AccountSession>> {
        let mut credentials = self.credentials.lock().await;
        let removed = {
            let mut accounts = self.accounts.write().await;
            let index = accounts.iter().position(|account| account.phone() == phone);
            index.map(|index| accounts.remove(index))
        };
        credentials.remove(phone);
        let account = removed?;

        if let Err(error) = account.retire().await {
            warn!(%phone, %error, "disconnect of removed account failed");
        }
        credentials.persist().await;
        info!(%phone, "account removed");
        Some(account)
    }
}

#[cfg(test)]
#[path = "tests/pool_tests.rs"]
mod tests;
