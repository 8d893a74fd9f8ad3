use std::{sync::Arc, time::Duration};

use shared::{
    domain::{OperationKind, OperatorId, Phone},
    error::{ApiError, ErrorCode},
    protocol::{BroadcastRequest, MassActionRequest, OperationStatus},
};
use storage::SubscriptionLedger;
use thiserror::Error;
use tokio::{sync::RwLock, task::JoinHandle};
use tracing::info;
use uuid::Uuid;

pub mod activity;
pub mod broadcast;
pub mod gateway;
pub mod mass_action;
pub mod onboarding;
mod pacing;
pub mod pool;
pub mod progress;
pub mod registry;
pub mod remote;

pub use activity::{ActivityOutcome, ActivitySettings, ActivitySimulator};
pub use broadcast::BroadcastExecutor;
pub use gateway::{GatewayClient, GatewayClientFactory};
pub use mass_action::MassActionExecutor;
pub use onboarding::{OnboardingError, OnboardingFlow, OnboardingNotice};
pub use pacing::PROGRESS_EVERY;
pub use pool::{AccountSession, SessionPool};
pub use progress::{OperatorChannel, ProgressSink};
pub use registry::{LaunchError, OperationRegistry, OperationTicket};
pub use remote::{
    ChatInfo, ChatRef, ErrorClass, MissingRemoteClient, MissingRemoteClientFactory, RemoteClient,
    RemoteClientFactory, RemoteError, RemoteResult, VerificationToken,
};

/// How an executor run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub operation_id: Uuid,
    pub kind: OperationKind,
    pub target: String,
    pub total: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// A run accepted by the registry and now executing in the background.
pub struct LaunchedOperation {
    pub operation_id: Uuid,
    pub kind: OperationKind,
    pub accounts: usize,
    pub interval: Duration,
    pub handle: JoinHandle<RunReport>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RemovalError {
    #[error("account {0} not found")]
    NotFound(Phone),
    #[error("cannot remove an account while {0} operation(s) are running")]
    Busy(usize),
}

impl From<LaunchError> for ApiError {
    fn from(value: LaunchError) -> Self {
        let code = match value {
            LaunchError::NoAccounts => ErrorCode::Unavailable,
            LaunchError::AlreadyRunning { .. } => ErrorCode::Conflict,
        };
        ApiError::new(code, value.to_string())
    }
}

impl From<RemovalError> for ApiError {
    fn from(value: RemovalError) -> Self {
        let code = match value {
            RemovalError::NotFound(_) => ErrorCode::NotFound,
            RemovalError::Busy(_) => ErrorCode::Conflict,
        };
        ApiError::new(code, value.to_string())
    }
}

impl From<OnboardingError> for ApiError {
    fn from(value: OnboardingError) -> Self {
        match value {
            OnboardingError::Validation(error) => error.into(),
            OnboardingError::Finished(_) => ApiError::new(ErrorCode::Conflict, value.to_string()),
        }
    }
}

/// Owns the process-wide state every operation shares: the account pool,
/// the subscription ledger and the operation registry.
#[derive(Clone)]
pub struct ControlContext {
    pool: Arc<SessionPool>,
    ledger: Arc<SubscriptionLedger>,
    registry: Arc<OperationRegistry>,
    mass_actions: MassActionExecutor,
    broadcasts: BroadcastExecutor,
    // Launches register under the read side; account removal takes the
    // write side so its idle check and the removal are one step.
    membership: Arc<RwLock<()>>,
}

impl ControlContext {
    pub fn new(pool: Arc<SessionPool>, ledger: Arc<SubscriptionLedger>) -> Self {
        let registry = OperationRegistry::new();
        Self {
            mass_actions: MassActionExecutor::new(
                Arc::clone(&pool),
                Arc::clone(&ledger),
                Arc::clone(&registry),
            ),
            broadcasts: BroadcastExecutor::new(Arc::clone(&pool), Arc::clone(&registry)),
            pool,
            ledger,
            registry,
            membership: Arc::new(RwLock::new(())),
        }
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }

    pub fn ledger(&self) -> &Arc<SubscriptionLedger> {
        &self.ledger
    }

    pub fn registry(&self) -> &Arc<OperationRegistry> {
        &self.registry
    }

    pub fn mass_actions(&self) -> &MassActionExecutor {
        &self.mass_actions
    }

    pub fn broadcasts(&self) -> &BroadcastExecutor {
        &self.broadcasts
    }

    pub fn onboarding(&self) -> OnboardingFlow {
        OnboardingFlow::new(Arc::clone(&self.pool))
    }

    pub fn activity(&self, settings: ActivitySettings) -> ActivitySimulator {
        ActivitySimulator::new(Arc::clone(&self.pool), settings)
    }

    /// Registers the run, then executes it on a background task.
    pub async fn launch_mass_action(
        &self,
        operator: OperatorId,
        request: MassActionRequest,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<LaunchedOperation, LaunchError> {
        let (ticket, plan) = {
            let _membership = self.membership.read().await;
            self.mass_actions
                .prepare(operator, &request, sink.as_ref())
                .await?
        };
        let operation_id = ticket.id();
        let kind = ticket.kind();
        let executor = self.mass_actions.clone();
        let handle = tokio::spawn(async move {
            executor
                .execute(ticket, plan, request, sink.as_ref())
                .await
        });
        Ok(LaunchedOperation {
            operation_id,
            kind,
            accounts: plan.actual_count,
            interval: plan.interval,
            handle,
        })
    }

    pub async fn launch_broadcast(
        &self,
        operator: OperatorId,
        request: BroadcastRequest,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<LaunchedOperation, LaunchError> {
        let ticket = {
            let _membership = self.membership.read().await;
            self.broadcasts.prepare(operator, sink.as_ref()).await?
        };
        let operation_id = ticket.id();
        let accounts = self.pool.len().await;
        let interval = request.interval;
        let executor = self.broadcasts.clone();
        let handle =
            tokio::spawn(async move { executor.execute(ticket, request, sink.as_ref()).await });
        Ok(LaunchedOperation {
            operation_id,
            kind: OperationKind::Broadcast,
            accounts,
            interval,
            handle,
        })
    }

    /// Requests cancellation of the operator's live operation.
    pub fn stop(&self, operator: OperatorId) -> bool {
        self.registry.cancel(operator)
    }

    pub fn status(&self, operator: OperatorId) -> Option<OperationStatus> {
        self.registry.status(operator)
    }

    /// Retires and forgets an account together with its ledger entries.
    /// No operation can register between the idle check and the removal.
    pub async fn remove_account(&self, phone: &Phone) -> Result<(), RemovalError> {
        let _membership = self.membership.write().await;
        let running = self.registry.active_count();
        if running > 0 {
            return Err(RemovalError::Busy(running));
        }
        if self.pool.remove(phone).await.is_none() {
            return Err(RemovalError::NotFound(phone.clone()));
        }
        let forgotten = self.ledger.forget_phone(phone).await;
        info!(%phone, ledger_entries = forgotten, "account removed from control context");
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
