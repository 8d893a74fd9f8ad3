use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use shared::{
    domain::{OperationKind, OperatorId},
    protocol::{OperationStatus, ProgressSnapshot},
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LaunchError {
    #[error("no accounts available")]
    NoAccounts,
    #[error("operator {operator} already has a running {kind:?} operation")]
    AlreadyRunning {
        operator: OperatorId,
        kind: OperationKind,
    },
}

#[derive(Debug, Default)]
pub struct OperationCounters {
    processed: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
}

impl OperationCounters {
    fn record(&self, succeeded: bool) {
        if succeeded {
            self.succeeded.fetch_add(1, Ordering::SeqCst);
        } else {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
        self.processed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }

    pub fn succeeded(&self) -> usize {
        self.succeeded.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }
}

struct ActiveOperation {
    id: Uuid,
    kind: OperationKind,
    token: CancellationToken,
    counters: Arc<OperationCounters>,
}

/// Live operations keyed by the operator that started them. At most one per
/// operator; the slot is freed when the operation's ticket is dropped.
#[derive(Default)]
pub struct OperationRegistry {
    active: Mutex<HashMap<OperatorId, ActiveOperation>>,
}

impl OperationRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn active(&self) -> MutexGuard<'_, HashMap<OperatorId, ActiveOperation>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn begin(
        self: &Arc<Self>,
        operator: OperatorId,
        kind: OperationKind,
    ) -> Result<OperationTicket, LaunchError> {
        let mut active = self.active();
        if let Some(existing) = active.get(&operator) {
            return Err(LaunchError::AlreadyRunning {
                operator,
                kind: existing.kind,
            });
        }

        let ticket = OperationTicket {
            registry: Arc::clone(self),
            operator,
            id: Uuid::new_v4(),
            kind,
            token: CancellationToken::new(),
            counters: Arc::new(OperationCounters::default()),
        };
        active.insert(
            operator,
            ActiveOperation {
                id: ticket.id,
                kind,
                token: ticket.token.clone(),
                counters: Arc::clone(&ticket.counters),
            },
        );
        info!(%operator, operation_id = %ticket.id, ?kind, "operation registered");
        Ok(ticket)
    }

    /// Requests cooperative cancellation; `false` if nothing is running.
    pub fn cancel(&self, operator: OperatorId) -> bool {
        match self.active().get(&operator) {
            Some(operation) => {
                operation.token.cancel();
                info!(%operator, operation_id = %operation.id, "operation cancel requested");
                true
            }
            None => false,
        }
    }

    pub fn status(&self, operator: OperatorId) -> Option<OperationStatus> {
        self.active().get(&operator).map(|operation| OperationStatus {
            operation_id: operation.id,
            kind: operation.kind,
            processed: operation.counters.processed(),
            succeeded: operation.counters.succeeded(),
            failed: operation.counters.failed(),
            cancel_requested: operation.token.is_cancelled(),
        })
    }

    pub fn is_active(&self, operator: OperatorId) -> bool {
        self.active().contains_key(&operator)
    }

    pub fn active_count(&self) -> usize {
        self.active().len()
    }

    fn release(&self, operator: OperatorId, id: Uuid) {
        let mut active = self.active();
        if active.get(&operator).is_some_and(|operation| operation.id == id) {
            active.remove(&operator);
            debug!(%operator, operation_id = %id, "operation released");
        }
    }
}

/// Proof of a registered operation. Dropping it deregisters the operation.
pub struct OperationTicket {
    registry: Arc<OperationRegistry>,
    operator: OperatorId,
    id: Uuid,
    kind: OperationKind,
    token: CancellationToken,
    counters: Arc<OperationCounters>,
}

impl OperationTicket {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn operator(&self) -> OperatorId {
        self.operator
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub fn counters(&self) -> &OperationCounters {
        &self.counters
    }

    pub fn record(&self, succeeded: bool, total: usize) -> ProgressSnapshot {
        self.counters.record(succeeded);
        ProgressSnapshot {
            operation_id: self.id,
            processed: self.counters.processed(),
            total,
            succeeded: self.counters.succeeded(),
            failed: self.counters.failed(),
        }
    }
}

impl Drop for OperationTicket {
    fn drop(&mut self) {
        self.registry.release(self.operator, self.id);
    }
}

#[cfg(test)]
#[path = "tests/registry_tests.rs"]
mod tests;
