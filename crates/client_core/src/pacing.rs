use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use shared::protocol::OperationEvent;
use tracing::info;

use crate::{pool::AccountSession, progress::ProgressSink, registry::OperationTicket};

/// Snapshots go out after every this-many accounts and after the last one.
pub const PROGRESS_EVERY: usize = 5;

/// The per-account body of an executor run. Returns whether the account's
/// contribution succeeded; failures never abort the run.
#[async_trait]
pub(crate) trait AccountStep: Send + Sync {
    async fn process(&self, account: &AccountSession) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DriveOutcome {
    pub processed: usize,
    pub cancelled: bool,
}

/// Walks `accounts` strictly in order, one at a time. Cancellation is
/// checked before each account; a pacing wait ends early once the ticket is
/// cancelled, but an account already in progress always completes.
pub(crate) async fn drive_paced(
    ticket: &OperationTicket,
    accounts: &[Arc<AccountSession>],
    interval: Duration,
    sink: &dyn ProgressSink,
    step: &dyn AccountStep,
) -> DriveOutcome {
    let total = accounts.len();
    for (index, account) in accounts.iter().enumerate() {
        if ticket.is_cancelled() {
            info!(
                operation_id = %ticket.id(),
                processed = index,
                total,
                "operation stopped by operator"
            );
            sink.emit(OperationEvent::Cancelled {
                operation_id: ticket.id(),
                processed: index,
            })
            .await;
            return DriveOutcome {
                processed: index,
                cancelled: true,
            };
        }

        let succeeded = step.process(account).await;
        let position = index + 1;
        let snapshot = ticket.record(succeeded, total);
        if position % PROGRESS_EVERY == 0 || position == total {
            sink.emit(OperationEvent::Progress(snapshot)).await;
        }

        if position < total && !interval.is_zero() && !ticket.is_cancelled() {
            tokio::select! {
                _ = ticket.cancelled() => {}
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    DriveOutcome {
        processed: total,
        cancelled: false,
    }
}
