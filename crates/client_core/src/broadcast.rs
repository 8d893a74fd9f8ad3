use std::sync::Arc;

use async_trait::async_trait;
use shared::{
    domain::{OperationKind, OperatorId},
    protocol::{BroadcastRequest, OperationEvent, OperationSummary},
};
use tracing::{info, warn};

use crate::{
    pacing::{drive_paced, AccountStep},
    pool::{AccountSession, SessionPool},
    progress::ProgressSink,
    registry::{LaunchError, OperationRegistry, OperationTicket},
    RunReport,
};

/// Sends one message from every pooled account to a single recipient.
#[derive(Clone)]
pub struct BroadcastExecutor {
    pool: Arc<SessionPool>,
    registry: Arc<OperationRegistry>,
}

impl BroadcastExecutor {
    pub fn new(pool: Arc<SessionPool>, registry: Arc<OperationRegistry>) -> Self {
        Self { pool, registry }
    }

    pub async fn prepare(
        &self,
        operator: OperatorId,
        sink: &dyn ProgressSink,
    ) -> Result<OperationTicket, LaunchError> {
        let result = if self.pool.is_empty().await {
            Err(LaunchError::NoAccounts)
        } else {
            self.registry.begin(operator, OperationKind::Broadcast)
        };

        if let Err(error) = &result {
            warn!(%operator, %error, "broadcast rejected");
            sink.emit(OperationEvent::Rejected {
                kind: OperationKind::Broadcast,
                reason: error.to_string(),
            })
            .await;
        }
        result
    }

    pub async fn execute(
        &self,
        ticket: OperationTicket,
        request: BroadcastRequest,
        sink: &dyn ProgressSink,
    ) -> RunReport {
        let accounts = self.pool.accounts().await;
        let operation_id = ticket.id();

        info!(
            %operation_id,
            target = %request.target,
            accounts = accounts.len(),
            "broadcast started"
        );
        sink.emit(OperationEvent::Started {
            operation_id,
            kind: OperationKind::Broadcast,
            target: request.target.clone(),
            accounts: accounts.len(),
            interval_ms: request.interval.as_millis() as u64,
        })
        .await;

        let step = BroadcastStep {
            target: &request.target,
            text: &request.text,
        };
        let outcome = drive_paced(&ticket, &accounts, request.interval, sink, &step).await;

        let report = RunReport {
            operation_id,
            kind: OperationKind::Broadcast,
            target: request.target.clone(),
            total: accounts.len(),
            processed: outcome.processed,
            succeeded: ticket.counters().succeeded(),
            failed: ticket.counters().failed(),
            cancelled: outcome.cancelled,
        };
        drop(ticket);

        if !report.cancelled {
            info!(
                %operation_id,
                succeeded = report.succeeded,
                failed = report.failed,
                "broadcast finished"
            );
            sink.emit(OperationEvent::Finished(OperationSummary {
                operation_id,
                kind: OperationKind::Broadcast,
                target: report.target.clone(),
                succeeded: report.succeeded,
                failed: report.failed,
            }))
            .await;
        }
        report
    }

    pub async fn run(
        &self,
        operator: OperatorId,
        request: BroadcastRequest,
        sink: &dyn ProgressSink,
    ) -> Result<RunReport, LaunchError> {
        let ticket = self.prepare(operator, sink).await?;
        Ok(self.execute(ticket, request, sink).await)
    }
}

struct BroadcastStep<'a> {
    target: &'a str,
    text: &'a str,
}

#[async_trait]
impl AccountStep for BroadcastStep<'_> {
    async fn process(&self, account: &AccountSession) -> bool {
        let phone = account.phone();
        if let Err(error) = account.ensure_connected().await {
            warn!(%phone, %error, "account unreachable, skipping");
            return false;
        }
        match account.client().send_message(self.target, self.text).await {
            Ok(()) => {
                info!(%phone, target = self.target, "message sent");
                true
            }
            Err(error) => {
                warn!(%phone, target = self.target, %error, "send failed");
                false
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/broadcast_tests.rs"]
mod tests;
