use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use shared::{
    domain::{LinkTarget, MassAction, OperationKind, OperatorId, TargetLink},
    protocol::{MassActionRequest, OperationEvent, OperationSummary, RunPlan},
};
use storage::{ChannelMembership, SubscriptionLedger};
use tracing::{info, warn};

use crate::{
    pacing::{drive_paced, AccountStep},
    pool::{AccountSession, SessionPool},
    progress::ProgressSink,
    registry::{LaunchError, OperationRegistry, OperationTicket},
    remote::{ChatInfo, ChatRef, ErrorClass, RemoteError},
    RunReport,
};

/// Paced join/leave across a prefix of the pool, reconciled against the
/// subscription ledger.
#[derive(Clone)]
pub struct MassActionExecutor {
    pool: Arc<SessionPool>,
    ledger: Arc<SubscriptionLedger>,
    registry: Arc<OperationRegistry>,
}

impl MassActionExecutor {
    pub fn new(
        pool: Arc<SessionPool>,
        ledger: Arc<SubscriptionLedger>,
        registry: Arc<OperationRegistry>,
    ) -> Self {
        Self {
            pool,
            ledger,
            registry,
        }
    }

    /// Validates the pool and registers the operation. Nothing touches an
    /// account until [`MassActionExecutor::execute`].
    pub async fn prepare(
        &self,
        operator: OperatorId,
        request: &MassActionRequest,
        sink: &dyn ProgressSink,
    ) -> Result<(OperationTicket, RunPlan), LaunchError> {
        let kind = OperationKind::from(request.action);
        let pool_size = self.pool.len().await;
        let result = if pool_size == 0 {
            Err(LaunchError::NoAccounts)
        } else {
            self.registry
                .begin(operator, kind)
                .map(|ticket| (ticket, request.plan(pool_size)))
        };

        if let Err(error) = &result {
            warn!(%operator, ?kind, %error, "mass action rejected");
            sink.emit(OperationEvent::Rejected {
                kind,
                reason: error.to_string(),
            })
            .await;
        }
        result
    }

    pub async fn execute(
        &self,
        ticket: OperationTicket,
        plan: RunPlan,
        request: MassActionRequest,
        sink: &dyn ProgressSink,
    ) -> RunReport {
        let accounts: Vec<_> = self
            .pool
            .accounts()
            .await
            .into_iter()
            .take(plan.actual_count)
            .collect();
        let operation_id = ticket.id();
        let kind = ticket.kind();

        info!(
            %operation_id,
            action = %request.action,
            link = %request.link,
            accounts = accounts.len(),
            interval_ms = plan.interval.as_millis() as u64,
            "mass action started"
        );
        sink.emit(OperationEvent::Started {
            operation_id,
            kind,
            target: request.link.to_string(),
            accounts: accounts.len(),
            interval_ms: plan.interval.as_millis() as u64,
        })
        .await;

        let step = MassActionStep {
            ledger: &self.ledger,
            action: request.action,
            link: &request.link,
        };
        let outcome = drive_paced(&ticket, &accounts, plan.interval, sink, &step).await;

        let report = RunReport {
            operation_id,
            kind,
            target: request.link.to_string(),
            total: accounts.len(),
            processed: outcome.processed,
            succeeded: ticket.counters().succeeded(),
            failed: ticket.counters().failed(),
            cancelled: outcome.cancelled,
        };
        drop(ticket);

        // A stopped run ends on its truncation notice; only completed runs
        // get a summary.
        if !report.cancelled {
            info!(
                %operation_id,
                succeeded = report.succeeded,
                failed = report.failed,
                "mass action finished"
            );
            sink.emit(OperationEvent::Finished(OperationSummary {
                operation_id,
                kind,
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
        request: MassActionRequest,
        sink: &dyn ProgressSink,
    ) -> Result<RunReport, LaunchError> {
        let (ticket, plan) = self.prepare(operator, &request, sink).await?;
        Ok(self.execute(ticket, plan, request, sink).await)
    }
}

struct MassActionStep<'a> {
    ledger: &'a SubscriptionLedger,
    action: MassAction,
    link: &'a TargetLink,
}

#[async_trait]
impl AccountStep for MassActionStep<'_> {
    async fn process(&self, account: &AccountSession) -> bool {
        if let Err(error) = account.ensure_connected().await {
            warn!(phone = %account.phone(), %error, "account unreachable, skipping");
            return false;
        }
        match self.action {
            MassAction::Join => self.join(account).await,
            MassAction::Leave => self.leave(account).await,
        }
    }
}

impl MassActionStep<'_> {
    async fn join(&self, account: &AccountSession) -> bool {
        let phone = account.phone();
        let client = account.client();
        let result = match self.link.resolve() {
            LinkTarget::Invite(hash) => client.join_by_invite(&hash).await,
            LinkTarget::Public(name) => client.join_by_identifier(&name).await,
        };

        match result {
            Ok(chat) => {
                info!(%phone, chat_id = %chat.id, link = %self.link, "joined");
                self.ledger
                    .record(phone, self.membership(chat, false))
                    .await;
                true
            }
            Err(RemoteError::AlreadyParticipant) => {
                match client.get_chat(&self.link.lookup_key()).await {
                    Ok(chat) => {
                        info!(%phone, chat_id = %chat.id, link = %self.link, "already a member");
                        self.ledger.record(phone, self.membership(chat, true)).await;
                    }
                    Err(error) => {
                        warn!(%phone, link = %self.link, %error, "already a member, chat lookup failed");
                    }
                }
                true
            }
            Err(RemoteError::JoinRequestSent) => {
                info!(%phone, link = %self.link, "join request sent");
                true
            }
            Err(error) => {
                let reason = match error.class() {
                    ErrorClass::ChatUnavailable => "chat does not exist or is private",
                    ErrorClass::InviteUnusable => "invite link is invalid or expired",
                    _ => "join failed",
                };
                warn!(%phone, link = %self.link, %error, "{reason}");
                false
            }
        }
    }

    async fn leave(&self, account: &AccountSession) -> bool {
        let phone = account.phone();
        let client = account.client();
        let link = self.link.as_str();

        if let Some(chat_id) = self.ledger.chat_for_link(phone, link).await {
            return match client.leave(&ChatRef::Id(chat_id)).await {
                Ok(()) | Err(RemoteError::NotParticipant) => {
                    info!(%phone, %chat_id, "left");
                    self.ledger.remove_link(phone, link).await;
                    true
                }
                Err(error) => {
                    warn!(%phone, %chat_id, %error, "leave failed");
                    false
                }
            };
        }

        let result = match self.link.resolve() {
            LinkTarget::Invite(hash) => match client.join_by_invite(&hash).await {
                Ok(chat) => client.leave(&ChatRef::Id(chat.id)).await,
                Err(error) => Err(error),
            },
            LinkTarget::Public(name) => client.leave(&ChatRef::Name(name)).await,
        };

        match result {
            Ok(()) => {
                info!(%phone, link = %self.link, "left (resolved from link)");
                true
            }
            Err(RemoteError::NotParticipant) => {
                info!(%phone, link = %self.link, "not a member, nothing to leave");
                true
            }
            Err(error) if error.class() == ErrorClass::ChatUnavailable => {
                info!(%phone, link = %self.link, %error, "chat unavailable, nothing to leave");
                true
            }
            Err(error) => {
                warn!(%phone, link = %self.link, %error, "leave failed");
                false
            }
        }
    }

    fn membership(&self, chat: ChatInfo, already_member: bool) -> ChannelMembership {
        ChannelMembership {
            link: self.link.to_string(),
            chat_id: chat.id,
            title: chat.title,
            username: chat.username,
            joined_at: (!already_member).then(|| Utc::now().naive_utc()),
            already_member: already_member.then_some(true),
        }
    }
}

#[cfg(test)]
#[path = "tests/mass_action_tests.rs"]
mod tests;
