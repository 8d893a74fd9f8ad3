use std::{collections::HashMap, sync::Arc, time::Duration};

use client_core::{ControlContext, LaunchedOperation, OnboardingFlow, OperatorChannel, ProgressSink};
use shared::{
    domain::{MassAction, OperatorId, Phone},
    error::{ApiError, ErrorCode, ValidationError},
    protocol::{
        AccountStatus, BroadcastRequest, ConfirmationToken, ControlReply, ControlRequest,
        CountInput, MassActionRequest, OperationStatus, OperatorEvent, SubscriptionStats,
    },
};
use tokio::sync::{broadcast, Mutex};
use tracing::info;

type FlowSlot = Arc<Mutex<OnboardingFlow>>;

/// Everything a control request can touch.
#[derive(Clone)]
pub struct ApiContext {
    pub control: ControlContext,
    pub events: broadcast::Sender<OperatorEvent>,
    pub broadcast_interval: Duration,
    onboarding: Arc<Mutex<HashMap<OperatorId, FlowSlot>>>,
}

impl ApiContext {
    pub fn new(
        control: ControlContext,
        events: broadcast::Sender<OperatorEvent>,
        broadcast_interval: Duration,
    ) -> Self {
        Self {
            control,
            events,
            broadcast_interval,
            onboarding: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn sink(&self, operator: OperatorId) -> Arc<dyn ProgressSink> {
        Arc::new(OperatorChannel::new(operator, self.events.clone()))
    }
}

pub async fn handle_control(
    ctx: &ApiContext,
    operator: OperatorId,
    request: ControlRequest,
) -> Result<ControlReply, ApiError> {
    match request {
        ControlRequest::Onboarding { input } => onboarding_step(ctx, operator, &input).await,
        ControlRequest::Cancel => Ok(cancel_onboarding(ctx, operator).await),
        ControlRequest::MassAction {
            action,
            link,
            count,
            duration,
        } => {
            let request = MassActionRequest::from_input(action, &link, &count, &duration)?;
            launch_mass_action(ctx, operator, request).await
        }
        ControlRequest::Broadcast { text, target } => {
            launch_broadcast(ctx, operator, BroadcastRequest::new(&text, &target)?).await
        }
        ControlRequest::Confirm { token, text } => {
            match token.parse::<ConfirmationToken>()? {
                ConfirmationToken::MassAction {
                    action,
                    count,
                    duration,
                    link,
                } => {
                    let request = confirmed_mass_action(action, count, &duration, &link)?;
                    launch_mass_action(ctx, operator, request).await
                }
                ConfirmationToken::Broadcast { target } => {
                    let text = text.ok_or(ValidationError::EmptyMessage)?;
                    launch_broadcast(ctx, operator, BroadcastRequest::new(&text, &target)?).await
                }
            }
        }
        ControlRequest::Stop => Ok(ControlReply::StopRequested {
            active: ctx.control.stop(operator),
        }),
    }
}

fn confirmed_mass_action(
    action: MassAction,
    count: usize,
    duration: &str,
    link: &str,
) -> Result<MassActionRequest, ValidationError> {
    MassActionRequest::from_input(action, link, &CountInput::Text(count.to_string()), duration)
}

async fn onboarding_step(
    ctx: &ApiContext,
    operator: OperatorId,
    input: &str,
) -> Result<ControlReply, ApiError> {
    let slot = {
        let mut flows = ctx.onboarding.lock().await;
        Arc::clone(
            flows
                .entry(operator)
                .or_insert_with(|| Arc::new(Mutex::new(ctx.control.onboarding()))),
        )
    };

    let mut flow = slot.lock().await;
    let notice = flow.submit(input).await?;
    let step = flow.step();
    let finished = flow.is_finished();
    drop(flow);

    if finished {
        let mut flows = ctx.onboarding.lock().await;
        if flows.get(&operator).is_some_and(|current| Arc::ptr_eq(current, &slot)) {
            flows.remove(&operator);
        }
    }
    Ok(ControlReply::Onboarding {
        step,
        message: notice.message(),
    })
}

async fn cancel_onboarding(ctx: &ApiContext, operator: OperatorId) -> ControlReply {
    let slot = ctx.onboarding.lock().await.remove(&operator);
    let had_session = match slot {
        Some(slot) => slot.lock().await.abort().await,
        None => false,
    };
    info!(%operator, had_session, "onboarding cancelled");
    ControlReply::OnboardingCancelled { had_session }
}

async fn launch_mass_action(
    ctx: &ApiContext,
    operator: OperatorId,
    request: MassActionRequest,
) -> Result<ControlReply, ApiError> {
    let launched = ctx
        .control
        .launch_mass_action(operator, request, ctx.sink(operator))
        .await?;
    Ok(launched_reply(launched))
}

async fn launch_broadcast(
    ctx: &ApiContext,
    operator: OperatorId,
    request: BroadcastRequest,
) -> Result<ControlReply, ApiError> {
    let request = request.with_interval(ctx.broadcast_interval);
    let launched = ctx
        .control
        .launch_broadcast(operator, request, ctx.sink(operator))
        .await?;
    Ok(launched_reply(launched))
}

fn launched_reply(launched: LaunchedOperation) -> ControlReply {
    ControlReply::Launched {
        operation_id: launched.operation_id,
        kind: launched.kind,
        accounts: launched.accounts,
        interval_ms: launched.interval.as_millis() as u64,
    }
}

pub fn operation_status(
    ctx: &ApiContext,
    operator: OperatorId,
) -> Result<OperationStatus, ApiError> {
    ctx.control.status(operator).ok_or_else(|| {
        ApiError::new(
            ErrorCode::NotFound,
            format!("operator {operator} has no running operation"),
        )
    })
}

pub async fn list_accounts(ctx: &ApiContext) -> Vec<AccountStatus> {
    ctx.control.pool().statuses().await
}

pub async fn subscription_stats(ctx: &ApiContext) -> Vec<SubscriptionStats> {
    ctx.control.ledger().stats().await
}

pub async fn remove_account(ctx: &ApiContext, raw_phone: &str) -> Result<(), ApiError> {
    let phone = Phone::parse(raw_phone)?;
    ctx.control.remove_account(&phone).await?;
    Ok(())
}

#[cfg(test)]
#[path = "tests/mod_tests.rs"]
mod tests;
