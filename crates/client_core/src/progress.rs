use async_trait::async_trait;
use shared::{
    domain::OperatorId,
    protocol::{OperationEvent, OperatorEvent},
};
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

/// Receives the user-visible output of an executor run.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn emit(&self, event: OperationEvent);
}

#[async_trait]
impl ProgressSink for mpsc::UnboundedSender<OperationEvent> {
    async fn emit(&self, event: OperationEvent) {
        let _ = self.send(event);
    }
}

/// Fans an operator's events out to every subscriber of a shared channel.
#[derive(Clone)]
pub struct OperatorChannel {
    operator: OperatorId,
    events: broadcast::Sender<OperatorEvent>,
}

impl OperatorChannel {
    pub fn new(operator: OperatorId, events: broadcast::Sender<OperatorEvent>) -> Self {
        Self { operator, events }
    }
}

#[async_trait]
impl ProgressSink for OperatorChannel {
    async fn emit(&self, event: OperationEvent) {
        if self
            .events
            .send(OperatorEvent {
                operator_id: self.operator,
                event,
            })
            .is_err()
        {
            debug!(operator = %self.operator, "no event subscribers");
        }
    }
}
