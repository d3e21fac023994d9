//! Task queue bridge (spec section 4.8).
//!
//! The bus itself is a narrow `async_trait` seam — in production this is
//! Pub/Sub-equivalent; here it is an in-process `tokio::mpsc` channel,
//! grounded in the same publish/subscribe shape the teacher used for its
//! connector registry.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info};
use uuid::Uuid;

use crate::errors::{CoreError, CoreResult};
use crate::models::{TaskKind, TaskStatus};
use crate::persistence::PgStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMessage {
    pub task_id: Uuid,
    pub task_type: TaskKind,
    pub input_data: serde_json::Value,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, message: TaskMessage) -> CoreResult<()>;
}

/// Single-process channel bus. `publish` enqueues; a [`BusWorker`] drains
/// the other end.
pub struct ChannelBus {
    sender: mpsc::UnboundedSender<TaskMessage>,
}

impl ChannelBus {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TaskMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl MessageBus for ChannelBus {
    async fn publish(&self, message: TaskMessage) -> CoreResult<()> {
        self.sender
            .send(message)
            .map_err(|e| CoreError::Fatal(format!("bus receiver dropped: {}", e)))
    }
}

/// Dispatches a [`TaskMessage`] to the appropriate pipeline; returns the
/// task's result payload on success.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    async fn dispatch(&self, message: &TaskMessage) -> CoreResult<serde_json::Value>;
}

/// Drains messages from the bus, updating [`crate::models::IngestTask`]
/// status through queued -> processing -> completed|failed, acknowledging
/// each message by virtue of having consumed it from the channel.
pub struct BusWorker<'a> {
    store: &'a PgStore,
    dispatcher: &'a dyn TaskDispatcher,
}

impl<'a> BusWorker<'a> {
    pub fn new(store: &'a PgStore, dispatcher: &'a dyn TaskDispatcher) -> Self {
        Self { store, dispatcher }
    }

    pub async fn run(&self, mut receiver: mpsc::UnboundedReceiver<TaskMessage>) {
        while let Some(message) = receiver.recv().await {
            self.handle_one(message).await;
        }
    }

    async fn handle_one(&self, message: TaskMessage) {
        if let Err(e) = self
            .store
            .update_task_status(message.task_id, TaskStatus::Processing, None, None)
            .await
        {
            error!(task_id = %message.task_id, error = %e, "failed to mark task processing");
            return;
        }

        match self.dispatcher.dispatch(&message).await {
            Ok(result) => {
                if let Err(e) = self
                    .store
                    .update_task_status(message.task_id, TaskStatus::Completed, Some(result), None)
                    .await
                {
                    error!(task_id = %message.task_id, error = %e, "failed to mark task completed");
                }
                info!(task_id = %message.task_id, "task completed");
            }
            Err(e) => {
                let message_str = e.stable_message();
                if let Err(update_err) = self
                    .store
                    .update_task_status(message.task_id, TaskStatus::Failed, None, Some(&message_str))
                    .await
                {
                    error!(task_id = %message.task_id, error = %update_err, "failed to mark task failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_delivers_to_receiver() {
        let (bus, mut receiver) = ChannelBus::new();
        let msg = TaskMessage {
            task_id: Uuid::new_v4(),
            task_type: TaskKind::UrlProcessing,
            input_data: serde_json::json!({"url": "https://example.com"}),
            metadata: serde_json::Value::Null,
        };
        bus.publish(msg.clone()).await.unwrap();
        let received = receiver.recv().await.unwrap();
        assert_eq!(received.task_id, msg.task_id);
    }
}
