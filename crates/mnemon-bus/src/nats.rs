use async_trait::async_trait;
use futures::StreamExt;
use mnemon_contracts::Topic;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::bus::{BusSubscription, Delivery, MessageBus};
use crate::error::BusError;

/// Production bus transport over NATS.
///
/// Topic strings map directly to NATS subjects. The subject-side poller
/// forwards into the bounded work queue; when the queue is full the
/// forwarder suspends, which is what lets broker lag absorb backpressure.
pub struct NatsBus {
    client: async_nats::Client,
}

impl NatsBus {
    /// Connect to the configured bootstrap endpoints. Failure here is what
    /// puts the service into degraded mode — the caller decides, this just
    /// reports.
    pub async fn connect(bootstrap: &str) -> Result<Self, BusError> {
        let client = async_nats::connect(bootstrap)
            .await
            .map_err(|e| BusError::Unreachable(format!("{bootstrap}: {e}")))?;
        info!(bootstrap, "connected to message bus");
        Ok(Self { client })
    }
}

#[async_trait]
impl MessageBus for NatsBus {
    fn name(&self) -> &'static str {
        "nats"
    }

    async fn publish(&self, topic: &Topic, payload: Vec<u8>) -> Result<(), BusError> {
        self.client
            .publish(topic.to_string(), payload.into())
            .await
            .map_err(|e| BusError::Publish {
                topic: topic.to_string(),
                message: e.to_string(),
            })?;
        self.client.flush().await.map_err(|e| BusError::Publish {
            topic: topic.to_string(),
            message: format!("flush: {e}"),
        })?;
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &Topic,
        capacity: usize,
    ) -> Result<BusSubscription, BusError> {
        let mut subscriber = self
            .client
            .subscribe(topic.to_string())
            .await
            .map_err(|e| BusError::Subscribe {
                topic: topic.to_string(),
                message: e.to_string(),
            })?;

        let (tx, rx) = mpsc::channel(capacity);
        let forward_topic = topic.clone();
        tokio::spawn(async move {
            while let Some(message) = subscriber.next().await {
                let delivery = Delivery {
                    topic: forward_topic.clone(),
                    payload: message.payload.to_vec(),
                };
                if tx.send(delivery).await.is_err() {
                    // Receiver dropped: the worker is gone, stop forwarding.
                    break;
                }
            }
            warn!(topic = %forward_topic, "subject stream ended");
        });

        Ok(BusSubscription { topic: topic.clone(), receiver: rx })
    }

    async fn healthy(&self) -> bool {
        self.client.connection_state() == async_nats::connection::State::Connected
    }
}
