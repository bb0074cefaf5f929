use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use mnemon_contracts::Topic;
use tokio::sync::mpsc;
use tracing::debug;

use crate::bus::{BusSubscription, Delivery, MessageBus};
use crate::error::BusError;

/// In-process bus: per-topic fan-out over bounded channels.
///
/// Carries the same per-topic FIFO guarantee as the production transport and
/// needs no broker, so tests and `ACTIVATION_GATE`-less local runs exercise
/// the full consume→dispatch→produce path synchronously.
#[derive(Default)]
pub struct LocalBus {
    subscribers: Mutex<HashMap<Topic, Vec<mpsc::Sender<Delivery>>>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageBus for LocalBus {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn publish(&self, topic: &Topic, payload: Vec<u8>) -> Result<(), BusError> {
        let senders: Vec<mpsc::Sender<Delivery>> = {
            let guard = self.subscribers.lock().expect("local bus lock poisoned");
            guard.get(topic).cloned().unwrap_or_default()
        };
        if senders.is_empty() {
            debug!(topic = %topic, "publish with no subscribers");
        }
        for sender in senders {
            let delivery = Delivery { topic: topic.clone(), payload: payload.clone() };
            // A full queue suspends the publisher: local backpressure
            // mirrors broker lag.
            sender.send(delivery).await.map_err(|_| BusError::Publish {
                topic: topic.to_string(),
                message: "subscriber dropped".to_string(),
            })?;
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &Topic,
        capacity: usize,
    ) -> Result<BusSubscription, BusError> {
        let (tx, rx) = mpsc::channel(capacity);
        self.subscribers
            .lock()
            .expect("local bus lock poisoned")
            .entry(topic.clone())
            .or_default()
            .push(tx);
        Ok(BusSubscription { topic: topic.clone(), receiver: rx })
    }

    async fn healthy(&self) -> bool {
        true
    }
}
