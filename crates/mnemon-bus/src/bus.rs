use async_trait::async_trait;
use mnemon_contracts::Topic;
use tokio::sync::mpsc;

use crate::error::BusError;

/// One message as delivered from the bus, before envelope deserialization.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub topic: Topic,
    pub payload: Vec<u8>,
}

/// A live subscription: a bounded stream of deliveries for one topic. The
/// channel bound is the per-partition work queue; when the consumer falls
/// behind, the poller suspends and lag builds on the bus instead.
pub struct BusSubscription {
    pub topic: Topic,
    pub receiver: mpsc::Receiver<Delivery>,
}

/// Transport abstraction over the message bus.
///
/// Exactly two implementations exist: the in-process bus that drives tests
/// and local development with no broker at all, and the NATS bus used in
/// production. Consumers never name topics; they subscribe to whatever the
/// contracts resolved.
#[async_trait]
pub trait MessageBus: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn publish(&self, topic: &Topic, payload: Vec<u8>) -> Result<(), BusError>;

    /// Open a subscription with the given work-queue capacity.
    async fn subscribe(&self, topic: &Topic, capacity: usize)
        -> Result<BusSubscription, BusError>;

    /// Cheap liveness probe used by the health surface.
    async fn healthy(&self) -> bool;
}
