use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use mnemon_contracts::ResolvedContracts;
use mnemon_domain::{Envelope, MessageId};
use tracing::{debug, info};

use crate::bus::MessageBus;
use crate::error::BusError;

/// Idempotent event producer.
///
/// Routes each envelope to the topic its `(kind, version)` is contracted to
/// publish on. Emission is deduplicated by `message_id`: when a crash between
/// handler commit and emit causes the handler to re-run, the replayed
/// envelope collapses here instead of producing a duplicate downstream event.
pub struct Producer {
    bus: Arc<dyn MessageBus>,
    contracts: ResolvedContracts,
    emitted: Mutex<EmittedCache>,
}

#[derive(Default)]
struct EmittedCache {
    set: HashSet<MessageId>,
    order: VecDeque<MessageId>,
}

const EMITTED_CAPACITY: usize = 65_536;

impl Producer {
    pub fn new(bus: Arc<dyn MessageBus>, contracts: ResolvedContracts) -> Self {
        Self { bus, contracts, emitted: Mutex::new(EmittedCache::default()) }
    }

    /// Publish one envelope on its contracted topic. A repeat of an already
    /// emitted `message_id` is a no-op.
    pub async fn emit(&self, envelope: &Envelope) -> Result<(), BusError> {
        {
            let guard = self.emitted.lock().expect("emitted lock poisoned");
            if guard.set.contains(&envelope.message_id) {
                debug!(message_id = %envelope.message_id, "duplicate emit collapsed");
                return Ok(());
            }
        }

        let topic = self
            .contracts
            .publish_topic(envelope.kind, envelope.schema_version)
            .ok_or_else(|| BusError::NoPublishRoute(envelope.kind.to_string()))?;

        let payload = serde_json::to_vec(envelope)?;
        self.bus.publish(topic, payload).await?;
        info!(
            message_id = %envelope.message_id,
            correlation_id = %envelope.correlation_id,
            kind = %envelope.kind,
            topic = %topic,
            "emitted"
        );

        let mut guard = self.emitted.lock().expect("emitted lock poisoned");
        if guard.set.insert(envelope.message_id) {
            guard.order.push_back(envelope.message_id);
            if guard.order.len() > EMITTED_CAPACITY {
                if let Some(evicted) = guard.order.pop_front() {
                    guard.set.remove(&evicted);
                }
            }
        }
        Ok(())
    }

    pub async fn emit_all(&self, envelopes: &[Envelope]) -> Result<(), BusError> {
        for envelope in envelopes {
            self.emit(envelope).await?;
        }
        Ok(())
    }
}
