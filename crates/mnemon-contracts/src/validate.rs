use std::collections::HashMap;
use std::path::Path;

use mnemon_domain::EventKind;
use serde::{Deserialize, Serialize};

use crate::error::ContractError;
use crate::raw::{RawBinding, RawContract};
use crate::topic::Topic;

/// One validated topic↔kind binding inside a contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageBinding {
    pub topic: Topic,
    pub kind: EventKind,
    pub version: u32,
}

/// A validated contract file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    pub name: String,
    pub description: Option<String>,
    pub subscribe: Vec<MessageBinding>,
    pub publish: Vec<MessageBinding>,
}

/// The union of all contracts, ready to drive the consumer fleet and the
/// dispatch registry.
#[derive(Debug, Clone)]
pub struct ResolvedContracts {
    /// Deduplicated subscription bindings in first-seen order.
    pub subscriptions: Vec<MessageBinding>,
    /// Topic each `(kind, version)` publishes to.
    pub publish_routes: HashMap<(EventKind, u32), Topic>,
}

impl ResolvedContracts {
    pub fn subscription_topics(&self) -> Vec<&Topic> {
        self.subscriptions.iter().map(|b| &b.topic).collect()
    }

    pub fn publish_topic(&self, kind: EventKind, version: u32) -> Option<&Topic> {
        self.publish_routes.get(&(kind, version))
    }
}

pub(crate) fn convert_contract(raw: RawContract, path: &Path) -> Result<Contract, ContractError> {
    let subscribe = raw
        .subscribe
        .into_iter()
        .map(|b| convert_binding(b, path))
        .collect::<Result<Vec<_>, _>>()?;
    let publish = raw
        .publish
        .into_iter()
        .map(|b| convert_binding(b, path))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Contract {
        name: raw.name,
        description: raw.description,
        subscribe,
        publish,
    })
}

fn convert_binding(raw: RawBinding, path: &Path) -> Result<MessageBinding, ContractError> {
    let topic = Topic::parse(&raw.topic).map_err(|message| ContractError::InvalidTopic {
        path: path.display().to_string(),
        topic: raw.topic.clone(),
        message,
    })?;
    let kind = EventKind::parse(&raw.kind).map_err(|_| ContractError::UnknownKind {
        path: path.display().to_string(),
        kind: raw.kind.clone(),
    })?;

    // The topic must agree with the kind it carries: qualifier, version and
    // the dashed spelling of the event name.
    if topic.qualifier != kind.qualifier() {
        return Err(ContractError::InvalidTopic {
            path: path.display().to_string(),
            topic: raw.topic.clone(),
            message: format!(
                "kind-qualifier '{}' does not match kind '{}' ({})",
                topic.qualifier,
                kind,
                kind.qualifier()
            ),
        });
    }
    if topic.version != raw.version {
        return Err(ContractError::InvalidTopic {
            path: path.display().to_string(),
            topic: raw.topic.clone(),
            message: format!(
                "topic version v{} does not match declared version {}",
                topic.version, raw.version
            ),
        });
    }
    let expected_name = kind.as_str().replace('_', "-");
    if topic.event_name != expected_name {
        return Err(ContractError::InvalidTopic {
            path: path.display().to_string(),
            topic: raw.topic.clone(),
            message: format!(
                "event-name '{}' does not match kind '{}' (expected '{}')",
                topic.event_name, kind, expected_name
            ),
        });
    }

    Ok(MessageBinding { topic, kind, version: raw.version })
}

/// Resolve the union of all contracts.
///
/// Subscription ambiguity is fatal: the same `(kind, version)` bound to two
/// different topics means the fleet could not know which stream is
/// authoritative. The identical binding appearing in several contracts is
/// deduplicated.
pub fn resolve(contracts: &[Contract]) -> Result<ResolvedContracts, ContractError> {
    let mut subscriptions: Vec<MessageBinding> = Vec::new();
    let mut by_route: HashMap<(EventKind, u32), Topic> = HashMap::new();

    for contract in contracts {
        for binding in &contract.subscribe {
            match by_route.get(&(binding.kind, binding.version)) {
                Some(existing) if *existing != binding.topic => {
                    return Err(ContractError::AmbiguousOverlap {
                        kind: binding.kind.as_str().to_string(),
                        version: binding.version,
                        first: existing.to_string(),
                        second: binding.topic.to_string(),
                    });
                }
                Some(_) => {} // identical duplicate, keep the first
                None => {
                    by_route.insert((binding.kind, binding.version), binding.topic.clone());
                    subscriptions.push(binding.clone());
                }
            }
        }
    }

    let mut publish_routes: HashMap<(EventKind, u32), Topic> = HashMap::new();
    for contract in contracts {
        for binding in &contract.publish {
            match publish_routes.get(&(binding.kind, binding.version)) {
                Some(existing) if *existing != binding.topic => {
                    return Err(ContractError::AmbiguousOverlap {
                        kind: binding.kind.as_str().to_string(),
                        version: binding.version,
                        first: existing.to_string(),
                        second: binding.topic.to_string(),
                    });
                }
                _ => {
                    publish_routes
                        .insert((binding.kind, binding.version), binding.topic.clone());
                }
            }
        }
    }

    Ok(ResolvedContracts { subscriptions, publish_routes })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(topic: &str, kind: EventKind) -> MessageBinding {
        MessageBinding {
            topic: Topic::parse(topic).unwrap(),
            kind,
            version: 1,
        }
    }

    fn contract(name: &str, subscribe: Vec<MessageBinding>) -> Contract {
        Contract { name: name.into(), description: None, subscribe, publish: vec![] }
    }

    #[test]
    fn union_deduplicates_identical_bindings() {
        let b = binding(
            "prod.mnemon.evt.review-ingest.finding-observed.v1",
            EventKind::FindingObserved,
        );
        let resolved = resolve(&[
            contract("pairing", vec![b.clone()]),
            contract("audit", vec![b.clone()]),
        ])
        .unwrap();
        assert_eq!(resolved.subscriptions.len(), 1);
    }

    #[test]
    fn conflicting_topics_for_same_kind_are_ambiguous() {
        let a = binding(
            "prod.mnemon.evt.review-ingest.finding-observed.v1",
            EventKind::FindingObserved,
        );
        let b = binding(
            "prod.mnemon.evt.other-producer.finding-observed.v1",
            EventKind::FindingObserved,
        );
        let err = resolve(&[contract("pairing", vec![a]), contract("audit", vec![b])]);
        assert!(matches!(err, Err(ContractError::AmbiguousOverlap { .. })));
    }
}
