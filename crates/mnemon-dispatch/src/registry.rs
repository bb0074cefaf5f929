use std::collections::HashMap;
use std::sync::Arc;

use mnemon_domain::EventKind;

use crate::error::DispatchError;
use crate::handler::Handler;

/// The `(kind, schema_version)` → handler table.
///
/// Built once at startup from the contract files, then read-only for the
/// life of the process. Registration is explicit; there is no reflection
/// and no silent override.
#[derive(Default)]
pub struct HandlerRegistry {
    routes: HashMap<(EventKind, u32), Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an exact `(kind, version)` pair. A second
    /// registration for the same pair is an error, never a replacement.
    pub fn register(
        &mut self,
        kind: EventKind,
        version: u32,
        handler: Arc<dyn Handler>,
    ) -> Result<(), DispatchError> {
        if self.routes.contains_key(&(kind, version)) {
            return Err(DispatchError::DuplicateRegistration { kind, version });
        }
        self.routes.insert((kind, version), handler);
        Ok(())
    }

    pub fn lookup(&self, kind: EventKind, version: u32) -> Option<Arc<dyn Handler>> {
        self.routes.get(&(kind, version)).cloned()
    }

    /// The highest version registered for `kind`, if any. Used to classify
    /// a too-new `schema_version` as a schema violation rather than an
    /// unknown kind.
    pub fn max_version(&self, kind: EventKind) -> Option<u32> {
        self.routes
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, v)| *v)
            .max()
    }

    pub fn routes(&self) -> impl Iterator<Item = (EventKind, u32)> + '_ {
        self.routes.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{HandlerContext, Outcome};
    use async_trait::async_trait;
    use mnemon_domain::Envelope;

    struct Noop;

    #[async_trait]
    impl crate::handler::Handler for Noop {
        fn name(&self) -> &'static str {
            "noop"
        }

        async fn handle(&self, _envelope: &Envelope, _ctx: &HandlerContext) -> Outcome {
            Outcome::Ok(vec![])
        }
    }

    #[test]
    fn duplicate_registration_is_an_error() {
        let mut registry = HandlerRegistry::new();
        registry
            .register(EventKind::PairCreated, 1, Arc::new(Noop))
            .unwrap();
        let err = registry.register(EventKind::PairCreated, 1, Arc::new(Noop));
        assert!(matches!(
            err,
            Err(DispatchError::DuplicateRegistration { kind: EventKind::PairCreated, version: 1 })
        ));
    }

    #[test]
    fn versions_route_independently() {
        let mut registry = HandlerRegistry::new();
        registry
            .register(EventKind::PairCreated, 1, Arc::new(Noop))
            .unwrap();
        registry
            .register(EventKind::PairCreated, 2, Arc::new(Noop))
            .unwrap();
        assert!(registry.lookup(EventKind::PairCreated, 1).is_some());
        assert!(registry.lookup(EventKind::PairCreated, 2).is_some());
        assert!(registry.lookup(EventKind::PairCreated, 3).is_none());
        assert_eq!(registry.max_version(EventKind::PairCreated), Some(2));
    }
}
