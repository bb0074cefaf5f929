use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── UUID-backed identifiers ──────────────────────────────────────────────────

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                $name(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(u: Uuid) -> Self {
                $name(u)
            }
        }
    };
}

uuid_id!(
    /// Idempotency key of a single envelope. Duplicates of the same
    /// `MessageId` must be observationally equivalent to one delivery.
    MessageId
);
uuid_id!(
    /// Threaded through every operation triggered by one logical request.
    CorrelationId
);
uuid_id!(EventId);
uuid_id!(PatternId);
uuid_id!(PairId);
uuid_id!(DomainId);

// ── String-backed identifiers ────────────────────────────────────────────────
//
// Review findings, fixes and sessions carry externally-assigned ids; they are
// opaque strings here. FixId ordering matters: same-commit pairing ties break
// on the lexicographically smallest fix id.

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                $name(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id!(
    /// The entity an FSM instance is addressed by, unique per `FsmKind`.
    EntityId
);
string_id!(SessionId);
string_id!(RunId);
string_id!(ProducerId);
string_id!(FindingId);
string_id!(FixId);
string_id!(ResolutionId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_ids_render_lowercase() {
        let id = MessageId::new();
        let s = id.to_string();
        assert_eq!(s, s.to_lowercase());
        assert_eq!(s.len(), 36);
    }

    #[test]
    fn fix_ids_order_lexicographically() {
        let a = FixId::new("fix-a");
        let b = FixId::new("fix-b");
        assert!(a < b);
    }

    #[test]
    fn ids_round_trip_through_json() {
        let id = CorrelationId::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: CorrelationId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
