use mnemon_domain::envelope::KindQualifier;
use serde::{Deserialize, Serialize};

/// A parsed bus topic: `{env}.{system}.{cmd|evt}.{producer}.{event-name}.v{n}`.
///
/// Topic strings come exclusively from contract files; nothing in the
/// service hardcodes one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Topic {
    pub env: String,
    pub system: String,
    pub qualifier: KindQualifier,
    pub producer: String,
    pub event_name: String,
    pub version: u32,
}

impl Topic {
    /// Parse a dotted topic string. Every segment must be non-empty; the
    /// third segment must be `cmd` or `evt`; the last must be `v{n}`.
    pub fn parse(s: &str) -> Result<Topic, String> {
        let segments: Vec<&str> = s.split('.').collect();
        if segments.len() != 6 {
            return Err(format!("expected 6 dot-separated segments, got {}", segments.len()));
        }
        if segments.iter().any(|seg| seg.is_empty()) {
            return Err("empty segment".to_string());
        }
        let qualifier = match segments[2] {
            "cmd" => KindQualifier::Cmd,
            "evt" => KindQualifier::Evt,
            other => return Err(format!("kind-qualifier must be cmd|evt, got '{other}'")),
        };
        let version = segments[5]
            .strip_prefix('v')
            .and_then(|n| n.parse::<u32>().ok())
            .ok_or_else(|| format!("version segment must be v<n>, got '{}'", segments[5]))?;
        Ok(Topic {
            env: segments[0].to_string(),
            system: segments[1].to_string(),
            qualifier,
            producer: segments[3].to_string(),
            event_name: segments[4].to_string(),
            version,
        })
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}.{}.v{}",
            self.env, self.system, self.qualifier, self.producer, self.event_name, self.version
        )
    }
}
