use serde::{Deserialize, Serialize};

/// Raw YAML representation of a contract file (`<name>.contract.yml`).
///
/// A contract declares which topics a component subscribes to and which it
/// may publish, each bound to a message kind and schema version.
#[derive(Debug, Deserialize, Serialize)]
pub struct RawContract {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub subscribe: Vec<RawBinding>,
    #[serde(default)]
    pub publish: Vec<RawBinding>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RawBinding {
    pub topic: String,
    pub kind: String,
    pub version: u32,
}
