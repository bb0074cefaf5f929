use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::error::ConfigError;

pub const DEFAULT_LEASE_TTL_SECONDS: u64 = 300;
pub const DEFAULT_HANDLER_TIMEOUT_SECONDS: u64 = 60;
pub const DEFAULT_PAIRING_CONFIDENCE_FLOOR: f64 = 0.5;
pub const DEFAULT_RETENTION_DAYS_FSM_HISTORY: i64 = 90;

/// Immutable service settings, resolved once at startup from environment
/// variables and passed down as an injected object. The recognized option
/// set is closed; there are no localhost defaults.
///
/// Secrets (`db_url`, `api_auth_token`) are skipped when the settings are
/// serialized for the /status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    #[serde(skip_serializing)]
    pub db_url: String,
    /// Message bus endpoints. Required when consumers are enabled.
    pub bus_bootstrap: Option<String>,
    /// Unset means no consumers start: read-only / health-only mode.
    pub activation_gate: bool,
    /// Directory holding the contract files that define the subscription set.
    pub contracts_dir: PathBuf,
    pub producer_id: String,
    pub lease_ttl: Duration,
    pub handler_timeout: Duration,
    /// Endpoint of the external memory service; required for the
    /// pattern-learning pipeline.
    pub memory_service_url: Option<String>,
    pub pairing_confidence_floor: f64,
    pub retention_days_fsm_history: i64,
    /// Bind address for the read/health surface, e.g. `0.0.0.0:8088`.
    pub api_bind: Option<String>,
    #[serde(skip_serializing)]
    pub api_auth_token: Option<String>,
}

impl Settings {
    /// Resolve settings from the process environment.
    pub fn from_env() -> Result<Settings, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve settings from an arbitrary key lookup (tests inject a map).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Settings, ConfigError> {
        let db_url = get("DB_URL").ok_or(ConfigError::MissingRequired("DB_URL"))?;
        let producer_id = get("PRODUCER_ID").ok_or(ConfigError::MissingRequired("PRODUCER_ID"))?;
        let contracts_dir = get("CONTRACTS_DIR")
            .map(PathBuf::from)
            .ok_or(ConfigError::MissingRequired("CONTRACTS_DIR"))?;

        let bus_bootstrap = get("BUS_BOOTSTRAP");
        let activation_gate = get("ACTIVATION_GATE").is_some();
        if activation_gate && bus_bootstrap.is_none() {
            return Err(ConfigError::InconsistentOptions {
                option: "ACTIVATION_GATE",
                requires: "BUS_BOOTSTRAP",
            });
        }

        let lease_ttl = Duration::from_secs(parse_or(
            &get,
            "LEASE_TTL_SECONDS",
            DEFAULT_LEASE_TTL_SECONDS,
        )?);
        let handler_timeout = Duration::from_secs(parse_or(
            &get,
            "HANDLER_TIMEOUT_SECONDS",
            DEFAULT_HANDLER_TIMEOUT_SECONDS,
        )?);
        let pairing_confidence_floor = parse_or(
            &get,
            "PAIRING_CONFIDENCE_FLOOR",
            DEFAULT_PAIRING_CONFIDENCE_FLOOR,
        )?;
        if !(0.0..=1.0).contains(&pairing_confidence_floor) {
            return Err(ConfigError::InvalidValue {
                option: "PAIRING_CONFIDENCE_FLOOR",
                message: format!("must be in [0, 1], got {pairing_confidence_floor}"),
            });
        }
        let retention_days_fsm_history = parse_or(
            &get,
            "RETENTION_DAYS_FSM_HISTORY",
            DEFAULT_RETENTION_DAYS_FSM_HISTORY,
        )?;

        let api_bind = get("API_BIND");
        let api_auth_token = get("API_AUTH_TOKEN");
        if api_bind.is_some() && api_auth_token.is_none() {
            return Err(ConfigError::InconsistentOptions {
                option: "API_BIND",
                requires: "API_AUTH_TOKEN",
            });
        }

        let settings = Settings {
            db_url,
            bus_bootstrap,
            activation_gate,
            contracts_dir,
            producer_id,
            lease_ttl,
            handler_timeout,
            memory_service_url: get("MEMORY_SERVICE_URL"),
            pairing_confidence_floor,
            retention_days_fsm_history,
            api_bind,
            api_auth_token,
        };

        info!(
            activation_gate = settings.activation_gate,
            lease_ttl_s = settings.lease_ttl.as_secs(),
            handler_timeout_s = settings.handler_timeout.as_secs(),
            "settings resolved"
        );
        Ok(settings)
    }

    /// Whether the consumer fleet should run at all.
    pub fn consumers_enabled(&self) -> bool {
        self.activation_gate
    }
}

fn parse_or<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    option: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match get(option) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            option,
            message: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_vars() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("DB_URL", "postgres://mnemon@db/mnemon"),
            ("PRODUCER_ID", "mnemon-1"),
            ("CONTRACTS_DIR", "/etc/mnemon/contracts"),
        ])
    }

    fn load(vars: HashMap<&'static str, &'static str>) -> Result<Settings, ConfigError> {
        Settings::from_lookup(|k| vars.get(k).map(|v| v.to_string()))
    }

    #[test]
    fn missing_db_url_is_fatal() {
        let mut vars = base_vars();
        vars.remove("DB_URL");
        assert!(matches!(
            load(vars),
            Err(ConfigError::MissingRequired("DB_URL"))
        ));
    }

    #[test]
    fn defaults_apply() {
        let s = load(base_vars()).unwrap();
        assert_eq!(s.lease_ttl, Duration::from_secs(300));
        assert_eq!(s.handler_timeout, Duration::from_secs(60));
        assert_eq!(s.pairing_confidence_floor, 0.5);
        assert_eq!(s.retention_days_fsm_history, 90);
        assert!(!s.consumers_enabled());
    }

    #[test]
    fn activation_gate_requires_bus_bootstrap() {
        let mut vars = base_vars();
        vars.insert("ACTIVATION_GATE", "1");
        assert!(matches!(
            load(vars),
            Err(ConfigError::InconsistentOptions { option: "ACTIVATION_GATE", .. })
        ));
    }

    #[test]
    fn gate_plus_bus_enables_consumers() {
        let mut vars = base_vars();
        vars.insert("ACTIVATION_GATE", "1");
        vars.insert("BUS_BOOTSTRAP", "nats://bus-0:4222");
        let s = load(vars).unwrap();
        assert!(s.consumers_enabled());
    }

    #[test]
    fn confidence_floor_bounds_checked() {
        let mut vars = base_vars();
        vars.insert("PAIRING_CONFIDENCE_FLOOR", "1.5");
        assert!(matches!(
            load(vars),
            Err(ConfigError::InvalidValue { option: "PAIRING_CONFIDENCE_FLOOR", .. })
        ));
    }

    #[test]
    fn secrets_do_not_serialize() {
        let s = load(base_vars()).unwrap();
        let v = serde_json::to_value(&s).unwrap();
        assert!(v.get("db_url").is_none());
        assert!(v.get("api_auth_token").is_none());
        assert!(v.get("producer_id").is_some());
    }
}
