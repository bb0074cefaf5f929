use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::client::{MemoryRequest, MemoryResponse, MemoryService};
use crate::error::MemoryRpcError;

#[derive(Debug, Clone)]
pub struct HttpMemoryServiceConfig {
    pub base_url: String,
    /// Attempts per call; transport failures back off exponentially between
    /// them, starting at `backoff_base`.
    pub max_attempts: u32,
    pub backoff_base: Duration,
    /// Consecutive failed calls that open the circuit.
    pub circuit_threshold: u32,
    pub circuit_cooldown: Duration,
    pub request_timeout: Duration,
}

impl HttpMemoryServiceConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            max_attempts: 3,
            backoff_base: Duration::from_millis(200),
            circuit_threshold: 5,
            circuit_cooldown: Duration::from_secs(60),
            request_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Default)]
struct CircuitState {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

/// Memory service over HTTP: JSON op envelope, exponential backoff, and a
/// consecutive-failure circuit breaker. When the circuit is open the caller
/// degrades instead of queueing work against a dead dependency.
pub struct HttpMemoryService {
    client: reqwest::Client,
    config: HttpMemoryServiceConfig,
    circuit: Mutex<CircuitState>,
}

impl HttpMemoryService {
    pub fn new(config: HttpMemoryServiceConfig) -> Result<Self, MemoryRpcError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| MemoryRpcError::Transport(e.to_string()))?;
        Ok(Self { client, config, circuit: Mutex::new(CircuitState::default()) })
    }

    fn check_circuit(&self) -> Result<(), MemoryRpcError> {
        let mut guard = self.circuit.lock().expect("circuit lock poisoned");
        if let Some(until) = guard.open_until {
            if Instant::now() < until {
                return Err(MemoryRpcError::CircuitOpen {
                    failures: guard.consecutive_failures,
                });
            }
            // Cooldown elapsed: half-open, allow one probe through.
            guard.open_until = None;
        }
        Ok(())
    }

    fn record_result(&self, success: bool) {
        let mut guard = self.circuit.lock().expect("circuit lock poisoned");
        if success {
            guard.consecutive_failures = 0;
            guard.open_until = None;
        } else {
            guard.consecutive_failures += 1;
            if guard.consecutive_failures >= self.config.circuit_threshold {
                warn!(
                    failures = guard.consecutive_failures,
                    cooldown_s = self.config.circuit_cooldown.as_secs(),
                    "memory service circuit opened"
                );
                guard.open_until = Some(Instant::now() + self.config.circuit_cooldown);
            }
        }
    }

    async fn post_once(&self, request: &MemoryRequest) -> Result<MemoryResponse, MemoryRpcError> {
        let url = format!("{}/rpc", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| MemoryRpcError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(MemoryRpcError::Transport(format!(
                "unexpected status {}",
                response.status()
            )));
        }
        response
            .json::<MemoryResponse>()
            .await
            .map_err(|e| MemoryRpcError::Transport(e.to_string()))
    }
}

#[async_trait]
impl MemoryService for HttpMemoryService {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn call(&self, request: MemoryRequest) -> Result<Value, MemoryRpcError> {
        self.check_circuit()?;

        let mut backoff = self.config.backoff_base;
        let mut last_error = None;
        for attempt in 1..=self.config.max_attempts {
            match self.post_once(&request).await {
                Ok(response) if response.ok => {
                    self.record_result(true);
                    debug!(op = %request.op, correlation_id = %request.correlation_id, "rpc ok");
                    return Ok(response.result.unwrap_or(Value::Null));
                }
                Ok(response) => {
                    // An explicit rejection is not retried; it would fail
                    // the same way again.
                    self.record_result(false);
                    return Err(MemoryRpcError::Rpc {
                        op: request.op.to_string(),
                        code: response.error_code.unwrap_or_else(|| "unknown".to_string()),
                        message: response.error_message.unwrap_or_default(),
                    });
                }
                Err(e) => {
                    warn!(
                        op = %request.op,
                        correlation_id = %request.correlation_id,
                        attempt,
                        error = %e,
                        "rpc transport failure"
                    );
                    last_error = Some(e);
                    if attempt < self.config.max_attempts {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }

        self.record_result(false);
        Err(last_error.unwrap_or_else(|| MemoryRpcError::Transport("exhausted".to_string())))
    }
}
