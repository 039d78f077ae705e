use anyhow::{Context, Result};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

static REQUEST_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Serialize)]
struct JsonRpcRequest<P: Serialize> {
    jsonrpc: &'static str,
    id: u64,
    method: String,
    params: P,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    #[allow(dead_code)]
    jsonrpc: String,
    #[allow(dead_code)]
    id: u64,
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Retry policy for transport-level failures
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before the given retry attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay = (self.initial_delay_ms as f64 * factor) as u64;
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

#[derive(Clone)]
pub struct RpcClient {
    client: Client,
    endpoint: String,
    retry: RetryConfig,
}

impl RpcClient {
    /// Create a new RPC client with custom timeout in milliseconds
    pub fn with_timeout(endpoint: &str, timeout_ms: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            endpoint: endpoint.to_string(),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Perform a JSON-RPC call, retrying transport failures with backoff.
    /// Errors returned by the node itself are not retried.
    pub async fn call<P, R>(&self, method: &str, params: P) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let body = serde_json::to_value(&params).context("Failed to encode RPC params")?;
        let mut attempt = 0;

        loop {
            match self.send(method, &body).await {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(rpc_error)) => return Err(rpc_error),
                Err(transport) if attempt < self.retry.max_retries => {
                    attempt += 1;
                    let delay = self.retry.delay_for(attempt);
                    debug!(
                        "RPC {} failed (attempt {}/{}), retrying in {:?}: {}",
                        method, attempt, self.retry.max_retries, delay, transport
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(transport) => return Err(transport),
            }
        }
    }

    /// Outer error is a transport failure (retryable), inner error is an RPC error.
    async fn send<R>(&self, method: &str, params: &serde_json::Value) -> Result<Result<R>>
    where
        R: DeserializeOwned,
    {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: REQUEST_ID.fetch_add(1, Ordering::SeqCst),
            method: method.to_string(),
            params,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to send RPC request {}", method))?;

        let rpc_response: JsonRpcResponse<R> = response
            .json()
            .await
            .with_context(|| format!("Failed to parse RPC response for {}", method))?;

        if let Some(error) = rpc_response.error {
            return Ok(Err(anyhow::anyhow!(
                "RPC error {} ({}): {}",
                error.code,
                method,
                error.message
            )));
        }

        Ok(rpc_response
            .result
            .with_context(|| format!("RPC response for {} missing result field", method)))
    }
}
