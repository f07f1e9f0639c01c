//! RPC gateway to the external node
//!
//! The gateway is the sole channel to the node: it frames JSON-RPC calls,
//! applies a per-call timeout, and centralizes the fallback-to-synthetic-data
//! behavior so every caller sees one failure contract. It does not cache.

pub mod fallback;
pub mod methods;

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

use crate::config::RpcConfig;

/// Errors that can occur when talking to the node
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("RPC call '{method}' timed out after {timeout_seconds}s")]
    Timeout {
        method: String,
        timeout_seconds: u64,
    },

    #[error("Connection to node refused: {0}")]
    ConnectionRefused(String),

    #[error("Node error {code}: {message}")]
    NodeError { code: i64, message: String },
}

/// Result of a gateway call: the raw response value plus its provenance
#[derive(Debug, Clone)]
pub struct RpcResponse {
    pub value: Value,
    /// True when the value is synthetic fallback data, not a live response
    pub is_fallback: bool,
}

impl RpcResponse {
    pub fn live(value: Value) -> Self {
        RpcResponse {
            value,
            is_fallback: false,
        }
    }

    pub fn fallback(value: Value) -> Self {
        RpcResponse {
            value,
            is_fallback: true,
        }
    }
}

/// Channel to the external node's RPC interface
///
/// Implementations must be safe for concurrent use; the scheduler and
/// on-demand triggers may call concurrently.
#[async_trait]
pub trait RpcGateway: Send + Sync {
    /// Perform one RPC call
    ///
    /// Read-only methods with a known response shape fall back to synthetic
    /// data on failure (flagged in the response); everything else propagates
    /// the error.
    async fn call(&self, method: &str, params: Value) -> Result<RpcResponse, RpcError>;
}

/// JSON-RPC gateway over HTTP, in the framing used by bitcoind-style nodes
pub struct HttpRpcGateway {
    client: reqwest::Client,
    url: String,
    username: String,
    password: String,
    timeout_seconds: u64,
    /// When set, every call returns synthetic data without touching the node
    force_fallback: bool,
}

impl HttpRpcGateway {
    /// Create a gateway from the RPC section of the configuration
    pub fn new(config: &RpcConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .unwrap_or_default();

        HttpRpcGateway {
            client,
            url: config.url.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            timeout_seconds: config.timeout_seconds,
            force_fallback: config.force_fallback,
        }
    }

    /// Perform the network call and unwrap the JSON-RPC envelope
    async fn call_node(&self, method: &str, params: &Value) -> Result<Value, RpcError> {
        let body = json!({
            "jsonrpc": "1.0",
            "id": "peerwarden",
            "method": method,
            "params": params,
        });

        let request = self
            .client
            .post(&self.url)
            .basic_auth(&self.username, Some(&self.password))
            .json(&body);

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                return Err(RpcError::Timeout {
                    method: method.to_string(),
                    timeout_seconds: self.timeout_seconds,
                })
            }
            Err(e) => return Err(RpcError::ConnectionRefused(e.to_string())),
        };

        let envelope: Value = response.json().await.map_err(|e| RpcError::NodeError {
            code: -32700,
            message: format!("unparseable response: {}", e),
        })?;

        if let Some(err) = envelope.get("error").filter(|e| !e.is_null()) {
            return Err(RpcError::NodeError {
                code: err.get("code").and_then(Value::as_i64).unwrap_or(-1),
                message: err
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown node error")
                    .to_string(),
            });
        }

        Ok(envelope.get("result").cloned().unwrap_or(Value::Null))
    }
}

#[async_trait]
impl RpcGateway for HttpRpcGateway {
    async fn call(&self, method: &str, params: Value) -> Result<RpcResponse, RpcError> {
        if self.force_fallback {
            if let Some(synthetic) = fallback::synthetic_response(method) {
                log::debug!("Serving forced fallback data for '{}'", method);
                return Ok(RpcResponse::fallback(synthetic));
            }
        }

        match self.call_node(method, &params).await {
            Ok(value) => Ok(RpcResponse::live(value)),
            Err(e) => {
                // Only read methods have a synthetic shape; mutating calls
                // (ban, disconnect) must surface their failure.
                if let Some(synthetic) = fallback::synthetic_response(method) {
                    log::warn!("RPC '{}' failed ({}), serving fallback data", method, e);
                    Ok(RpcResponse::fallback(synthetic))
                } else {
                    Err(e)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(force_fallback: bool) -> RpcConfig {
        RpcConfig {
            // Port 9 (discard) is never a live node
            url: "http://127.0.0.1:9".to_string(),
            username: "user".to_string(),
            password: "pass".to_string(),
            timeout_seconds: 1,
            force_fallback,
        }
    }

    #[tokio::test]
    async fn test_forced_fallback_skips_network() {
        let gateway = HttpRpcGateway::new(&test_config(true));
        let response = gateway
            .call(methods::LIST_PEERS, Value::Null)
            .await
            .unwrap();
        assert!(response.is_fallback);
        assert!(response.value.is_array());
    }

    #[tokio::test]
    async fn test_read_method_falls_back_on_connection_failure() {
        let gateway = HttpRpcGateway::new(&test_config(false));
        let response = gateway
            .call(methods::LIST_PEERS, Value::Null)
            .await
            .unwrap();
        assert!(response.is_fallback);
    }

    #[tokio::test]
    async fn test_action_method_propagates_connection_failure() {
        let gateway = HttpRpcGateway::new(&test_config(false));
        let result = gateway
            .call(methods::DISCONNECT_PEER, json!(["203.0.113.5:8333"]))
            .await;
        assert!(matches!(
            result,
            Err(RpcError::ConnectionRefused(_)) | Err(RpcError::Timeout { .. })
        ));
    }

    #[tokio::test]
    async fn test_fallback_data_is_deterministic() {
        let gateway = HttpRpcGateway::new(&test_config(true));
        let a = gateway
            .call(methods::LIST_PEERS, Value::Null)
            .await
            .unwrap();
        let b = gateway
            .call(methods::LIST_PEERS, Value::Null)
            .await
            .unwrap();
        assert_eq!(a.value, b.value);
    }
}
