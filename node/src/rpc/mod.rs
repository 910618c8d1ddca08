//! JSON-RPC client transport.
//!
//! Single and batched calls over HTTP with a hard per-call timeout. The
//! transport never retries; retry policy lives with the callers that own a
//! polling loop.

mod api;
pub mod types;

pub use api::{ChainSnapshot, HeartbeatSnapshot, NodeApi, ObserverFeedSnapshot};
pub use types::{BlockchainInfo, ObservedBlock, ObservedTransaction, ObserverStats, StatsMode};

use eyre::{Result, WrapErr};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8332";
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Endpoint and timeout for RPC calls. Persisted as the connection config.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RpcConfig {
    pub endpoint: String,
    pub timeout_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl RpcConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Failure of a single or batched RPC call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("http status {status}")]
    HttpStatus { status: u16 },
    #[error("rpc error {code} in {context}: {message}")]
    Rpc {
        code: i64,
        message: String,
        context: String,
    },
    #[error("{method} returned a null result")]
    NullResult { method: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// One entry of a batch request.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcCall {
    pub method: String,
    pub params: Vec<Value>,
}

impl RpcCall {
    pub fn new(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    pub fn no_params(method: impl Into<String>) -> Self {
        Self::new(method, Vec::new())
    }
}

#[derive(Debug, Deserialize)]
struct ResponseEnvelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ErrorEnvelope>,
    #[serde(default)]
    id: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

/// HTTP JSON-RPC transport with a request id counter shared by single and
/// batch calls.
#[derive(Debug)]
pub struct RpcTransport {
    client: Client,
    next_id: AtomicU64,
}

impl RpcTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .build()
            .wrap_err("failed to build RPC http client")?;
        Ok(Self {
            client,
            next_id: AtomicU64::new(1),
        })
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Call `method` and decode its result.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
        config: &RpcConfig,
    ) -> Result<T, RpcError> {
        let value = self.call_raw(method, params, config).await?;
        decode(method, value)
    }

    /// Call `method` and return the raw, non-null result.
    pub async fn call_raw(
        &self,
        method: &str,
        params: Vec<Value>,
        config: &RpcConfig,
    ) -> Result<Value, RpcError> {
        validate_method(method)?;
        let id = self.next_id();
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        });
        let response = self.post(&body, config).await?;
        let envelope: ResponseEnvelope = serde_json::from_value(response)
            .map_err(|err| RpcError::InvalidResponse(format!("{method}: {err}")))?;
        envelope_result(envelope, method, method.to_string())
    }

    /// Send a batch and fail on the first failing entry. Results keep the
    /// order of `calls`.
    pub async fn batch_call(
        &self,
        calls: &[RpcCall],
        config: &RpcConfig,
    ) -> Result<Vec<Value>, RpcError> {
        self.batch_call_settled(calls, config)
            .await?
            .into_iter()
            .collect()
    }

    /// Send a batch and return one outcome per entry, in the order of
    /// `calls`. The outer error covers failures of the whole exchange.
    pub async fn batch_call_settled(
        &self,
        calls: &[RpcCall],
        config: &RpcConfig,
    ) -> Result<Vec<Result<Value, RpcError>>, RpcError> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }
        for call in calls {
            validate_method(&call.method)?;
        }

        let ids: Vec<u64> = calls.iter().map(|_| self.next_id()).collect();
        let body = Value::Array(
            calls
                .iter()
                .zip(&ids)
                .map(|(call, id)| {
                    json!({
                        "jsonrpc": "2.0",
                        "method": call.method,
                        "params": call.params,
                        "id": id,
                    })
                })
                .collect(),
        );

        let response = self.post(&body, config).await?;
        let envelopes = match response {
            Value::Array(items) => items
                .into_iter()
                .map(serde_json::from_value::<ResponseEnvelope>)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|err| RpcError::InvalidResponse(format!("batch: {err}")))?,
            other => {
                // A server that rejects the whole batch answers with a single envelope.
                let envelope: ResponseEnvelope = serde_json::from_value(other)
                    .map_err(|err| RpcError::InvalidResponse(format!("batch: {err}")))?;
                return Err(envelope_result(envelope, "batch", "batch".to_string())
                    .err()
                    .unwrap_or_else(|| {
                        RpcError::InvalidResponse("batch answered with a single result".into())
                    }));
            }
        };

        if envelopes.len() != calls.len() {
            return Err(RpcError::InvalidResponse(format!(
                "batch of {} answered with {} responses",
                calls.len(),
                envelopes.len()
            )));
        }

        Ok(order_by_id(envelopes, &ids)
            .into_iter()
            .enumerate()
            .map(|(index, envelope)| {
                let method = calls[index].method.as_str();
                envelope_result(envelope, method, format!("batch[{index}] {method}"))
            })
            .collect())
    }

    async fn post(&self, body: &Value, config: &RpcConfig) -> Result<Value, RpcError> {
        let request = self.client.post(&config.endpoint).json(body);
        let exchange = async {
            let response = request
                .send()
                .await
                .map_err(|err| RpcError::Network(err.to_string()))?;
            let status = response.status();
            if !status.is_success() {
                return Err(RpcError::HttpStatus {
                    status: status.as_u16(),
                });
            }
            response
                .json::<Value>()
                .await
                .map_err(|err| RpcError::InvalidResponse(err.to_string()))
        };

        // Dropping `exchange` on expiry aborts the in-flight request.
        match tokio::time::timeout(config.timeout(), exchange).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::Timeout {
                timeout_ms: config.timeout_ms,
            }),
        }
    }
}

fn validate_method(method: &str) -> Result<(), RpcError> {
    if method.trim().is_empty() {
        return Err(RpcError::InvalidRequest("method name is empty".into()));
    }
    Ok(())
}

fn envelope_result(
    envelope: ResponseEnvelope,
    method: &str,
    context: String,
) -> Result<Value, RpcError> {
    if let Some(error) = envelope.error {
        let message = match error.data {
            Some(data) if !data.is_null() => format!("{} ({data})", error.message),
            _ => error.message,
        };
        return Err(RpcError::Rpc {
            code: error.code,
            message,
            context,
        });
    }
    match envelope.result {
        Some(value) => Ok(value),
        None => Err(RpcError::NullResult {
            method: method.to_string(),
        }),
    }
}

/// Put responses back into request order using their ids. Falls back to
/// positional order when ids are missing or do not match the request.
fn order_by_id(envelopes: Vec<ResponseEnvelope>, ids: &[u64]) -> Vec<ResponseEnvelope> {
    let positions: Option<Vec<usize>> = envelopes
        .iter()
        .map(|envelope| {
            envelope
                .id
                .as_ref()
                .and_then(Value::as_u64)
                .and_then(|id| ids.iter().position(|candidate| *candidate == id))
        })
        .collect();

    let Some(positions) = positions else {
        return envelopes;
    };
    let mut seen = vec![false; ids.len()];
    for position in &positions {
        if seen[*position] {
            return envelopes;
        }
        seen[*position] = true;
    }

    let mut slots: Vec<Option<ResponseEnvelope>> = (0..ids.len()).map(|_| None).collect();
    for (envelope, position) in envelopes.into_iter().zip(positions) {
        slots[position] = Some(envelope);
    }
    slots.into_iter().flatten().collect()
}

pub(crate) fn decode<T: DeserializeOwned>(method: &str, value: Value) -> Result<T, RpcError> {
    serde_json::from_value(value).map_err(|err| RpcError::InvalidResponse(format!("{method}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonrpsee::server::ServerBuilder;
    use jsonrpsee::types::ErrorObjectOwned;
    use jsonrpsee::RpcModule;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn test_module() -> RpcModule<()> {
        let mut module = RpcModule::new(());
        module
            .register_method("echo", |params, _, _| -> Result<Value, ErrorObjectOwned> {
                let values: Vec<Value> = params.parse()?;
                Ok(Value::Array(values))
            })
            .expect("register echo");
        module
            .register_method("nothing", |_, _, _| Ok::<Value, ErrorObjectOwned>(Value::Null))
            .expect("register nothing");
        module
            .register_method("explode", |_, _, _| {
                Err::<Value, ErrorObjectOwned>(ErrorObjectOwned::owned(
                    -32000,
                    "boom",
                    None::<()>,
                ))
            })
            .expect("register explode");
        module
    }

    async fn start_test_server() -> SocketAddr {
        let server = ServerBuilder::default()
            .build("127.0.0.1:0")
            .await
            .expect("bind test server");
        let addr = server.local_addr().expect("local addr");
        let handle = server.start(test_module());
        tokio::spawn(handle.stopped());
        addr
    }

    fn config_for(addr: SocketAddr) -> RpcConfig {
        RpcConfig {
            endpoint: format!("http://{addr}"),
            timeout_ms: 2_000,
        }
    }

    #[tokio::test]
    async fn single_call_decodes_result() {
        let addr = start_test_server().await;
        let transport = RpcTransport::new().expect("transport");
        let result: Vec<u64> = transport
            .call("echo", vec![json!(1), json!(2)], &config_for(addr))
            .await
            .expect("echo");
        assert_eq!(result, vec![1, 2]);
    }

    #[tokio::test]
    async fn batch_results_keep_request_order() {
        let addr = start_test_server().await;
        let transport = RpcTransport::new().expect("transport");
        let calls = vec![
            RpcCall::new("echo", vec![json!("a")]),
            RpcCall::new("echo", vec![json!("b")]),
            RpcCall::new("echo", vec![json!("c")]),
        ];
        let results = transport
            .batch_call(&calls, &config_for(addr))
            .await
            .expect("batch");
        assert_eq!(results, vec![json!(["a"]), json!(["b"]), json!(["c"])]);
    }

    #[tokio::test]
    async fn batch_error_names_index_and_method() {
        let addr = start_test_server().await;
        let transport = RpcTransport::new().expect("transport");
        let calls = vec![
            RpcCall::new("echo", vec![json!(1)]),
            RpcCall::no_params("explode"),
        ];
        let err = transport
            .batch_call(&calls, &config_for(addr))
            .await
            .expect_err("batch should fail");
        match err {
            RpcError::Rpc {
                code,
                message,
                context,
            } => {
                assert_eq!(code, -32000);
                assert_eq!(message, "boom");
                assert_eq!(context, "batch[1] explode");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn settled_batch_keeps_successful_entries() {
        let addr = start_test_server().await;
        let transport = RpcTransport::new().expect("transport");
        let calls = vec![
            RpcCall::new("echo", vec![json!(7)]),
            RpcCall::no_params("nothing"),
        ];
        let results = transport
            .batch_call_settled(&calls, &config_for(addr))
            .await
            .expect("batch exchange");
        assert_eq!(results[0], Ok(json!([7])));
        assert_eq!(
            results[1],
            Err(RpcError::NullResult {
                method: "nothing".into()
            })
        );
    }

    #[tokio::test]
    async fn null_result_is_a_distinct_failure() {
        let addr = start_test_server().await;
        let transport = RpcTransport::new().expect("transport");
        let err = transport
            .call_raw("nothing", Vec::new(), &config_for(addr))
            .await
            .expect_err("null result");
        assert_eq!(
            err,
            RpcError::NullResult {
                method: "nothing".into()
            }
        );
    }

    #[tokio::test]
    async fn unknown_method_surfaces_rpc_error() {
        let addr = start_test_server().await;
        let transport = RpcTransport::new().expect("transport");
        let err = transport
            .call_raw("getnothing", Vec::new(), &config_for(addr))
            .await
            .expect_err("method not found");
        match err {
            RpcError::Rpc { code, context, .. } => {
                assert_eq!(code, -32601);
                assert_eq!(context, "getnothing");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn request_ids_are_shared_across_single_and_batch() {
        let addr = start_test_server().await;
        let transport = RpcTransport::new().expect("transport");
        let config = config_for(addr);
        transport
            .call_raw("echo", Vec::new(), &config)
            .await
            .expect("single");
        transport
            .batch_call(
                &[RpcCall::no_params("echo"), RpcCall::no_params("echo")],
                &config,
            )
            .await
            .expect("batch");
        assert_eq!(transport.next_id.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn empty_method_is_rejected_without_network() {
        let transport = RpcTransport::new().expect("transport");
        let config = RpcConfig {
            endpoint: "http://127.0.0.1:1".into(),
            timeout_ms: 10,
        };
        let err = transport
            .call_raw("  ", Vec::new(), &config)
            .await
            .expect_err("empty method");
        assert!(matches!(err, RpcError::InvalidRequest(_)));
        assert_eq!(transport.next_id.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn silent_server_times_out_with_configured_duration() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            // Accept and hold the connection without ever answering.
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let transport = RpcTransport::new().expect("transport");
        let config = RpcConfig {
            endpoint: format!("http://{addr}"),
            timeout_ms: 150,
        };
        let err = transport
            .call_raw("echo", Vec::new(), &config)
            .await
            .expect_err("timeout");
        assert_eq!(err, RpcError::Timeout { timeout_ms: 150 });
        assert!(err.to_string().contains("150ms"));
    }

    #[tokio::test]
    async fn non_success_status_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(
                        b"HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                    )
                    .await;
            }
        });

        let transport = RpcTransport::new().expect("transport");
        let err = transport
            .call_raw("echo", Vec::new(), &config_for(addr))
            .await
            .expect_err("http status");
        assert_eq!(err, RpcError::HttpStatus { status: 503 });
    }

    #[test]
    fn responses_are_reordered_by_id() {
        let envelopes = vec![
            ResponseEnvelope {
                result: Some(json!("second")),
                error: None,
                id: Some(json!(11)),
            },
            ResponseEnvelope {
                result: Some(json!("first")),
                error: None,
                id: Some(json!(10)),
            },
        ];
        let ordered = order_by_id(envelopes, &[10, 11]);
        let results: Vec<_> = ordered.into_iter().map(|env| env.result).collect();
        assert_eq!(results, vec![Some(json!("first")), Some(json!("second"))]);
    }
}
