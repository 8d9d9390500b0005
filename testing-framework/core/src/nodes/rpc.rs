use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    net::SocketAddr,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::trace;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Node RPC calls the harness issues.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RpcMethod {
    GetDynamicGlobalProperties,
    EnumVirtualOps,
    NetworkGetInfo,
    NetworkSetAllowedPeers,
    NetworkAddNode,
    NetworkGetConnectedPeers,
    GetVersion,
}

impl RpcMethod {
    pub const ALL: [Self; 7] = [
        Self::GetDynamicGlobalProperties,
        Self::EnumVirtualOps,
        Self::NetworkGetInfo,
        Self::NetworkSetAllowedPeers,
        Self::NetworkAddNode,
        Self::NetworkGetConnectedPeers,
        Self::GetVersion,
    ];

    #[must_use]
    pub const fn default_name(self) -> &'static str {
        match self {
            Self::GetDynamicGlobalProperties => "database_api.get_dynamic_global_properties",
            Self::EnumVirtualOps => "account_history_api.enum_virtual_ops",
            Self::NetworkGetInfo => "network_node_api.get_info",
            Self::NetworkSetAllowedPeers => "network_node_api.set_allowed_peers",
            Self::NetworkAddNode => "network_node_api.add_node",
            Self::NetworkGetConnectedPeers => "network_node_api.get_connected_peers",
            Self::GetVersion => "database_api.get_version",
        }
    }
}

impl fmt::Display for RpcMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.default_name())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MethodTableError {
    #[error("rpc method name '{name}' is not of the form <api>.<method>")]
    Malformed { name: String },
    #[error("rpc method name '{name}' is mapped more than once")]
    Duplicate { name: String },
}

/// Wire names of [`RpcMethod`]s, fixed once at construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RpcMethodTable {
    names: BTreeMap<RpcMethod, String>,
}

impl Default for RpcMethodTable {
    fn default() -> Self {
        Self {
            names: RpcMethod::ALL
                .into_iter()
                .map(|method| (method, method.default_name().to_owned()))
                .collect(),
        }
    }
}

impl RpcMethodTable {
    /// Default table with `overrides` applied. Every name must be
    /// `<api>.<method>` and no two methods may share a name.
    pub fn with_overrides(
        overrides: impl IntoIterator<Item = (RpcMethod, String)>,
    ) -> Result<Self, MethodTableError> {
        let mut table = Self::default();
        for (method, name) in overrides {
            table.names.insert(method, name);
        }

        let mut seen = BTreeSet::new();
        for name in table.names.values() {
            let well_formed = name
                .split_once('.')
                .is_some_and(|(api, call)| !api.is_empty() && !call.is_empty());
            if !well_formed {
                return Err(MethodTableError::Malformed { name: name.clone() });
            }
            if !seen.insert(name.as_str()) {
                return Err(MethodTableError::Duplicate { name: name.clone() });
            }
        }

        Ok(table)
    }

    #[must_use]
    pub fn name(&self, method: RpcMethod) -> &str {
        self.names
            .get(&method)
            .map_or_else(|| method.default_name(), String::as_str)
    }
}

#[derive(Debug, Error)]
pub enum CommunicationError {
    #[error("{method} to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        method: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{method} on {endpoint} returned error {code}: {message}")]
    Rpc {
        endpoint: String,
        method: String,
        code: i64,
        message: String,
        data: Option<Value>,
    },
    #[error("{method} on {endpoint} returned an unexpected payload: {source}")]
    Decode {
        endpoint: String,
        method: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{method} on {endpoint} returned neither result nor error")]
    EmptyResponse { endpoint: String, method: String },
    #[error("{endpoint} is unavailable: {reason}")]
    Unavailable { endpoint: String, reason: String },
}

impl CommunicationError {
    /// Error code reported by the remote side, if the call reached it.
    #[must_use]
    pub const fn rpc_code(&self) -> Option<i64> {
        match self {
            Self::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Dispatches node RPC calls. Implemented over HTTP and by the in-memory
/// cluster used in tests.
#[async_trait]
pub trait NodeRpc: Send + Sync {
    /// Human readable target, used in errors and logs.
    fn endpoint(&self) -> String;

    async fn call(&self, method: RpcMethod, params: Value) -> Result<Value, CommunicationError>;
}

#[derive(Serialize)]
struct RequestEnvelope<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    id: u64,
    params: &'a Value,
}

#[derive(Debug, Deserialize)]
struct ResponseEnvelope {
    /// `Some(Value::Null)` for `"result": null`, `None` when the member is
    /// absent.
    #[serde(default, deserialize_with = "present")]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

/// JSON-RPC 2.0 client over HTTP POST.
pub struct JsonRpcClient {
    client: Client,
    url: String,
    methods: RpcMethodTable,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    #[must_use]
    pub fn new(addr: SocketAddr) -> Self {
        Self::with_methods(addr, RpcMethodTable::default())
    }

    #[must_use]
    pub fn with_methods(addr: SocketAddr, methods: RpcMethodTable) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: format!("http://{addr}"),
            methods,
            next_id: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Issues `method` with `params` as given, object or positional array.
    pub async fn call_raw(&self, method: &str, params: Value) -> Result<Value, CommunicationError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RequestEnvelope {
            jsonrpc: "2.0",
            method,
            id,
            params: &params,
        };
        trace!(url = %self.url, method, id, "rpc request");

        let transport = |source| CommunicationError::Transport {
            endpoint: self.url.clone(),
            method: method.to_owned(),
            source,
        };
        let body = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(transport)?
            .error_for_status()
            .map_err(transport)?
            .bytes()
            .await
            .map_err(transport)?;

        let response: ResponseEnvelope =
            serde_json::from_slice(&body).map_err(|source| CommunicationError::Decode {
                endpoint: self.url.clone(),
                method: method.to_owned(),
                source,
            })?;

        match (response.result, response.error) {
            (_, Some(error)) => Err(CommunicationError::Rpc {
                endpoint: self.url.clone(),
                method: method.to_owned(),
                code: error.code,
                message: error.message,
                data: error.data,
            }),
            (Some(result), None) => Ok(result),
            (None, None) => Err(CommunicationError::EmptyResponse {
                endpoint: self.url.clone(),
                method: method.to_owned(),
            }),
        }
    }
}

#[async_trait]
impl NodeRpc for JsonRpcClient {
    fn endpoint(&self) -> String {
        self.url.clone()
    }

    async fn call(&self, method: RpcMethod, params: Value) -> Result<Value, CommunicationError> {
        self.call_raw(self.methods.name(method), params).await
    }
}

/// Decodes a call result into `T`, attributing failures to `method`.
pub(crate) fn decode<T: serde::de::DeserializeOwned>(
    endpoint: &str,
    method: impl fmt::Display,
    value: Value,
) -> Result<T, CommunicationError> {
    serde_json::from_value(value).map_err(|source| CommunicationError::Decode {
        endpoint: endpoint.to_owned(),
        method: method.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::{Json, Router, extract::State, routing::post};
    use serde_json::json;
    use tokio::net::TcpListener;

    use super::*;

    type Seen = Arc<Mutex<Vec<Value>>>;

    async fn serve(reply: fn(&Value) -> Value) -> (SocketAddr, Seen) {
        let seen: Seen = Arc::default();
        let app = Router::new()
            .route(
                "/",
                post(
                    move |State(seen): State<Seen>, Json(request): Json<Value>| async move {
                        let body = reply(&request);
                        seen.lock().unwrap().push(request);
                        Json(body)
                    },
                ),
            )
            .with_state(Arc::clone(&seen));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, seen)
    }

    #[test]
    fn default_table_uses_api_method_names() {
        let table = RpcMethodTable::default();
        for method in RpcMethod::ALL {
            assert!(table.name(method).contains('.'));
        }
        assert_eq!(
            table.name(RpcMethod::NetworkSetAllowedPeers),
            "network_node_api.set_allowed_peers"
        );
    }

    #[test]
    fn table_rejects_malformed_and_duplicate_names() {
        assert_eq!(
            RpcMethodTable::with_overrides([(RpcMethod::GetVersion, "get_version".to_owned())]),
            Err(MethodTableError::Malformed {
                name: "get_version".to_owned()
            })
        );
        assert_eq!(
            RpcMethodTable::with_overrides([(
                RpcMethod::GetVersion,
                "network_node_api.get_info".to_owned()
            )]),
            Err(MethodTableError::Duplicate {
                name: "network_node_api.get_info".to_owned()
            })
        );
    }

    #[tokio::test]
    async fn request_carries_jsonrpc_envelope() {
        let (addr, seen) = serve(|request| {
            json!({"jsonrpc": "2.0", "id": request["id"], "result": {"ok": true}})
        })
        .await;
        let client = JsonRpcClient::new(addr);

        let result = client
            .call(RpcMethod::NetworkGetInfo, json!({}))
            .await
            .unwrap();

        assert_eq!(result, json!({"ok": true}));
        let request = seen.lock().unwrap()[0].clone();
        assert_eq!(request["jsonrpc"], "2.0");
        assert_eq!(request["method"], "network_node_api.get_info");
        assert_eq!(request["params"], json!({}));
        assert!(request["id"].is_u64());
    }

    #[tokio::test]
    async fn error_member_becomes_rpc_error() {
        let (addr, _) = serve(|request| {
            json!({
                "jsonrpc": "2.0",
                "id": request["id"],
                "error": {"code": -32003, "message": "missing plugin"}
            })
        })
        .await;
        let client = JsonRpcClient::new(addr);

        let err = client
            .call(RpcMethod::GetVersion, json!({}))
            .await
            .unwrap_err();

        assert_eq!(err.rpc_code(), Some(-32003));
        assert!(err.to_string().contains("missing plugin"));
    }

    #[tokio::test]
    async fn null_result_is_a_successful_void_call() {
        let (addr, _) = serve(|request| {
            json!({"jsonrpc": "2.0", "id": request["id"], "result": null})
        })
        .await;
        let client = JsonRpcClient::new(addr);

        let result = client.call_raw("unlock", json!(["password"])).await.unwrap();
        assert_eq!(result, Value::Null);

        let wallet = crate::nodes::WalletApi::http(addr);
        wallet.unlock("password").await.unwrap();
        wallet.set_password("password").await.unwrap();
    }

    #[tokio::test]
    async fn missing_result_is_empty_response() {
        let (addr, _) = serve(|request| json!({"jsonrpc": "2.0", "id": request["id"]})).await;
        let client = JsonRpcClient::new(addr);

        let err = client
            .call(RpcMethod::GetVersion, json!({}))
            .await
            .unwrap_err();

        assert!(matches!(err, CommunicationError::EmptyResponse { .. }));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transport_error() {
        let port = portpicker::pick_unused_port().unwrap();
        let client = JsonRpcClient::new(SocketAddr::from(([127, 0, 0, 1], port)));

        let err = client
            .call(RpcMethod::GetVersion, json!({}))
            .await
            .unwrap_err();

        assert!(matches!(err, CommunicationError::Transport { .. }));
    }
}
