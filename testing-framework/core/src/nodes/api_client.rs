use std::{net::SocketAddr, sync::Arc};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};

use super::rpc::{CommunicationError, NodeRpc, RpcMethod, decode};

const VIRTUAL_OPS_PAGE_LIMIT: u32 = 1_000;
const MAX_VIRTUAL_OPS_PAGES: usize = 10_000;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicGlobalProperties {
    pub head_block_number: u64,
    pub last_irreversible_block_num: u64,
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub current_witness: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualOperation {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub value: Value,
}

/// One entry of `enum_virtual_ops`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualOpRecord {
    #[serde(default)]
    pub trx_id: String,
    pub block: u64,
    #[serde(default)]
    pub trx_in_block: i64,
    #[serde(default)]
    pub op_in_trx: u64,
    #[serde(default)]
    pub virtual_op: bool,
    #[serde(default)]
    pub timestamp: String,
    pub op: VirtualOperation,
    #[serde(default)]
    pub operation_id: Value,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumVirtualOpsRequest {
    pub block_range_begin: u64,
    pub block_range_end: u64,
    pub include_reversible: bool,
    pub group_by_block: bool,
    pub operation_begin: u64,
    pub limit: u32,
}

impl EnumVirtualOpsRequest {
    /// Blocks in `[begin, end)`, reversible ones included.
    #[must_use]
    pub const fn range(begin: u64, end: u64) -> Self {
        Self {
            block_range_begin: begin,
            block_range_end: end,
            include_reversible: true,
            group_by_block: false,
            operation_begin: 0,
            limit: VIRTUAL_OPS_PAGE_LIMIT,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumVirtualOpsResponse {
    #[serde(default)]
    pub ops: Vec<VirtualOpRecord>,
    #[serde(default)]
    pub next_block_range_begin: u64,
    #[serde(default)]
    pub next_operation_begin: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub node_id: String,
    #[serde(default)]
    pub listening_on: String,
    #[serde(default)]
    pub connection_count: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedPeer {
    pub host: String,
    #[serde(default)]
    pub info: Value,
}

#[derive(Deserialize)]
struct ConnectedPeers {
    #[serde(default)]
    connected_peers: Vec<ConnectedPeer>,
}

/// Typed view over a node's RPC surface.
#[derive(Clone)]
pub struct NodeApi {
    rpc: Arc<dyn NodeRpc>,
}

impl NodeApi {
    #[must_use]
    pub fn new(rpc: Arc<dyn NodeRpc>) -> Self {
        Self { rpc }
    }

    #[must_use]
    /// HTTP client against `addr`, default method names.
    pub fn http(addr: SocketAddr) -> Self {
        Self::new(Arc::new(super::rpc::JsonRpcClient::new(addr)))
    }

    #[must_use]
    pub fn endpoint(&self) -> String {
        self.rpc.endpoint()
    }

    #[must_use]
    pub fn rpc(&self) -> &Arc<dyn NodeRpc> {
        &self.rpc
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: RpcMethod,
        params: Value,
    ) -> Result<T, CommunicationError> {
        let value = self.rpc.call(method, params).await?;
        decode(&self.rpc.endpoint(), method, value)
    }

    pub async fn dynamic_global_properties(
        &self,
    ) -> Result<DynamicGlobalProperties, CommunicationError> {
        self.call(RpcMethod::GetDynamicGlobalProperties, json!({}))
            .await
    }

    pub async fn head_block_number(&self) -> Result<u64, CommunicationError> {
        Ok(self.dynamic_global_properties().await?.head_block_number)
    }

    pub async fn enum_virtual_ops(
        &self,
        request: &EnumVirtualOpsRequest,
    ) -> Result<EnumVirtualOpsResponse, CommunicationError> {
        let params = serde_json::to_value(request).map_err(|source| {
            CommunicationError::Decode {
                endpoint: self.endpoint(),
                method: RpcMethod::EnumVirtualOps.to_string(),
                source,
            }
        })?;
        self.call(RpcMethod::EnumVirtualOps, params).await
    }

    /// All virtual operations in `[begin, end)`, following pagination.
    pub async fn virtual_ops_in_range(
        &self,
        begin: u64,
        end: u64,
    ) -> Result<Vec<VirtualOpRecord>, CommunicationError> {
        let mut request = EnumVirtualOpsRequest::range(begin, end);
        let mut collected = Vec::new();

        for _ in 0..MAX_VIRTUAL_OPS_PAGES {
            let page = self.enum_virtual_ops(&request).await?;
            let full_page = page.ops.len() >= request.limit as usize;
            collected.extend(page.ops);

            let advanced = page.next_block_range_begin > request.block_range_begin
                || page.next_operation_begin > request.operation_begin;
            if !full_page || page.next_operation_begin == 0 || !advanced {
                break;
            }
            request.block_range_begin = page.next_block_range_begin;
            request.operation_begin = page.next_operation_begin;
        }

        Ok(collected)
    }

    pub async fn network_info(&self) -> Result<NetworkInfo, CommunicationError> {
        self.call(RpcMethod::NetworkGetInfo, json!({})).await
    }

    /// Restricts the node's peers to `peers` (node ids).
    pub async fn set_allowed_peers(&self, peers: &[String]) -> Result<(), CommunicationError> {
        self.rpc
            .call(
                RpcMethod::NetworkSetAllowedPeers,
                json!({ "allowed_peers": peers }),
            )
            .await
            .map(drop)
    }

    /// Asks the node to dial `endpoint`.
    pub async fn add_node(&self, endpoint: SocketAddr) -> Result<(), CommunicationError> {
        self.rpc
            .call(
                RpcMethod::NetworkAddNode,
                json!({ "endpoint": endpoint.to_string() }),
            )
            .await
            .map(drop)
    }

    pub async fn connected_peers(&self) -> Result<Vec<ConnectedPeer>, CommunicationError> {
        let peers: ConnectedPeers = self
            .call(RpcMethod::NetworkGetConnectedPeers, json!({}))
            .await?;
        Ok(peers.connected_peers)
    }

    pub async fn version(&self) -> Result<Value, CommunicationError> {
        self.rpc.call(RpcMethod::GetVersion, json!({})).await
    }
}
