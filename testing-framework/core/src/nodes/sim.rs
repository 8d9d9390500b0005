//! In-memory cluster that answers the node and wallet RPC surface.
//!
//! Every tick is one block slot. The slot's witness is picked round-robin
//! from all enabled witnesses; the connected component hosting it appends a
//! block. Components sync to their longest chain before producing, and a
//! component advances its last irreversible block only while it holds more
//! than two thirds of the enabled witnesses.

use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use forknet_config::{
    constants::DEFAULT_KEY_PREFIX,
    keys::null_public_key,
    nodes::{NodeConfig, NodePorts},
    topology::NodeId,
};
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tracing::trace;

use super::{
    CommunicationError, NodeApi, NodeLauncher, NodeProcess, NodeRpc, RpcMethod, StartMode,
    WalletApi, WalletMethod, WalletRpc,
    api_client::{EnumVirtualOpsRequest, VirtualOpRecord, VirtualOperation},
    common::node::SpawnNodeError,
    node::LaunchSpec,
    wallet::asset,
};

const FIRST_PORT: u16 = 40_000;
const BLOCK_SECONDS: u64 = 3;
const METHOD_NOT_FOUND: i64 = -32_601;
const ASSERT_EXCEPTION: i64 = -32_000;

#[derive(Clone, Debug)]
struct SimBlock {
    id: u64,
    producer: String,
}

#[derive(Clone, Debug, Default)]
struct ChainState {
    blocks: Vec<SimBlock>,
    lib: u64,
}

impl ChainState {
    fn head(&self) -> u64 {
        self.blocks.len() as u64
    }

    fn tip(&self) -> Option<u64> {
        self.blocks.last().map(|block| block.id)
    }
}

#[derive(Debug)]
struct SimNode {
    running: bool,
    p2p: SocketAddr,
    allowed: Option<BTreeSet<String>>,
    chain: ChainState,
    snapshots: BTreeMap<String, ChainState>,
    extra_vops: Vec<VirtualOpRecord>,
}

impl SimNode {
    fn allows(&self, peer: &str) -> bool {
        self.allowed
            .as_ref()
            .is_none_or(|allowed| allowed.contains(peer))
    }
}

#[derive(Debug)]
struct SimWitness {
    host: String,
    signing_key: Option<String>,
}

impl SimWitness {
    fn enabled(&self) -> bool {
        self.signing_key
            .as_deref()
            .is_none_or(|key| key != null_public_key(DEFAULT_KEY_PREFIX))
    }
}

#[derive(Debug, Default)]
struct ClusterState {
    nodes: BTreeMap<String, SimNode>,
    /// Registration order decides the producer schedule.
    witness_order: Vec<String>,
    witnesses: BTreeMap<String, SimWitness>,
    accounts: BTreeSet<String>,
    next_port: u16,
    next_block_id: u64,
    next_tx_id: u64,
    slot: u64,
    launches: usize,
    rpc_calls: usize,
    transfers: u64,
    fail_transfers_every: Option<u64>,
    wallet_faults: VecDeque<String>,
}

impl ClusterState {
    fn node(&self, label: &str) -> Result<&SimNode, CommunicationError> {
        match self.nodes.get(label) {
            Some(node) if node.running => Ok(node),
            Some(_) => Err(unavailable(label, "process is not running")),
            None => Err(unavailable(label, "unknown node")),
        }
    }

    fn node_mut(&mut self, label: &str) -> Result<&mut SimNode, CommunicationError> {
        match self.nodes.get_mut(label) {
            Some(node) if node.running => Ok(node),
            Some(_) => Err(unavailable(label, "process is not running")),
            None => Err(unavailable(label, "unknown node")),
        }
    }

    fn linked(&self, a: &str, b: &str) -> bool {
        match (self.nodes.get(a), self.nodes.get(b)) {
            (Some(x), Some(y)) => a != b && x.running && y.running && x.allows(b) && y.allows(a),
            _ => false,
        }
    }

    fn peers_of(&self, label: &str) -> Vec<&str> {
        self.nodes
            .keys()
            .filter(|other| self.linked(label, other))
            .map(String::as_str)
            .collect()
    }

    /// Connected components of running nodes.
    fn components(&self) -> Vec<Vec<String>> {
        let mut seen = BTreeSet::new();
        let mut components = Vec::new();
        for (label, node) in &self.nodes {
            if !node.running || seen.contains(label) {
                continue;
            }
            let mut component = Vec::new();
            let mut queue = VecDeque::from([label.clone()]);
            seen.insert(label.clone());
            while let Some(current) = queue.pop_front() {
                for peer in self.peers_of(&current) {
                    if seen.insert(peer.to_owned()) {
                        queue.push_back(peer.to_owned());
                    }
                }
                component.push(current);
            }
            components.push(component);
        }
        components
    }

    fn enabled_witnesses(&self) -> Vec<&str> {
        self.witness_order
            .iter()
            .filter(|name| self.witnesses.get(*name).is_some_and(SimWitness::enabled))
            .map(String::as_str)
            .collect()
    }

    fn sync_component(&mut self, component: &[String]) {
        let Some(best) = component
            .iter()
            .filter_map(|label| self.nodes.get(label))
            .map(|node| &node.chain)
            .max_by_key(|chain| chain.blocks.len())
            .cloned()
        else {
            return;
        };
        let lib = component
            .iter()
            .filter_map(|label| self.nodes.get(label))
            .map(|node| node.chain.lib)
            .max()
            .unwrap_or(0)
            .min(best.head());

        for label in component {
            if let Some(node) = self.nodes.get_mut(label) {
                if node.chain.tip() != best.tip() {
                    node.chain.blocks.clone_from(&best.blocks);
                }
                node.chain.lib = node.chain.lib.max(lib).min(node.chain.head());
            }
        }
    }

    fn tick(&mut self) -> bool {
        let components = self.components();
        for component in &components {
            self.sync_component(component);
        }

        let enabled = self
            .enabled_witnesses()
            .into_iter()
            .map(str::to_owned)
            .collect::<Vec<_>>();
        self.slot += 1;
        if enabled.is_empty() {
            return false;
        }

        let slot_index = usize::try_from(self.slot).unwrap_or(0) % enabled.len();
        let producer = enabled[slot_index].clone();
        let Some(host) = self.witnesses.get(&producer).map(|w| w.host.clone()) else {
            return false;
        };
        let Some(component) = components.iter().find(|c| c.contains(&host)) else {
            return false;
        };

        let in_component = enabled
            .iter()
            .filter(|name| {
                self.witnesses
                    .get(*name)
                    .is_some_and(|w| component.contains(&w.host))
            })
            .count();
        let has_majority = in_component * 3 > enabled.len() * 2;

        self.next_block_id += 1;
        let block = SimBlock {
            id: self.next_block_id,
            producer,
        };
        for label in component {
            if let Some(node) = self.nodes.get_mut(label) {
                node.chain.blocks.push(block.clone());
                if has_majority {
                    node.chain.lib = node.chain.lib.max(node.chain.head().saturating_sub(1));
                }
            }
        }
        trace!(block = block.id, producer = %block.producer, nodes = component.len(), "sim block");
        true
    }

    fn virtual_ops(&self, node: &SimNode) -> Vec<VirtualOpRecord> {
        let mut ops = node
            .chain
            .blocks
            .iter()
            .zip(1u64..)
            .map(|(block, number)| VirtualOpRecord {
                trx_id: "0".repeat(40),
                block: number,
                trx_in_block: -1,
                op_in_trx: 0,
                virtual_op: true,
                timestamp: block_timestamp(number),
                op: VirtualOperation {
                    kind: "producer_reward_operation".to_owned(),
                    value: json!({
                        "producer": block.producer,
                        "vesting_shares": asset(1_000),
                    }),
                },
                operation_id: Value::Null,
            })
            .chain(node.extra_vops.iter().cloned())
            .collect::<Vec<_>>();
        ops.sort_by_key(|op| op.block);
        ops
    }

    fn next_transaction_id(&mut self) -> String {
        self.next_tx_id += 1;
        format!("{:040x}", self.next_tx_id)
    }
}

fn block_timestamp(number: u64) -> String {
    let seconds = number * BLOCK_SECONDS;
    format!(
        "2024-01-{:02}T{:02}:{:02}:{:02}",
        1 + seconds / 86_400,
        (seconds / 3_600) % 24,
        (seconds / 60) % 60,
        seconds % 60
    )
}

fn unavailable(label: &str, reason: &str) -> CommunicationError {
    CommunicationError::Unavailable {
        endpoint: format!("sim://{label}"),
        reason: reason.to_owned(),
    }
}

fn rpc_error(label: &str, method: impl ToString, code: i64, message: String) -> CommunicationError {
    CommunicationError::Rpc {
        endpoint: format!("sim://{label}"),
        method: method.to_string(),
        code,
        message,
        data: None,
    }
}

/// Shared handle to the simulated cluster.
#[derive(Clone, Default)]
pub struct SimulatedCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl SimulatedCluster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn launcher(&self) -> Arc<dyn NodeLauncher> {
        Arc::new(SimLauncher {
            cluster: self.clone(),
        })
    }

    /// Wallet attached to `node`.
    #[must_use]
    pub fn wallet(&self, node: NodeId) -> WalletApi {
        WalletApi::new(Arc::new(SimWalletRpc {
            cluster: self.clone(),
            node: node.to_string(),
        }))
    }

    /// Produces one block slot. Returns whether a block was appended.
    pub fn tick(&self) -> bool {
        self.lock().tick()
    }

    /// Ticks every `interval` until the returned guard drops.
    #[must_use]
    pub fn spawn_block_producer(&self, interval: Duration) -> BlockProducer {
        let cluster = self.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                cluster.tick();
            }
        });
        BlockProducer { task }
    }

    #[must_use]
    pub fn head(&self, node: NodeId) -> Option<u64> {
        self.lock()
            .nodes
            .get(&node.to_string())
            .map(|n| n.chain.head())
    }

    #[must_use]
    pub fn last_irreversible(&self, node: NodeId) -> Option<u64> {
        self.lock()
            .nodes
            .get(&node.to_string())
            .map(|n| n.chain.lib)
    }

    #[must_use]
    pub fn is_enabled(&self, witness: &str) -> bool {
        self.lock()
            .witnesses
            .get(witness)
            .is_some_and(SimWitness::enabled)
    }

    #[must_use]
    pub fn launch_count(&self) -> usize {
        self.lock().launches
    }

    #[must_use]
    pub fn rpc_call_count(&self) -> usize {
        self.lock().rpc_calls
    }

    #[must_use]
    pub fn transfer_count(&self) -> u64 {
        self.lock().transfers
    }

    /// Rejects every `n`th transfer broadcast.
    pub fn fail_transfers_every(&self, n: u64) {
        self.lock().fail_transfers_every = (n > 0).then_some(n);
    }

    /// Makes the next wallet call fail with `message`.
    pub fn fail_next_wallet_call(&self, message: impl Into<String>) {
        self.lock().wallet_faults.push_back(message.into());
    }

    /// Adds a virtual operation to `node`'s history only.
    pub fn inject_virtual_op(&self, node: NodeId, block: u64, kind: &str, value: Value) {
        if let Some(sim) = self.lock().nodes.get_mut(&node.to_string()) {
            sim.extra_vops.push(VirtualOpRecord {
                trx_id: "f".repeat(40),
                block,
                trx_in_block: 0,
                op_in_trx: 1,
                virtual_op: true,
                timestamp: block_timestamp(block),
                op: VirtualOperation {
                    kind: kind.to_owned(),
                    value,
                },
                operation_id: Value::Null,
            });
        }
    }

    /// Stops `node` as if the process crashed.
    pub fn crash(&self, node: NodeId) {
        if let Some(sim) = self.lock().nodes.get_mut(&node.to_string()) {
            sim.running = false;
        }
    }

    fn register(&self, id: NodeId, config: &NodeConfig) {
        let mut state = self.lock();
        let label = id.to_string();
        state.nodes.entry(label.clone()).or_insert_with(|| SimNode {
            running: false,
            p2p: config.ports.p2p_endpoint(),
            allowed: None,
            chain: ChainState::default(),
            snapshots: BTreeMap::new(),
            extra_vops: Vec::new(),
        });
        for witness in &config.witnesses {
            if !state.witnesses.contains_key(witness) {
                state.witness_order.push(witness.clone());
                state.witnesses.insert(
                    witness.clone(),
                    SimWitness {
                        host: label.clone(),
                        signing_key: None,
                    },
                );
            }
        }
    }

    fn start(&self, spec: &LaunchSpec) -> Result<(), SpawnNodeError> {
        let label = spec.id.to_string();
        let mut state = self.lock();
        state.launches += 1;
        let Some(node) = state.nodes.get_mut(&label) else {
            return Err(SpawnNodeError::Launcher {
                node: label,
                message: "node was never configured".to_owned(),
            });
        };

        match &spec.mode {
            StartMode::Fresh => node.chain = ChainState::default(),
            StartMode::Resume => {}
            StartMode::Replay { stop_at, .. } => {
                if let Some(stop_at) = stop_at {
                    let keep = usize::try_from(*stop_at).unwrap_or(usize::MAX);
                    node.chain.blocks.truncate(keep);
                    node.chain.lib = node.chain.lib.min(node.chain.head());
                }
            }
            StartMode::LoadSnapshot { name } => {
                let Some(snapshot) = node.snapshots.get(name).cloned() else {
                    return Err(SpawnNodeError::Launcher {
                        node: label,
                        message: format!("snapshot '{name}' does not exist"),
                    });
                };
                node.chain = snapshot;
            }
            StartMode::DumpSnapshot { name } => {
                node.snapshots.insert(name.clone(), node.chain.clone());
                return Ok(());
            }
        }
        node.running = true;
        Ok(())
    }

    fn set_running(&self, node: &str, running: bool) {
        if let Some(sim) = self.lock().nodes.get_mut(node) {
            sim.running = running;
        }
    }

    fn running(&self, node: &str) -> bool {
        self.lock().nodes.get(node).is_some_and(|sim| sim.running)
    }

    fn handle_node_call(
        &self,
        label: &str,
        method: RpcMethod,
        params: &Value,
    ) -> Result<Value, CommunicationError> {
        let mut state = self.lock();
        state.rpc_calls += 1;
        match method {
            RpcMethod::GetDynamicGlobalProperties => {
                let node = state.node(label)?;
                Ok(json!({
                    "head_block_number": node.chain.head(),
                    "last_irreversible_block_num": node.chain.lib,
                    "time": block_timestamp(node.chain.head()),
                    "current_witness": node.chain.blocks.last().map(|b| b.producer.clone()).unwrap_or_default(),
                }))
            }
            RpcMethod::EnumVirtualOps => {
                let request: EnumVirtualOpsRequest = serde_json::from_value(params.clone())
                    .map_err(|err| rpc_error(label, method, ASSERT_EXCEPTION, err.to_string()))?;
                let node = state.node(label)?;
                Ok(page_virtual_ops(state.virtual_ops(node), &request))
            }
            RpcMethod::NetworkGetInfo => {
                let node = state.node(label)?;
                Ok(json!({
                    "node_id": label,
                    "listening_on": node.p2p.to_string(),
                    "connection_count": state.peers_of(label).len(),
                }))
            }
            RpcMethod::NetworkSetAllowedPeers => {
                let allowed = params
                    .get("allowed_peers")
                    .and_then(Value::as_array)
                    .map(|peers| {
                        peers
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_owned)
                            .collect::<BTreeSet<_>>()
                    })
                    .ok_or_else(|| {
                        rpc_error(label, method, ASSERT_EXCEPTION, "missing allowed_peers".to_owned())
                    })?;
                state.node_mut(label)?.allowed = Some(allowed);
                Ok(Value::Null)
            }
            RpcMethod::NetworkAddNode => {
                state.node(label)?;
                Ok(Value::Null)
            }
            RpcMethod::NetworkGetConnectedPeers => {
                state.node(label)?;
                let peers = state
                    .peers_of(label)
                    .into_iter()
                    .filter_map(|peer| {
                        state.nodes.get(peer).map(|sim| {
                            json!({"host": sim.p2p.to_string(), "info": {"node_id": peer}})
                        })
                    })
                    .collect::<Vec<_>>();
                Ok(json!({ "connected_peers": peers }))
            }
            RpcMethod::GetVersion => {
                state.node(label)?;
                Ok(json!({"blockchain_version": "sim", "node_type": "testnet"}))
            }
        }
    }

    fn handle_wallet_call(
        &self,
        label: &str,
        method: WalletMethod,
        params: &Value,
    ) -> Result<Value, CommunicationError> {
        let mut state = self.lock();
        state.rpc_calls += 1;
        if let Some(message) = state.wallet_faults.pop_front() {
            return Err(rpc_error(label, method, ASSERT_EXCEPTION, message));
        }
        let head = state.node(label)?.chain.head();
        let arg = |index: usize| params.get(index).cloned().unwrap_or(Value::Null);
        let text = |index: usize| arg(index).as_str().map(str::to_owned).unwrap_or_default();

        match method {
            WalletMethod::SetPassword | WalletMethod::Unlock | WalletMethod::ImportKey => {
                Ok(Value::Null)
            }
            WalletMethod::UpdateWitness => {
                let owner = text(0);
                if !state.witnesses.contains_key(&owner) {
                    return Err(rpc_error(
                        label,
                        method,
                        ASSERT_EXCEPTION,
                        format!("unknown witness '{owner}'"),
                    ));
                }
                let operation = json!({
                    "type": "witness_update_operation",
                    "value": {
                        "owner": owner,
                        "url": text(1),
                        "block_signing_key": text(2),
                        "props": arg(3),
                        "fee": asset(0),
                    }
                });
                let transaction = build_transaction(head, vec![operation]);
                if arg(4).as_bool().unwrap_or(false) {
                    return Ok(apply_transaction(&mut state, transaction));
                }
                Ok(transaction)
            }
            WalletMethod::SignTransaction => {
                let transaction = arg(0);
                if arg(1).as_bool().unwrap_or(false) {
                    return Ok(apply_transaction(&mut state, transaction));
                }
                Ok(transaction)
            }
            WalletMethod::Transfer => {
                state.transfers += 1;
                if let Some(n) = state.fail_transfers_every
                    && state.transfers % n == 0
                {
                    return Err(rpc_error(
                        label,
                        method,
                        ASSERT_EXCEPTION,
                        "duplicate transaction check failed".to_owned(),
                    ));
                }
                let operation = json!({
                    "type": "transfer_operation",
                    "value": {"from": text(0), "to": text(1), "amount": text(2), "memo": text(3)}
                });
                Ok(apply_transaction(&mut state, build_transaction(head, vec![operation])))
            }
            WalletMethod::TransferToVesting => {
                let operation = json!({
                    "type": "transfer_to_vesting_operation",
                    "value": {"from": text(0), "to": text(1), "amount": text(2)}
                });
                Ok(apply_transaction(&mut state, build_transaction(head, vec![operation])))
            }
            WalletMethod::CreateAccountWithKeys => {
                let name = text(1);
                state.accounts.insert(name.clone());
                let operation = json!({
                    "type": "account_create_operation",
                    "value": {"creator": text(0), "new_account_name": name}
                });
                Ok(apply_transaction(&mut state, build_transaction(head, vec![operation])))
            }
            WalletMethod::GetWitness => {
                let name = text(0);
                Ok(state.witnesses.get(&name).map_or(Value::Null, |witness| {
                    json!({
                        "owner": name,
                        "signing_key": witness.signing_key.clone().unwrap_or_default(),
                        "url": format!("https://{name}.example"),
                    })
                }))
            }
        }
    }
}

fn build_transaction(head: u64, operations: Vec<Value>) -> Value {
    json!({
        "ref_block_num": head & 0xffff,
        "ref_block_prefix": 0,
        "expiration": block_timestamp(head + 20),
        "operations": operations,
        "extensions": [],
        "signatures": [],
    })
}

fn apply_transaction(state: &mut ClusterState, mut transaction: Value) -> Value {
    let operations = transaction
        .get("operations")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for operation in operations {
        if operation.get("type").and_then(Value::as_str) != Some("witness_update_operation") {
            continue;
        }
        let value = &operation["value"];
        let (Some(owner), Some(key)) = (
            value.get("owner").and_then(Value::as_str),
            value.get("block_signing_key").and_then(Value::as_str),
        ) else {
            continue;
        };
        if let Some(witness) = state.witnesses.get_mut(owner) {
            witness.signing_key = Some(key.to_owned());
        }
    }

    let id = state.next_transaction_id();
    if let Some(object) = transaction.as_object_mut() {
        object.insert("transaction_id".to_owned(), Value::String(id));
        object.insert("signatures".to_owned(), json!(["sim"]));
    }
    transaction
}

fn operation_id(op: &VirtualOpRecord, index: usize) -> u64 {
    (op.block << 16) | (index as u64 & 0xffff)
}

fn page_virtual_ops(ops: Vec<VirtualOpRecord>, request: &EnumVirtualOpsRequest) -> Value {
    let mut per_block: BTreeMap<u64, usize> = BTreeMap::new();
    let mut numbered = Vec::new();
    for mut op in ops {
        if op.block < request.block_range_begin || op.block >= request.block_range_end {
            continue;
        }
        let index = per_block.entry(op.block).or_default();
        let id = operation_id(&op, *index);
        *index += 1;
        op.operation_id = Value::String(id.to_string());
        numbered.push((id, op));
    }

    let limit = request.limit as usize;
    let mut remaining = numbered
        .into_iter()
        .filter(|(id, _)| *id >= request.operation_begin)
        .peekable();
    let page = remaining
        .by_ref()
        .take(limit)
        .map(|(_, op)| op)
        .collect::<Vec<_>>();
    let (next_block, next_op) = remaining
        .peek()
        .map_or((request.block_range_end, 0), |(id, op)| (op.block, *id));

    json!({
        "ops": page,
        "next_block_range_begin": next_block,
        "next_operation_begin": next_op,
    })
}

/// Aborts the producer task on drop.
pub struct BlockProducer {
    task: JoinHandle<()>,
}

impl Drop for BlockProducer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct SimLauncher {
    cluster: SimulatedCluster,
}

#[async_trait]
impl NodeLauncher for SimLauncher {
    fn api(&self, id: NodeId, config: &NodeConfig) -> NodeApi {
        self.cluster.register(id, config);
        NodeApi::new(Arc::new(SimNodeRpc {
            cluster: self.cluster.clone(),
            node: id.to_string(),
        }))
    }

    async fn launch(&self, spec: LaunchSpec) -> Result<Box<dyn NodeProcess>, SpawnNodeError> {
        self.cluster.start(&spec)?;
        Ok(Box::new(SimProcess {
            cluster: self.cluster.clone(),
            node: spec.id.to_string(),
        }))
    }

    fn allocate_ports(&self, _id: NodeId, taken: &mut BTreeSet<u16>) -> Option<NodePorts> {
        let mut state = self.cluster.lock();
        let mut next = || loop {
            let port = FIRST_PORT.checked_add(state.next_port)?;
            state.next_port += 1;
            if taken.insert(port) {
                return Some(port);
            }
        };
        Some(NodePorts {
            p2p: next()?,
            http: next()?,
            ws: next()?,
        })
    }
}

struct SimProcess {
    cluster: SimulatedCluster,
    node: String,
}

#[async_trait]
impl NodeProcess for SimProcess {
    fn pid(&self) -> Option<u32> {
        None
    }

    fn is_running(&mut self) -> bool {
        self.cluster.running(&self.node)
    }

    async fn stop(&mut self) -> Result<(), SpawnNodeError> {
        self.cluster.set_running(&self.node, false);
        Ok(())
    }

    async fn wait_for_exit(&mut self, _timeout: Duration) -> bool {
        !self.cluster.running(&self.node)
    }
}

struct SimNodeRpc {
    cluster: SimulatedCluster,
    node: String,
}

#[async_trait]
impl NodeRpc for SimNodeRpc {
    fn endpoint(&self) -> String {
        format!("sim://{}", self.node)
    }

    async fn call(&self, method: RpcMethod, params: Value) -> Result<Value, CommunicationError> {
        self.cluster.handle_node_call(&self.node, method, &params)
    }
}

struct SimWalletRpc {
    cluster: SimulatedCluster,
    node: String,
}

#[async_trait]
impl WalletRpc for SimWalletRpc {
    fn endpoint(&self) -> String {
        format!("sim://{}/wallet", self.node)
    }

    async fn call(&self, method: WalletMethod, params: Value) -> Result<Value, CommunicationError> {
        self.cluster.handle_wallet_call(&self.node, method, &params)
    }
}

#[cfg(test)]
mod tests {
    use forknet_config::{
        nodes::create_node_config,
        topology::{NetworkDescription, TopologyDescription, TopologyPlan},
    };

    use super::*;
    use crate::nodes::{NodeHandle, WitnessUpdate};

    /// Two networks, `a` witnesses with the init node and `b` witnesses.
    fn handles(cluster: &SimulatedCluster, a: u32, b: u32) -> Vec<NodeHandle> {
        let description = TopologyDescription::default()
            .with_network(NetworkDescription::witnesses([a]).with_init_node())
            .with_network(NetworkDescription::witnesses([b]));
        let plan = TopologyPlan::from_description(&description, None).unwrap();
        let launcher = cluster.launcher();
        let mut taken = BTreeSet::new();
        plan.networks
            .iter()
            .flat_map(|network| network.nodes.iter())
            .map(|node| {
                let ports = launcher.allocate_ports(node.id, &mut taken).unwrap();
                let config = create_node_config(node, ports, Vec::new());
                NodeHandle::new(node.id, config, node.witnesses.clone(), Arc::clone(&launcher))
            })
            .collect()
    }

    async fn start_all(nodes: &mut [NodeHandle]) {
        for node in nodes.iter_mut() {
            node.run().await.unwrap();
        }
    }

    async fn partition(nodes: &[NodeHandle]) {
        for node in nodes {
            let same_network = nodes
                .iter()
                .filter(|other| other.id().network == node.id().network)
                .map(NodeHandle::label)
                .collect::<Vec<_>>();
            node.api().set_allowed_peers(&same_network).await.unwrap();
        }
    }

    async fn heal(nodes: &[NodeHandle]) {
        let everyone = nodes.iter().map(NodeHandle::label).collect::<Vec<_>>();
        for node in nodes {
            node.api().set_allowed_peers(&everyone).await.unwrap();
        }
    }

    #[tokio::test]
    async fn connected_cluster_produces_and_finalizes() {
        let cluster = SimulatedCluster::new();
        let mut nodes = handles(&cluster, 3, 3);
        start_all(&mut nodes).await;

        for _ in 0..10 {
            assert!(cluster.tick());
        }

        for node in &nodes {
            let props = node.api().dynamic_global_properties().await.unwrap();
            assert_eq!(props.head_block_number, 10);
            assert_eq!(props.last_irreversible_block_num, 9);
        }
    }

    #[tokio::test]
    async fn minority_partition_stalls_lib_and_rejoins_majority_chain() {
        let cluster = SimulatedCluster::new();
        let mut nodes = handles(&cluster, 6, 1);
        start_all(&mut nodes).await;
        for _ in 0..4 {
            cluster.tick();
        }

        partition(&nodes).await;
        for _ in 0..16 {
            cluster.tick();
        }
        let majority = nodes[0].id();
        let minority = nodes[2].id();
        assert!(cluster.head(majority) > cluster.head(minority));
        assert_eq!(cluster.last_irreversible(minority), Some(3));
        assert!(cluster.last_irreversible(majority) > Some(10));

        heal(&nodes).await;
        cluster.tick();
        assert_eq!(cluster.head(majority), cluster.head(minority));
        assert_eq!(
            cluster.last_irreversible(majority),
            cluster.last_irreversible(minority)
        );
    }

    #[tokio::test]
    async fn disabled_witnesses_leave_the_schedule() {
        let cluster = SimulatedCluster::new();
        let mut nodes = handles(&cluster, 1, 2);
        start_all(&mut nodes).await;
        let wallet = cluster.wallet(nodes[0].id());
        let null_key = null_public_key(DEFAULT_KEY_PREFIX);

        for name in ["initminer", "witness-0-0", "witness-1-0", "witness-1-1"] {
            wallet
                .update_witness(&WitnessUpdate::new(name, null_key.clone()), true)
                .await
                .unwrap();
        }

        assert!(!cluster.is_enabled("witness-1-1"));
        assert!(!cluster.tick());
        assert_eq!(cluster.head(nodes[0].id()), Some(0));
    }

    #[tokio::test]
    async fn stopped_nodes_are_unavailable() {
        let cluster = SimulatedCluster::new();
        let mut nodes = handles(&cluster, 1, 1);
        start_all(&mut nodes).await;

        nodes[1].stop().await.unwrap();

        assert!(matches!(
            nodes[1].api().head_block_number().await,
            Err(CommunicationError::Unavailable { .. })
        ));
        nodes[1].restart().await.unwrap();
        assert!(nodes[1].api().head_block_number().await.is_ok());
    }

    #[tokio::test]
    async fn snapshots_restore_chain_state() {
        let cluster = SimulatedCluster::new();
        let mut nodes = handles(&cluster, 1, 1);
        start_all(&mut nodes).await;
        for _ in 0..5 {
            cluster.tick();
        }

        nodes[0].dump_snapshot("five").await.unwrap();
        assert!(!nodes[0].is_running());
        nodes[0].load_snapshot("five").await.unwrap();

        assert_eq!(nodes[0].api().head_block_number().await.unwrap(), 5);
        assert!(nodes[0].load_snapshot("missing").await.is_err());
    }

    #[test]
    fn virtual_op_pages_resume_at_next_operation() {
        let ops = (1..=5)
            .map(|block| VirtualOpRecord {
                trx_id: String::new(),
                block,
                trx_in_block: -1,
                op_in_trx: 0,
                virtual_op: true,
                timestamp: block_timestamp(block),
                op: VirtualOperation {
                    kind: "producer_reward_operation".to_owned(),
                    value: Value::Null,
                },
                operation_id: Value::Null,
            })
            .collect::<Vec<_>>();
        let mut request = EnumVirtualOpsRequest::range(1, 6);
        request.limit = 2;

        let page = page_virtual_ops(ops.clone(), &request);
        assert_eq!(page["ops"].as_array().unwrap().len(), 2);
        assert_eq!(page["next_block_range_begin"], 3);

        request.block_range_begin = 3;
        request.operation_begin = page["next_operation_begin"].as_u64().unwrap();
        let page = page_virtual_ops(ops, &request);
        assert_eq!(page["ops"][0]["block"], 3);
    }
}
