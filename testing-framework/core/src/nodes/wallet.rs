use std::{fmt, net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::rpc::{CommunicationError, JsonRpcClient, decode};

/// Symbol of the test chain's liquid token.
pub const TEST_ASSET_SYMBOL: &str = "TESTS";

/// Wallet daemon calls the harness issues. Parameters are positional.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WalletMethod {
    SetPassword,
    Unlock,
    ImportKey,
    UpdateWitness,
    SignTransaction,
    CreateAccountWithKeys,
    Transfer,
    TransferToVesting,
    GetWitness,
}

impl WalletMethod {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::SetPassword => "set_password",
            Self::Unlock => "unlock",
            Self::ImportKey => "import_key",
            Self::UpdateWitness => "update_witness",
            Self::SignTransaction => "sign_transaction",
            Self::CreateAccountWithKeys => "create_account_with_keys",
            Self::Transfer => "transfer",
            Self::TransferToVesting => "transfer_to_vesting",
            Self::GetWitness => "get_witness",
        }
    }
}

impl fmt::Display for WalletMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[async_trait]
pub trait WalletRpc: Send + Sync {
    fn endpoint(&self) -> String;

    async fn call(&self, method: WalletMethod, params: Value) -> Result<Value, CommunicationError>;
}

#[async_trait]
impl WalletRpc for JsonRpcClient {
    fn endpoint(&self) -> String {
        self.url().to_owned()
    }

    async fn call(&self, method: WalletMethod, params: Value) -> Result<Value, CommunicationError> {
        self.call_raw(method.name(), params).await
    }
}

/// Arguments of `update_witness`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessUpdate {
    pub owner: String,
    pub url: String,
    pub block_signing_key: String,
    pub props: Value,
}

impl WitnessUpdate {
    #[must_use]
    pub fn new(owner: impl Into<String>, block_signing_key: impl Into<String>) -> Self {
        let owner = owner.into();
        Self {
            url: format!("https://{owner}.example"),
            owner,
            block_signing_key: block_signing_key.into(),
            props: default_witness_props(),
        }
    }
}

#[must_use]
pub fn default_witness_props() -> Value {
    json!({
        "account_creation_fee": asset(0),
        "maximum_block_size": 65_536,
        "hbd_interest_rate": 0,
    })
}

/// Formats milli-units of the test token, e.g. `1500` as `1.500 TESTS`.
#[must_use]
pub fn asset(milli: u64) -> String {
    format!("{}.{:03} {TEST_ASSET_SYMBOL}", milli / 1_000, milli % 1_000)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessInfo {
    pub owner: String,
    pub signing_key: String,
    #[serde(default)]
    pub url: String,
}

/// Operations of several build-only transactions merged into one.
#[derive(Clone, Debug, Default)]
pub struct TransactionBatch {
    template: Option<Value>,
    operations: Vec<Value>,
}

impl TransactionBatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the operations of a transaction built with `broadcast = false`.
    pub fn push(&mut self, transaction: Value) {
        if let Some(ops) = transaction.get("operations").and_then(Value::as_array) {
            self.operations.extend(ops.iter().cloned());
        }
        if self.template.is_none() {
            self.template = Some(transaction);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Single transaction carrying every pushed operation.
    #[must_use]
    pub fn into_transaction(self) -> Option<Value> {
        if self.operations.is_empty() {
            return None;
        }
        let mut transaction = self.template.unwrap_or_else(|| json!({}));
        if let Some(object) = transaction.as_object_mut() {
            object.insert("operations".to_owned(), Value::Array(self.operations));
            object.remove("signatures");
        }
        Some(transaction)
    }
}

/// Typed view over a wallet daemon.
#[derive(Clone)]
pub struct WalletApi {
    rpc: Arc<dyn WalletRpc>,
}

impl WalletApi {
    #[must_use]
    pub fn new(rpc: Arc<dyn WalletRpc>) -> Self {
        Self { rpc }
    }

    #[must_use]
    pub fn http(addr: SocketAddr) -> Self {
        Self::new(Arc::new(JsonRpcClient::new(addr)))
    }

    #[must_use]
    pub fn endpoint(&self) -> String {
        self.rpc.endpoint()
    }

    pub async fn call(&self, method: WalletMethod, params: Value) -> Result<Value, CommunicationError> {
        self.rpc.call(method, params).await
    }

    pub async fn set_password(&self, password: &str) -> Result<(), CommunicationError> {
        self.call(WalletMethod::SetPassword, json!([password]))
            .await
            .map(drop)
    }

    pub async fn unlock(&self, password: &str) -> Result<(), CommunicationError> {
        self.call(WalletMethod::Unlock, json!([password])).await.map(drop)
    }

    pub async fn import_key(&self, private_key: &str) -> Result<(), CommunicationError> {
        self.call(WalletMethod::ImportKey, json!([private_key]))
            .await
            .map(drop)
    }

    pub async fn import_keys<'a>(
        &self,
        private_keys: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), CommunicationError> {
        for key in private_keys {
            self.import_key(key).await?;
        }
        Ok(())
    }

    /// Returns the built transaction; with `broadcast` it is also sent.
    pub async fn update_witness(
        &self,
        update: &WitnessUpdate,
        broadcast: bool,
    ) -> Result<Value, CommunicationError> {
        self.call(
            WalletMethod::UpdateWitness,
            json!([
                update.owner,
                update.url,
                update.block_signing_key,
                update.props,
                broadcast
            ]),
        )
        .await
    }

    pub async fn sign_transaction(
        &self,
        transaction: Value,
        broadcast: bool,
    ) -> Result<Value, CommunicationError> {
        self.call(WalletMethod::SignTransaction, json!([transaction, broadcast]))
            .await
    }

    /// Signs and broadcasts the batch as one transaction. Empty batches are
    /// skipped.
    pub async fn broadcast_batch(
        &self,
        batch: TransactionBatch,
    ) -> Result<Option<Value>, CommunicationError> {
        match batch.into_transaction() {
            Some(transaction) => self.sign_transaction(transaction, true).await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn create_account_with_keys(
        &self,
        creator: &str,
        name: &str,
        public_key: &str,
        broadcast: bool,
    ) -> Result<Value, CommunicationError> {
        self.call(
            WalletMethod::CreateAccountWithKeys,
            json!([creator, name, "{}", public_key, public_key, public_key, public_key, broadcast]),
        )
        .await
    }

    pub async fn transfer(
        &self,
        from: &str,
        to: &str,
        amount: &str,
        memo: &str,
        broadcast: bool,
    ) -> Result<Value, CommunicationError> {
        self.call(WalletMethod::Transfer, json!([from, to, amount, memo, broadcast]))
            .await
    }

    pub async fn transfer_to_vesting(
        &self,
        from: &str,
        to: &str,
        amount: &str,
        broadcast: bool,
    ) -> Result<Value, CommunicationError> {
        self.call(
            WalletMethod::TransferToVesting,
            json!([from, to, amount, broadcast]),
        )
        .await
    }

    /// `None` when the account never registered as a witness.
    pub async fn get_witness(&self, name: &str) -> Result<Option<WitnessInfo>, CommunicationError> {
        let value = self.call(WalletMethod::GetWitness, json!([name])).await?;
        if value.is_null() {
            return Ok(None);
        }
        decode(&self.endpoint(), WalletMethod::GetWitness, value).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn built(owner: &str) -> Value {
        json!({
            "ref_block_num": 7,
            "ref_block_prefix": 1234,
            "expiration": "2024-01-01T00:01:00",
            "operations": [
                {"type": "witness_update_operation", "value": {"owner": owner}}
            ],
            "extensions": [],
            "signatures": []
        })
    }

    #[test]
    fn batch_merges_operations_into_first_transaction() {
        let mut batch = TransactionBatch::new();
        batch.push(built("witness-1-0"));
        batch.push(built("witness-1-1"));
        batch.push(built("witness-1-2"));

        assert_eq!(batch.len(), 3);
        let transaction = batch.into_transaction().unwrap();
        assert_eq!(transaction["ref_block_num"], 7);
        assert_eq!(transaction["operations"].as_array().unwrap().len(), 3);
        assert_eq!(
            transaction["operations"][2]["value"]["owner"],
            "witness-1-2"
        );
        assert!(transaction.get("signatures").is_none());
    }

    #[test]
    fn empty_batch_has_no_transaction() {
        let mut batch = TransactionBatch::new();
        batch.push(json!({"operations": []}));

        assert!(batch.is_empty());
        assert!(batch.into_transaction().is_none());
    }

    #[test]
    fn assets_use_three_decimals() {
        assert_eq!(asset(0), "0.000 TESTS");
        assert_eq!(asset(1_500), "1.500 TESTS");
        assert_eq!(asset(42), "0.042 TESTS");
    }
}
