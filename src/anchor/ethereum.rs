/// EVM smart-contract anchor.
///
/// Records each transaction's business fields in a `TransactionLedger`
/// contract (Sepolia in production). The contract keeps its own copy and
/// exposes a read-only `verifyTransaction` that the chain verifier uses to
/// detect local tampering.
///
/// Uses raw JSON-RPC for maximum compatibility. Transactions are signed
/// locally (legacy, EIP-155) and broadcast with `eth_sendRawTransaction`.
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, TxKind, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{AnchorQuery, AnchorReceipt, AnchoredTransaction, ExternalLedger};
use crate::error::{LedgerError, Result};
use crate::state::models::Transaction;

mod contract {
    alloy::sol! {
        struct LedgerRecord {
            string transactionId;
            string txType;
            string fromAccount;
            string toAccount;
            uint256 amount;
            string status;
            string description;
            uint256 timestamp;
            uint256 blockNumber;
            address submittedBy;
        }

        function recordTransaction(
            string transactionId,
            string txType,
            string fromAccount,
            string toAccount,
            uint256 amount,
            string status,
            string description
        ) external;

        function getTransaction(string transactionId) external view returns (LedgerRecord memory);

        function verifyTransaction(
            string transactionId,
            string txType,
            string fromAccount,
            string toAccount,
            uint256 amount
        ) external view returns (bool);

        function getTransactionCount() external view returns (uint256);
    }
}

/// Upper bound for nonce lookup, signing and broadcast of one submission.
pub const SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);
/// Upper bound for read-only calls and the startup chain-id check.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(10);
/// `recordTransaction` stores seven strings; generous fixed limit.
const RECORD_GAS_LIMIT: u64 = 500_000;

/// Configuration for the external ledger.
#[derive(Clone)]
pub struct AnchorConfig {
    /// JSON-RPC endpoint (e.g., Infura, Alchemy, local node).
    pub rpc_url: String,
    /// `TransactionLedger` contract address (hex).
    pub contract_address: String,
    /// Signing key (hex, `0x` prefix optional).
    pub private_key_hex: String,
    /// Expected chain id. When unset, the node's chain id is used.
    pub chain_id: Option<u64>,
    /// Label used in logs, e.g. "sepolia".
    pub network: String,
}

impl AnchorConfig {
    /// Build a config from optional settings. All three of endpoint,
    /// contract address and key are required; empty values count as absent.
    pub fn from_parts(
        rpc_url: Option<String>,
        contract_address: Option<String>,
        private_key_hex: Option<String>,
        chain_id: Option<u64>,
    ) -> Result<Self> {
        fn required(value: Option<String>, name: &'static str) -> Result<String> {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(LedgerError::ConfigurationMissing(name))
        }

        Ok(Self {
            rpc_url: required(rpc_url, "SEPOLIA_RPC_URL")?,
            contract_address: required(contract_address, "CONTRACT_ADDRESS")?,
            private_key_hex: required(private_key_hex, "PRIVATE_KEY")?,
            chain_id,
            network: "sepolia".to_string(),
        })
    }
}

impl std::fmt::Debug for AnchorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnchorConfig")
            .field("rpc_url", &self.rpc_url)
            .field("contract_address", &self.contract_address)
            .field("private_key_hex", &"<redacted>")
            .field("chain_id", &self.chain_id)
            .field("network", &self.network)
            .finish()
    }
}

/// Simplified JSON-RPC response.
#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    message: String,
}

/// Subset of `eth_getTransactionReceipt`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: Option<String>,
    block_number: Option<String>,
    gas_used: Option<String>,
    status: Option<String>,
}

/// Contract client for the `TransactionLedger` anchor.
pub struct EthereumAnchor {
    client: Client,
    rpc_url: String,
    network: String,
    contract: Address,
    signer: PrivateKeySigner,
    chain_id: u64,
    /// Last nonce broadcast by this process. Held across nonce lookup and
    /// broadcast so concurrent submissions never reuse a nonce.
    nonce_lock: Mutex<Option<u64>>,
}

fn unavailable(context: &str, e: impl std::fmt::Display) -> LedgerError {
    LedgerError::AnchorUnavailable(format!("{context}: {e}"))
}

/// Parse a JSON-RPC hex quantity ("0x1a").
fn parse_quantity(value: &str) -> Result<u64> {
    u64::from_str_radix(value.trim_start_matches("0x"), 16)
        .map_err(|e| unavailable(&format!("invalid quantity {value:?}"), e))
}

/// Next nonce to use given the node's pending count and our last broadcast.
fn next_nonce(pending: u64, last_used: Option<u64>) -> u64 {
    match last_used {
        Some(last) if last >= pending => last + 1,
        _ => pending,
    }
}

fn to_uint(amount: i64) -> Result<U256> {
    u64::try_from(amount)
        .map(U256::from)
        .map_err(|_| {
            LedgerError::AnchorUnavailable(format!("negative amount {amount} cannot be anchored"))
        })
}

impl EthereumAnchor {
    /// Validate the configuration and check the endpoint.
    ///
    /// Fails if the key or address is malformed, the node is unreachable,
    /// or the node's chain id differs from the configured one.
    pub async fn connect(config: AnchorConfig) -> Result<Self> {
        let signer = PrivateKeySigner::from_str(config.private_key_hex.trim_start_matches("0x"))
            .map_err(|e| unavailable("invalid private key", e))?;
        let contract = Address::from_str(&config.contract_address)
            .map_err(|e| unavailable("invalid contract address", e))?;

        let mut anchor = Self {
            client: Client::new(),
            rpc_url: config.rpc_url,
            network: config.network,
            contract,
            signer,
            chain_id: 0,
            nonce_lock: Mutex::new(None),
        };

        let chain_id_hex: String = tokio::time::timeout(
            CALL_TIMEOUT,
            anchor.rpc_call("eth_chainId", serde_json::json!([])),
        )
        .await
        .map_err(|_| LedgerError::AnchorUnavailable("eth_chainId timed out".into()))??;
        let node_chain_id = parse_quantity(&chain_id_hex)?;

        if let Some(expected) = config.chain_id {
            if expected != node_chain_id {
                return Err(LedgerError::AnchorUnavailable(format!(
                    "chain id mismatch: configured {expected}, node reports {node_chain_id}"
                )));
            }
        }
        anchor.chain_id = node_chain_id;

        info!(
            network = %anchor.network,
            chain_id = node_chain_id,
            contract = %anchor.contract,
            submitter = %anchor.signer.address(),
            "Connected to external ledger"
        );

        Ok(anchor)
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn contract_address(&self) -> Address {
        self.contract
    }

    /// Send a JSON-RPC request; a `null` result is `Ok(None)`.
    async fn rpc_call_optional<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<Option<T>> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let resp: JsonRpcResponse<T> = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| unavailable(method, e))?
            .json()
            .await
            .map_err(|e| unavailable(&format!("{method} response parse error"), e))?;

        if let Some(err) = resp.error {
            return Err(LedgerError::AnchorUnavailable(format!(
                "{method} RPC error: {}",
                err.message
            )));
        }

        Ok(resp.result)
    }

    /// Send a JSON-RPC request that must return a result.
    async fn rpc_call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T> {
        self.rpc_call_optional(method, params)
            .await?
            .ok_or_else(|| LedgerError::AnchorUnavailable(format!("{method}: empty RPC response")))
    }

    /// Read-only `eth_call` against the contract.
    async fn eth_call(&self, data: Vec<u8>) -> Result<Vec<u8>> {
        let call = async {
            let result: String = self
                .rpc_call(
                    "eth_call",
                    serde_json::json!([
                        {
                            "to": format!("{:?}", self.contract),
                            "data": format!("0x{}", hex::encode(&data)),
                        },
                        "latest"
                    ]),
                )
                .await?;
            hex::decode(result.trim_start_matches("0x"))
                .map_err(|e| unavailable("eth_call returned invalid hex", e))
        };

        tokio::time::timeout(CALL_TIMEOUT, call)
            .await
            .map_err(|_| LedgerError::AnchorUnavailable("eth_call timed out".into()))?
    }

    /// Build, sign, and send a `recordTransaction` call.
    async fn send_record_tx(&self, tx: &Transaction) -> Result<String> {
        use alloy::consensus::{SignableTransaction, TxEnvelope, TxLegacy};
        use alloy::eips::eip2718::Encodable2718;
        use alloy::signers::Signer;

        let input = contract::recordTransactionCall {
            transactionId: tx.transaction_id.clone(),
            txType: tx.tx_type.clone(),
            fromAccount: tx.from_account.clone(),
            toAccount: tx.to_account.clone(),
            amount: to_uint(tx.amount)?,
            status: tx.status.clone(),
            description: tx.description.clone(),
        }
        .abi_encode();

        let from_address = self.signer.address();

        let mut last_used = self.nonce_lock.lock().await;

        let nonce_hex: String = self
            .rpc_call(
                "eth_getTransactionCount",
                serde_json::json!([format!("{from_address:?}"), "pending"]),
            )
            .await?;
        let nonce = next_nonce(parse_quantity(&nonce_hex)?, *last_used);

        let gas_price_hex: String = self.rpc_call("eth_gasPrice", serde_json::json!([])).await?;
        let gas_price = u128::from_str_radix(gas_price_hex.trim_start_matches("0x"), 16)
            .map_err(|e| unavailable("invalid gas price", e))?;

        let legacy = TxLegacy {
            chain_id: Some(self.chain_id),
            nonce,
            gas_price,
            gas_limit: RECORD_GAS_LIMIT,
            to: TxKind::Call(self.contract),
            value: U256::ZERO,
            input: Bytes::from(input),
        };

        let sig_hash = legacy.signature_hash();
        let sig = self
            .signer
            .sign_hash(&sig_hash)
            .await
            .map_err(|e| unavailable("signing failed", e))?;

        let signed = TxEnvelope::Legacy(legacy.into_signed(sig));
        let mut raw_tx = Vec::new();
        signed.encode_2718(&mut raw_tx);
        let raw_hex = format!("0x{}", hex::encode(&raw_tx));

        let tx_hash: String = self
            .rpc_call("eth_sendRawTransaction", serde_json::json!([raw_hex]))
            .await?;

        *last_used = Some(nonce);
        debug!(nonce, gas_price, tx_hash = %tx_hash, "Anchor transaction broadcast");

        Ok(tx_hash)
    }
}

#[async_trait]
impl ExternalLedger for EthereumAnchor {
    fn network(&self) -> &str {
        &self.network
    }

    async fn submit(&self, tx: &Transaction) -> Result<String> {
        let tx_hash = tokio::time::timeout(SUBMIT_TIMEOUT, self.send_record_tx(tx))
            .await
            .map_err(|_| LedgerError::AnchorUnavailable("submission timed out".into()))??;

        info!(
            network = %self.network,
            tx_hash = %tx_hash,
            tx_id = %tx.transaction_id,
            "Transaction recorded on external ledger"
        );
        Ok(tx_hash)
    }

    async fn verify(&self, query: &AnchorQuery) -> Result<bool> {
        let data = contract::verifyTransactionCall {
            transactionId: query.transaction_id.clone(),
            txType: query.tx_type.clone(),
            fromAccount: query.from_account.clone(),
            toAccount: query.to_account.clone(),
            amount: to_uint(query.amount)?,
        }
        .abi_encode();

        let output = self.eth_call(data).await?;
        contract::verifyTransactionCall::abi_decode_returns(&output)
            .map_err(|e| unavailable("failed to decode verifyTransaction", e))
    }

    async fn fetch(&self, transaction_id: &str) -> Result<AnchoredTransaction> {
        let data = contract::getTransactionCall {
            transactionId: transaction_id.to_string(),
        }
        .abi_encode();

        let output = self.eth_call(data).await?;
        let record = contract::getTransactionCall::abi_decode_returns(&output)
            .map_err(|e| unavailable("failed to decode getTransaction", e))?;

        Ok(AnchoredTransaction {
            transaction_id: record.transactionId,
            tx_type: record.txType,
            from_account: record.fromAccount,
            to_account: record.toAccount,
            amount: record.amount.to_string(),
            status: record.status,
            description: record.description,
            timestamp: record.timestamp.saturating_to::<u64>(),
            block_number: record.blockNumber.saturating_to::<u64>(),
            submitted_by: record.submittedBy.to_string(),
        })
    }

    async fn transaction_count(&self) -> Result<u64> {
        let output = self
            .eth_call(contract::getTransactionCountCall {}.abi_encode())
            .await?;
        let count = contract::getTransactionCountCall::abi_decode_returns(&output)
            .map_err(|e| unavailable("failed to decode getTransactionCount", e))?;
        Ok(count.saturating_to::<u64>())
    }

    async fn receipt(&self, tx_hash: &str) -> Result<Option<AnchorReceipt>> {
        let receipt: Option<RpcReceipt> = self
            .rpc_call_optional("eth_getTransactionReceipt", serde_json::json!([tx_hash]))
            .await?;

        let Some(receipt) = receipt else {
            return Ok(None);
        };

        Ok(Some(AnchorReceipt {
            tx_hash: receipt.transaction_hash.unwrap_or_else(|| tx_hash.to_string()),
            block_number: receipt.block_number.as_deref().map(parse_quantity).transpose()?,
            gas_used: receipt.gas_used.as_deref().map(parse_quantity).transpose()?,
            success: receipt.status.as_deref().map(parse_quantity).transpose()? == Some(1),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::sol_types::SolValue;
    use chrono::Utc;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const CONTRACT: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";

    fn rpc_result(result: serde_json::Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({ "jsonrpc": "2.0", "id": 1, "result": result }))
    }

    async fn mount(server: &MockServer, rpc_method: &str, result: serde_json::Value) {
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": rpc_method })))
            .respond_with(rpc_result(result))
            .mount(server)
            .await;
    }

    fn config(url: &str, chain_id: Option<u64>) -> AnchorConfig {
        AnchorConfig::from_parts(
            Some(url.to_string()),
            Some(CONTRACT.to_string()),
            Some(TEST_KEY.to_string()),
            chain_id,
        )
        .unwrap()
    }

    async fn connected(server: &MockServer) -> EthereumAnchor {
        mount(server, "eth_chainId", json!("0xaa36a7")).await;
        EthereumAnchor::connect(config(&server.uri(), None)).await.unwrap()
    }

    fn tx(id: &str) -> Transaction {
        Transaction {
            transaction_id: id.into(),
            tx_type: "deposit".into(),
            from_account: "BANK".into(),
            to_account: "USER-1".into(),
            amount: 10_000,
            status: "completed".into(),
            description: "Deposit: REF-1".into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_config_requires_all_three_values() {
        let missing_url = AnchorConfig::from_parts(None, Some("a".into()), Some("k".into()), None);
        assert!(matches!(
            missing_url,
            Err(LedgerError::ConfigurationMissing("SEPOLIA_RPC_URL"))
        ));

        let blank_contract =
            AnchorConfig::from_parts(Some("http://x".into()), Some("  ".into()), Some("k".into()), None);
        assert!(matches!(
            blank_contract,
            Err(LedgerError::ConfigurationMissing("CONTRACT_ADDRESS"))
        ));

        let missing_key = AnchorConfig::from_parts(Some("http://x".into()), Some("a".into()), None, None);
        assert!(matches!(
            missing_key,
            Err(LedgerError::ConfigurationMissing("PRIVATE_KEY"))
        ));
    }

    #[test]
    fn test_config_debug_redacts_key() {
        let rendered = format!("{:?}", config("http://localhost:8545", None));
        assert!(!rendered.contains("ac0974"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_next_nonce() {
        assert_eq!(next_nonce(7, None), 7);
        assert_eq!(next_nonce(7, Some(7)), 8);
        assert_eq!(next_nonce(7, Some(9)), 10);
        // The node caught up past our last broadcast.
        assert_eq!(next_nonce(12, Some(9)), 12);
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("0x1a").unwrap(), 26);
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert!(parse_quantity("0xzz").is_err());
    }

    #[test]
    fn test_negative_amount_rejected() {
        assert!(matches!(
            to_uint(-1),
            Err(LedgerError::AnchorUnavailable(_))
        ));
        assert_eq!(to_uint(10_000).unwrap(), U256::from(10_000u64));
    }

    #[tokio::test]
    async fn test_connect_unreachable_endpoint() {
        let result = EthereumAnchor::connect(config("http://127.0.0.1:1", None)).await;
        assert!(matches!(result, Err(LedgerError::AnchorUnavailable(_))));
    }

    #[tokio::test]
    async fn test_connect_chain_id_mismatch() {
        let server = MockServer::start().await;
        mount(&server, "eth_chainId", json!("0x1")).await;

        let result = EthereumAnchor::connect(config(&server.uri(), Some(11_155_111))).await;
        assert!(matches!(result, Err(LedgerError::AnchorUnavailable(_))));
    }

    #[tokio::test]
    async fn test_connect_uses_node_chain_id() {
        let server = MockServer::start().await;
        let anchor = connected(&server).await;
        assert_eq!(anchor.chain_id(), 11_155_111);
        assert_eq!(anchor.network(), "sepolia");
    }

    #[tokio::test]
    async fn test_submit_broadcasts_and_advances_nonce() {
        let server = MockServer::start().await;
        let anchor = connected(&server).await;
        mount(&server, "eth_getTransactionCount", json!("0x7")).await;
        mount(&server, "eth_gasPrice", json!("0x3b9aca00")).await;
        mount(&server, "eth_sendRawTransaction", json!("0xfeed")).await;

        assert_eq!(anchor.submit(&tx("TXN-1")).await.unwrap(), "0xfeed");
        assert_eq!(*anchor.nonce_lock.lock().await, Some(7));

        // Node still reports 7 pending; the second submission must not reuse it.
        anchor.submit(&tx("TXN-2")).await.unwrap();
        assert_eq!(*anchor.nonce_lock.lock().await, Some(8));

        let requests = server.received_requests().await.unwrap();
        let raw: Vec<serde_json::Value> = requests
            .iter()
            .filter_map(|r| serde_json::from_slice::<serde_json::Value>(&r.body).ok())
            .filter(|b| b["method"] == "eth_sendRawTransaction")
            .map(|b| b["params"][0].clone())
            .collect();
        assert_eq!(raw.len(), 2);
        assert_ne!(raw[0], raw[1]);
    }

    #[tokio::test]
    async fn test_submit_rpc_error_is_unavailable() {
        let server = MockServer::start().await;
        let anchor = connected(&server).await;
        mount(&server, "eth_getTransactionCount", json!("0x0")).await;
        mount(&server, "eth_gasPrice", json!("0x1")).await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "eth_sendRawTransaction" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": { "code": -32000, "message": "insufficient funds" }
            })))
            .mount(&server)
            .await;

        let result = anchor.submit(&tx("TXN-1")).await;
        assert!(matches!(result, Err(LedgerError::AnchorUnavailable(_))));
        // A failed broadcast does not consume a nonce.
        assert_eq!(*anchor.nonce_lock.lock().await, None);
    }

    #[tokio::test]
    async fn test_verify_decodes_bool() {
        let server = MockServer::start().await;
        let anchor = connected(&server).await;
        mount(&server, "eth_call", json!(format!("0x{}1", "0".repeat(63)))).await;

        let query = AnchorQuery::from(&tx("TXN-1"));
        assert!(anchor.verify(&query).await.unwrap());
    }

    #[tokio::test]
    async fn test_fetch_decodes_record() {
        let server = MockServer::start().await;
        let anchor = connected(&server).await;

        let record = contract::LedgerRecord {
            transactionId: "TXN-1".into(),
            txType: "deposit".into(),
            fromAccount: "BANK".into(),
            toAccount: "USER-1".into(),
            amount: U256::from(10_000u64),
            status: "completed".into(),
            description: "Deposit: REF-1".into(),
            timestamp: U256::from(1_700_000_000u64),
            blockNumber: U256::from(5_000_000u64),
            submittedBy: Address::from_str(CONTRACT).unwrap(),
        };
        let encoded = (record,).abi_encode_params();
        mount(&server, "eth_call", json!(format!("0x{}", hex::encode(encoded)))).await;

        let fetched = anchor.fetch("TXN-1").await.unwrap();
        assert_eq!(fetched.transaction_id, "TXN-1");
        assert_eq!(fetched.amount, "10000");
        assert_eq!(fetched.timestamp, 1_700_000_000);
        assert_eq!(fetched.block_number, 5_000_000);
        assert_eq!(
            fetched.submitted_by.to_lowercase(),
            CONTRACT.to_lowercase()
        );
    }

    #[tokio::test]
    async fn test_receipt_pending_and_mined() {
        let server = MockServer::start().await;
        let anchor = connected(&server).await;

        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "method": "eth_getTransactionReceipt",
                "params": ["0xpending"]
            })))
            .respond_with(rpc_result(serde_json::Value::Null))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "method": "eth_getTransactionReceipt",
                "params": ["0xmined"]
            })))
            .respond_with(rpc_result(json!({
                "transactionHash": "0xmined",
                "blockNumber": "0x10",
                "gasUsed": "0x5208",
                "status": "0x1"
            })))
            .mount(&server)
            .await;

        assert_eq!(anchor.receipt("0xpending").await.unwrap(), None);

        let mined = anchor.receipt("0xmined").await.unwrap().unwrap();
        assert!(mined.success);
        assert_eq!(mined.block_number, Some(16));
        assert_eq!(mined.gas_used, Some(21_000));
    }
}
