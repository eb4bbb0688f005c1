/// External ledger anchoring for independent tamper evidence.
///
/// Every block's transaction data is recorded on an external,
/// smart-contract-bearing chain. The local chain stays authoritative;
/// the external copy is a mirror that verification can cross-check.
///
/// Anchoring is best-effort. A disabled or unreachable external ledger
/// degrades to `AnchorUnavailable`, which callers treat as recoverable.
pub mod ethereum;
pub mod watcher;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};
use crate::state::models::Transaction;

/// Fields checked by the contract's `verifyTransaction`.
///
/// Status, description and timestamps are excluded: those may change
/// after submission without indicating tampering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorQuery {
    pub transaction_id: String,
    pub tx_type: String,
    pub from_account: String,
    pub to_account: String,
    pub amount: i64,
}

impl From<&Transaction> for AnchorQuery {
    fn from(tx: &Transaction) -> Self {
        Self {
            transaction_id: tx.transaction_id.clone(),
            tx_type: tx.tx_type.clone(),
            from_account: tx.from_account.clone(),
            to_account: tx.to_account.clone(),
            amount: tx.amount,
        }
    }
}

/// A transaction record as held by the external ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchoredTransaction {
    pub transaction_id: String,
    pub tx_type: String,
    pub from_account: String,
    pub to_account: String,
    /// Decimal string; the contract stores a uint256.
    pub amount: String,
    pub status: String,
    pub description: String,
    /// External block timestamp (epoch seconds).
    pub timestamp: u64,
    pub block_number: u64,
    /// Address that submitted the record.
    pub submitted_by: String,
}

/// Inclusion receipt for a submitted anchor transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorReceipt {
    pub tx_hash: String,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
    /// Execution status: true for success (status 1), false for revert.
    pub success: bool,
}

/// Operations against the external ledger contract.
#[async_trait]
pub trait ExternalLedger: Send + Sync {
    /// Name of the external network (e.g., "sepolia").
    fn network(&self) -> &str;

    /// Record the full transaction on the external ledger.
    /// Returns the external transaction hash once the broadcast is accepted.
    async fn submit(&self, tx: &Transaction) -> Result<String>;

    /// Check that the external record still matches the given fields.
    async fn verify(&self, query: &AnchorQuery) -> Result<bool>;

    /// Retrieve the full external record of a transaction.
    async fn fetch(&self, transaction_id: &str) -> Result<AnchoredTransaction>;

    /// Number of transactions recorded by the contract.
    async fn transaction_count(&self) -> Result<u64>;

    /// Receipt of a submitted transaction, `None` while it is pending.
    async fn receipt(&self, tx_hash: &str) -> Result<Option<AnchorReceipt>>;
}

/// Handle to the external ledger held by the rest of the system.
///
/// A disabled client short-circuits every call to `AnchorUnavailable`.
#[derive(Clone, Default)]
pub struct AnchorClient {
    inner: Option<Arc<dyn ExternalLedger>>,
}

impl AnchorClient {
    pub fn enabled(ledger: Arc<dyn ExternalLedger>) -> Self {
        Self {
            inner: Some(ledger),
        }
    }

    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    fn ledger(&self) -> Result<&Arc<dyn ExternalLedger>> {
        self.inner
            .as_ref()
            .ok_or_else(|| LedgerError::AnchorUnavailable("external ledger not configured".into()))
    }

    /// The underlying ledger, for background tasks that outlive a call.
    pub fn shared(&self) -> Option<Arc<dyn ExternalLedger>> {
        self.inner.clone()
    }

    pub async fn submit(&self, tx: &Transaction) -> Result<String> {
        self.ledger()?.submit(tx).await
    }

    pub async fn verify(&self, query: &AnchorQuery) -> Result<bool> {
        self.ledger()?.verify(query).await
    }

    pub async fn fetch(&self, transaction_id: &str) -> Result<AnchoredTransaction> {
        self.ledger()?.fetch(transaction_id).await
    }

    pub async fn transaction_count(&self) -> Result<u64> {
        self.ledger()?.transaction_count().await
    }
}

impl std::fmt::Debug for AnchorClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            Some(ledger) => write!(f, "AnchorClient({})", ledger.network()),
            None => write!(f, "AnchorClient(disabled)"),
        }
    }
}
