/// Database models for the ledger.
///
/// `Transaction` maps directly onto the collaborator's `transactions`
/// table. `Block` is the domain type; `BlockRow` is its PostgreSQL
/// representation (sequence numbers are stored as BIGINT).
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::{LedgerError, Result};

/// A committed financial transaction.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: String,
    /// e.g. "deposit", "loan_disbursement", "loan_payment".
    pub tx_type: String,
    pub from_account: String,
    pub to_account: String,
    /// Smallest currency unit.
    pub amount: i64,
    pub status: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Confirmation state of a block's external anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "anchor_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AnchorStatus {
    /// No anchor was submitted (external ledger disabled or submit failed).
    Unanchored,
    /// Broadcast accepted, receipt not yet seen.
    Pending,
    Confirmed,
    Reverted,
    /// The watcher gave up before a receipt appeared.
    TimedOut,
}

impl AnchorStatus {
    /// Watcher outcomes only ever replace `Pending`.
    pub fn can_transition_to(self, next: AnchorStatus) -> bool {
        self == AnchorStatus::Pending
            && matches!(
                next,
                AnchorStatus::Confirmed | AnchorStatus::Reverted | AnchorStatus::TimedOut
            )
    }
}

/// One entry in the local hash chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub number: u64,
    pub previous_hash: String,
    pub transaction_id: String,
    pub transaction_hash: String,
    pub block_hash: String,
    /// Creation time, epoch seconds.
    pub timestamp: i64,
    /// Reserved counter. Always zero, hashed for format compatibility.
    pub nonce: u64,
    /// Hash of the external-ledger transaction that recorded this block's data.
    pub anchor_tx_hash: Option<String>,
    pub anchor_status: AnchorStatus,
}

/// `blocks` table row.
#[derive(Debug, Clone, FromRow)]
pub struct BlockRow {
    pub block_number: i64,
    pub previous_hash: String,
    pub transaction_id: String,
    pub transaction_hash: String,
    pub block_hash: String,
    pub timestamp: i64,
    pub nonce: i64,
    pub anchor_tx_hash: Option<String>,
    pub anchor_status: AnchorStatus,
}

impl TryFrom<BlockRow> for Block {
    type Error = LedgerError;

    fn try_from(row: BlockRow) -> Result<Self> {
        let number = u64::try_from(row.block_number).map_err(|_| {
            LedgerError::Serialization(format!("negative block number {}", row.block_number))
        })?;
        let nonce = u64::try_from(row.nonce)
            .map_err(|_| LedgerError::Serialization(format!("negative nonce on block {number}")))?;

        Ok(Block {
            number,
            previous_hash: row.previous_hash,
            transaction_id: row.transaction_id,
            transaction_hash: row.transaction_hash,
            block_hash: row.block_hash,
            timestamp: row.timestamp,
            nonce,
            anchor_tx_hash: row.anchor_tx_hash,
            anchor_status: row.anchor_status,
        })
    }
}
