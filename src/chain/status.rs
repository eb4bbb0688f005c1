/// Read-only summaries of the ledger for operators and auditors.
use serde::Serialize;
use tracing::warn;

use super::{Ledger, GENESIS_HASH};
use crate::anchor::AnchoredTransaction;
use crate::error::{LedgerError, Result};
use crate::state::models::AnchorStatus;

/// Minimum anchor coverage (percent) reported as healthy.
const HEALTHY_RATE: f64 = 90.0;
/// Minimum anchor coverage (percent) reported as warning.
const WARNING_RATE: f64 = 50.0;

#[derive(Debug, Clone, Serialize)]
pub struct LedgerInfo {
    pub total_blocks: u64,
    pub latest_block_number: u64,
    pub latest_block_hash: String,
    pub genesis_hash: String,
    pub chain_valid: bool,
    /// Why verification failed, when it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_error: Option<String>,
    pub anchor_network: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorHealth {
    Healthy,
    Warning,
    Critical,
}

impl AnchorHealth {
    pub fn from_rate(rate: f64) -> Self {
        if rate >= HEALTHY_RATE {
            Self::Healthy
        } else if rate >= WARNING_RATE {
            Self::Warning
        } else {
            Self::Critical
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnchorCoverage {
    /// Non-genesis blocks.
    pub total_blocks: u64,
    /// Blocks carrying an external transaction hash.
    pub anchored_blocks: u64,
    pub unanchored_blocks: u64,
    /// Anchored blocks whose receipt has been observed as successful.
    pub confirmed_blocks: u64,
    pub verification_rate: f64,
    pub health: AnchorHealth,
    pub chain_valid: bool,
    pub latest_block_number: u64,
    /// Records held by the external contract, when it answered.
    pub external_records: Option<u64>,
}

impl Ledger {
    /// Chain size, tip and integrity.
    ///
    /// A failed verification is reported in the result, not as an error.
    pub async fn info(&self) -> Result<LedgerInfo> {
        let total_blocks = self.store.count_blocks().await?;
        let latest = self.store.latest_block().await?.ok_or(LedgerError::EmptyChain)?;

        let chain_error = match self.verifier.verify_chain().await {
            Ok(_) => None,
            Err(e) if e.is_verification_failure() => Some(e.to_string()),
            Err(e) => return Err(e),
        };

        Ok(LedgerInfo {
            total_blocks,
            latest_block_number: latest.number,
            latest_block_hash: latest.block_hash,
            genesis_hash: GENESIS_HASH.to_string(),
            chain_valid: chain_error.is_none(),
            chain_error,
            anchor_network: self.anchor.shared().map(|l| l.network().to_string()),
        })
    }

    /// How much of the chain is mirrored on the external ledger.
    pub async fn anchor_coverage(&self) -> Result<AnchorCoverage> {
        let blocks = self.store.list_blocks().await?;
        let latest_block_number = blocks.last().map(|b| b.number).unwrap_or_default();

        let mut total_blocks = 0u64;
        let mut anchored_blocks = 0u64;
        let mut confirmed_blocks = 0u64;
        for block in blocks.iter().filter(|b| b.number > 0) {
            total_blocks += 1;
            if block.anchor_tx_hash.as_deref().is_some_and(|h| !h.is_empty()) {
                anchored_blocks += 1;
            }
            if block.anchor_status == AnchorStatus::Confirmed {
                confirmed_blocks += 1;
            }
        }

        let verification_rate = if total_blocks > 0 {
            anchored_blocks as f64 / total_blocks as f64 * 100.0
        } else {
            0.0
        };

        let chain_valid = match self.verifier.verify_chain().await {
            Ok(_) => true,
            Err(e) if e.is_verification_failure() => {
                warn!(error = %e, "Chain integrity check failed");
                false
            }
            Err(e) => return Err(e),
        };

        Ok(AnchorCoverage {
            total_blocks,
            anchored_blocks,
            unanchored_blocks: total_blocks - anchored_blocks,
            confirmed_blocks,
            verification_rate,
            health: AnchorHealth::from_rate(verification_rate),
            chain_valid,
            latest_block_number,
            external_records: self.anchor.transaction_count().await.ok(),
        })
    }

    /// The external ledger's record of a transaction.
    pub async fn external_record(&self, transaction_id: &str) -> Result<AnchoredTransaction> {
        self.anchor.fetch(transaction_id).await
    }
}
