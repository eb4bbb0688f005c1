/// Chain verification.
///
/// Local checks re-derive every stored hash from the current transaction
/// data and predecessor block. Blocks that carry an anchor are also
/// cross-checked against the external ledger:
///
/// - local mismatch → hard failure with the specific reason
/// - external record disagrees → `TamperingDetected`
/// - external ledger unreachable → logged, counted as inconclusive
///
/// Verification takes no lock. Each block is checked against the state
/// visible when it is read, so the tip may grow during a run.
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use super::is_genesis;
use crate::anchor::{AnchorClient, AnchorQuery};
use crate::crypto::hash::{hash_block, hash_transaction};
use crate::error::{LedgerError, Result};
use crate::state::models::Block;
use crate::state::LedgerStore;

/// Outcome of a successful whole-chain verification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChainReport {
    pub blocks_checked: u64,
    /// Highest block number seen during the run.
    pub latest_block: u64,
    /// Anchored blocks the external ledger confirmed.
    pub anchors_confirmed: u64,
    /// Anchored blocks whose external check could not be completed.
    pub anchors_inconclusive: u64,
}

pub struct ChainVerifier {
    store: Arc<dyn LedgerStore>,
    anchor: AnchorClient,
}

impl ChainVerifier {
    pub fn new(store: Arc<dyn LedgerStore>, anchor: AnchorClient) -> Self {
        Self { store, anchor }
    }

    /// Verify one block against its transaction and predecessor.
    pub async fn verify_block(&self, number: u64) -> Result<()> {
        let block = self
            .store
            .block_by_number(number)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("block #{number}")))?;

        if number == 0 {
            return if is_genesis(&block) {
                Ok(())
            } else {
                Err(LedgerError::GenesisMismatch)
            };
        }

        let transaction = self
            .store
            .transaction(&block.transaction_id)
            .await?
            .ok_or_else(|| {
                LedgerError::NotFound(format!(
                    "transaction {} referenced by block #{number}",
                    block.transaction_id
                ))
            })?;

        if hash_transaction(&transaction) != block.transaction_hash {
            return Err(LedgerError::TransactionHashMismatch { block: number });
        }

        if hash_block(&block) != block.block_hash {
            return Err(LedgerError::BlockHashMismatch { block: number });
        }

        let previous = self
            .store
            .block_by_number(number - 1)
            .await?
            .ok_or(LedgerError::PreviousBlockMissing { block: number })?;

        if block.previous_hash != previous.block_hash {
            return Err(LedgerError::PreviousHashMismatch { block: number });
        }

        Ok(())
    }

    /// Verify every block in ascending order, failing on the first problem.
    pub async fn verify_chain(&self) -> Result<ChainReport> {
        let blocks = self.store.list_blocks().await?;
        if blocks.is_empty() {
            return Err(LedgerError::EmptyChain);
        }

        let mut report = ChainReport::default();

        for block in &blocks {
            self.verify_block(block.number).await?;
            report.blocks_checked += 1;
            report.latest_block = block.number;

            if let Some(confirmed) = self.cross_check(block).await? {
                if confirmed {
                    report.anchors_confirmed += 1;
                } else {
                    report.anchors_inconclusive += 1;
                }
            }
        }

        info!(
            blocks = report.blocks_checked,
            anchors_confirmed = report.anchors_confirmed,
            anchors_inconclusive = report.anchors_inconclusive,
            "Entire chain verified"
        );
        Ok(report)
    }

    /// Compare an anchored block's transaction with the external record.
    ///
    /// `None` when the block has no anchor, `Some(true)` when confirmed,
    /// `Some(false)` when the external ledger could not answer.
    async fn cross_check(&self, block: &Block) -> Result<Option<bool>> {
        let anchored = block
            .anchor_tx_hash
            .as_deref()
            .is_some_and(|h| !h.is_empty());
        if block.number == 0 || !anchored {
            return Ok(None);
        }

        let Some(transaction) = self.store.transaction(&block.transaction_id).await? else {
            warn!(block = block.number, "Transaction missing for anchored block");
            return Ok(Some(false));
        };

        match self.anchor.verify(&AnchorQuery::from(&transaction)).await {
            Ok(true) => Ok(Some(true)),
            Ok(false) => Err(LedgerError::TamperingDetected { block: block.number }),
            Err(e) => {
                warn!(
                    block = block.number,
                    error = %e,
                    "External verification inconclusive"
                );
                Ok(Some(false))
            }
        }
    }
}
