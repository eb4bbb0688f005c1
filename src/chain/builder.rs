/// Block creation.
///
/// Append flow for a committed transaction:
/// 1. Look up the transaction and reject ids that already have a block
/// 2. Require a tip (genesis must exist) before anything leaves the process
/// 3. Submit the transaction to the external ledger (best-effort)
/// 4. Atomically re-read the tip, link and hash the new block, persist
/// 5. Start a receipt watcher for the anchor, if one was submitted
///
/// Step 4 runs inside the store's append serialization, which also covers
/// other processes writing to the same database. The in-process lock only
/// keeps local appenders from queueing on database connections.
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::genesis_block;
use crate::anchor::watcher::ReceiptWatcher;
use crate::anchor::AnchorClient;
use crate::crypto::hash::{hash_block, hash_transaction};
use crate::error::{LedgerError, Result};
use crate::state::models::{AnchorStatus, Block, Transaction};
use crate::state::LedgerStore;

/// Appends blocks to the local chain.
pub struct ChainBuilder {
    store: Arc<dyn LedgerStore>,
    anchor: AnchorClient,
    watcher: Arc<ReceiptWatcher>,
    /// Serializes this process's appends before they reach the store.
    append_lock: Mutex<()>,
}

impl ChainBuilder {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        anchor: AnchorClient,
        watcher: Arc<ReceiptWatcher>,
    ) -> Self {
        Self {
            store,
            anchor,
            watcher,
            append_lock: Mutex::new(()),
        }
    }

    /// Insert the genesis block if the chain is empty.
    /// Returns whether a block was created.
    pub async fn ensure_genesis(&self) -> Result<bool> {
        let _guard = self.append_lock.lock().await;

        let created = self
            .store
            .insert_genesis(&genesis_block())
            .await
            .map_err(persist_err)?;
        if created {
            info!("Genesis block created");
        }
        Ok(created)
    }

    /// Append a block for a committed transaction.
    pub async fn create_block_for_transaction(&self, transaction_id: &str) -> Result<Block> {
        let transaction = self
            .store
            .transaction(transaction_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("transaction {transaction_id}")))?;

        self.ensure_unblocked(transaction_id).await?;

        if self.store.latest_block().await?.is_none() {
            return Err(LedgerError::EmptyChain);
        }

        let anchor_tx_hash = self.submit_anchor(&transaction).await;

        let block = {
            let _guard = self.append_lock.lock().await;
            self.store
                .append_block(Box::new(move |tip: &Block| {
                    next_block(tip, &transaction, Utc::now().timestamp(), anchor_tx_hash)
                }))
                .await
                .map_err(persist_err)?
        };

        info!(
            block = block.number,
            tx_id = %transaction_id,
            anchored = block.anchor_tx_hash.is_some(),
            "Block created"
        );

        if let (Some(tx_hash), Some(ledger)) = (&block.anchor_tx_hash, self.anchor.shared()) {
            self.watcher.watch(
                ledger,
                block.number,
                block.transaction_id.clone(),
                tx_hash.clone(),
            );
        }

        Ok(block)
    }

    async fn ensure_unblocked(&self, transaction_id: &str) -> Result<()> {
        if self.store.block_by_transaction(transaction_id).await?.is_some() {
            return Err(LedgerError::Conflict(format!(
                "block already exists for transaction: {transaction_id}"
            )));
        }
        Ok(())
    }

    /// Best-effort external submission; failures only degrade the block.
    async fn submit_anchor(&self, transaction: &Transaction) -> Option<String> {
        if !self.anchor.is_enabled() {
            return None;
        }

        match self.anchor.submit(transaction).await {
            Ok(tx_hash) => Some(tx_hash),
            Err(e) => {
                warn!(
                    tx_id = %transaction.transaction_id,
                    error = %e,
                    "External anchor failed, continuing without it"
                );
                None
            }
        }
    }
}

/// Build the block following `tip` for `transaction`.
pub fn next_block(
    tip: &Block,
    transaction: &Transaction,
    timestamp: i64,
    anchor_tx_hash: Option<String>,
) -> Block {
    let anchor_status = if anchor_tx_hash.is_some() {
        AnchorStatus::Pending
    } else {
        AnchorStatus::Unanchored
    };

    let mut block = Block {
        number: tip.number + 1,
        previous_hash: tip.block_hash.clone(),
        transaction_id: transaction.transaction_id.clone(),
        transaction_hash: hash_transaction(transaction),
        block_hash: String::new(),
        timestamp,
        nonce: 0,
        anchor_tx_hash,
        anchor_status,
    };
    block.block_hash = hash_block(&block);
    block
}

/// Uniqueness violations stay `Conflict` and a missing tip stays
/// `EmptyChain`; any other store error fails the append.
fn persist_err(e: LedgerError) -> LedgerError {
    match e {
        LedgerError::Conflict(_)
        | LedgerError::EmptyChain
        | LedgerError::StoreWriteFailed(_) => e,
        other => LedgerError::StoreWriteFailed(other.to_string()),
    }
}
