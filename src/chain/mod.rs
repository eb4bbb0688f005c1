/// Local hash chain: one block per committed transaction.
///
/// ```text
/// genesis ◀── #1 ◀── #2 ◀── ... ◀── tip
///              │      │
///              ▼      ▼
///           external ledger (best-effort mirror)
/// ```
///
/// `ChainBuilder` appends, `ChainVerifier` re-derives and cross-checks,
/// and `Ledger` wires both to one store, anchor client and watcher pool.
pub mod builder;
pub mod status;
pub mod verifier;

use std::sync::Arc;

use chrono::Utc;

use crate::anchor::watcher::{ReceiptWatcher, WatcherConfig};
use crate::anchor::AnchorClient;
use crate::state::models::{AnchorStatus, Block};
use crate::state::LedgerStore;
use builder::ChainBuilder;
use verifier::ChainVerifier;

/// Reserved all-zero hash used by the genesis block.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Reserved transaction id of the genesis block.
pub const GENESIS_TRANSACTION_ID: &str = "GENESIS";

/// The sentinel block #0.
pub fn genesis_block() -> Block {
    Block {
        number: 0,
        previous_hash: GENESIS_HASH.to_string(),
        transaction_id: GENESIS_TRANSACTION_ID.to_string(),
        transaction_hash: GENESIS_HASH.to_string(),
        block_hash: GENESIS_HASH.to_string(),
        timestamp: Utc::now().timestamp(),
        nonce: 0,
        anchor_tx_hash: None,
        anchor_status: AnchorStatus::Unanchored,
    }
}

/// True if `block` carries the genesis sentinels.
pub fn is_genesis(block: &Block) -> bool {
    block.number == 0
        && block.previous_hash == GENESIS_HASH
        && block.block_hash == GENESIS_HASH
        && block.transaction_id == GENESIS_TRANSACTION_ID
}

/// The ledger subsystem as used by the server and CLI.
pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    anchor: AnchorClient,
    watcher: Arc<ReceiptWatcher>,
    builder: ChainBuilder,
    verifier: ChainVerifier,
}

impl Ledger {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        anchor: AnchorClient,
        watcher_config: WatcherConfig,
    ) -> Self {
        let watcher = Arc::new(ReceiptWatcher::new(Arc::clone(&store), watcher_config));
        let builder = ChainBuilder::new(Arc::clone(&store), anchor.clone(), Arc::clone(&watcher));
        let verifier = ChainVerifier::new(Arc::clone(&store), anchor.clone());

        Self {
            store,
            anchor,
            watcher,
            builder,
            verifier,
        }
    }

    pub fn builder(&self) -> &ChainBuilder {
        &self.builder
    }

    pub fn verifier(&self) -> &ChainVerifier {
        &self.verifier
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub fn anchor(&self) -> &AnchorClient {
        &self.anchor
    }

    /// Wait for outstanding receipt watchers to settle their blocks.
    pub async fn drain(&self) {
        self.watcher.drain().await;
    }

    /// Cancel outstanding receipt watchers.
    pub async fn shutdown(&self) {
        self.watcher.shutdown().await;
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::TimeZone;

    use super::*;
    use crate::state::memory::MemoryStore;
    use crate::state::models::Transaction;

    pub fn deposit(id: &str, to: &str, amount: i64) -> Transaction {
        Transaction {
            transaction_id: id.to_string(),
            tx_type: "deposit".to_string(),
            from_account: "BANK".to_string(),
            to_account: to.to_string(),
            amount,
            status: "completed".to_string(),
            description: format!("Deposit: {id}"),
            created_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    /// In-memory ledger with genesis in place.
    pub async fn ledger(anchor: AnchorClient) -> (Arc<MemoryStore>, Ledger) {
        let store = Arc::new(MemoryStore::new());
        let ledger = Ledger::new(store.clone(), anchor, WatcherConfig::default());
        ledger.builder().ensure_genesis().await.unwrap();
        (store, ledger)
    }

    /// Commit `count` deposits TXN-1..=TXN-count and append a block for each.
    pub async fn append_deposits(store: &MemoryStore, ledger: &Ledger, count: u64) {
        for i in 1..=count {
            let id = format!("TXN-{i}");
            store
                .insert_transaction(&deposit(&id, &format!("USER-{i}"), 1_000 * i as i64))
                .await
                .unwrap();
            ledger.builder().create_block_for_transaction(&id).await.unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genesis_sentinels() {
        let genesis = genesis_block();
        assert!(is_genesis(&genesis));
        assert_eq!(genesis.transaction_hash, GENESIS_HASH);
        assert_eq!(GENESIS_HASH.len(), 64);
        assert!(genesis.anchor_tx_hash.is_none());
    }

    #[test]
    fn test_is_genesis_rejects_altered_block() {
        let mut genesis = genesis_block();
        genesis.block_hash = "1".repeat(64);
        assert!(!is_genesis(&genesis));

        let mut renumbered = genesis_block();
        renumbered.number = 1;
        assert!(!is_genesis(&renumbered));
    }
}
