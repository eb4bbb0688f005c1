/// In-process ledger store.
///
/// Enforces the same uniqueness rules as the PostgreSQL schema: one block
/// per sequence number and one block per transaction id.
use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::models::{AnchorStatus, Block, Transaction};
use super::{LedgerStore, NextBlock};
use crate::error::{LedgerError, Result};

#[derive(Default)]
struct Inner {
    blocks: BTreeMap<u64, Block>,
    by_transaction: HashMap<String, u64>,
    transactions: HashMap<String, Transaction>,
}

impl Inner {
    fn insert(&mut self, block: &Block) -> Result<()> {
        if self.blocks.contains_key(&block.number) {
            return Err(LedgerError::Conflict(format!(
                "block #{} already exists",
                block.number
            )));
        }
        if self.by_transaction.contains_key(&block.transaction_id) {
            return Err(LedgerError::Conflict(format!(
                "block already exists for transaction: {}",
                block.transaction_id
            )));
        }

        self.by_transaction
            .insert(block.transaction_id.clone(), block.number);
        self.blocks.insert(block.number, block.clone());
        Ok(())
    }
}

/// `LedgerStore` backed by in-memory maps.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    #[cfg(test)]
    fail_writes: std::sync::atomic::AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a stored block in place, bypassing every ledger rule.
    #[cfg(test)]
    pub(crate) async fn tamper_block(&self, number: u64, edit: impl FnOnce(&mut Block)) {
        let mut inner = self.inner.write().await;
        if let Some(block) = inner.blocks.get_mut(&number) {
            edit(block);
        }
    }

    /// Overwrite a stored transaction in place.
    #[cfg(test)]
    pub(crate) async fn tamper_transaction(&self, id: &str, edit: impl FnOnce(&mut Transaction)) {
        let mut inner = self.inner.write().await;
        if let Some(tx) = inner.transactions.get_mut(id) {
            edit(tx);
        }
    }

    /// Make every block write fail as an unreachable database would.
    #[cfg(test)]
    pub(crate) fn fail_writes(&self) {
        self.fail_writes
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        #[cfg(test)]
        if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(LedgerError::StoreUnavailable("connection reset".into()));
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) async fn remove_block(&self, number: u64) {
        let mut inner = self.inner.write().await;
        if let Some(block) = inner.blocks.remove(&number) {
            inner.by_transaction.remove(&block.transaction_id);
        }
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn latest_block(&self) -> Result<Option<Block>> {
        let inner = self.inner.read().await;
        Ok(inner.blocks.values().next_back().cloned())
    }

    async fn block_by_number(&self, number: u64) -> Result<Option<Block>> {
        let inner = self.inner.read().await;
        Ok(inner.blocks.get(&number).cloned())
    }

    async fn block_by_transaction(&self, transaction_id: &str) -> Result<Option<Block>> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_transaction
            .get(transaction_id)
            .and_then(|n| inner.blocks.get(n))
            .cloned())
    }

    async fn insert_block(&self, block: &Block) -> Result<()> {
        self.check_writable()?;
        self.inner.write().await.insert(block)
    }

    async fn append_block(&self, build: NextBlock) -> Result<Block> {
        self.check_writable()?;
        let mut inner = self.inner.write().await;
        let tip = inner
            .blocks
            .values()
            .next_back()
            .ok_or(LedgerError::EmptyChain)?;

        let block = build(tip);
        inner.insert(&block)?;
        Ok(block)
    }

    async fn insert_genesis(&self, genesis: &Block) -> Result<bool> {
        self.check_writable()?;
        let mut inner = self.inner.write().await;
        if !inner.blocks.is_empty() {
            return Ok(false);
        }
        inner.insert(genesis)?;
        Ok(true)
    }

    async fn count_blocks(&self) -> Result<u64> {
        Ok(self.inner.read().await.blocks.len() as u64)
    }

    async fn list_blocks(&self) -> Result<Vec<Block>> {
        Ok(self.inner.read().await.blocks.values().cloned().collect())
    }

    async fn set_anchor_status(&self, number: u64, status: AnchorStatus) -> Result<bool> {
        let mut inner = self.inner.write().await;
        match inner.blocks.get_mut(&number) {
            Some(block) if block.anchor_status.can_transition_to(status) => {
                block.anchor_status = status;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn transaction(&self, transaction_id: &str) -> Result<Option<Transaction>> {
        Ok(self.inner.read().await.transactions.get(transaction_id).cloned())
    }

    async fn insert_transaction(&self, tx: &Transaction) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.transactions.contains_key(&tx.transaction_id) {
            return Err(LedgerError::Conflict(format!(
                "transaction {} already exists",
                tx.transaction_id
            )));
        }
        inner
            .transactions
            .insert(tx.transaction_id.clone(), tx.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(number: u64, tx_id: &str) -> Block {
        Block {
            number,
            previous_hash: "00".into(),
            transaction_id: tx_id.into(),
            transaction_hash: "11".into(),
            block_hash: format!("{number:064x}"),
            timestamp: 1_700_000_000,
            nonce: 0,
            anchor_tx_hash: None,
            anchor_status: AnchorStatus::Pending,
        }
    }

    #[tokio::test]
    async fn test_latest_and_ordering() {
        let store = MemoryStore::new();
        store.insert_block(&block(1, "B")).await.unwrap();
        store.insert_block(&block(0, "A")).await.unwrap();
        store.insert_block(&block(2, "C")).await.unwrap();

        assert_eq!(store.latest_block().await.unwrap().unwrap().number, 2);
        let numbers: Vec<u64> = store
            .list_blocks()
            .await
            .unwrap()
            .iter()
            .map(|b| b.number)
            .collect();
        assert_eq!(numbers, vec![0, 1, 2]);
        assert_eq!(store.count_blocks().await.unwrap(), 3);
        assert_eq!(
            store.block_by_transaction("B").await.unwrap().unwrap().number,
            1
        );
    }

    #[tokio::test]
    async fn test_duplicate_number_and_transaction_conflict() {
        let store = MemoryStore::new();
        store.insert_block(&block(1, "A")).await.unwrap();

        let same_number = store.insert_block(&block(1, "B")).await;
        assert!(matches!(same_number, Err(LedgerError::Conflict(_))));

        let same_tx = store.insert_block(&block(2, "A")).await;
        assert!(matches!(same_tx, Err(LedgerError::Conflict(_))));
        assert_eq!(store.count_blocks().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_append_builds_on_tip() {
        let store = MemoryStore::new();
        let empty = store
            .append_block(Box::new(|tip: &Block| block(tip.number + 1, "X")))
            .await;
        assert!(matches!(empty, Err(LedgerError::EmptyChain)));

        assert!(store.insert_genesis(&block(0, "G")).await.unwrap());
        assert!(!store.insert_genesis(&block(0, "G2")).await.unwrap());

        let appended = store
            .append_block(Box::new(|tip: &Block| block(tip.number + 1, "A")))
            .await
            .unwrap();
        assert_eq!(appended.number, 1);
        assert_eq!(store.latest_block().await.unwrap(), Some(appended));

        let duplicate = store
            .append_block(Box::new(|tip: &Block| block(tip.number + 1, "A")))
            .await;
        assert!(matches!(duplicate, Err(LedgerError::Conflict(_))));
        assert_eq!(store.count_blocks().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_failed_writes_leave_store_untouched() {
        let store = MemoryStore::new();
        store.insert_block(&block(0, "G")).await.unwrap();
        store.fail_writes();

        let appended = store
            .append_block(Box::new(|tip: &Block| block(tip.number + 1, "A")))
            .await;
        assert!(matches!(appended, Err(LedgerError::StoreUnavailable(_))));
        assert_eq!(store.count_blocks().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_anchor_status_only_leaves_pending_once() {
        let store = MemoryStore::new();
        store.insert_block(&block(1, "A")).await.unwrap();

        assert!(store.set_anchor_status(1, AnchorStatus::Confirmed).await.unwrap());
        assert!(!store.set_anchor_status(1, AnchorStatus::Reverted).await.unwrap());
        assert!(!store.set_anchor_status(9, AnchorStatus::Confirmed).await.unwrap());

        let stored = store.block_by_number(1).await.unwrap().unwrap();
        assert_eq!(stored.anchor_status, AnchorStatus::Confirmed);
    }
}
