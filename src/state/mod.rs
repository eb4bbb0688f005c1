/// Ledger store for coop-ledger.
///
/// The core reads and writes blocks, and reads the transactions committed
/// by the banking collaborator, only through [`LedgerStore`]:
/// - PostgreSQL (`Database`) for the running service
/// - in-process (`memory::MemoryStore`) for tests and ephemeral ledgers
pub mod memory;
pub mod models;
pub mod repository;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::error::{LedgerError, Result};
use models::{AnchorStatus, Block, Transaction};

/// Builds the next block from the current tip.
pub type NextBlock = Box<dyn FnOnce(&Block) -> Block + Send>;

/// Persistence operations consumed by the chain builder and verifier.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Block with the highest sequence number.
    async fn latest_block(&self) -> Result<Option<Block>>;

    async fn block_by_number(&self, number: u64) -> Result<Option<Block>>;

    async fn block_by_transaction(&self, transaction_id: &str) -> Result<Option<Block>>;

    /// Insert a new block. Duplicate number or transaction id is `Conflict`.
    async fn insert_block(&self, block: &Block) -> Result<()>;

    /// Read the tip, build the next block from it and insert it as one
    /// atomic step. Appenders are serialized across every process sharing
    /// the store. `EmptyChain` when there is no tip.
    async fn append_block(&self, build: NextBlock) -> Result<Block>;

    /// Insert `genesis` only if the store holds no blocks, under the same
    /// serialization as `append_block`. Returns whether it was inserted.
    async fn insert_genesis(&self, genesis: &Block) -> Result<bool>;

    async fn count_blocks(&self) -> Result<u64>;

    /// All blocks, ascending by number.
    async fn list_blocks(&self) -> Result<Vec<Block>>;

    /// Record a watcher outcome. Only a `Pending` block is updated; returns
    /// whether a row changed.
    async fn set_anchor_status(&self, number: u64, status: AnchorStatus) -> Result<bool>;

    async fn transaction(&self, transaction_id: &str) -> Result<Option<Transaction>>;

    async fn insert_transaction(&self, tx: &Transaction) -> Result<()>;
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| LedgerError::StoreUnavailable(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Run pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| LedgerError::StoreUnavailable(format!("Migration failed: {e}")))
    }
}

#[async_trait]
impl LedgerStore for Database {
    async fn latest_block(&self) -> Result<Option<Block>> {
        repository::get_latest_block(&self.pool).await
    }

    async fn block_by_number(&self, number: u64) -> Result<Option<Block>> {
        repository::get_block_by_number(&self.pool, number).await
    }

    async fn block_by_transaction(&self, transaction_id: &str) -> Result<Option<Block>> {
        repository::get_block_by_transaction(&self.pool, transaction_id).await
    }

    async fn insert_block(&self, block: &Block) -> Result<()> {
        repository::insert_block(&self.pool, block).await
    }

    async fn append_block(&self, build: NextBlock) -> Result<Block> {
        repository::append_block(&self.pool, build).await
    }

    async fn insert_genesis(&self, genesis: &Block) -> Result<bool> {
        repository::insert_genesis(&self.pool, genesis).await
    }

    async fn count_blocks(&self) -> Result<u64> {
        repository::count_blocks(&self.pool).await
    }

    async fn list_blocks(&self) -> Result<Vec<Block>> {
        repository::list_blocks(&self.pool).await
    }

    async fn set_anchor_status(&self, number: u64, status: AnchorStatus) -> Result<bool> {
        repository::set_anchor_status(&self.pool, number, status).await
    }

    async fn transaction(&self, transaction_id: &str) -> Result<Option<Transaction>> {
        repository::get_transaction(&self.pool, transaction_id).await
    }

    async fn insert_transaction(&self, tx: &Transaction) -> Result<()> {
        repository::insert_transaction(&self.pool, tx).await
    }
}
