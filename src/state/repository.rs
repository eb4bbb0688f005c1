/// Repository layer: typed PostgreSQL queries for the ledger.
///
/// All queries use sqlx runtime-checked queries (not compile-time checked)
/// to avoid requiring a live database during development builds.
use sqlx::{PgConnection, PgExecutor, PgPool};

use super::models::*;
use super::NextBlock;
use crate::error::{LedgerError, Result};

fn read_err(e: sqlx::Error) -> LedgerError {
    LedgerError::StoreUnavailable(e.to_string())
}

fn write_err(e: sqlx::Error) -> LedgerError {
    let unique = e
        .as_database_error()
        .is_some_and(|db| db.is_unique_violation());
    if unique {
        LedgerError::Conflict(e.to_string())
    } else {
        LedgerError::StoreWriteFailed(e.to_string())
    }
}

fn db_number(value: u64) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| LedgerError::Serialization(format!("{value} does not fit in BIGINT")))
}

fn into_block(row: Option<BlockRow>) -> Result<Option<Block>> {
    row.map(Block::try_from).transpose()
}

/// Transaction-scoped advisory lock held by every block append.
const APPEND_LOCK_KEY: i64 = 0x636f_6f70_6c65_6467;

const BLOCK_COLUMNS: &str = "block_number, previous_hash, transaction_id, transaction_hash, \
     block_hash, timestamp, nonce, anchor_tx_hash, anchor_status";

// ── Blocks ──

pub async fn get_latest_block<'e>(executor: impl PgExecutor<'e>) -> Result<Option<Block>> {
    let row = sqlx::query_as::<_, BlockRow>(&format!(
        "SELECT {BLOCK_COLUMNS} FROM blocks ORDER BY block_number DESC LIMIT 1"
    ))
    .fetch_optional(executor)
    .await
    .map_err(read_err)?;

    into_block(row)
}

pub async fn get_block_by_number(pool: &PgPool, number: u64) -> Result<Option<Block>> {
    let row = sqlx::query_as::<_, BlockRow>(&format!(
        "SELECT {BLOCK_COLUMNS} FROM blocks WHERE block_number = $1"
    ))
    .bind(db_number(number)?)
    .fetch_optional(pool)
    .await
    .map_err(read_err)?;

    into_block(row)
}

pub async fn get_block_by_transaction(pool: &PgPool, transaction_id: &str) -> Result<Option<Block>> {
    let row = sqlx::query_as::<_, BlockRow>(&format!(
        "SELECT {BLOCK_COLUMNS} FROM blocks WHERE transaction_id = $1"
    ))
    .bind(transaction_id)
    .fetch_optional(pool)
    .await
    .map_err(read_err)?;

    into_block(row)
}

pub async fn insert_block<'e>(executor: impl PgExecutor<'e>, block: &Block) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO blocks
        (block_number, previous_hash, transaction_id, transaction_hash, block_hash, timestamp, nonce, anchor_tx_hash, anchor_status)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(db_number(block.number)?)
    .bind(&block.previous_hash)
    .bind(&block.transaction_id)
    .bind(&block.transaction_hash)
    .bind(&block.block_hash)
    .bind(block.timestamp)
    .bind(db_number(block.nonce)?)
    .bind(block.anchor_tx_hash.as_deref())
    .bind(block.anchor_status)
    .execute(executor)
    .await
    .map_err(write_err)?;

    Ok(())
}

/// Wait for the ledger append lock. Released when the transaction ends.
async fn lock_append(conn: &mut PgConnection) -> Result<()> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(APPEND_LOCK_KEY)
        .execute(conn)
        .await
        .map_err(write_err)?;
    Ok(())
}

/// Read tip, build, insert: one transaction under the append lock.
pub async fn append_block(pool: &PgPool, build: NextBlock) -> Result<Block> {
    let mut tx = pool.begin().await.map_err(read_err)?;
    lock_append(&mut tx).await?;

    let tip = get_latest_block(&mut *tx)
        .await?
        .ok_or(LedgerError::EmptyChain)?;
    let block = build(&tip);
    insert_block(&mut *tx, &block).await?;

    tx.commit().await.map_err(write_err)?;
    Ok(block)
}

pub async fn insert_genesis(pool: &PgPool, genesis: &Block) -> Result<bool> {
    let mut tx = pool.begin().await.map_err(read_err)?;
    lock_append(&mut tx).await?;

    if get_latest_block(&mut *tx).await?.is_some() {
        return Ok(false);
    }
    insert_block(&mut *tx, genesis).await?;

    tx.commit().await.map_err(write_err)?;
    Ok(true)
}

pub async fn count_blocks(pool: &PgPool) -> Result<u64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM blocks")
        .fetch_one(pool)
        .await
        .map_err(read_err)?;

    Ok(count.max(0) as u64)
}

pub async fn list_blocks(pool: &PgPool) -> Result<Vec<Block>> {
    sqlx::query_as::<_, BlockRow>(&format!(
        "SELECT {BLOCK_COLUMNS} FROM blocks ORDER BY block_number ASC"
    ))
    .fetch_all(pool)
    .await
    .map_err(read_err)?
    .into_iter()
    .map(Block::try_from)
    .collect()
}

pub async fn set_anchor_status(pool: &PgPool, number: u64, status: AnchorStatus) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE blocks SET anchor_status = $2 WHERE block_number = $1 AND anchor_status = 'pending'",
    )
    .bind(db_number(number)?)
    .bind(status)
    .execute(pool)
    .await
    .map_err(write_err)?;

    Ok(result.rows_affected() > 0)
}

// ── Transactions ──

pub async fn get_transaction(pool: &PgPool, transaction_id: &str) -> Result<Option<Transaction>> {
    sqlx::query_as::<_, Transaction>(
        r#"
        SELECT transaction_id, tx_type, from_account, to_account, amount, status, description, created_at
        FROM transactions WHERE transaction_id = $1
        "#,
    )
    .bind(transaction_id)
    .fetch_optional(pool)
    .await
    .map_err(read_err)
}

pub async fn insert_transaction(pool: &PgPool, tx: &Transaction) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO transactions
        (transaction_id, tx_type, from_account, to_account, amount, status, description, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(&tx.transaction_id)
    .bind(&tx.tx_type)
    .bind(&tx.from_account)
    .bind(&tx.to_account)
    .bind(tx.amount)
    .bind(&tx.status)
    .bind(&tx.description)
    .bind(tx.created_at)
    .execute(pool)
    .await
    .map_err(write_err)?;

    Ok(())
}
