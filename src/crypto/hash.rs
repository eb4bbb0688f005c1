/// SHA-256 hashing for ledger blocks and transactions.
///
/// Both digests are lowercase hex and must stay byte-for-byte stable:
/// stored blocks are re-verified against them long after they were written.
use std::collections::BTreeMap;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::state::models::{Block, Transaction};

/// Hash arbitrary data with SHA-256, hex-encoded.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Canonical encoding of a transaction's semantic fields.
///
/// Compact JSON with keys in lexicographic order. `created_at` is encoded
/// as epoch seconds.
pub fn canonical_transaction(tx: &Transaction) -> String {
    let fields: BTreeMap<&str, Value> = BTreeMap::from([
        ("transaction_id", Value::from(tx.transaction_id.as_str())),
        ("type", Value::from(tx.tx_type.as_str())),
        ("from_account", Value::from(tx.from_account.as_str())),
        ("to_account", Value::from(tx.to_account.as_str())),
        ("amount", Value::from(tx.amount)),
        ("status", Value::from(tx.status.as_str())),
        ("description", Value::from(tx.description.as_str())),
        ("created_at", Value::from(tx.created_at.timestamp())),
    ]);

    // A map of strings and integers always serializes.
    serde_json::to_string(&fields).unwrap_or_default()
}

/// Digest of a transaction as referenced by its block.
pub fn hash_transaction(tx: &Transaction) -> String {
    sha256_hex(canonical_transaction(tx).as_bytes())
}

/// Digest of a block's hashed fields.
///
/// `number ‖ previous_hash ‖ transaction_id ‖ transaction_hash ‖ timestamp ‖ nonce`,
/// integers in decimal, no delimiters. The anchor fields are not covered.
pub fn hash_block(block: &Block) -> String {
    let data = format!(
        "{}{}{}{}{}{}",
        block.number,
        block.previous_hash,
        block.transaction_id,
        block.transaction_hash,
        block.timestamp,
        block.nonce
    );
    sha256_hex(data.as_bytes())
}
