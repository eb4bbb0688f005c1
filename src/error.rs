use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Configuration missing: {0}")]
    ConfigurationMissing(&'static str),

    #[error("External ledger unavailable: {0}")]
    AnchorUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Ledger has no blocks")]
    EmptyChain,

    #[error("Ledger store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Ledger store write failed: {0}")]
    StoreWriteFailed(String),

    #[error("Genesis block does not match the reserved sentinels")]
    GenesisMismatch,

    #[error("Block #{block}: transaction hash mismatch")]
    TransactionHashMismatch { block: u64 },

    #[error("Block #{block}: block hash mismatch")]
    BlockHashMismatch { block: u64 },

    #[error("Block #{block}: previous hash mismatch")]
    PreviousHashMismatch { block: u64 },

    #[error("Block #{block}: previous block not found")]
    PreviousBlockMissing { block: u64 },

    #[error("Block #{block}: data mismatch on external ledger, tampering detected")]
    TamperingDetected { block: u64 },

    #[error("Timed out waiting for receipt of {0}")]
    ReceiptTimeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl LedgerError {
    /// True for local hash/link mismatches and external tampering.
    pub fn is_verification_failure(&self) -> bool {
        matches!(
            self,
            Self::GenesisMismatch
                | Self::TransactionHashMismatch { .. }
                | Self::BlockHashMismatch { .. }
                | Self::PreviousHashMismatch { .. }
                | Self::PreviousBlockMissing { .. }
                | Self::TamperingDetected { .. }
        )
    }

    /// Block number a verification failure refers to, if any.
    pub fn failed_block(&self) -> Option<u64> {
        match self {
            Self::GenesisMismatch => Some(0),
            Self::TransactionHashMismatch { block }
            | Self::BlockHashMismatch { block }
            | Self::PreviousHashMismatch { block }
            | Self::PreviousBlockMissing { block }
            | Self::TamperingDetected { block } => Some(*block),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
