/// Background confirmation of submitted anchor transactions.
///
/// Submission returns as soon as the external network accepts the
/// broadcast. A watcher task then polls for the receipt, logs the outcome
/// and writes it back onto the block's `anchor_status`. Watchers never
/// touch hashed block fields.
///
/// All tasks share one cancellation token; `shutdown` cancels outstanding
/// watchers and waits for them to exit, while `drain` lets them finish.
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::{AnchorReceipt, ExternalLedger};
use crate::error::LedgerError;
use crate::state::models::AnchorStatus;
use crate::state::LedgerStore;

/// Polling schedule for receipt watchers.
#[derive(Debug, Clone, Copy)]
pub struct WatcherConfig {
    pub poll_interval: Duration,
    /// Overall deadline per watched transaction.
    pub timeout: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(5 * 60),
        }
    }
}

/// How a watch ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    Confirmed(AnchorReceipt),
    Reverted(AnchorReceipt),
    TimedOut,
    /// Shut down before an outcome was known.
    Cancelled,
}

impl WatchOutcome {
    fn anchor_status(&self) -> Option<AnchorStatus> {
        match self {
            Self::Confirmed(_) => Some(AnchorStatus::Confirmed),
            Self::Reverted(_) => Some(AnchorStatus::Reverted),
            Self::TimedOut => Some(AnchorStatus::TimedOut),
            Self::Cancelled => None,
        }
    }
}

/// Supervisor for receipt watcher tasks.
pub struct ReceiptWatcher {
    store: Arc<dyn LedgerStore>,
    config: WatcherConfig,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl ReceiptWatcher {
    pub fn new(store: Arc<dyn LedgerStore>, config: WatcherConfig) -> Self {
        Self {
            store,
            config,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Start watching `tx_hash`, the anchor of block `block_number`.
    pub fn watch(
        &self,
        ledger: Arc<dyn ExternalLedger>,
        block_number: u64,
        transaction_id: String,
        tx_hash: String,
    ) -> JoinHandle<WatchOutcome> {
        let store = Arc::clone(&self.store);
        let config = self.config;
        let cancel = self.cancel.child_token();

        self.tracker.spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => WatchOutcome::Cancelled,
                polled = tokio::time::timeout(
                    config.timeout,
                    poll_receipt(ledger.as_ref(), &tx_hash, config.poll_interval),
                ) => match polled {
                    Ok(receipt) if receipt.success => WatchOutcome::Confirmed(receipt),
                    Ok(receipt) => WatchOutcome::Reverted(receipt),
                    Err(_) => WatchOutcome::TimedOut,
                },
            };

            log_outcome(&outcome, block_number, &transaction_id, &tx_hash);

            if let Some(status) = outcome.anchor_status() {
                match store.set_anchor_status(block_number, status).await {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!(block = block_number, ?status, "Anchor status already settled")
                    }
                    Err(e) => error!(
                        block = block_number,
                        error = %e,
                        "Failed to record anchor status"
                    ),
                }
            }

            outcome
        })
    }

    /// Number of watchers still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Stop accepting watchers and wait for the running ones to reach an
    /// outcome. Bounded by the configured timeout.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        info!("Receipt watchers drained");
    }

    /// Cancel all outstanding watchers and wait for them to exit.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("Receipt watchers stopped");
    }
}

/// Poll until a receipt is available. RPC errors count as "not yet".
async fn poll_receipt(
    ledger: &dyn ExternalLedger,
    tx_hash: &str,
    period: Duration,
) -> AnchorReceipt {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match ledger.receipt(tx_hash).await {
            Ok(Some(receipt)) => return receipt,
            Ok(None) => {}
            Err(e) => debug!(tx_hash = %tx_hash, error = %e, "Receipt poll failed"),
        }
    }
}

fn log_outcome(outcome: &WatchOutcome, block: u64, transaction_id: &str, tx_hash: &str) {
    match outcome {
        WatchOutcome::Confirmed(receipt) => info!(
            block,
            tx_id = %transaction_id,
            tx_hash = %tx_hash,
            external_block = ?receipt.block_number,
            gas_used = ?receipt.gas_used,
            "Anchor confirmed"
        ),
        WatchOutcome::Reverted(_) => warn!(
            block,
            tx_id = %transaction_id,
            tx_hash = %tx_hash,
            "Anchor transaction reverted"
        ),
        WatchOutcome::TimedOut => error!(
            block,
            tx_id = %transaction_id,
            error = %LedgerError::ReceiptTimeout(tx_hash.to_string()),
            "Anchor not confirmed"
        ),
        WatchOutcome::Cancelled => debug!(block, tx_hash = %tx_hash, "Receipt watcher cancelled"),
    }
}
