use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::contract::ChainContract;
use crate::error::SyncError;
use crate::sync::{RefreshPlan, SnapshotRefresher};
use crate::wallet::WalletAdapter;

const MAX_BLOCKS_PER_QUERY: u64 = 100;

/// What one poll did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub from_block: u64,
    pub to_block: u64,
    /// Reconciled events from other accounts
    pub foreign: usize,
    /// Reconciled events from the connected account
    pub own: usize,
    pub refreshed: bool,
}

/// Turns contract events from other clients into partial refreshes.
///
/// Snapshots are never patched from event payloads; an event only says which
/// parts to re-read.
pub struct EventReconciler {
    contract: Arc<dyn ChainContract>,
    wallet: Arc<WalletAdapter>,
    refresher: Arc<dyn SnapshotRefresher>,
    poll_interval: Duration,
    /// Last block already scanned
    last_block: RwLock<Option<u64>>,
}

impl EventReconciler {
    pub fn new(
        contract: Arc<dyn ChainContract>,
        wallet: Arc<WalletAdapter>,
        refresher: Arc<dyn SnapshotRefresher>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            contract,
            wallet,
            refresher,
            poll_interval,
            last_block: RwLock::new(None),
        }
    }

    /// Scans the next block range. The first call only anchors the cursor at the head.
    pub async fn poll_once(&self) -> Result<ReconcileReport, SyncError> {
        let head = self.contract.latest_block_number().await?;
        let mut last_block = self.last_block.write().await;

        let Some(last) = *last_block else {
            debug!(head, "Event cursor anchored at chain head");
            *last_block = Some(head);
            return Ok(ReconcileReport {
                from_block: head,
                to_block: head,
                ..Default::default()
            });
        };

        let from_block = last + 1;
        if from_block > head {
            return Ok(ReconcileReport {
                from_block,
                to_block: last,
                ..Default::default()
            });
        }
        let to_block = head.min(from_block.saturating_add(MAX_BLOCKS_PER_QUERY - 1));
        debug!(from_block, to_block, "Scanning blocks for contract events");

        let records = self.contract.events_between(from_block, to_block).await?;
        let me = self.wallet.address().await;

        let mut report = ReconcileReport {
            from_block,
            to_block,
            ..Default::default()
        };
        let mut plan = RefreshPlan::default();
        for record in records.iter().filter(|r| r.event.is_reconciled()) {
            if me.is_some() && record.event.actor() == me {
                report.own += 1;
                continue;
            }
            report.foreign += 1;
            plan = plan.merge(RefreshPlan::for_event(&record.event));
        }

        if !plan.is_empty() {
            info!(events = report.foreign, "Refreshing after events from other accounts");
            // cursor stays put on failure so the range is scanned again
            self.refresher.refresh(plan).await?;
            report.refreshed = true;
        }

        *last_block = Some(to_block);
        Ok(report)
    }

    /// Polls until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(interval = ?self.poll_interval, "Event reconciler started");
        loop {
            match self.poll_once().await {
                Ok(report) if report.own > 0 => {
                    debug!(own = report.own, "Skipped events from the local account")
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Event poll failed"),
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        info!("Event reconciler stopped");
    }
}
