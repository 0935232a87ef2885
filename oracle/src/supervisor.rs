use anyhow::{Context, Result, anyhow};
use checkpoint_store::CheckpointStore;
use oracle_core::{ChainDataProvider, OracleError, Orchestrator, SlotReport};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::metrics;

/// Oracle supervisor: follows the finalized chain and persists every checkpoint.
pub struct Supervisor<P> {
    orchestrator: Orchestrator<P>,
    store: CheckpointStore,
    shutdown_token: CancellationToken,
    poll_interval: Duration,
}

impl<P: ChainDataProvider> Supervisor<P> {
    pub fn new(
        orchestrator: Orchestrator<P>,
        store: CheckpointStore,
        shutdown_token: CancellationToken,
        poll_interval: Duration,
    ) -> Self {
        Self {
            orchestrator,
            store,
            shutdown_token,
            poll_interval,
        }
    }

    /// Run until shutdown is requested or the ledger hits an invariant
    /// violation. The ledger is saved on the way out in both cases.
    pub async fn run(mut self) -> Result<()> {
        info!(next_slot = self.orchestrator.next_slot(), "Starting slot reconciliation");

        let result = loop {
            if self.shutdown_token.is_cancelled() {
                break Ok(());
            }

            match self.catch_up().await {
                Ok(()) => {}
                Err(e) if e.is_invariant_violation() => {
                    error!(error = %e, "Ledger invariant violated, halting");
                    break Err(anyhow!(e).context("oracle halted"));
                }
                Err(_) if self.shutdown_token.is_cancelled() => break Ok(()),
                Err(e) => {
                    warn!(error = %e, "Slot reconciliation interrupted, retrying");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = self.shutdown_token.cancelled() => break Ok(()),
            }
        };

        self.store
            .save_state(self.orchestrator.state())
            .context("Failed to save ledger on exit")?;
        info!(
            latest_slot = ?self.orchestrator.state().latest_processed_slot,
            "Ledger saved"
        );
        result
    }

    /// Reconcile every slot up to the finalized head.
    async fn catch_up(&mut self) -> Result<(), OracleError> {
        let finalized = self.orchestrator.finalized_slot().await?;
        metrics::get().slots.set_finalized(finalized);

        let start = self.orchestrator.next_slot();
        if start > finalized {
            debug!(next_slot = start, finalized, "Waiting for the next finalized slot");
            return Ok(());
        }
        info!(from = start, to = finalized, "Catching up with finalized slots");

        for slot in start..=finalized {
            if self.shutdown_token.is_cancelled() {
                break;
            }
            match self.orchestrator.process_slot(slot).await {
                Ok(report) => self.record(&report),
                Err(OracleError::Submission(e)) => {
                    error!(
                        slot,
                        error = %e,
                        "Failed to submit merkle root, checkpoint kept locally"
                    );
                    metrics::get().checkpoints.inc_built();
                    metrics::get().checkpoints.inc_failed();
                    self.persist_latest_checkpoint();
                }
                Err(e) => return Err(e),
            }
        }

        metrics::get().ledger.record(self.orchestrator.state());
        if let Err(e) = self.store.save_state(self.orchestrator.state()) {
            warn!(error = %e, "Failed to save ledger");
        }
        Ok(())
    }

    fn record(&self, report: &SlotReport) {
        metrics::get()
            .slots
            .record_processed(report.slot, &report.outcome);

        let Some(checkpoint) = &report.checkpoint else {
            return;
        };
        metrics::get().checkpoints.inc_built();
        if checkpoint.tx_hash.is_some() {
            metrics::get().checkpoints.inc_submitted();
        }
        self.persist_latest_checkpoint();
    }

    /// Write the latest checkpoint and the ledger it was built from.
    ///
    /// Losing a write only costs a rebuild at the next checkpoint, so failures
    /// are logged and the oracle keeps going.
    fn persist_latest_checkpoint(&self) {
        let Some(checkpoint) = self.orchestrator.latest_checkpoint() else {
            return;
        };
        if let Err(e) = self.store.save_checkpoint(checkpoint) {
            warn!(root = ?checkpoint.merkle_root, error = %e, "Failed to save checkpoint");
            return;
        }
        if let Err(e) = self.store.save_state(self.orchestrator.state()) {
            warn!(error = %e, "Failed to save ledger");
        }
        info!(
            slot = checkpoint.slot,
            root = ?checkpoint.merkle_root,
            "Checkpoint saved"
        );
    }
}
