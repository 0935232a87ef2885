use alloy::primitives::U256;
use anyhow::{Context, Result};
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Gauge, Meter},
};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use oracle_core::{OracleState, ProposalOutcome};
use std::sync::LazyLock;

static METRICS: LazyLock<Metrics> = LazyLock::new(|| {
    let meter = global::meter("smoothing-pool-oracle");
    Metrics::new(&meter)
});

pub(crate) fn get() -> &'static Metrics {
    &METRICS
}

/// Install an OTLP exporter when `endpoint` is set. Meters created before
/// this call keep using the no-op provider, so call it first.
pub(crate) fn init(endpoint: Option<&str>) -> Result<Option<SdkMeterProvider>> {
    let Some(endpoint) = endpoint else {
        return Ok(None);
    };
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .context("Failed to build OTLP metrics exporter")?;
    let reader = PeriodicReader::builder(exporter).build();
    let provider = SdkMeterProvider::builder().with_reader(reader).build();
    global::set_meter_provider(provider.clone());
    Ok(Some(provider))
}

pub(crate) struct Metrics {
    pub(crate) slots: SlotMetrics,
    pub(crate) checkpoints: CheckpointMetrics,
    pub(crate) ledger: LedgerMetrics,
}

impl Metrics {
    fn new(meter: &Meter) -> Self {
        Self {
            slots: SlotMetrics::new(meter),
            checkpoints: CheckpointMetrics::new(meter),
            ledger: LedgerMetrics::new(meter),
        }
    }
}

pub(crate) struct SlotMetrics {
    processed: Counter<u64>,
    latest: Gauge<u64>,
    finalized: Gauge<u64>,
}

impl SlotMetrics {
    fn new(meter: &Meter) -> Self {
        let processed = meter
            .u64_counter("oracle.slots.processed")
            .with_description("Slots reconciled, by proposal outcome")
            .build();
        let latest = meter
            .u64_gauge("oracle.slots.latest")
            .with_description("Last reconciled slot")
            .build();
        let finalized = meter
            .u64_gauge("oracle.slots.finalized")
            .with_description("Latest finalized slot seen on the beacon node")
            .build();
        Self {
            processed,
            latest,
            finalized,
        }
    }

    pub(crate) fn record_processed(&self, slot: u64, outcome: &ProposalOutcome) {
        let outcome = match outcome {
            ProposalOutcome::Rewarded { .. } => "rewarded",
            ProposalOutcome::AutoSubscribed { .. } => "auto_subscribed",
            ProposalOutcome::BannedValidatorReward { .. } => "banned_validator_reward",
            ProposalOutcome::WrongFeeRecipient => "wrong_fee_recipient",
            ProposalOutcome::Missed => "missed",
            ProposalOutcome::Ignored => "ignored",
        };
        self.processed.add(1, &[KeyValue::new("outcome", outcome)]);
        self.latest.record(slot, &[]);
    }

    pub(crate) fn set_finalized(&self, slot: u64) {
        self.finalized.record(slot, &[]);
    }
}

pub(crate) struct CheckpointMetrics {
    built: Counter<u64>,
    submitted: Counter<u64>,
    failed: Counter<u64>,
}

impl CheckpointMetrics {
    fn new(meter: &Meter) -> Self {
        let built = meter
            .u64_counter("oracle.checkpoints.built")
            .with_description("Merkle trees built")
            .build();
        let submitted = meter
            .u64_counter("oracle.checkpoints.submitted")
            .with_description("Roots submitted to the pool contract")
            .build();
        let failed = meter
            .u64_counter("oracle.checkpoints.failed")
            .with_description("Root submissions that failed")
            .build();
        Self {
            built,
            submitted,
            failed,
        }
    }

    pub(crate) fn inc_built(&self) {
        self.built.add(1, &[]);
    }

    pub(crate) fn inc_submitted(&self) {
        self.submitted.add(1, &[]);
    }

    pub(crate) fn inc_failed(&self) {
        self.failed.add(1, &[]);
    }
}

pub(crate) struct LedgerMetrics {
    validators: Gauge<u64>,
    pool_fees: Gauge<f64>,
    pending: Gauge<f64>,
    accumulated: Gauge<f64>,
}

impl LedgerMetrics {
    fn new(meter: &Meter) -> Self {
        let validators = meter
            .u64_gauge("oracle.ledger.validators")
            .with_description("Tracked validators, by status")
            .build();
        let pool_fees = meter
            .f64_gauge("oracle.ledger.pool_fees")
            .with_description("Pool fee accumulator")
            .with_unit("wei")
            .build();
        let pending = meter
            .f64_gauge("oracle.ledger.pending")
            .with_description("Sum of pending rewards")
            .with_unit("wei")
            .build();
        let accumulated = meter
            .f64_gauge("oracle.ledger.accumulated")
            .with_description("Sum of claimable rewards")
            .with_unit("wei")
            .build();
        Self {
            validators,
            pool_fees,
            pending,
            accumulated,
        }
    }

    pub(crate) fn record(&self, state: &OracleState) {
        for (status, count) in state.count_by_status() {
            self.validators
                .record(count, &[KeyValue::new("status", status)]);
        }
        self.pool_fees.record(wei(state.pool_accumulated_fees), &[]);
        self.pending.record(wei(state.total_pending()), &[]);
        self.accumulated.record(wei(state.total_accumulated()), &[]);
    }
}

fn wei(amount: U256) -> f64 {
    amount.into()
}
