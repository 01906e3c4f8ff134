use crate::error::{FaucetError, FaucetResult};
use prometheus::{opts, Counter, CounterVec, Encoder, Registry, TextEncoder};

/// Prometheus metrics for the payout engine
#[derive(Debug, Clone)]
pub struct FaucetMetrics {
    registry: Registry,

    pub payouts_total: Counter,
    pub payout_atomic_total: Counter,
    /// Requests blocked by a quota gate, labelled by gate
    pub rejections_total: CounterVec,
    /// Aborted payouts, labelled by the stage that failed
    pub payout_failures_total: CounterVec,
}

impl FaucetMetrics {
    pub fn new() -> FaucetResult<Self> {
        let registry = Registry::new();

        let payouts_total = Counter::with_opts(opts!(
            "faucet_payouts_total",
            "Total number of completed payouts"
        ))
        .map_err(metrics_error)?;

        let payout_atomic_total = Counter::with_opts(opts!(
            "faucet_payout_atomic_total",
            "Total amount paid out in atomic units"
        ))
        .map_err(metrics_error)?;

        let rejections_total = CounterVec::new(
            opts!("faucet_rejections_total", "Payout requests blocked by a quota gate"),
            &["gate"],
        )
        .map_err(metrics_error)?;

        let payout_failures_total = CounterVec::new(
            opts!("faucet_payout_failures_total", "Payout requests aborted by failures"),
            &["stage"],
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(payouts_total.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(payout_atomic_total.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(rejections_total.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(payout_failures_total.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            payouts_total,
            payout_atomic_total,
            rejections_total,
            payout_failures_total,
        })
    }

    pub fn record_payout(&self, amount: u64) {
        self.payouts_total.inc();
        self.payout_atomic_total.inc_by(amount as f64);
    }

    pub fn record_rejection(&self, gate: &str) {
        self.rejections_total.with_label_values(&[gate]).inc();
    }

    pub fn record_failure(&self, stage: &str) {
        self.payout_failures_total.with_label_values(&[stage]).inc();
    }

    /// Render all metrics in the Prometheus text format
    pub fn gather(&self) -> FaucetResult<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| FaucetError::Internal(e.to_string()))
    }
}

fn metrics_error(err: prometheus::Error) -> FaucetError {
    FaucetError::Internal(format!("metrics: {}", err))
}
