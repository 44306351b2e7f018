use crate::term::Phase;
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, GaugeVec,
    HistogramVec, TextEncoder,
};

const PHASES: [Phase; 5] = [
    Phase::ShareSeed,
    Phase::Vote,
    Phase::Benchmark,
    Phase::CommitSeedHash,
    Phase::SetWeights,
];

lazy_static! {
    pub static ref TICK_DURATION: HistogramVec = register_histogram_vec!(
        "validator_tick_duration_seconds",
        "Duration of one scheduler tick",
        &["validator_uid"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]
    ).unwrap();

    pub static ref CURRENT_TERM: GaugeVec = register_gauge_vec!(
        "validator_current_term",
        "Term index derived from the latest block height",
        &["validator_uid"]
    ).unwrap();

    pub static ref TERM_OFFSET: GaugeVec = register_gauge_vec!(
        "validator_term_offset_blocks",
        "Offset of the latest block height within the current term",
        &["validator_uid"]
    ).unwrap();

    // 1 for the active phase, 0 for the rest
    pub static ref ACTIVE_PHASE: GaugeVec = register_gauge_vec!(
        "validator_active_phase",
        "Phase the scheduler is currently in",
        &["validator_uid", "phase"]
    ).unwrap();

    pub static ref COMMITMENTS: CounterVec = register_counter_vec!(
        "validator_commitments_total",
        "Commitment publishes by type and result",
        &["validator_uid", "type", "result"] // result: ok, failed
    ).unwrap();

    pub static ref VOTES: CounterVec = register_counter_vec!(
        "validator_votes_total",
        "Vote resolutions by outcome",
        &["validator_uid", "outcome"] // outcome: winner, no_winner, retry
    ).unwrap();

    pub static ref PROBES: CounterVec = register_counter_vec!(
        "validator_probes_total",
        "Worker probes by result",
        &["validator_uid", "result"] // result: measured, unmeasured
    ).unwrap();

    pub static ref PROBE_DURATION: HistogramVec = register_histogram_vec!(
        "validator_probe_duration_seconds",
        "Time until a worker's full payload arrived",
        &["validator_uid"],
        vec![0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0]
    ).unwrap();

    pub static ref BENCHMARK_GROUPS: CounterVec = register_counter_vec!(
        "validator_benchmark_groups_total",
        "Groups benchmarked",
        &["validator_uid"]
    ).unwrap();

    pub static ref WEIGHTS_SET: CounterVec = register_counter_vec!(
        "validator_weights_set_total",
        "Weight submissions by result",
        &["validator_uid", "result"]
    ).unwrap();

    pub static ref ERRORS: CounterVec = register_counter_vec!(
        "validator_errors_total",
        "Total errors",
        &["validator_uid", "error"]
    ).unwrap();
}

pub fn export_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families)
}

#[derive(Clone, Debug)]
pub struct MetricsContext {
    pub validator_uid: String,
}

impl MetricsContext {
    pub fn new(validator_uid: String) -> Self {
        Self { validator_uid }
    }

    pub fn record_tick_duration(&self, duration_s: f64) {
        TICK_DURATION
            .with_label_values(&[&self.validator_uid as &str])
            .observe(duration_s);
    }

    pub fn record_position(&self, term: u64, offset: u64, phase: Phase) {
        CURRENT_TERM
            .with_label_values(&[&self.validator_uid as &str])
            .set(term as f64);
        TERM_OFFSET
            .with_label_values(&[&self.validator_uid as &str])
            .set(offset as f64);
        for candidate in PHASES {
            let active = if candidate == phase { 1.0 } else { 0.0 };
            ACTIVE_PHASE
                .with_label_values(&[&self.validator_uid as &str, candidate.as_str()])
                .set(active);
        }
    }

    pub fn record_commitment(&self, kind: &str, ok: bool) {
        let result = if ok { "ok" } else { "failed" };
        COMMITMENTS
            .with_label_values(&[&self.validator_uid as &str, kind, result])
            .inc();
    }

    pub fn record_vote(&self, outcome: &str) {
        VOTES
            .with_label_values(&[&self.validator_uid as &str, outcome])
            .inc();
    }

    pub fn record_probe(&self, elapsed_s: Option<f64>) {
        let result = match elapsed_s {
            Some(elapsed) => {
                PROBE_DURATION
                    .with_label_values(&[&self.validator_uid as &str])
                    .observe(elapsed);
                "measured"
            }
            None => "unmeasured",
        };
        PROBES
            .with_label_values(&[&self.validator_uid as &str, result])
            .inc();
    }

    pub fn record_benchmark_group(&self) {
        BENCHMARK_GROUPS
            .with_label_values(&[&self.validator_uid as &str])
            .inc();
    }

    pub fn record_weights_set(&self, ok: bool) {
        let result = if ok { "ok" } else { "failed" };
        WEIGHTS_SET
            .with_label_values(&[&self.validator_uid as &str, result])
            .inc();
    }

    pub fn record_error(&self, error: &str) {
        ERRORS
            .with_label_values(&[&self.validator_uid as &str, error])
            .inc();
    }
}
