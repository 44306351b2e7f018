use crate::benchmark::probe::WorkerProber;
use crate::benchmark::{BenchmarkEvent, BenchmarkOrchestrator, BenchmarkRun};
use crate::clustering::{cluster_workers, EligibleWorker};
use crate::commit_reveal::CommitRevealCoordinator;
use crate::rewards::{MedianThroughputReward, RewardAggregator};
use crate::store::SeedStore;
use crate::term::{ClockError, Phase, TermClock, TermState, TermSummary, TermTick};
use crate::vote::{ObservedSeedHashes, VoteResolver};
use crate::MetricsContext;
use anyhow::{Context as _, Result};
use futures::future::join_all;
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::{Rng as _, SeedableRng as _};
use shared::artifacts::ArtifactStore;
use shared::ledger::Ledger;
use shared::models::network::{Group, Uid};
use shared::network::NetworkSource;
use shared::protocol::TermConfig;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const STATUS_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ValidatorHealth {
    last_tick_timestamp: u64,
    last_tick_duration_ms: u64,
    term: Option<TermSummary>,
}

impl ValidatorHealth {
    pub(crate) fn new() -> Self {
        Self {
            last_tick_timestamp: 0,
            last_tick_duration_ms: 0,
            term: None,
        }
    }

    pub(crate) fn update(&mut self, timestamp: u64, duration_ms: u64, term: Option<TermSummary>) {
        self.last_tick_timestamp = timestamp;
        self.last_tick_duration_ms = duration_ms;
        self.term = term;
    }

    pub fn last_tick_timestamp(&self) -> u64 {
        self.last_tick_timestamp
    }

    pub fn last_tick_duration_ms(&self) -> u64 {
        self.last_tick_duration_ms
    }

    pub fn term(&self) -> Option<&TermSummary> {
        self.term.as_ref()
    }
}

/// The external systems a validator talks to.
#[derive(Clone)]
pub struct ValidatorServices {
    pub ledger: Arc<dyn Ledger>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub network: Arc<dyn NetworkSource>,
    pub prober: Arc<dyn WorkerProber>,
    pub seeds: Arc<dyn SeedStore>,
}

/// Whether a scheduler error should stop the process.
pub fn is_fatal(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<ClockError>(),
        Some(ClockError::Regressed { .. })
    )
}

pub struct Validator {
    uid: Uid,
    config: Arc<TermConfig>,
    services: ValidatorServices,
    coordinator: CommitRevealCoordinator,
    aggregator: RewardAggregator,
    clock: TermClock,
    state: Option<TermState>,
    observed: ObservedSeedHashes,
    benchmark: Option<JoinHandle<()>>,
    events_tx: mpsc::Sender<BenchmarkEvent>,
    events_rx: mpsc::Receiver<BenchmarkEvent>,
    term_tx: watch::Sender<u64>,
    rng: StdRng,
    cancellation_token: CancellationToken,
    tick_interval: Duration,
    metrics_ctx: MetricsContext,
    validator_health: Arc<Mutex<ValidatorHealth>>,
}

impl Validator {
    pub fn new(
        uid: Uid,
        config: TermConfig,
        services: ValidatorServices,
        cancellation_token: CancellationToken,
        metrics_ctx: MetricsContext,
    ) -> Result<(Self, Arc<Mutex<ValidatorHealth>>)> {
        config.validate()?;
        let config = Arc::new(config);
        let validator_health = Arc::new(Mutex::new(ValidatorHealth::new()));
        let (events_tx, events_rx) = mpsc::channel(64);
        let (term_tx, _) = watch::channel(0);

        let coordinator = CommitRevealCoordinator::new(
            uid,
            config.clone(),
            services.ledger.clone(),
            services.artifacts.clone(),
            metrics_ctx.clone(),
        );
        let aggregator =
            RewardAggregator::new(config.as_ref().clone(), Box::new(MedianThroughputReward));

        Ok((
            Self {
                uid,
                clock: TermClock::new(&config),
                config,
                services,
                coordinator,
                aggregator,
                state: None,
                observed: ObservedSeedHashes::new(),
                benchmark: None,
                events_tx,
                events_rx,
                term_tx,
                rng: StdRng::from_os_rng(),
                cancellation_token,
                tick_interval: Duration::from_secs(5),
                metrics_ctx,
                validator_health: validator_health.clone(),
            },
            validator_health,
        ))
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    /// Ticks until cancelled. Returns an error only when the block height
    /// went backwards.
    pub async fn run(mut self) -> Result<()> {
        let cancellation_token = self.cancellation_token.clone();
        let result = loop {
            let sleep = tokio::time::sleep(self.tick_interval);
            tokio::select! {
                _ = cancellation_token.cancelled() => {
                    info!("Validator is stopping due to cancellation signal");
                    break Ok(());
                }
                _ = sleep => {
                    if let Err(e) = self.tick().await {
                        if is_fatal(&e) {
                            error!("Stopping validator: {e:#}");
                            break Err(e);
                        }
                        self.metrics_ctx.record_error("tick");
                        error!("Scheduler tick failed: {e:#}");
                    }
                }
            }
        };
        if let Some(handle) = self.benchmark.take() {
            handle.abort();
        }
        result
    }

    async fn tick(&mut self) -> Result<()> {
        let tick_start = Instant::now();
        let tick_timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("system clock is before the unix epoch")?
            .as_secs();

        let height = self
            .services
            .ledger
            .read_block_height()
            .await
            .context("failed to read block height")?;
        let tick = self.clock.advance(height)?;

        let mut state = match self.state.take() {
            Some(state) if state.term == tick.term => state,
            previous => self.start_term(tick.term, previous).await,
        };
        self.drain_benchmark_events(&mut state);

        let phase = Phase::at(tick.offset, &self.config);
        self.metrics_ctx.record_position(tick.term, tick.offset, phase);
        debug!(
            "Block {height}: term {}, offset {}, phase {phase}",
            tick.term, tick.offset
        );

        self.drive_phases(&mut state, tick).await;

        let summary = state.summary(tick.offset);
        self.state = Some(state);

        let duration = tick_start.elapsed();
        self.metrics_ctx
            .record_tick_duration(duration.as_secs_f64());
        let mut validator_health = self.validator_health.lock().await;
        validator_health.update(tick_timestamp, duration.as_millis() as u64, Some(summary));
        Ok(())
    }

    /// Builds the state for a new term. The seed revealed in `term` is the
    /// one committed during the previous term.
    async fn start_term(&mut self, term: u64, previous: Option<TermState>) -> TermState {
        info!("Starting term {term}");
        self.term_tx.send_replace(term);
        if let Some(handle) = self.benchmark.take() {
            if !handle.is_finished() {
                info!("Benchmark of the previous term is still winding down");
            }
        }
        while self.events_rx.try_recv().is_ok() {}

        let committed = match previous {
            Some(previous) if previous.term + 1 == term => Some(previous.next_seed),
            _ => match term.checked_sub(1) {
                Some(last) => self.load_seed(last).await,
                None => None,
            },
        };
        let seed = committed.unwrap_or_else(|| {
            warn!("No seed was committed for term {term}, revealing a fresh one");
            self.fresh_seed()
        });

        let next_seed = match self.load_seed(term).await {
            Some(seed) => seed,
            None => {
                let seed = self.fresh_seed();
                if let Err(e) = self.services.seeds.save_seed(self.uid, term, seed).await {
                    warn!("Failed to persist seed for term {term}: {e:#}");
                }
                seed
            }
        };
        TermState::new(term, seed, next_seed)
    }

    async fn load_seed(&self, term: u64) -> Option<u64> {
        match self.services.seeds.load_seed(self.uid, term).await {
            Ok(seed) => seed,
            Err(e) => {
                warn!("Failed to load seed of term {term}: {e:#}");
                None
            }
        }
    }

    fn fresh_seed(&mut self) -> u64 {
        self.rng.random_range(0..=u64::from(u32::MAX))
    }

    fn drain_benchmark_events(&mut self, state: &mut TermState) {
        while let Ok(event) = self.events_rx.try_recv() {
            state.apply_benchmark_event(event);
        }
    }

    fn benchmark_running(&self) -> bool {
        self.benchmark
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Runs whatever the current offset calls for. Failures are logged and
    /// left for the next tick.
    async fn drive_phases(&mut self, state: &mut TermState, tick: TermTick) {
        let offset = tick.offset;

        if self.coordinator.in_share_window(offset) && !state.seed_committed {
            if state.groups.is_none() {
                match self.propose_groups().await {
                    Ok(groups) => {
                        info!("Proposing {} groups for term {}", groups.len(), state.term);
                        state.groups = Some(groups);
                    }
                    Err(e) => warn!("Failed to propose groups: {e:#}"),
                }
            }
            if let Err(e) = self.coordinator.share_seed(state, offset).await {
                warn!("Failed to share seed: {e:#}");
            }
        }

        if state.vote.is_none() && Phase::accepts_vote(offset, &self.config) {
            self.resolve_vote(state).await;
        }

        let in_benchmark_window = offset >= self.config.blocks_start_benchmark
            && offset < self.config.blocks_seedhash_start;
        if in_benchmark_window
            && state.vote.is_some()
            && !state.benchmark.finished
            && !self.benchmark_running()
        {
            if let Err(e) = self.start_benchmark(state).await {
                warn!("Failed to start benchmark: {e:#}");
            }
        }

        if self.coordinator.in_seedhash_window(offset) && !state.seedhash_committed {
            if self.benchmark_running() {
                debug!("Waiting for the benchmark to finish before committing the seed hash");
            } else {
                // a finished run may have sent its last events after the tick drained them
                self.drain_benchmark_events(state);
                if let Err(e) = self.coordinator.commit_seedhash(state, offset).await {
                    warn!("Failed to commit seed hash: {e:#}");
                }
            }
        }

        if offset >= self.config.blocks_seedhash_end && !state.weights_set {
            if let Err(e) = self.set_weights(state).await {
                self.metrics_ctx.record_weights_set(false);
                warn!("Failed to set weights: {e:#}");
            }
        }
    }

    /// Groups the workers that are below validator stake, have an address
    /// and answer their status endpoint.
    async fn propose_groups(&mut self) -> Result<Vec<Group>> {
        let snapshot = self
            .services
            .network
            .snapshot()
            .await
            .context("failed to read network snapshot")?;
        let candidates = snapshot.worker_candidates(self.config.validator_min_stake);

        let prober = &self.services.prober;
        let uid = self.uid;
        let statuses = join_all(candidates.iter().map(|neuron| async move {
            let status =
                tokio::time::timeout(STATUS_TIMEOUT, prober.status(neuron.endpoint(), uid)).await;
            match status {
                Ok(Ok(status)) => status.is_available(),
                Ok(Err(e)) => {
                    debug!("Worker {} status failed: {e:#}", neuron.uid);
                    false
                }
                Err(_) => false,
            }
        }))
        .await;

        let eligible: Vec<EligibleWorker> = candidates
            .iter()
            .zip(statuses)
            .filter(|(_, available)| *available)
            .map(|(neuron, _)| EligibleWorker {
                uid: neuron.uid,
                ip: neuron.ip,
            })
            .collect();
        info!(
            "{} of {} candidate workers are available",
            eligible.len(),
            candidates.len()
        );
        Ok(cluster_workers(&eligible, self.config.group_size, &mut self.rng))
    }

    async fn resolve_vote(&self, state: &mut TermState) {
        let validator_uids = match self.services.network.snapshot().await {
            Ok(snapshot) => snapshot.validator_uids(self.config.validator_min_stake),
            Err(e) => {
                warn!("Failed to read network snapshot for the vote: {e:#}");
                return;
            }
        };
        let resolver = VoteResolver::new(
            self.services.ledger.as_ref(),
            self.services.artifacts.as_ref(),
            &self.config,
            &self.observed,
        );
        match resolver.resolve(state.term, &validator_uids).await {
            Ok(Some(outcome)) => {
                self.metrics_ctx.record_vote("winner");
                state.vote = Some(outcome);
            }
            Ok(None) => self.metrics_ctx.record_vote("no_winner"),
            Err(e) => {
                self.metrics_ctx.record_vote("retry");
                warn!("Vote for term {} not resolved: {e:#}", state.term);
            }
        }
    }

    async fn start_benchmark(&mut self, state: &TermState) -> Result<()> {
        let Some(groups) = state.voted_groups() else {
            return Ok(());
        };
        let snapshot = self
            .services
            .network
            .snapshot()
            .await
            .context("failed to read network snapshot")?;
        let endpoints = groups
            .iter()
            .flatten()
            .filter_map(|uid| snapshot.neuron(*uid).map(|n| (*uid, n.endpoint())))
            .collect();

        let run = BenchmarkRun {
            term: state.term,
            groups: groups.to_vec(),
            endpoints,
            results: state.benchmark.results.clone(),
            completed_groups: state.benchmark.completed_groups.clone(),
        };
        let orchestrator = BenchmarkOrchestrator::new(
            self.uid,
            self.config.clone(),
            self.services.ledger.clone(),
            self.services.artifacts.clone(),
            self.services.prober.clone(),
            self.events_tx.clone(),
            self.term_tx.subscribe(),
            self.metrics_ctx.clone(),
        );
        self.benchmark = Some(orchestrator.spawn(run));
        Ok(())
    }

    async fn set_weights(&mut self, state: &mut TermState) -> Result<()> {
        if !state.scores_updated {
            let validator_uids = self
                .services
                .network
                .snapshot()
                .await
                .context("failed to read network snapshot")?
                .validator_uids(self.config.validator_min_stake);
            let aggregation = self
                .aggregator
                .collect(
                    self.services.ledger.as_ref(),
                    self.services.artifacts.as_ref(),
                    state.term,
                    &validator_uids,
                )
                .await?;
            self.aggregator.update_scores(&aggregation.samples);
            self.observed = aggregation.seedhashes;
            state.scores_updated = true;
        }

        let weights = self.aggregator.weights();
        if weights.is_empty() {
            info!("No worker scores yet, not setting weights for term {}", state.term);
            state.weights_set = true;
            return Ok(());
        }
        self.services
            .ledger
            .set_weights(self.uid, &weights)
            .await
            .context("ledger rejected weights")?;
        self.metrics_ctx.record_weights_set(true);
        state.weights_set = true;
        info!("Set weights for {} workers in term {}", weights.len(), state.term);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benchmark::probe::{MockProbe, MockProber};
    use crate::store::MemorySeedStore;
    use shared::artifacts::MockArtifactStore;
    use shared::ledger::MockLedger;
    use shared::models::benchmark::{BenchmarkResults, BenchmarkShape, WorkerStatus};
    use shared::models::commitment::Commitment;
    use shared::models::network::{NetworkSnapshot, Neuron};
    use shared::network::StaticNetworkSource;
    use shared::utils::hash::hash_seed;

    const VALIDATOR_UID: Uid = 0;

    fn config() -> TermConfig {
        TermConfig {
            blocks_per_term: 100,
            blocks_share_seed: 5,
            blocks_start_benchmark: 10,
            blocks_per_group: 10,
            blocks_seedhash_start: 40,
            blocks_seedhash_end: 50,
            benchmark_shape: BenchmarkShape(vec![2, 8]),
            group_size: 2,
            ..Default::default()
        }
    }

    fn worker(uid: Uid) -> Neuron {
        Neuron {
            uid,
            stake: 1.0,
            ip: [10, 0, 0, uid as u8].into(),
            port: 8091,
        }
    }

    struct Harness {
        ledger: Arc<MockLedger>,
        seeds: MemorySeedStore,
        validator: Validator,
    }

    async fn harness(height: u64) -> Harness {
        let ledger = Arc::new(MockLedger::new(height));
        let seeds = MemorySeedStore::new();
        let prober = MockProber::new();
        let mut neurons = vec![Neuron {
            uid: VALIDATOR_UID,
            stake: 100.0,
            ..Default::default()
        }];
        for uid in 1..=4 {
            let neuron = worker(uid);
            prober
                .set_status(
                    neuron.endpoint(),
                    WorkerStatus {
                        version: "test".to_string(),
                        job_id: 0,
                    },
                )
                .await;
            prober
                .set_probe(
                    neuron.endpoint(),
                    MockProbe::Respond {
                        delay: Duration::from_millis(100),
                        size_bytes: 64,
                    },
                )
                .await;
            neurons.push(neuron);
        }

        let services = ValidatorServices {
            ledger: ledger.clone(),
            artifacts: Arc::new(MockArtifactStore::new()),
            network: Arc::new(StaticNetworkSource::new(NetworkSnapshot { block: 0, neurons })),
            prober: Arc::new(prober),
            seeds: Arc::new(seeds.clone()),
        };
        let (validator, _) = Validator::new(
            VALIDATOR_UID,
            config(),
            services,
            CancellationToken::new(),
            MetricsContext::new("scheduler-test".to_string()),
        )
        .unwrap();
        Harness {
            ledger,
            seeds,
            validator,
        }
    }

    async fn tick_at(h: &mut Harness, height: u64) {
        h.ledger.set_block_height(height);
        h.validator.tick().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_term_cycle() {
        let mut h = harness(40).await;

        // term 0: only the seed hash for term 1 can be committed
        tick_at(&mut h, 40).await;
        let committed = h.seeds.load_seed(VALIDATOR_UID, 0).await.unwrap().unwrap();
        match h.ledger.read_commitment(VALIDATOR_UID).await.unwrap().unwrap().commitment {
            Commitment::SeedHash(commit) => {
                assert_eq!(commit.seedhash, hash_seed(committed));
                assert_eq!(commit.benchmark_version, None);
            }
            other => panic!("unexpected commitment {other:?}"),
        }
        tick_at(&mut h, 50).await;
        assert!(h.validator.observed.contains_key(&VALIDATOR_UID));

        // term 1: reveal, vote, benchmark
        tick_at(&mut h, 100).await;
        match h.ledger.read_commitment(VALIDATOR_UID).await.unwrap().unwrap().commitment {
            Commitment::Seed(reveal) => assert_eq!(reveal.seed, committed),
            other => panic!("unexpected commitment {other:?}"),
        }
        tick_at(&mut h, 105).await;
        let vote = h.validator.state.as_ref().unwrap().vote.clone().unwrap();
        assert_eq!(vote.winner, VALIDATOR_UID);
        assert_eq!(vote.groups.len(), 2);

        for height in 106..=150 {
            tokio::time::sleep(Duration::from_secs(12)).await;
            tick_at(&mut h, height).await;
        }

        let state = h.validator.state.as_ref().unwrap();
        assert_eq!(state.term, 1);
        assert!(state.benchmark.finished);
        assert_eq!(state.benchmark.completed_groups.len(), 2);
        assert_eq!(state.benchmark.results.len(), 4);
        assert!(state.seedhash_committed);
        assert!(state.weights_set);

        match h.ledger.read_commitment(VALIDATOR_UID).await.unwrap().unwrap().commitment {
            Commitment::SeedHash(commit) => {
                assert_eq!(commit.term, 1);
                assert!(commit.benchmark_version.is_some());
            }
            other => panic!("unexpected commitment {other:?}"),
        }
        let weights = h.ledger.weights_of(VALIDATOR_UID).await.unwrap();
        assert_eq!(weights.iter().map(|(uid, _)| *uid).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
        for (_, weight) in weights {
            assert!((weight - 0.25).abs() < 1e-9);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_winner_skips_benchmark() {
        let mut h = harness(105).await;
        // joined mid-term: never revealed, nobody else did either
        tick_at(&mut h, 105).await;
        tick_at(&mut h, 110).await;
        tick_at(&mut h, 111).await;

        let state = h.validator.state.as_ref().unwrap();
        assert!(state.vote.is_none());
        assert!(!h.validator.benchmark_running());
        assert!(state.benchmark.completed_groups.is_empty());
    }

    #[tokio::test]
    async fn test_height_regression_is_fatal() {
        let mut h = harness(60).await;
        tick_at(&mut h, 60).await;

        h.ledger.set_block_height(59);
        let error = h.validator.tick().await.unwrap_err();
        assert!(is_fatal(&error));
    }

    #[tokio::test]
    async fn test_ledger_outage_is_not_fatal() {
        let error = anyhow::anyhow!("connection refused").context("failed to read block height");
        assert!(!is_fatal(&error));

        let before_origin: anyhow::Error = ClockError::BeforeOrigin {
            height: 1,
            origin: 5,
        }
        .into();
        assert!(!is_fatal(&before_origin));
    }

    #[tokio::test]
    async fn test_restart_reveals_the_persisted_seed() {
        let mut h = harness(100).await;
        h.seeds.save_seed(VALIDATOR_UID, 0, 4242).await.unwrap();

        tick_at(&mut h, 100).await;
        let state = h.validator.state.as_ref().unwrap();
        assert_eq!(state.seed, 4242);
        assert!(state.seed_committed);
        assert_eq!(
            h.seeds.load_seed(VALIDATOR_UID, 1).await.unwrap(),
            Some(state.next_seed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_seedhash_includes_events_sent_after_tick_drain() {
        let mut h = harness(40).await;
        let mut state = TermState::new(0, 11, 22);
        state.benchmark.finished = true;
        h.validator
            .events_tx
            .send(BenchmarkEvent::GroupMeasured {
                term: 0,
                group_index: 1,
                results: BenchmarkResults::new(),
                version: Some("v7".to_string()),
            })
            .await
            .unwrap();

        let tick = TermTick {
            height: 40,
            term: 0,
            offset: 40,
            rolled_over: false,
        };
        h.validator.drive_phases(&mut state, tick).await;

        assert!(state.seedhash_committed);
        assert!(state.benchmark.completed_groups.contains(&1));
        match h.ledger.read_commitment(VALIDATOR_UID).await.unwrap().unwrap().commitment {
            Commitment::SeedHash(commit) => {
                assert_eq!(commit.seedhash, hash_seed(22));
                assert_eq!(commit.benchmark_version.as_deref(), Some("v7"));
            }
            other => panic!("unexpected commitment {other:?}"),
        }
    }
}
