//! Benchmark orchestration.
//!
//! One orchestrator task runs per term, bound to that term. It probes the
//! voted groups one at a time, each inside its own block window, publishes
//! the running result map after every group and reports progress to the
//! scheduler over a channel. It exits on its own once the window closes or
//! as soon as it notices that the term moved on.

pub mod probe;

use crate::metrics::MetricsContext;
use crate::term::TermClock;
use futures::future::join_all;
use log::{debug, error, info, warn};
use probe::WorkerProber;
use shared::artifacts::{publish_json, ArtifactStore};
use shared::ledger::Ledger;
use shared::models::artifact::{benchmark_artifact_key, benchmark_artifact_name};
use shared::models::benchmark::{BenchmarkEntry, BenchmarkRequest, BenchmarkResults};
use shared::models::network::{Group, Uid};
use shared::protocol::TermConfig;
use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq)]
pub enum BenchmarkEvent {
    GroupMeasured {
        term: u64,
        group_index: usize,
        results: BenchmarkResults,
        /// Version of the artifact holding every result so far, if the
        /// publish went through.
        version: Option<String>,
    },
    Finished {
        term: u64,
    },
}

impl BenchmarkEvent {
    pub fn term(&self) -> u64 {
        match self {
            BenchmarkEvent::GroupMeasured { term, .. } | BenchmarkEvent::Finished { term } => *term,
        }
    }
}

/// Index of the group whose window contains `offset`, or `None` outside the
/// benchmark window.
pub fn group_index(offset: u64, config: &TermConfig) -> Option<usize> {
    if offset < config.blocks_start_benchmark || offset >= config.blocks_seedhash_start {
        return None;
    }
    Some(((offset - config.blocks_start_benchmark) / config.blocks_per_group) as usize)
}

/// What an orchestrator needs to (re)start for a term.
#[derive(Debug, Clone)]
pub struct BenchmarkRun {
    pub term: u64,
    pub groups: Vec<Group>,
    pub endpoints: HashMap<Uid, SocketAddr>,
    /// Results carried over from an earlier run in the same term.
    pub results: BenchmarkResults,
    pub completed_groups: BTreeSet<usize>,
}

#[derive(Clone)]
pub struct BenchmarkOrchestrator {
    uid: Uid,
    config: Arc<TermConfig>,
    ledger: Arc<dyn Ledger>,
    artifacts: Arc<dyn ArtifactStore>,
    prober: Arc<dyn WorkerProber>,
    events: mpsc::Sender<BenchmarkEvent>,
    current_term: watch::Receiver<u64>,
    metrics: MetricsContext,
}

impl BenchmarkOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        uid: Uid,
        config: Arc<TermConfig>,
        ledger: Arc<dyn Ledger>,
        artifacts: Arc<dyn ArtifactStore>,
        prober: Arc<dyn WorkerProber>,
        events: mpsc::Sender<BenchmarkEvent>,
        current_term: watch::Receiver<u64>,
        metrics: MetricsContext,
    ) -> Self {
        Self {
            uid,
            config,
            ledger,
            artifacts,
            prober,
            events,
            current_term,
            metrics,
        }
    }

    pub fn spawn(self, run: BenchmarkRun) -> JoinHandle<()> {
        tokio::spawn(self.run(run))
    }

    pub async fn run(self, mut run: BenchmarkRun) {
        let clock = TermClock::new(&self.config);
        let mut publish_pending = false;
        info!(
            "Benchmark for term {} started with {} groups ({} already done)",
            run.term,
            run.groups.len(),
            run.completed_groups.len()
        );

        loop {
            if *self.current_term.borrow() != run.term {
                info!("Term {} is over, stopping its benchmark", run.term);
                return;
            }

            let height = match self.ledger.read_block_height().await {
                Ok(height) => height,
                Err(e) => {
                    warn!("Failed to read block height: {e:#}");
                    tokio::time::sleep(POLL_INTERVAL).await;
                    continue;
                }
            };
            let (term, offset) = match clock.locate(height) {
                Ok(position) => position,
                Err(e) => {
                    error!("Benchmark clock error: {e}");
                    return;
                }
            };
            if term != run.term {
                info!("Block {height} belongs to term {term}, stopping benchmark for term {}", run.term);
                return;
            }
            if offset < self.config.blocks_start_benchmark {
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            }

            let index = match group_index(offset, &self.config) {
                Some(index) if index < run.groups.len() => index,
                _ => break,
            };
            if !run.completed_groups.contains(&index) {
                let results = self
                    .measure_group(&run.groups[index], &run.endpoints)
                    .await;
                run.results.extend(results.iter().map(|(uid, entry)| (*uid, *entry)));
                run.completed_groups.insert(index);
                self.metrics.record_benchmark_group();

                let version = self.publish(run.term, &run.results).await;
                publish_pending = version.is_none();
                info!(
                    "Benchmarked group {}/{} of term {}: {:?}",
                    index + 1,
                    run.groups.len(),
                    run.term,
                    group_summary(&results)
                );
                let event = BenchmarkEvent::GroupMeasured {
                    term: run.term,
                    group_index: index,
                    results,
                    version,
                };
                if self.events.send(event).await.is_err() {
                    return;
                }
            }

            // next group opens with a later block
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        if publish_pending {
            if let Some(version) = self.publish(run.term, &run.results).await {
                let event = BenchmarkEvent::GroupMeasured {
                    term: run.term,
                    group_index: run.completed_groups.last().copied().unwrap_or_default(),
                    results: BenchmarkResults::new(),
                    version: Some(version),
                };
                if self.events.send(event).await.is_err() {
                    return;
                }
            }
        }
        info!(
            "Benchmark for term {} finished, {} workers recorded",
            run.term,
            run.results.len()
        );
        let _ = self
            .events
            .send(BenchmarkEvent::Finished { term: run.term })
            .await;
    }

    /// Probes every worker of `group` at once. Workers that fail, send the
    /// wrong payload or miss the timeout are recorded as unmeasured.
    async fn measure_group(
        &self,
        group: &Group,
        endpoints: &HashMap<Uid, SocketAddr>,
    ) -> BenchmarkResults {
        let timeout = Duration::from_secs(self.config.probe_timeout_secs());
        let request = BenchmarkRequest {
            shape: self.config.benchmark_shape.clone(),
        };

        let probes = group.iter().map(|uid| {
            let request = &request;
            async move {
                let Some(endpoint) = endpoints.get(uid) else {
                    debug!("No endpoint known for worker {uid}");
                    return (*uid, BenchmarkEntry::Unmeasured);
                };
                let started = Instant::now();
                let outcome =
                    tokio::time::timeout(timeout, self.prober.probe(*endpoint, request, self.uid))
                        .await;
                let entry = match outcome {
                    Ok(Ok(size_bytes)) => BenchmarkEntry::Measured {
                        elapsed_secs: started.elapsed().as_secs_f64(),
                        size_bytes,
                    },
                    Ok(Err(e)) => {
                        debug!("Probe of worker {uid} failed: {e:#}");
                        BenchmarkEntry::Unmeasured
                    }
                    Err(_) => {
                        debug!("Probe of worker {uid} timed out after {timeout:?}");
                        BenchmarkEntry::Unmeasured
                    }
                };
                let elapsed = match entry {
                    BenchmarkEntry::Measured { elapsed_secs, .. } => Some(elapsed_secs),
                    BenchmarkEntry::Unmeasured => None,
                };
                self.metrics.record_probe(elapsed);
                (*uid, entry)
            }
        });

        join_all(probes).await.into_iter().collect()
    }

    async fn publish(&self, term: u64, results: &BenchmarkResults) -> Option<String> {
        match publish_json(
            self.artifacts.as_ref(),
            &benchmark_artifact_name(self.uid),
            &benchmark_artifact_key(term),
            results,
        )
        .await
        {
            Ok(version) => {
                debug!("Published benchmark results for term {term} as {version}");
                Some(version)
            }
            Err(e) => {
                warn!("Failed to publish benchmark results for term {term}: {e:#}");
                self.metrics.record_error("benchmark_publish");
                None
            }
        }
    }
}

fn group_summary(results: &BenchmarkResults) -> Vec<(Uid, Option<f64>)> {
    results
        .iter()
        .map(|(uid, entry)| (*uid, entry.throughput()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::probe::{MockProbe, MockProber};
    use super::*;
    use shared::artifacts::{fetch_json, MockArtifactStore};
    use shared::ledger::MockLedger;
    use shared::models::benchmark::BenchmarkShape;

    const BLOCK_TIME: Duration = Duration::from_secs(12);

    fn config() -> TermConfig {
        TermConfig {
            blocks_per_term: 100,
            blocks_share_seed: 5,
            blocks_start_benchmark: 10,
            blocks_per_group: 10,
            blocks_seedhash_start: 40,
            blocks_seedhash_end: 50,
            benchmark_shape: BenchmarkShape(vec![2, 8]),
            ..Default::default()
        }
    }

    fn endpoint(uid: Uid) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, uid as u8], 8091))
    }

    fn produce_blocks(ledger: Arc<MockLedger>, from: u64) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut height = from;
            loop {
                tokio::time::sleep(BLOCK_TIME).await;
                height += 1;
                ledger.set_block_height(height);
            }
        })
    }

    struct Harness {
        ledger: Arc<MockLedger>,
        store: MockArtifactStore,
        prober: MockProber,
        term_tx: watch::Sender<u64>,
        events: mpsc::Receiver<BenchmarkEvent>,
        orchestrator: BenchmarkOrchestrator,
    }

    fn harness(height: u64, term: u64) -> Harness {
        let ledger = Arc::new(MockLedger::new(height));
        let store = MockArtifactStore::new();
        let prober = MockProber::new();
        let (term_tx, term_rx) = watch::channel(term);
        let (events_tx, events) = mpsc::channel(16);
        let orchestrator = BenchmarkOrchestrator::new(
            42,
            Arc::new(config()),
            ledger.clone(),
            Arc::new(store.clone()),
            Arc::new(prober.clone()),
            events_tx,
            term_rx,
            MetricsContext::new("benchmark-test".to_string()),
        );
        Harness {
            ledger,
            store,
            prober,
            term_tx,
            events,
            orchestrator,
        }
    }

    fn run_for(term: u64, groups: Vec<Group>) -> BenchmarkRun {
        let endpoints = groups
            .iter()
            .flatten()
            .map(|uid| (*uid, endpoint(*uid)))
            .collect();
        BenchmarkRun {
            term,
            groups,
            endpoints,
            results: BenchmarkResults::new(),
            completed_groups: BTreeSet::new(),
        }
    }

    #[test]
    fn test_group_index_follows_offset() {
        let config = TermConfig {
            blocks_per_term: 100,
            blocks_start_benchmark: 40,
            blocks_per_group: 10,
            blocks_seedhash_start: 60,
            blocks_seedhash_end: 80,
            ..Default::default()
        };
        assert_eq!(group_index(55, &config), Some(1));
        assert_eq!(group_index(40, &config), Some(0));
        assert_eq!(group_index(39, &config), None);
        assert_eq!(group_index(60, &config), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_groups_are_probed_in_their_windows() {
        let mut h = harness(10, 0);
        h.prober
            .set_probe(
                endpoint(1),
                MockProbe::Respond {
                    delay: Duration::from_secs(2),
                    size_bytes: 64,
                },
            )
            .await;
        h.prober.set_probe(endpoint(2), MockProbe::Hang).await;
        h.prober.set_probe(endpoint(3), MockProbe::Fail).await;
        h.prober
            .set_probe(
                endpoint(4),
                MockProbe::Respond {
                    delay: Duration::from_secs(1),
                    size_bytes: 64,
                },
            )
            .await;

        let started = Instant::now();
        let blocks = produce_blocks(h.ledger.clone(), 10);
        let task = h.orchestrator.spawn(run_for(0, vec![vec![1, 2], vec![3, 4]]));

        let (group_index, results, version) = match h.events.recv().await.unwrap() {
            BenchmarkEvent::GroupMeasured {
                group_index,
                results,
                version,
                ..
            } => (group_index, results, version),
            other => panic!("expected a measured group, got {other:?}"),
        };
        assert_eq!(group_index, 0);
        assert_eq!(version.as_deref(), Some("v0"));
        match results[&1] {
            BenchmarkEntry::Measured {
                elapsed_secs,
                size_bytes,
            } => {
                assert!((elapsed_secs - 2.0).abs() < 0.01);
                assert_eq!(size_bytes, 64);
            }
            BenchmarkEntry::Unmeasured => panic!("worker 1 answered"),
        }
        assert_eq!(results[&2], BenchmarkEntry::Unmeasured);

        let second = h.events.recv().await.unwrap();
        assert!(matches!(
            second,
            BenchmarkEvent::GroupMeasured { group_index: 1, .. }
        ));
        assert_eq!(
            h.events.recv().await.unwrap(),
            BenchmarkEvent::Finished { term: 0 }
        );
        task.await.unwrap();
        blocks.abort();

        // group 1 opens at offset 20, ten blocks after the start
        let calls = h.prober.calls().await;
        let group_two_start = calls
            .iter()
            .filter(|(addr, _)| *addr == endpoint(3) || *addr == endpoint(4))
            .map(|(_, at)| at.duration_since(started))
            .min()
            .unwrap();
        assert!(group_two_start >= BLOCK_TIME * 10);
        assert_eq!(calls.len(), 4);

        let published: BenchmarkResults = fetch_json(
            &h.store,
            &benchmark_artifact_name(42),
            &benchmark_artifact_key(0),
            "v1",
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(published.len(), 4);
        assert_eq!(published[&3], BenchmarkEntry::Unmeasured);
        assert!(published[&4].throughput().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_term_changes() {
        let mut h = harness(10, 0);
        for uid in 1..=4 {
            h.prober
                .set_probe(
                    endpoint(uid),
                    MockProbe::Respond {
                        delay: Duration::from_millis(200),
                        size_bytes: 64,
                    },
                )
                .await;
        }
        let blocks = produce_blocks(h.ledger.clone(), 10);
        let task = h.orchestrator.spawn(run_for(0, vec![vec![1, 2], vec![3, 4]]));

        assert!(matches!(
            h.events.recv().await.unwrap(),
            BenchmarkEvent::GroupMeasured { group_index: 0, .. }
        ));
        h.term_tx.send(1).unwrap();
        task.await.unwrap();
        blocks.abort();

        assert!(h.events.try_recv().is_err());
        assert_eq!(h.prober.calls().await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_skips_completed_groups() {
        let mut h = harness(12, 0);
        for uid in 1..=4 {
            h.prober
                .set_probe(
                    endpoint(uid),
                    MockProbe::Respond {
                        delay: Duration::from_millis(100),
                        size_bytes: 64,
                    },
                )
                .await;
        }
        let mut run = run_for(0, vec![vec![1, 2], vec![3, 4]]);
        run.completed_groups.insert(0);
        run.results.insert(1, BenchmarkEntry::Unmeasured);
        run.results.insert(2, BenchmarkEntry::Unmeasured);

        let blocks = produce_blocks(h.ledger.clone(), 12);
        let task = h.orchestrator.spawn(run);

        match h.events.recv().await.unwrap() {
            BenchmarkEvent::GroupMeasured {
                group_index,
                results,
                ..
            } => {
                assert_eq!(group_index, 1);
                assert_eq!(results.keys().copied().collect::<Vec<_>>(), vec![3, 4]);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(
            h.events.recv().await.unwrap(),
            BenchmarkEvent::Finished { term: 0 }
        ));
        task.await.unwrap();
        blocks.abort();

        let probed: BTreeSet<SocketAddr> =
            h.prober.calls().await.into_iter().map(|(addr, _)| addr).collect();
        assert_eq!(probed, BTreeSet::from([endpoint(3), endpoint(4)]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_groups_finishes_immediately() {
        let mut h = harness(15, 0);
        let task = h.orchestrator.spawn(run_for(0, Vec::new()));
        assert_eq!(
            h.events.recv().await.unwrap(),
            BenchmarkEvent::Finished { term: 0 }
        );
        task.await.unwrap();
    }
}
