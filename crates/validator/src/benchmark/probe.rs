use anyhow::{bail, Context as _, Result};
use async_trait::async_trait;
use shared::models::benchmark::{BenchmarkRequest, WorkerStatus, VALIDATOR_UID_HEADER};
use shared::models::network::Uid;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client side of the worker probe protocol. Implementations bound at most
/// connection setup; callers bound every call.
#[async_trait]
pub trait WorkerProber: Send + Sync {
    /// Requests the synthetic payload and returns the number of bytes
    /// received. A payload of the wrong size is an error.
    async fn probe(
        &self,
        endpoint: SocketAddr,
        request: &BenchmarkRequest,
        validator_uid: Uid,
    ) -> Result<u64>;

    async fn status(&self, endpoint: SocketAddr, validator_uid: Uid) -> Result<WorkerStatus>;
}

pub struct HttpWorkerProber {
    client: reqwest::Client,
}

impl HttpWorkerProber {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .context("failed to build worker client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WorkerProber for HttpWorkerProber {
    async fn probe(
        &self,
        endpoint: SocketAddr,
        request: &BenchmarkRequest,
        validator_uid: Uid,
    ) -> Result<u64> {
        let url = format!("http://{endpoint}/benchmark");
        let response = self
            .client
            .post(&url)
            .header(VALIDATOR_UID_HEADER, validator_uid.to_string())
            .json(request)
            .send()
            .await
            .with_context(|| format!("benchmark request to {endpoint} failed"))?
            .error_for_status()?;
        let payload = response.bytes().await?;

        let Some(expected) = request.shape.payload_bytes() else {
            bail!("shape {} has no valid payload size", request.shape);
        };
        let received = payload.len() as u64;
        if received != expected {
            bail!("worker {endpoint} sent {received} bytes, expected {expected}");
        }
        Ok(received)
    }

    async fn status(&self, endpoint: SocketAddr, validator_uid: Uid) -> Result<WorkerStatus> {
        let url = format!("http://{endpoint}/status");
        let status = self
            .client
            .get(&url)
            .header(VALIDATOR_UID_HEADER, validator_uid.to_string())
            .send()
            .await
            .with_context(|| format!("status request to {endpoint} failed"))?
            .error_for_status()?
            .json::<WorkerStatus>()
            .await?;
        Ok(status)
    }
}

#[derive(Debug, Clone)]
pub enum MockProbe {
    Respond { delay: Duration, size_bytes: u64 },
    Fail,
    /// Never answers.
    Hang,
}

/// Scripted prober keyed by worker endpoint. Unknown endpoints fail.
#[derive(Clone, Default)]
pub struct MockProber {
    probes: Arc<Mutex<HashMap<SocketAddr, MockProbe>>>,
    statuses: Arc<Mutex<HashMap<SocketAddr, WorkerStatus>>>,
    calls: Arc<Mutex<Vec<(SocketAddr, Instant)>>>,
}

impl MockProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_probe(&self, endpoint: SocketAddr, probe: MockProbe) {
        self.probes.lock().await.insert(endpoint, probe);
    }

    pub async fn set_status(&self, endpoint: SocketAddr, status: WorkerStatus) {
        self.statuses.lock().await.insert(endpoint, status);
    }

    /// Every probe dispatched so far with the time it was sent.
    pub async fn calls(&self) -> Vec<(SocketAddr, Instant)> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl WorkerProber for MockProber {
    async fn probe(
        &self,
        endpoint: SocketAddr,
        _request: &BenchmarkRequest,
        _validator_uid: Uid,
    ) -> Result<u64> {
        self.calls.lock().await.push((endpoint, Instant::now()));
        let probe = self.probes.lock().await.get(&endpoint).cloned();
        match probe {
            Some(MockProbe::Respond { delay, size_bytes }) => {
                tokio::time::sleep(delay).await;
                Ok(size_bytes)
            }
            Some(MockProbe::Hang) => std::future::pending().await,
            Some(MockProbe::Fail) | None => bail!("worker {endpoint} refused the probe"),
        }
    }

    async fn status(&self, endpoint: SocketAddr, _validator_uid: Uid) -> Result<WorkerStatus> {
        match self.statuses.lock().await.get(&endpoint) {
            Some(status) => Ok(status.clone()),
            None => bail!("worker {endpoint} did not answer"),
        }
    }
}
