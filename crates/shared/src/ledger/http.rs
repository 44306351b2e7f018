use super::Ledger;
use crate::models::commitment::{Commitment, CommitmentRecord};
use crate::models::network::Uid;
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use log::debug;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
struct BlockResponse {
    block: u64,
}

#[derive(Debug, Serialize)]
struct WeightsRequest<'a> {
    uids: Vec<Uid>,
    weights: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<&'a str>,
}

/// Client for a ledger exposed through a JSON commitment API.
#[derive(Clone)]
pub struct HttpLedger {
    base_url: Url,
    client: reqwest::Client,
}

impl HttpLedger {
    pub fn new(base_url: Url) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build ledger client")?;
        Ok(Self { base_url, client })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("invalid ledger path {path}"))
    }
}

#[async_trait]
impl Ledger for HttpLedger {
    async fn read_block_height(&self) -> Result<u64> {
        let response = self
            .client
            .get(self.endpoint("block")?)
            .send()
            .await
            .context("failed to read block height")?
            .error_for_status()?;
        let body: BlockResponse = response.json().await.context("invalid block payload")?;
        Ok(body.block)
    }

    async fn publish_commitment(&self, uid: Uid, commitment: &Commitment) -> Result<()> {
        self.client
            .post(self.endpoint(&format!("commit/{uid}"))?)
            .json(commitment)
            .send()
            .await
            .with_context(|| format!("failed to publish {commitment}"))?
            .error_for_status()
            .with_context(|| format!("ledger rejected {commitment}"))?;
        debug!("Published {commitment} as {uid}");
        Ok(())
    }

    async fn read_commitment(&self, uid: Uid) -> Result<Option<CommitmentRecord>> {
        let response = self
            .client
            .get(self.endpoint(&format!("commit/{uid}"))?)
            .send()
            .await
            .with_context(|| format!("failed to read commitment of {uid}"))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let record = response
            .error_for_status()?
            .json::<CommitmentRecord>()
            .await
            .with_context(|| format!("invalid commitment payload from {uid}"))?;
        Ok(Some(record))
    }

    async fn set_weights(&self, uid: Uid, weights: &[(Uid, f64)]) -> Result<()> {
        let request = WeightsRequest {
            uids: weights.iter().map(|(uid, _)| *uid).collect(),
            weights: weights.iter().map(|(_, w)| *w).collect(),
            version: Some(crate::protocol::PROTOCOL_VERSION),
        };
        self.client
            .post(self.endpoint(&format!("weights/{uid}"))?)
            .json(&request)
            .send()
            .await
            .context("failed to set weights")?
            .error_for_status()
            .context("ledger rejected weights")?;
        Ok(())
    }
}
