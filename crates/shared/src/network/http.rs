use super::NetworkSource;
use crate::models::network::NetworkSnapshot;
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use std::time::Duration;
use url::Url;

/// Reads the network snapshot from `GET {base}/metagraph`.
#[derive(Clone)]
pub struct HttpNetworkSource {
    url: Url,
    client: reqwest::Client,
}

impl HttpNetworkSource {
    pub fn new(base_url: &Url) -> Result<Self> {
        let url = base_url.join("metagraph").context("invalid metagraph url")?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build metagraph client")?;
        Ok(Self { url, client })
    }
}

#[async_trait]
impl NetworkSource for HttpNetworkSource {
    async fn snapshot(&self) -> Result<NetworkSnapshot> {
        let snapshot = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .context("failed to fetch metagraph")?
            .error_for_status()?
            .json::<NetworkSnapshot>()
            .await
            .context("invalid metagraph payload")?;
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_snapshot() {
        let mut server = mockito::Server::new_async().await;
        let body = serde_json::json!({
            "block": 812,
            "neurons": [
                {"uid": 0, "stake": 12000.0, "ip": "10.1.0.1", "port": 8091},
                {"uid": 1, "stake": 0.5, "ip": "10.1.0.2", "port": 8091},
            ]
        });
        server
            .mock("GET", "/metagraph")
            .with_status(200)
            .with_body(body.to_string())
            .create_async()
            .await;

        let base = Url::parse(&format!("{}/", server.url())).unwrap();
        let snapshot = HttpNetworkSource::new(&base).unwrap().snapshot().await.unwrap();
        assert_eq!(snapshot.block, 812);
        assert_eq!(snapshot.validator_uids(10.0), vec![0]);
        assert_eq!(snapshot.neuron(1).unwrap().port, 8091);
    }
}
