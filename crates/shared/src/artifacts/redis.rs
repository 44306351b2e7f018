use super::ArtifactStore;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::{debug, info};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use redis::{AsyncConnectionConfig, Client};
use std::time::Duration;

const ARTIFACT_KEY_PREFIX: &str = "artifact";
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Artifact store backed by a redis instance reachable by all validators.
#[derive(Clone)]
pub struct RedisArtifactStore {
    client: Client,
    connection_config: AsyncConnectionConfig,
}

impl RedisArtifactStore {
    pub fn new(redis_url: &str) -> Result<Self> {
        Self::with_timeouts(redis_url, CONNECTION_TIMEOUT, RESPONSE_TIMEOUT)
    }

    pub fn with_timeouts(redis_url: &str, connect: Duration, response: Duration) -> Result<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| anyhow!("invalid artifact store url {redis_url}: {e}"))?;
        info!("Using redis artifact store at {redis_url}");
        let connection_config = AsyncConnectionConfig::new()
            .set_connection_timeout(connect)
            .set_response_timeout(response);
        Ok(Self {
            client,
            connection_config,
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection_with_config(&self.connection_config)
            .await
            .map_err(|e| anyhow!("failed to connect to artifact store: {e}"))
    }

    fn version_counter_key(name: &str) -> String {
        format!("{ARTIFACT_KEY_PREFIX}:{name}:version")
    }

    fn data_key(name: &str, version: &str, key: &str) -> String {
        format!("{ARTIFACT_KEY_PREFIX}:{name}:{version}:{key}")
    }
}

#[async_trait]
impl ArtifactStore for RedisArtifactStore {
    async fn publish_artifact(&self, name: &str, key: &str, data: &str) -> Result<String> {
        let mut con = self.connection().await?;
        let next: u64 = con
            .incr(Self::version_counter_key(name), 1)
            .await
            .map_err(|e| anyhow!("failed to allocate version for {name}: {e}"))?;
        let version = format!("v{}", next - 1);
        con.set::<_, _, ()>(Self::data_key(name, &version, key), data)
            .await
            .map_err(|e| anyhow!("failed to store {name}/{key}: {e}"))?;
        debug!("Stored artifact {name}/{key} as {version}");
        Ok(version)
    }

    async fn fetch_artifact(
        &self,
        name: &str,
        key: &str,
        version: &str,
    ) -> Result<Option<String>> {
        let mut con = self.connection().await?;
        let data: Option<String> = con
            .get(Self::data_key(name, version, key))
            .await
            .map_err(|e| anyhow!("failed to fetch {name}/{key}:{version}: {e}"))?;
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(
            RedisArtifactStore::version_counter_key("state-3"),
            "artifact:state-3:version"
        );
        assert_eq!(
            RedisArtifactStore::data_key("benchmark-3", "v2", "benchmark-10"),
            "artifact:benchmark-3:v2:benchmark-10"
        );
    }

    #[tokio::test]
    async fn test_unresponsive_server_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // accept and hold connections without ever replying
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let store = RedisArtifactStore::with_timeouts(
            &format!("redis://{addr}"),
            Duration::from_millis(200),
            Duration::from_millis(200),
        )
        .unwrap();
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            store.fetch_artifact("state-3", "state-12", "v0"),
        )
        .await
        .expect("fetch should give up before the outer deadline");
        assert!(result.is_err());
        server.abort();
    }
}
