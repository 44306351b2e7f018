use super::SeedStore;
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use log::info;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands as _, AsyncConnectionConfig, Client};
use shared::models::network::Uid;
use std::time::Duration;

// a seed is only needed until the term after the one it was committed in
const SEED_TTL_SECS: u64 = 7 * 24 * 60 * 60;
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct RedisSeedStore {
    pub client: Client,
    connection_config: AsyncConnectionConfig,
}

impl RedisSeedStore {
    pub fn new(redis_url: &str) -> Result<Self> {
        Self::with_timeouts(redis_url, CONNECTION_TIMEOUT, RESPONSE_TIMEOUT)
    }

    pub fn with_timeouts(redis_url: &str, connect: Duration, response: Duration) -> Result<Self> {
        let client = Client::open(redis_url)
            .with_context(|| format!("invalid redis url {redis_url}"))?;
        info!("Using Redis seed store at {redis_url}");
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
            .context("failed to connect to redis")
    }
}

pub(crate) fn seed_key(uid: Uid, term: u64) -> String {
    format!("validator:{uid}:seed:{term}")
}

#[async_trait]
impl SeedStore for RedisSeedStore {
    async fn load_seed(&self, uid: Uid, term: u64) -> Result<Option<u64>> {
        let mut con = self.connection().await?;
        let seed: Option<u64> = con.get(seed_key(uid, term)).await?;
        Ok(seed)
    }

    async fn save_seed(&self, uid: Uid, term: u64, seed: u64) -> Result<()> {
        let mut con = self.connection().await?;
        let _: () = con.set_ex(seed_key(uid, term), seed, SEED_TTL_SECS).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_key_layout() {
        assert_eq!(seed_key(12, 340), "validator:12:seed:340");
    }

    #[test]
    fn test_rejects_bad_url() {
        assert!(RedisSeedStore::new("not a url").is_err());
    }

    #[tokio::test]
    async fn test_silent_server_fails_seed_calls() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let store = RedisSeedStore::with_timeouts(
            &format!("redis://{addr}"),
            Duration::from_millis(200),
            Duration::from_millis(200),
        )
        .unwrap();
        let deadline = Duration::from_secs(5);
        let load = tokio::time::timeout(deadline, store.load_seed(12, 340))
            .await
            .expect("load should give up before the outer deadline");
        assert!(load.is_err());
        let save = tokio::time::timeout(deadline, store.save_seed(12, 340, 7))
            .await
            .expect("save should give up before the outer deadline");
        assert!(save.is_err());
        server.abort();
    }
}
