use anyhow::{bail, Context as _, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

pub mod redis;

pub use self::redis::RedisArtifactStore;

/// Versioned storage for payloads too large to put on the ledger.
///
/// Versions are allocated per artifact `name`; each version holds the `key`
/// it was published under.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Stores `data` and returns the version handle it can be fetched with.
    async fn publish_artifact(&self, name: &str, key: &str, data: &str) -> Result<String>;

    /// Returns `None` when no such version/key exists.
    async fn fetch_artifact(&self, name: &str, key: &str, version: &str)
        -> Result<Option<String>>;
}

pub async fn publish_json<T: Serialize + Sync>(
    store: &dyn ArtifactStore,
    name: &str,
    key: &str,
    value: &T,
) -> Result<String> {
    let data = serde_json::to_string(value)
        .with_context(|| format!("failed to serialize artifact {name}/{key}"))?;
    store.publish_artifact(name, key, &data).await
}

pub async fn fetch_json<T: DeserializeOwned>(
    store: &dyn ArtifactStore,
    name: &str,
    key: &str,
    version: &str,
) -> Result<Option<T>> {
    match store.fetch_artifact(name, key, version).await? {
        Some(data) => {
            let value = serde_json::from_str(&data)
                .with_context(|| format!("malformed artifact {name}/{key}:{version}"))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

#[derive(Clone, Default)]
pub struct MockArtifactStore {
    // name -> versions, each version is (key, data)
    artifacts: Arc<Mutex<HashMap<String, Vec<(String, String)>>>>,
    fail: Arc<AtomicBool>,
}

impl MockArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub async fn version_count(&self, name: &str) -> usize {
        self.artifacts
            .lock()
            .await
            .get(name)
            .map(Vec::len)
            .unwrap_or_default()
    }
}

#[async_trait]
impl ArtifactStore for MockArtifactStore {
    async fn publish_artifact(&self, name: &str, key: &str, data: &str) -> Result<String> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("artifact store unavailable");
        }
        let mut artifacts = self.artifacts.lock().await;
        let versions = artifacts.entry(name.to_string()).or_default();
        versions.push((key.to_string(), data.to_string()));
        Ok(format!("v{}", versions.len() - 1))
    }

    async fn fetch_artifact(
        &self,
        name: &str,
        key: &str,
        version: &str,
    ) -> Result<Option<String>> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("artifact store unavailable");
        }
        let Some(index) = version
            .strip_prefix('v')
            .and_then(|v| v.parse::<usize>().ok())
        else {
            return Ok(None);
        };
        let artifacts = self.artifacts.lock().await;
        Ok(artifacts
            .get(name)
            .and_then(|versions| versions.get(index))
            .filter(|(stored_key, _)| stored_key == key)
            .map(|(_, data)| data.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::artifact::StateBundle;

    #[tokio::test]
    async fn test_versions_are_per_name() {
        let store = MockArtifactStore::new();
        let v0 = store.publish_artifact("state-1", "4", "a").await.unwrap();
        let v1 = store.publish_artifact("state-1", "5", "b").await.unwrap();
        let other = store.publish_artifact("state-2", "4", "c").await.unwrap();
        assert_eq!((v0.as_str(), v1.as_str(), other.as_str()), ("v0", "v1", "v0"));

        assert_eq!(
            store.fetch_artifact("state-1", "5", "v1").await.unwrap(),
            Some("b".to_string())
        );
        // right version, wrong key
        assert_eq!(store.fetch_artifact("state-1", "5", "v0").await.unwrap(), None);
        assert_eq!(store.fetch_artifact("state-1", "4", "latest").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let store = MockArtifactStore::new();
        let bundle = StateBundle::new(2, 17, vec![vec![1, 2, 3, 4], vec![5]]).unwrap();
        let version = publish_json(&store, "state-8", "2", &bundle).await.unwrap();
        let fetched: Option<StateBundle> = fetch_json(&store, "state-8", "2", &version)
            .await
            .unwrap();
        assert_eq!(fetched, Some(bundle));

        store.set_fail(true);
        assert!(fetch_json::<StateBundle>(&store, "state-8", "2", &version)
            .await
            .is_err());
    }
}
