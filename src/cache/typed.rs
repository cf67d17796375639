//! Typed views over [`Cache`] for the two cached facts.

use super::Cache;
use crate::Result;
use crate::types::KeyId;
use std::sync::Arc;

const TAKEN_ACCOUNT_NAME_SET: &str = "taken_account_name_set";

/// Set of account names known to be registered
#[derive(Clone)]
pub struct TakenAccountNameCache {
    cache: Arc<dyn Cache>,
}

impl TakenAccountNameCache {
    /// Wrap a cache backend
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    /// Record `name` as taken
    pub async fn add(&self, name: &str) -> Result<()> {
        self.cache.set_add(TAKEN_ACCOUNT_NAME_SET, name).await
    }

    /// Whether `name` is known to be taken (a miss proves nothing)
    pub async fn contains(&self, name: &str) -> Result<bool> {
        self.cache.set_contains(TAKEN_ACCOUNT_NAME_SET, name).await
    }
}

/// Base64 public keys by signing key id
#[derive(Clone)]
pub struct TokenPublicKeyCache {
    cache: Arc<dyn Cache>,
}

impl TokenPublicKeyCache {
    /// Wrap a cache backend
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    fn key(id: KeyId) -> String {
        format!("token_public_key:{id}")
    }

    /// Cached public key for `id`
    pub async fn get(&self, id: KeyId) -> Result<Option<String>> {
        self.cache.get(&Self::key(id)).await
    }

    /// Cache a public key; public keys never change so there is no expiry
    pub async fn set(&self, id: KeyId, public_key: &str) -> Result<()> {
        self.cache
            .set(&Self::key(id), public_key.to_string(), None)
            .await
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;

    #[tokio::test]
    async fn typed_caches_share_one_backend_without_collisions() {
        let backend: Arc<dyn Cache> = Arc::new(InMemoryCache::new());
        let names = TakenAccountNameCache::new(backend.clone());
        let keys = TokenPublicKeyCache::new(backend.clone());

        names.add("alice").await.unwrap();
        keys.set(KeyId(1), "cHVibGlj").await.unwrap();

        assert!(names.contains("alice").await.unwrap());
        assert_eq!(keys.get(KeyId(1)).await.unwrap().as_deref(), Some("cHVibGlj"));
        assert!(keys.get(KeyId(2)).await.unwrap().is_none());
        assert_eq!(
            backend.get("token_public_key:1").await.unwrap().as_deref(),
            Some("cHVibGlj")
        );
    }
}
