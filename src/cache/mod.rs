//! Non-authoritative cache used cache-aside by accounts and token verification
//!
//! The database is always the source of truth. Every cache failure is logged
//! at warn and the caller falls back to the database.

use crate::Result;
use async_trait::async_trait;
use std::time::Duration;

mod memory;
mod typed;

pub use memory::InMemoryCache;
pub use typed::{TakenAccountNameCache, TokenPublicKeyCache};

/// Key/value and set operations needed by the typed caches
#[async_trait]
pub trait Cache: Send + Sync {
    /// Fetch a string value; `None` on miss or expiry
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a string value, optionally expiring after `ttl`
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;

    /// Add `member` to the set stored at `key`
    async fn set_add(&self, key: &str, member: &str) -> Result<()>;

    /// Check membership in the set stored at `key`
    async fn set_contains(&self, key: &str, member: &str) -> Result<bool>;
}
