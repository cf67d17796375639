//! Signed session tokens with rotating Ed25519 keys.
//!
//! Token layout: `base64url(claims_json) "." base64url(signature)`, where the
//! signature covers the encoded claims. Claims carry the account id, the
//! expiry in unix milliseconds and the id of the signing key.
//!
//! Only the public half of each key pair is persisted. The private half lives
//! in this process until the key is rotated out.

use crate::cache::TokenPublicKeyCache;
use crate::config::TokenConfig;
use crate::db::Database;
use crate::types::{AccountId, KeyId, SessionToken};
use crate::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use chrono::{DateTime, SubsecRound, TimeZone, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: i64,
    exp: i64,
    kid: i64,
}

struct ActiveKey {
    id: KeyId,
    signing_key: SigningKey,
    rotate_at: DateTime<Utc>,
}

/// Issues and verifies session tokens
pub struct TokenManager {
    db: Database,
    cache: TokenPublicKeyCache,
    expires_in: chrono::Duration,
    regenerate_before_expiry: chrono::Duration,
    active: Mutex<Option<ActiveKey>>,
}

impl TokenManager {
    /// Create a manager; the first token request generates the first key
    pub fn new(db: Database, cache: TokenPublicKeyCache, config: &TokenConfig) -> Result<Self> {
        let expires_in = chrono::Duration::from_std(config.expires_in)
            .map_err(|e| Error::config("auth.token.expires_in", e.to_string()))?;
        let regenerate_before_expiry = chrono::Duration::from_std(config.regenerate_before_expiry)
            .map_err(|e| Error::config("auth.token.regenerate_before_expiry", e.to_string()))?;

        if regenerate_before_expiry >= expires_in {
            return Err(Error::config(
                "auth.token.regenerate_before_expiry",
                "must be shorter than auth.token.expires_in",
            ));
        }

        Ok(Self {
            db,
            cache,
            expires_in,
            regenerate_before_expiry,
            active: Mutex::new(None),
        })
    }

    /// Mint a token for `account_id`
    pub async fn get_token(&self, account_id: AccountId) -> Result<SessionToken> {
        self.get_token_at(account_id, Utc::now()).await
    }

    /// Verify a token and return its account id and expiry
    ///
    /// Every failure is reported as [`Error::Unauthenticated`].
    pub async fn verify(&self, token: &str) -> Result<(AccountId, DateTime<Utc>)> {
        self.verify_at(token, Utc::now()).await
    }

    pub(crate) async fn get_token_at(
        &self,
        account_id: AccountId,
        now: DateTime<Utc>,
    ) -> Result<SessionToken> {
        let mut active = self.active.lock().await;

        let needs_rotation = match active.as_ref() {
            None => true,
            Some(key) => now + self.regenerate_before_expiry >= key.rotate_at,
        };
        if needs_rotation {
            *active = Some(self.generate_key(now).await?);
        }

        let Some(key) = active.as_ref() else {
            return Err(Error::Other("no active signing key".into()));
        };

        // Claims carry millisecond precision
        let expires_at = (now + self.expires_in).trunc_subsecs(3);
        let claims = Claims {
            sub: account_id.get(),
            exp: expires_at.timestamp_millis(),
            kid: key.id.get(),
        };

        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?);
        let signature = key.signing_key.sign(payload.as_bytes());
        let token = format!("{payload}.{}", URL_SAFE_NO_PAD.encode(signature.to_bytes()));

        Ok(SessionToken { token, expires_at })
    }

    pub(crate) async fn verify_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<(AccountId, DateTime<Utc>)> {
        let (payload, signature) = token
            .split_once('.')
            .ok_or_else(|| unauthenticated("malformed token"))?;

        let claims: Claims = URL_SAFE_NO_PAD
            .decode(payload)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .ok_or_else(|| unauthenticated("malformed token claims"))?;

        let signature: [u8; 64] = URL_SAFE_NO_PAD
            .decode(signature)
            .ok()
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| unauthenticated("malformed token signature"))?;
        let signature = Signature::from_bytes(&signature);

        let verifying_key = self.public_key(KeyId(claims.kid)).await?;
        verifying_key
            .verify_strict(payload.as_bytes(), &signature)
            .map_err(|_| unauthenticated("invalid token signature"))?;

        let expires_at = Utc
            .timestamp_millis_opt(claims.exp)
            .single()
            .ok_or_else(|| unauthenticated("invalid token expiry"))?;
        if expires_at <= now {
            return Err(unauthenticated("token expired"));
        }

        Ok((AccountId(claims.sub), expires_at))
    }

    async fn generate_key(&self, now: DateTime<Utc>) -> Result<ActiveKey> {
        let signing_key = SigningKey::generate(&mut OsRng);
        let public_key = STANDARD.encode(signing_key.verifying_key().as_bytes());

        let id = self.db.insert_token_public_key(&public_key).await?;

        if let Err(e) = self.cache.set(id, &public_key).await {
            tracing::warn!(key_id = %id, error = %e, "failed to cache token public key");
        }

        tracing::info!(key_id = %id, "generated token signing key");

        Ok(ActiveKey {
            id,
            signing_key,
            rotate_at: now + self.expires_in,
        })
    }

    /// Resolve a public key cache-then-database, repopulating the cache on a miss
    async fn public_key(&self, id: KeyId) -> Result<VerifyingKey> {
        let cached = match self.cache.get(id).await {
            Ok(cached) => cached,
            Err(e) => {
                tracing::warn!(key_id = %id, error = %e, "token public key cache unavailable, falling back to database");
                None
            }
        };

        let encoded = match cached {
            Some(encoded) => encoded,
            None => {
                let stored = self.db.get_token_public_key(id).await.map_err(|e| {
                    tracing::error!(key_id = %id, error = %e, "failed to load token public key");
                    unauthenticated("signing key unavailable")
                })?;
                let encoded = stored.ok_or_else(|| unauthenticated("unknown signing key"))?;

                if let Err(e) = self.cache.set(id, &encoded).await {
                    tracing::warn!(key_id = %id, error = %e, "failed to cache token public key");
                }
                encoded
            }
        };

        let bytes: [u8; 32] = STANDARD
            .decode(&encoded)
            .ok()
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| unauthenticated("corrupt signing key"))?;

        VerifyingKey::from_bytes(&bytes).map_err(|_| unauthenticated("corrupt signing key"))
    }
}

fn unauthenticated(reason: &str) -> Error {
    Error::Unauthenticated(reason.to_string())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Cache, InMemoryCache};
    use crate::test_helpers::{FailingCache, create_test_db};
    use std::sync::Arc;
    use std::time::Duration;

    fn token_config(expires_secs: u64, regenerate_secs: u64) -> TokenConfig {
        TokenConfig {
            expires_in: Duration::from_secs(expires_secs),
            regenerate_before_expiry: Duration::from_secs(regenerate_secs),
        }
    }

    fn manager(db: Database, backend: Arc<dyn Cache>, config: &TokenConfig) -> TokenManager {
        TokenManager::new(db, TokenPublicKeyCache::new(backend), config).unwrap()
    }

    fn key_id_of(token: &str) -> i64 {
        let payload = token.split_once('.').unwrap().0;
        let claims: Claims =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).unwrap()).unwrap();
        claims.kid
    }

    #[tokio::test]
    async fn minted_token_verifies_to_same_account() {
        let (db, _dir) = create_test_db().await;
        let tokens = manager(db, Arc::new(InMemoryCache::new()), &token_config(3600, 60));

        let issued = tokens.get_token(AccountId(7)).await.unwrap();
        let (account_id, expires_at) = tokens.verify(&issued.token).await.unwrap();

        assert_eq!(account_id, AccountId(7));
        assert_eq!(expires_at, issued.expires_at);
    }

    #[tokio::test]
    async fn issued_expiry_matches_encoded_claims() {
        let (db, _dir) = create_test_db().await;
        let tokens = manager(db, Arc::new(InMemoryCache::new()), &token_config(3600, 60));
        let now = Utc.timestamp_nanos(1_700_000_000_123_456_789);

        let issued = tokens.get_token_at(AccountId(3), now).await.unwrap();
        assert_eq!(issued.expires_at.timestamp_subsec_nanos(), 123_000_000);

        let (_, expires_at) = tokens.verify_at(&issued.token, now).await.unwrap();
        assert_eq!(expires_at, issued.expires_at);
    }

    #[tokio::test]
    async fn key_is_reused_until_rotation_window() {
        let (db, _dir) = create_test_db().await;
        let tokens = manager(db, Arc::new(InMemoryCache::new()), &token_config(60, 10));
        let t0 = Utc::now();

        let first = tokens.get_token_at(AccountId(1), t0).await.unwrap();
        let second = tokens
            .get_token_at(AccountId(2), t0 + chrono::Duration::seconds(30))
            .await
            .unwrap();

        assert_eq!(key_id_of(&first.token), key_id_of(&second.token));
    }

    #[tokio::test]
    async fn token_near_expiry_still_verifies_while_next_request_rotates() {
        let (db, _dir) = create_test_db().await;
        let tokens = manager(db, Arc::new(InMemoryCache::new()), &token_config(60, 10));
        let t0 = Utc::now();

        let old = tokens.get_token_at(AccountId(1), t0).await.unwrap();

        // E - T = 5s, inside the 10s regeneration window
        let t = t0 + chrono::Duration::seconds(55);
        let (account_id, _) = tokens.verify_at(&old.token, t).await.unwrap();
        assert_eq!(account_id, AccountId(1));

        let fresh = tokens.get_token_at(AccountId(1), t).await.unwrap();
        assert_ne!(key_id_of(&old.token), key_id_of(&fresh.token));

        // Retired key stays verifiable
        tokens.verify_at(&old.token, t).await.unwrap();
        tokens.verify_at(&fresh.token, t).await.unwrap();
    }

    #[tokio::test]
    async fn expired_token_is_unauthenticated() {
        let (db, _dir) = create_test_db().await;
        let tokens = manager(db, Arc::new(InMemoryCache::new()), &token_config(60, 10));
        let t0 = Utc::now();

        let issued = tokens.get_token_at(AccountId(1), t0).await.unwrap();
        let result = tokens
            .verify_at(&issued.token, t0 + chrono::Duration::seconds(60))
            .await;

        assert!(matches!(result, Err(Error::Unauthenticated(_))));
    }

    #[tokio::test]
    async fn tampered_token_is_unauthenticated() {
        let (db, _dir) = create_test_db().await;
        let tokens = manager(db, Arc::new(InMemoryCache::new()), &token_config(60, 10));
        let issued = tokens.get_token(AccountId(1)).await.unwrap();

        let (_, signature) = issued.token.split_once('.').unwrap();
        let forged_claims = Claims {
            sub: 2,
            exp: issued.expires_at.timestamp_millis(),
            kid: key_id_of(&issued.token),
        };
        let forged = format!(
            "{}.{signature}",
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged_claims).unwrap())
        );

        for bad in [forged.as_str(), "garbage", "a.b", ""] {
            let result = tokens.verify(bad).await;
            assert!(
                matches!(result, Err(Error::Unauthenticated(_))),
                "{bad:?} should be rejected, got {result:?}"
            );
        }
    }

    #[tokio::test]
    async fn unknown_key_id_is_unauthenticated() {
        let (db, _dir) = create_test_db().await;
        let tokens = manager(db.clone(), Arc::new(InMemoryCache::new()), &token_config(60, 10));
        let issued = tokens.get_token(AccountId(1)).await.unwrap();

        // A second manager signing with its own key under a foreign id
        let other = manager(db, Arc::new(InMemoryCache::new()), &token_config(60, 10));
        let foreign = other.get_token(AccountId(1)).await.unwrap();
        let (_, foreign_sig) = foreign.token.split_once('.').unwrap();
        let (payload, _) = issued.token.split_once('.').unwrap();

        let result = tokens.verify(&format!("{payload}.{foreign_sig}")).await;
        assert!(matches!(result, Err(Error::Unauthenticated(_))));

        let missing = Claims {
            sub: 1,
            exp: issued.expires_at.timestamp_millis(),
            kid: 9999,
        };
        let result = tokens
            .verify(&format!(
                "{}.{}",
                URL_SAFE_NO_PAD.encode(serde_json::to_vec(&missing).unwrap()),
                foreign_sig
            ))
            .await;
        assert!(matches!(result, Err(Error::Unauthenticated(_))));
    }

    #[tokio::test]
    async fn verification_repopulates_cache_from_database() {
        let (db, _dir) = create_test_db().await;
        let issuer = manager(db.clone(), Arc::new(InMemoryCache::new()), &token_config(60, 10));
        let issued = issuer.get_token(AccountId(3)).await.unwrap();

        // Fresh cache: first verification must go to the database
        let backend: Arc<dyn Cache> = Arc::new(InMemoryCache::new());
        let verifier = manager(db, backend.clone(), &token_config(60, 10));
        verifier.verify(&issued.token).await.unwrap();

        let key = format!("token_public_key:{}", key_id_of(&issued.token));
        assert!(backend.get(&key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn failing_cache_falls_back_to_database() {
        let (db, _dir) = create_test_db().await;
        let tokens = manager(db, Arc::new(FailingCache), &token_config(60, 10));

        let issued = tokens.get_token(AccountId(5)).await.unwrap();
        let (account_id, _) = tokens.verify(&issued.token).await.unwrap();
        assert_eq!(account_id, AccountId(5));
    }

    #[tokio::test]
    async fn regenerate_window_must_be_shorter_than_lifetime() {
        let (db, _dir) = create_test_db().await;
        let result = TokenManager::new(
            db,
            TokenPublicKeyCache::new(Arc::new(InMemoryCache::new())),
            &token_config(60, 60),
        );
        assert!(matches!(result, Err(Error::Config { .. })));
    }
}
