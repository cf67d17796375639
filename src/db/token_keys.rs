//! Public halves of token signing keys.

use crate::error::DatabaseError;
use crate::types::KeyId;
use crate::{Error, Result};

use super::Database;

impl Database {
    /// Persist a newly generated public key (base64) and return its id
    pub async fn insert_token_public_key(&self, public_key: &str) -> Result<KeyId> {
        let now = chrono::Utc::now().timestamp();

        let result =
            sqlx::query("INSERT INTO token_public_keys (public_key, created_at) VALUES (?, ?)")
                .bind(public_key)
                .bind(now)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to insert token public key: {}",
                        e
                    )))
                })?;

        Ok(KeyId(result.last_insert_rowid()))
    }

    /// Look up a public key (base64) by id
    pub async fn get_token_public_key(&self, id: KeyId) -> Result<Option<String>> {
        sqlx::query_scalar("SELECT public_key FROM token_public_keys WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to get token public key: {}",
                    e
                )))
            })
    }
}
