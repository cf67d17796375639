//! Account registration and sign-in.

use crate::auth::{CredentialHasher, TokenManager};
use crate::cache::TakenAccountNameCache;
use crate::db::Database;
use crate::types::{Account, SessionToken};
use crate::{Error, Result};
use std::sync::Arc;

/// Longest accepted account name, in characters
pub const MAX_ACCOUNT_NAME_LEN: usize = 64;

/// Creates accounts and issues sessions
#[derive(Clone)]
pub struct AccountManager {
    db: Database,
    hasher: CredentialHasher,
    tokens: Arc<TokenManager>,
    taken_names: TakenAccountNameCache,
}

impl AccountManager {
    /// Create a new account manager
    pub fn new(
        db: Database,
        hasher: CredentialHasher,
        tokens: Arc<TokenManager>,
        taken_names: TakenAccountNameCache,
    ) -> Self {
        Self {
            db,
            hasher,
            tokens,
            taken_names,
        }
    }

    /// Register `name` with `password`
    ///
    /// The account and its credential are written in one transaction. A name
    /// that is already registered, including one registered concurrently, is
    /// [`Error::AlreadyExists`].
    pub async fn create_account(&self, name: &str, password: &str) -> Result<Account> {
        validate_name(name)?;
        if password.is_empty() {
            return Err(Error::InvalidArgument("password must not be empty".into()));
        }

        if self.is_name_taken(name).await? {
            return Err(Error::AlreadyExists(format!("account name {name:?} is taken")));
        }

        let password_hash = self.hasher.hash(password).await?;

        let mut tx = self.db.begin().await?;
        let id = Database::insert_account(&mut tx, name).await?;
        Database::insert_account_credential(&mut tx, id, &password_hash).await?;
        Database::commit(tx).await?;

        if let Err(e) = self.taken_names.add(name).await {
            tracing::warn!(account_id = %id, error = %e, "failed to cache taken account name");
        }

        tracing::info!(account_id = %id, "account created");
        Ok(Account {
            id,
            name: name.to_string(),
        })
    }

    /// Check `password` for `name` and issue a session token
    pub async fn create_session(&self, name: &str, password: &str) -> Result<(SessionToken, Account)> {
        let account = self
            .db
            .get_account_by_name(name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("account {name:?}")))?;

        let password_hash = self
            .db
            .get_password_hash(account.id)
            .await?
            .ok_or_else(|| Error::Other(format!("account {} has no credential", account.id)))?;

        if !self.hasher.verify(password, &password_hash).await? {
            tracing::debug!(account_id = %account.id, "rejected session with wrong password");
            return Err(Error::Unauthenticated("incorrect password".into()));
        }

        let token = self.tokens.get_token(account.id).await?;
        tracing::debug!(account_id = %account.id, "session created");
        Ok((token, account))
    }

    /// Cache first; a cache miss or cache failure falls through to the database
    async fn is_name_taken(&self, name: &str) -> Result<bool> {
        match self.taken_names.contains(name).await {
            Ok(true) => return Ok(true),
            Ok(false) => {}
            Err(e) => tracing::warn!(error = %e, "taken account name cache unavailable"),
        }

        let taken = self.db.account_name_exists(name).await?;
        if taken && let Err(e) = self.taken_names.add(name).await {
            tracing::warn!(error = %e, "failed to cache taken account name");
        }
        Ok(taken)
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::InvalidArgument("account name must not be empty".into()));
    }
    if name.chars().count() > MAX_ACCOUNT_NAME_LEN {
        return Err(Error::InvalidArgument(format!(
            "account name must be at most {MAX_ACCOUNT_NAME_LEN} characters"
        )));
    }
    Ok(())
}
