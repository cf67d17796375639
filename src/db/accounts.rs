//! Accounts and their credentials.

use crate::error::DatabaseError;
use crate::types::{Account, AccountId};
use crate::{Error, Result};
use sqlx::SqliteConnection;

use super::{Database, is_unique_violation};

impl Database {
    /// Insert an account inside the caller's transaction
    ///
    /// A name collision surfaces as [`Error::AlreadyExists`].
    pub async fn insert_account(conn: &mut SqliteConnection, name: &str) -> Result<AccountId> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query("INSERT INTO accounts (name, created_at) VALUES (?, ?)")
            .bind(name)
            .bind(now)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    Error::AlreadyExists(format!("account name {name:?} is taken"))
                } else {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to insert account: {}",
                        e
                    )))
                }
            })?;

        Ok(AccountId(result.last_insert_rowid()))
    }

    /// Insert the credential row for an account inside the caller's transaction
    pub async fn insert_account_credential(
        conn: &mut SqliteConnection,
        account_id: AccountId,
        password_hash: &str,
    ) -> Result<()> {
        sqlx::query("INSERT INTO account_credentials (account_id, password_hash) VALUES (?, ?)")
            .bind(account_id)
            .bind(password_hash)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    Error::AlreadyExists(format!("account {account_id} already has a credential"))
                } else {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to insert account credential: {}",
                        e
                    )))
                }
            })?;

        Ok(())
    }

    /// Get an account by ID
    pub async fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        sqlx::query_as::<_, Account>("SELECT id, name FROM accounts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to get account: {}",
                    e
                )))
            })
    }

    /// Get an account by its unique name
    pub async fn get_account_by_name(&self, name: &str) -> Result<Option<Account>> {
        sqlx::query_as::<_, Account>("SELECT id, name FROM accounts WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to get account by name: {}",
                    e
                )))
            })
    }

    /// Check whether an account name is already registered
    pub async fn account_name_exists(&self, name: &str) -> Result<bool> {
        let exists: i64 =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM accounts WHERE name = ?)")
                .bind(name)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to check account name: {}",
                        e
                    )))
                })?;

        Ok(exists != 0)
    }

    /// Get the stored password hash for an account
    pub async fn get_password_hash(&self, account_id: AccountId) -> Result<Option<String>> {
        sqlx::query_scalar("SELECT password_hash FROM account_credentials WHERE account_id = ?")
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to get password hash: {}",
                    e
                )))
            })
    }

    /// Count credential rows for an account
    pub async fn count_account_credentials(&self, account_id: AccountId) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM account_credentials WHERE account_id = ?")
            .bind(account_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to count account credentials: {}",
                    e
                )))
            })
    }
}
