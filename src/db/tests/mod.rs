mod accounts;

use crate::db::*;
use crate::types::{AccountId, DownloadType};
use tempfile::NamedTempFile;

/// Open a fresh database in a temp file; keep the file alive for the test
async fn open_temp_db() -> (Database, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    (db, temp_file)
}

/// Insert an account (with credential) and return its id
async fn insert_test_account(db: &Database, name: &str) -> AccountId {
    let mut tx = db.begin().await.unwrap();
    let id = Database::insert_account(&mut *tx, name).await.unwrap();
    Database::insert_account_credential(&mut *tx, id, "hash")
        .await
        .unwrap();
    Database::commit(tx).await.unwrap();
    id
}

fn http_task(owner: AccountId, url: &str) -> NewDownloadTask {
    NewDownloadTask {
        owner_account_id: owner,
        download_type: DownloadType::Http,
        url: url.to_string(),
    }
}
