use super::{insert_test_account, open_temp_db};
use crate::Error;
use crate::db::*;

#[tokio::test]
async fn test_insert_and_get_account() {
    let (db, _file) = open_temp_db().await;

    let id = insert_test_account(&db, "alice").await;
    assert!(id.0 > 0);

    let by_id = db.get_account(id).await.unwrap().unwrap();
    assert_eq!(by_id.name, "alice");

    let by_name = db.get_account_by_name("alice").await.unwrap().unwrap();
    assert_eq!(by_name.id, id);

    assert!(db.account_name_exists("alice").await.unwrap());
    assert!(!db.account_name_exists("bob").await.unwrap());
    assert_eq!(db.get_password_hash(id).await.unwrap().as_deref(), Some("hash"));

    db.close().await;
}

#[tokio::test]
async fn test_duplicate_account_name_is_already_exists() {
    let (db, _file) = open_temp_db().await;
    insert_test_account(&db, "alice").await;

    let mut tx = db.begin().await.unwrap();
    let result = Database::insert_account(&mut *tx, "alice").await;
    assert!(matches!(result, Err(Error::AlreadyExists(_))), "got {result:?}");
    drop(tx);

    db.close().await;
}

#[tokio::test]
async fn test_rolled_back_account_leaves_no_rows() {
    let (db, _file) = open_temp_db().await;

    let mut tx = db.begin().await.unwrap();
    let id = Database::insert_account(&mut *tx, "carol").await.unwrap();
    tx.rollback().await.unwrap();

    assert!(db.get_account(id).await.unwrap().is_none());
    assert_eq!(db.count_account_credentials(id).await.unwrap(), 0);

    db.close().await;
}

#[tokio::test]
async fn test_unknown_account_lookups_return_none() {
    let (db, _file) = open_temp_db().await;

    assert!(db.get_account_by_name("nobody").await.unwrap().is_none());
    assert!(
        db.get_password_hash(crate::types::AccountId(99))
            .await
            .unwrap()
            .is_none()
    );

    db.close().await;
}
