use scrapepilot_core::AppError;
use scrapepilot_core::traits::{AccountLedger, Storage};
use uuid::Uuid;

use crate::integration::common::{seed_user, setup_test_db};

#[tokio::test]
async fn deduct_reduces_balance() {
    let (db, _container) = setup_test_db().await;
    let user = seed_user(&db, 10).await;

    assert_eq!(db.ledger().deduct(user, 3).await.unwrap(), 7);
    assert_eq!(db.ledger().get_balance(user).await.unwrap(), 7);
}

#[tokio::test]
async fn deduct_never_goes_negative() {
    let (db, _container) = setup_test_db().await;
    let user = seed_user(&db, 2).await;

    let err = db.ledger().deduct(user, 3).await.unwrap_err();
    assert!(matches!(
        err,
        AppError::InsufficientCredits {
            required: 3,
            available: 2
        }
    ));
    assert_eq!(db.ledger().get_balance(user).await.unwrap(), 2);
}

#[tokio::test]
async fn unlimited_balance_is_untouched() {
    let (db, _container) = setup_test_db().await;
    let user = seed_user(&db, -1).await;

    assert_eq!(db.ledger().deduct(user, 500).await.unwrap(), -1);
    assert_eq!(db.accounts().add_credits(user, 10).await.unwrap(), -1);
    assert_eq!(db.ledger().get_balance(user).await.unwrap(), -1);
}

#[tokio::test]
async fn concurrent_deductions_do_not_overdraw() {
    let (db, _container) = setup_test_db().await;
    let user = seed_user(&db, 5).await;

    let mut handles = Vec::new();
    for _ in 0..5 {
        let ledger = db.ledger().clone();
        handles.push(tokio::spawn(async move { ledger.deduct(user, 2).await }));
    }

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(AppError::InsufficientCredits { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(succeeded, 2);
    assert_eq!(db.ledger().get_balance(user).await.unwrap(), 1);
}

#[tokio::test]
async fn unknown_user_is_not_found() {
    let (db, _container) = setup_test_db().await;
    let err = db.ledger().get_balance(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}
