use scrapepilot_core::AppError;
use scrapepilot_core::models::Permission;
use scrapepilot_core::traits::IdentityProvider;

use crate::integration::common::{seed_user, setup_test_db};

#[tokio::test]
async fn issued_key_authenticates() {
    let (db, _container) = setup_test_db().await;
    let user = seed_user(&db, 10).await;

    let issued = db
        .api_keys()
        .issue(user, "ci", &[Permission::Scrape, Permission::Map])
        .await
        .unwrap();
    assert!(issued.key.starts_with("sp_live_"));

    let identity = db.api_keys().authenticate(&issued.key).await.unwrap();
    assert_eq!(identity.user_id, user);
    assert_eq!(identity.credential_id, issued.id);
    assert_eq!(identity.permissions, vec![Permission::Scrape, Permission::Map]);
    assert!(identity.require(Permission::Scrape).is_ok());
    assert!(identity.require(Permission::Crawl).is_err());
}

#[tokio::test]
async fn plaintext_key_is_not_stored() {
    let (db, _container) = setup_test_db().await;
    let user = seed_user(&db, 10).await;
    let issued = db
        .api_keys()
        .issue(user, "ci", &[Permission::Scrape])
        .await
        .unwrap();

    let (prefix, hash): (String, String) =
        sqlx::query_as("SELECT key_prefix, key_hash FROM api_keys WHERE id = $1")
            .bind(issued.id)
            .fetch_one(db.pool())
            .await
            .unwrap();
    assert_eq!(prefix, &issued.key[..12]);
    assert_eq!(hash.len(), 64);
    assert_ne!(hash, issued.key);
}

#[tokio::test]
async fn wrong_or_revoked_keys_are_rejected() {
    let (db, _container) = setup_test_db().await;
    let user = seed_user(&db, 10).await;
    let issued = db
        .api_keys()
        .issue(user, "ci", &[Permission::Scrape])
        .await
        .unwrap();

    // Same lookup prefix, different secret.
    let mut forged = issued.key.clone();
    forged.pop();
    forged.push(if issued.key.ends_with('0') { '1' } else { '0' });
    for bad in [forged.as_str(), "sp_live_", "not-a-key", ""] {
        let err = db.api_keys().authenticate(bad).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthenticated(_)), "{bad}");
    }

    sqlx::query("UPDATE api_keys SET revoked_at = NOW() WHERE id = $1")
        .bind(issued.id)
        .execute(db.pool())
        .await
        .unwrap();
    let err = db.api_keys().authenticate(&issued.key).await.unwrap_err();
    assert!(matches!(err, AppError::Unauthenticated(_)));
}
