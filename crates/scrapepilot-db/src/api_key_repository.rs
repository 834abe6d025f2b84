use sqlx::{PgPool, Pool, Postgres};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use scrapepilot_core::error::AppError;
use scrapepilot_core::models::{Identity, Permission, compute_hash};
use scrapepilot_core::traits::IdentityProvider;

use crate::database::db_err;

pub const KEY_PREFIX: &str = "sp_live_";
/// Leading characters of a key stored in clear for lookup.
pub const LOOKUP_PREFIX_LEN: usize = 12;

/// A freshly issued key. The plaintext is only available here.
#[derive(Debug, Clone)]
pub struct IssuedKey {
    pub id: Uuid,
    pub key: String,
}

/// API keys stored as SHA-256 hashes, looked up by a short clear-text prefix.
#[derive(Clone)]
pub struct ApiKeyRepository {
    pool: Pool<Postgres>,
}

#[derive(sqlx::FromRow)]
struct ApiKeyRow {
    id: Uuid,
    user_id: Uuid,
    key_hash: String,
    permissions: Vec<String>,
}

fn generate_key() -> String {
    format!(
        "{KEY_PREFIX}{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    )
}

fn lookup_prefix(key: &str) -> Option<&str> {
    if !key.starts_with(KEY_PREFIX) {
        return None;
    }
    key.get(..LOOKUP_PREFIX_LEN)
}

fn parse_permissions(key_id: Uuid, raw: &[String]) -> Vec<Permission> {
    raw.iter()
        .filter_map(|p| match p.parse() {
            Ok(permission) => Some(permission),
            Err(e) => {
                tracing::warn!(%key_id, "Ignoring stored permission: {e}");
                None
            }
        })
        .collect()
}

fn invalid_key() -> AppError {
    AppError::Unauthenticated("Invalid API key".into())
}

impl ApiKeyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Issue a new key for a user.
    pub async fn issue(
        &self,
        user_id: Uuid,
        name: &str,
        permissions: &[Permission],
    ) -> Result<IssuedKey, AppError> {
        let key = generate_key();
        let prefix = lookup_prefix(&key).unwrap_or(KEY_PREFIX);
        let permissions: Vec<&str> = permissions.iter().map(Permission::as_str).collect();

        let (id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO api_keys (user_id, name, key_prefix, key_hash, permissions)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(name)
        .bind(prefix)
        .bind(compute_hash(&key))
        .bind(&permissions)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        tracing::info!(%user_id, key_id = %id, "Issued API key");
        Ok(IssuedKey { id, key })
    }
}

impl IdentityProvider for ApiKeyRepository {
    async fn authenticate(&self, credential: &str) -> Result<Identity, AppError> {
        let prefix = lookup_prefix(credential).ok_or_else(invalid_key)?;

        let candidates = sqlx::query_as::<_, ApiKeyRow>(
            r#"
            SELECT id, user_id, key_hash, permissions
            FROM api_keys
            WHERE key_prefix = $1 AND revoked_at IS NULL
            "#,
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let presented = compute_hash(credential);
        let row = candidates
            .into_iter()
            .find(|row| bool::from(row.key_hash.as_bytes().ct_eq(presented.as_bytes())))
            .ok_or_else(invalid_key)?;

        if let Err(e) = sqlx::query(r#"UPDATE api_keys SET last_used_at = NOW() WHERE id = $1"#)
            .bind(row.id)
            .execute(&self.pool)
            .await
        {
            tracing::warn!(key_id = %row.id, "Failed to record key usage: {e}");
        }

        Ok(Identity {
            user_id: row.user_id,
            credential_id: row.id,
            permissions: parse_permissions(row.id, &row.permissions),
        })
    }
}
