use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use scrapepilot_core::error::AppError;
use scrapepilot_core::traits::AccountLedger;

use crate::database::db_err;

/// Check and decrement in one statement so concurrent charges cannot both
/// pass the balance check. Binds `$1` user id, `$2` amount.
pub(crate) const DEDUCT_SQL: &str = r#"
    UPDATE users
    SET credits = CASE WHEN credits < 0 THEN credits ELSE credits - $2 END
    WHERE id = $1 AND (credits < 0 OR credits >= $2)
    RETURNING credits
"#;

/// Credit balances stored on the `users` table.
///
/// A negative balance denotes an unlimited plan and is never decremented.
#[derive(Clone)]
pub struct AccountRepository {
    pool: Pool<Postgres>,
}

impl AccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a user with an opening balance. Returns the new user id.
    pub async fn create_user(&self, email: &str, credits: i64) -> Result<Uuid, AppError> {
        let (id,): (Uuid,) =
            sqlx::query_as(r#"INSERT INTO users (email, credits) VALUES ($1, $2) RETURNING id"#)
                .bind(email)
                .bind(credits)
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?;

        Ok(id)
    }

    /// Add credits to a limited account. Unlimited accounts are left alone.
    pub async fn add_credits(&self, user_id: Uuid, amount: i64) -> Result<i64, AppError> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            UPDATE users
            SET credits = CASE WHEN credits < 0 THEN credits ELSE credits + $2 END
            WHERE id = $1
            RETURNING credits
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(|(credits,)| credits)
            .ok_or_else(|| AppError::NotFound(format!("user {user_id}")))
    }
}

impl AccountLedger for AccountRepository {
    async fn get_balance(&self, user_id: Uuid) -> Result<i64, AppError> {
        let row: Option<(i64,)> = sqlx::query_as(r#"SELECT credits FROM users WHERE id = $1"#)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.map(|(credits,)| credits)
            .ok_or_else(|| AppError::NotFound(format!("user {user_id}")))
    }

    async fn deduct(&self, user_id: Uuid, amount: i64) -> Result<i64, AppError> {
        let row: Option<(i64,)> = sqlx::query_as(DEDUCT_SQL)
            .bind(user_id)
            .bind(amount)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        if let Some((remaining,)) = row {
            return Ok(remaining);
        }

        let available = self.get_balance(user_id).await?;
        Err(AppError::InsufficientCredits {
            required: amount,
            available,
        })
    }
}
