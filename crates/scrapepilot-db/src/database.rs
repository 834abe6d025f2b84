use scrapepilot_core::AppError;
use scrapepilot_core::traits::{AccountLedger, Storage};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use crate::account_repository::{AccountRepository, DEDUCT_SQL};
use crate::api_key_repository::ApiKeyRepository;
use crate::config::DatabaseConfig;
use crate::job_repository::JobRepository;
use crate::queue_repository::QueueRepository;
use crate::result_repository::ResultRepository;

pub(crate) fn db_err(e: sqlx::Error) -> AppError {
    AppError::DatabaseError(e.to_string())
}

/// Central database facade: owns the connection pool, runs migrations,
/// and vends the repositories the pipeline runs against.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
    jobs: JobRepository,
    results: ResultRepository,
    queue: QueueRepository,
    accounts: AccountRepository,
    api_keys: ApiKeyRepository,
}

impl Database {
    /// Connect to PostgreSQL with the given configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to connect: {e}")))?;

        Ok(Self::from_pool(pool))
    }

    /// Create a `Database` from an existing pool (useful for testing).
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            jobs: JobRepository::new(pool.clone()),
            results: ResultRepository::new(pool.clone()),
            queue: QueueRepository::new(pool.clone()),
            accounts: AccountRepository::new(pool.clone()),
            api_keys: ApiKeyRepository::new(pool.clone()),
            pool,
        }
    }

    /// Replace the queue's visibility timeout.
    pub fn with_visibility_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.queue = self.queue.with_visibility_timeout(timeout);
        self
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Check database connectivity.
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    pub fn accounts(&self) -> &AccountRepository {
        &self.accounts
    }

    pub fn api_keys(&self) -> &ApiKeyRepository {
        &self.api_keys
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl Storage for Database {
    type Jobs = JobRepository;
    type Results = ResultRepository;
    type Queue = QueueRepository;
    type Ledger = AccountRepository;

    fn jobs(&self) -> &JobRepository {
        &self.jobs
    }

    fn results(&self) -> &ResultRepository {
        &self.results
    }

    fn queue(&self) -> &QueueRepository {
        &self.queue
    }

    fn ledger(&self) -> &AccountRepository {
        &self.accounts
    }

    async fn charge_job(
        &self,
        job_id: Uuid,
        owner_id: Uuid,
        credits: i64,
    ) -> Result<Option<i64>, AppError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // The row lock taken here serializes concurrent charges of one job.
        let marked = sqlx::query(
            r#"
            UPDATE scrape_jobs
            SET credits_used = $2, updated_at = NOW()
            WHERE id = $1 AND credits_used = 0
            "#,
        )
        .bind(job_id)
        .bind(credits)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        if marked.rows_affected() == 0 {
            tx.rollback().await.map_err(db_err)?;
            return Ok(None);
        }

        let row: Option<(i64,)> = sqlx::query_as(DEDUCT_SQL)
            .bind(owner_id)
            .bind(credits)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;

        let Some((remaining,)) = row else {
            tx.rollback().await.map_err(db_err)?;
            let available = self.accounts.get_balance(owner_id).await?;
            return Err(AppError::InsufficientCredits {
                required: credits,
                available,
            });
        };

        tx.commit().await.map_err(db_err)?;
        Ok(Some(remaining))
    }
}
