pub mod account_repository;
pub mod api_key_repository;
pub mod config;
pub mod database;
pub mod job_repository;
pub mod queue_repository;
pub mod result_repository;

pub use account_repository::AccountRepository;
pub use api_key_repository::{ApiKeyRepository, IssuedKey};
pub use config::DatabaseConfig;
pub use database::Database;
pub use job_repository::JobRepository;
pub use queue_repository::QueueRepository;
pub use result_repository::ResultRepository;
