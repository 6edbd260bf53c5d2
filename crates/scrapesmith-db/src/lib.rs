pub mod build_repository;
pub mod config;
pub mod database;

pub use build_repository::PgBuildRepository;
pub use config::DatabaseConfig;
pub use database::Database;
