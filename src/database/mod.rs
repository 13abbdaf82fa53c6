//! # Database
//!
//! Pool construction from [`crate::config::DatabaseConfig`] and the embedded
//! schema migrations backing the Postgres cache and usage sink.
//!
//! ```rust,no_run
//! use prospect_core::config::DatabaseConfig;
//! use prospect_core::database::DatabaseConnection;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = DatabaseConnection::connect(&DatabaseConfig::default()).await?;
//! assert!(db.health_check().await?);
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod migrations;

pub use connection::DatabaseConnection;
pub use migrations::{run_migrations, MIGRATOR};
