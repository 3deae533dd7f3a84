//! Schema and migration application over a single database session.

pub mod migrations;
mod postgres;
pub mod schema;

use async_trait::async_trait;

use crate::models::{AppliedMigration, MigrationRecord};

pub use migrations::{discover_migrations, MigrationRunner};
pub use postgres::{ensure_tls, PgConnector, PgSession};
pub use schema::SchemaApplier;

/// The statements the appliers need from a live connection.
#[async_trait]
pub trait SqlSession: Send {
    /// Run a multi-statement script with the simple query protocol, outside any transaction.
    async fn execute_script(&mut self, sql: &str) -> Result<(), sqlx::Error>;

    /// Run `sql` in its own transaction. When `migration` is given its bookkeeping row is
    /// written in the same transaction. Nothing persists if any step fails.
    async fn execute_in_transaction(
        &mut self,
        sql: &str,
        migration: Option<&MigrationRecord>,
    ) -> Result<(), sqlx::Error>;

    /// Rows of the bookkeeping table.
    async fn applied_migrations(&mut self) -> Result<Vec<AppliedMigration>, sqlx::Error>;

    /// Upsert a row into a `_smoke` table and count its rows.
    async fn smoke_test(&mut self) -> Result<i64, sqlx::Error>;

    async fn close(self: Box<Self>) -> Result<(), sqlx::Error>;
}

/// Opens sessions against a connection string.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, database_url: &str) -> Result<Box<dyn SqlSession>, sqlx::Error>;
}
