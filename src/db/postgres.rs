//! Postgres session over one `PgConnection`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Connection, Executor, PgConnection};
use url::Url;

use crate::db::{Connector, SqlSession};
use crate::models::{AppliedMigration, MigrationRecord};
use crate::redact::redact_credentials;

const SMOKE_UPSERT: &str = "CREATE TABLE IF NOT EXISTS _smoke (k text PRIMARY KEY, v text, ts timestamptz DEFAULT now());
INSERT INTO _smoke (k, v) VALUES ('hello', 'world') ON CONFLICT (k) DO UPDATE SET ts = now();";

/// Add `sslmode=require` unless the URI already chooses a TLS mode.
///
/// Strings that do not parse as URLs are passed through untouched.
pub fn ensure_tls(connection_string: &str) -> String {
    let Ok(mut url) = Url::parse(connection_string) else {
        return connection_string.to_string();
    };
    if url.query_pairs().any(|(key, _)| key == "sslmode") {
        return connection_string.to_string();
    }
    url.query_pairs_mut().append_pair("sslmode", "require");
    url.to_string()
}

/// One Postgres connection.
pub struct PgSession {
    conn: PgConnection,
}

impl PgSession {
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let target = ensure_tls(database_url);
        tracing::info!(database_url = %redact_credentials(&target), "Connecting to database");
        let conn = PgConnection::connect(&target).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl SqlSession for PgSession {
    async fn execute_script(&mut self, sql: &str) -> Result<(), sqlx::Error> {
        (&mut self.conn).execute(sqlx::raw_sql(sql)).await?;
        Ok(())
    }

    async fn execute_in_transaction(
        &mut self,
        sql: &str,
        migration: Option<&MigrationRecord>,
    ) -> Result<(), sqlx::Error> {
        // Dropping `tx` on an early return rolls it back.
        let mut tx = self.conn.begin().await?;
        (&mut *tx).execute(sqlx::raw_sql(sql)).await?;
        if let Some(migration) = migration {
            sqlx::query("INSERT INTO schema_migrations (version, checksum) VALUES ($1, $2)")
                .bind(migration.version.as_str())
                .bind(migration.checksum.as_str())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await
    }

    async fn applied_migrations(&mut self) -> Result<Vec<AppliedMigration>, sqlx::Error> {
        let rows: Vec<(String, String, DateTime<Utc>)> = sqlx::query_as(
            "SELECT version, checksum, applied_at FROM schema_migrations ORDER BY version",
        )
        .fetch_all(&mut self.conn)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(version, checksum, applied_at)| AppliedMigration {
                version,
                checksum,
                applied_at,
            })
            .collect())
    }

    async fn smoke_test(&mut self) -> Result<i64, sqlx::Error> {
        (&mut self.conn).execute(sqlx::raw_sql(SMOKE_UPSERT)).await?;
        sqlx::query_scalar::<_, i64>("SELECT count(*) FROM _smoke")
            .fetch_one(&mut self.conn)
            .await
    }

    async fn close(self: Box<Self>) -> Result<(), sqlx::Error> {
        self.conn.close().await
    }
}

/// Opens [`PgSession`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgConnector;

#[async_trait]
impl Connector for PgConnector {
    async fn connect(&self, database_url: &str) -> Result<Box<dyn SqlSession>, sqlx::Error> {
        Ok(Box::new(PgSession::connect(database_url).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_sslmode_when_missing() {
        assert_eq!(
            ensure_tls("postgres://u:p@host/db"),
            "postgres://u:p@host/db?sslmode=require"
        );
        assert_eq!(
            ensure_tls("postgres://u:p@host/db?pooler=true"),
            "postgres://u:p@host/db?pooler=true&sslmode=require"
        );
    }

    #[test]
    fn keeps_explicit_sslmode() {
        let uri = "postgres://u:p@host/db?sslmode=verify-full";
        assert_eq!(ensure_tls(uri), uri);
    }

    #[test]
    fn passes_through_unparseable_strings() {
        assert_eq!(ensure_tls("host=localhost dbname=x"), "host=localhost dbname=x");
    }
}
