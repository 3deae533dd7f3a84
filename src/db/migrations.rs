//! Ordered, checksummed, idempotent migrations.
//!
//! Migrations are `.sql` files in one directory. The filename is the version and
//! files apply in numeric-aware filename order, so `2_x.sql` runs before
//! `10_y.sql`. Each applied file is recorded with its SHA-256 in
//! `schema_migrations`; a recorded file whose content later changes stops the run
//! before anything else is executed.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::db::schema::starts_with_meta_command;
use crate::db::SqlSession;
use crate::error::MigrationError;
use crate::models::{AppliedMigration, MigrationRecord};

const CREATE_BOOKKEEPING_TABLE: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
    version text PRIMARY KEY,
    checksum text NOT NULL,
    applied_at timestamptz NOT NULL DEFAULT now()
)";

/// Hex-encoded SHA-256 of a migration's content.
pub fn checksum(sql: &str) -> String {
    hex::encode(Sha256::digest(sql.as_bytes()))
}

/// Compare names chunk by chunk, with runs of digits compared as numbers.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = Chunks(a);
    let mut right = Chunks(b);

    loop {
        match (left.next(), right.next()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ordering = match (is_digits(x), is_digits(y)) {
                    (true, true) => cmp_numeric(x, y),
                    _ => x.cmp(y),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
        }
    }
}

fn is_digits(chunk: &str) -> bool {
    chunk.bytes().next().is_some_and(|b| b.is_ascii_digit())
}

fn cmp_numeric(x: &str, y: &str) -> Ordering {
    let x = x.trim_start_matches('0');
    let y = y.trim_start_matches('0');
    x.len().cmp(&y.len()).then_with(|| x.cmp(y))
}

/// Splits a string into alternating digit and non-digit runs.
struct Chunks<'a>(&'a str);

impl<'a> Iterator for Chunks<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let first = self.0.chars().next()?;
        let digits = first.is_ascii_digit();
        let end = self
            .0
            .find(|c: char| c.is_ascii_digit() != digits)
            .unwrap_or(self.0.len());
        let (chunk, rest) = self.0.split_at(end);
        self.0 = rest;
        Some(chunk)
    }
}

/// Sort into apply order and reject duplicate versions.
///
/// Names differing only by case count as duplicates.
pub fn order_migrations(
    mut migrations: Vec<MigrationRecord>,
) -> Result<Vec<MigrationRecord>, MigrationError> {
    migrations.sort_by(|a, b| natural_cmp(&a.version, &b.version));

    let mut seen = HashSet::with_capacity(migrations.len());
    for migration in &migrations {
        if !seen.insert(migration.version.to_lowercase()) {
            return Err(MigrationError::Duplicate(migration.version.clone()));
        }
    }

    Ok(migrations)
}

/// Load every `.sql` file in `dir`, checksummed and in apply order.
pub async fn discover_migrations(dir: &Path) -> Result<Vec<MigrationRecord>, MigrationError> {
    let unreadable = |source: std::io::Error| MigrationError::Unreadable {
        path: dir.display().to_string(),
        source,
    };

    let mut entries = tokio::fs::read_dir(dir).await.map_err(unreadable)?;
    let mut migrations = Vec::new();

    while let Some(entry) = entries.next_entry().await.map_err(unreadable)? {
        if !entry.file_type().await.map_err(unreadable)?.is_file() {
            continue;
        }
        let Some(version) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if !version.to_lowercase().ends_with(".sql") {
            continue;
        }

        let path = entry.path();
        let sql = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| MigrationError::Unreadable {
                path: path.display().to_string(),
                source,
            })?;
        if sql.trim().is_empty() {
            return Err(MigrationError::Empty {
                path: path.display().to_string(),
            });
        }
        if starts_with_meta_command(&sql) {
            return Err(MigrationError::MetaCommand(version));
        }

        migrations.push(MigrationRecord {
            checksum: checksum(&sql),
            version,
            sql,
        });
    }

    let migrations = order_migrations(migrations)?;
    tracing::info!(
        count = migrations.len(),
        dir = %dir.display(),
        "Loaded migrations"
    );
    Ok(migrations)
}

/// Applies unapplied migrations, one transaction each.
pub struct MigrationRunner;

impl MigrationRunner {
    /// Apply `migrations` (already in apply order). Returns the versions applied by this run.
    pub async fn apply(
        session: &mut dyn SqlSession,
        migrations: &[MigrationRecord],
    ) -> Result<Vec<String>, MigrationError> {
        if migrations.is_empty() {
            return Ok(Vec::new());
        }

        session
            .execute_script(CREATE_BOOKKEEPING_TABLE)
            .await
            .map_err(MigrationError::Bookkeeping)?;

        let recorded: HashMap<String, AppliedMigration> = session
            .applied_migrations()
            .await
            .map_err(MigrationError::Bookkeeping)?
            .into_iter()
            .map(|row| (row.version.clone(), row))
            .collect();

        // Drift anywhere stops the run before any migration executes.
        for migration in migrations {
            if let Some(stored) = recorded.get(&migration.version) {
                if stored.checksum != migration.checksum {
                    return Err(MigrationError::ChecksumMismatch {
                        version: migration.version.clone(),
                        recorded: stored.checksum.clone(),
                        discovered: migration.checksum.clone(),
                    });
                }
            }
        }

        let mut applied = Vec::new();
        for migration in migrations {
            if let Some(stored) = recorded.get(&migration.version) {
                tracing::info!(
                    version = %migration.version,
                    applied_at = %stored.applied_at,
                    "Skipping already applied migration"
                );
                continue;
            }

            tracing::info!(
                version = %migration.version,
                bytes = migration.sql.len(),
                "Applying migration"
            );
            session
                .execute_in_transaction(&migration.sql, Some(migration))
                .await
                .map_err(|source| MigrationError::Execution {
                    version: migration.version.clone(),
                    source,
                })?;
            applied.push(migration.version.clone());
        }

        Ok(applied)
    }
}
