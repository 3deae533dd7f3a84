//! End-to-end bootstrap: provision, then schema, then migrations.

use std::sync::Arc;

use crate::api::{GatewayClient, NeonClient};
use crate::config::{Backend, BootstrapConfig};
use crate::db::schema::load_schema;
use crate::db::{discover_migrations, Connector, MigrationRunner, PgConnector, SchemaApplier, SqlSession};
use crate::error::BootstrapError;
use crate::models::{BootstrapResult, MigrationRecord};
use crate::provision::{DatabaseProvisioner, ResourceProvisioner};
use crate::redact::redact_credentials;

/// Drives one bootstrap run against a provisioner and a database connector.
pub struct BootstrapOrchestrator {
    provisioner: Box<dyn DatabaseProvisioner>,
    connector: Box<dyn Connector>,
}

impl BootstrapOrchestrator {
    pub fn new(provisioner: Box<dyn DatabaseProvisioner>, connector: Box<dyn Connector>) -> Self {
        Self {
            provisioner,
            connector,
        }
    }

    /// Wire up the configured backend with a real Postgres connector.
    pub fn from_config(config: &BootstrapConfig) -> Result<Self, BootstrapError> {
        let provisioner: Box<dyn DatabaseProvisioner> = match &config.backend {
            Backend::Neon {
                api_base,
                api_key,
                project_id,
            } => {
                let client = NeonClient::with_base_url(
                    api_base.as_str(),
                    api_key.clone(),
                    project_id.clone(),
                    config.retry,
                )
                .map_err(BootstrapError::Client)?;
                Box::new(ResourceProvisioner::new(Arc::new(client), config.provision))
            }
            Backend::Gateway { url, token } => Box::new(
                GatewayClient::new(url, token.clone(), config.retry)
                    .map_err(BootstrapError::Client)?,
            ),
        };
        Ok(Self::new(provisioner, Box::new(PgConnector)))
    }

    /// Run the whole workflow. Failures come back as `ok: false` with a redacted message.
    pub async fn run(&self, config: &BootstrapConfig) -> BootstrapResult {
        match self.try_run(config).await {
            Ok(result) => result,
            Err(e) => {
                let message = e.to_string();
                tracing::error!(error = %redact_credentials(&message), "Bootstrapping failed");
                BootstrapResult::failed(&message)
            }
        }
    }

    pub async fn try_run(&self, config: &BootstrapConfig) -> Result<BootstrapResult, BootstrapError> {
        let request = config.provision_request();
        tracing::info!(
            provider = %request.provider,
            database = %request.database_name,
            "Provisioning database"
        );
        let outcome = self.provisioner.provision(&request).await?;
        let database_url = redact_credentials(&outcome.uris.pooled);
        tracing::info!(database_url = %database_url, "Provisioning successful");

        let schema = load_schema(&config.schema_path).await?;
        let migrations = match &config.migrations_dir {
            Some(dir) => discover_migrations(dir).await?,
            None => Vec::new(),
        };

        let mut result = BootstrapResult {
            ok: true,
            database_url: Some(database_url),
            branch_id: outcome.branch_id.clone(),
            endpoint_id: outcome.endpoint_id.clone(),
            schema_bytes: Some(schema.len()),
            ..BootstrapResult::default()
        };

        if config.dry_run {
            let pending: Vec<String> = migrations.iter().map(|m| m.version.clone()).collect();
            tracing::info!(pending = pending.len(), "Dry run, skipping schema and migrations");
            result.dry_run = true;
            result.pending_migrations = Some(pending);
            return Ok(result);
        }

        let mut session = self
            .connector
            .connect(&outcome.uris.direct)
            .await
            .map_err(BootstrapError::Connect)?;
        let applied = apply_all(session.as_mut(), &schema, &migrations, config.smoke).await;
        if let Err(e) = session.close().await {
            tracing::warn!(error = %e, "Failed to close database connection");
        }

        let (applied, smoke_rows) = applied?;
        tracing::info!(applied = applied.len(), "Bootstrap complete");
        result.applied_migrations = Some(applied);
        result.smoke_rows = smoke_rows;
        Ok(result)
    }
}

async fn apply_all(
    session: &mut dyn SqlSession,
    schema: &str,
    migrations: &[MigrationRecord],
    smoke: bool,
) -> Result<(Vec<String>, Option<i64>), BootstrapError> {
    SchemaApplier::apply(session, schema).await?;
    let applied = MigrationRunner::apply(session, migrations).await?;
    if !smoke {
        return Ok((applied, None));
    }
    let rows = session.smoke_test().await.map_err(BootstrapError::Smoke)?;
    tracing::info!(rows, "Smoke query succeeded");
    Ok((applied, Some(rows)))
}
