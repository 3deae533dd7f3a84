//! Error types for provisioning and bootstrapping.

use std::fmt;
use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

use crate::models::OperationStatus;

/// Invalid or missing flags and environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required value was not supplied.
    #[error("missing required configuration: {0}")]
    Missing(&'static str),

    /// A value was supplied but cannot be used.
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Failures of a single outbound HTTP exchange.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Non-2xx response.
    #[error("HTTP {status}: {detail}")]
    Status { status: StatusCode, detail: String },

    /// Connection reset, DNS failure and friends.
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    /// The attempt did not finish within its per-attempt budget.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Body was not what we expected.
    #[error("invalid response body: {0}")]
    Decode(String),

    /// Every attempt failed with a retryable error.
    #[error("giving up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<TransportError>,
    },
}

impl TransportError {
    /// 429, 5xx, timeouts and network-level failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            Self::Network(err) => !err.is_decode() && !err.is_builder(),
            Self::Timeout(_) => true,
            Self::Decode(_) | Self::Exhausted { .. } => false,
        }
    }

    /// HTTP status of the failing response, unwrapping exhausted retries.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Exhausted { last, .. } => last.status(),
            _ => None,
        }
    }
}

/// The named step of a provisioning run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Gateway,
    Branch,
    Endpoint,
    Database,
    ConnectionUri,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Gateway => "gateway provisioning",
            Self::Branch => "branch creation",
            Self::Endpoint => "endpoint creation",
            Self::Database => "database creation",
            Self::ConnectionUri => "connection URI retrieval",
        };
        f.write_str(name)
    }
}

/// What went wrong inside a stage.
#[derive(Debug, Error)]
pub enum StageFailure {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("operation {id} {status}: {detail}")]
    OperationFailed {
        id: String,
        status: OperationStatus,
        detail: String,
    },

    #[error("timed out waiting for operation {id}")]
    Timeout { id: String },

    #[error("response missing {0}")]
    MissingField(&'static str),

    #[error("connection URI response has none of connection_uri, uri, connectionUri")]
    ConnectionResolution,
}

/// A provisioning stage failed irrecoverably.
#[derive(Debug, Error)]
#[error("{stage} failed: {source}")]
pub struct ProvisionError {
    pub stage: Stage,
    #[source]
    pub source: StageFailure,
}

impl ProvisionError {
    pub fn new(stage: Stage, source: impl Into<StageFailure>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }
}

/// Problems with the baseline schema script.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("schema file {path} is unreadable: {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("schema file {path} is empty")]
    Empty { path: String },

    #[error("{origin} contains psql meta-commands (e.g. \\i, \\copy); remove them for programmatic execution")]
    MetaCommand { origin: String },

    #[error("schema execution failed: {0}")]
    Execution(#[source] sqlx::Error),
}

/// Problems discovering or applying migrations.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migrations directory {path} is unreadable: {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("migration {path} is empty")]
    Empty { path: String },

    #[error("duplicate migration detected: {0}")]
    Duplicate(String),

    #[error("migration {0} contains psql meta-commands (e.g. \\i, \\copy)")]
    MetaCommand(String),

    #[error("checksum mismatch for {version}: recorded {recorded}, found {discovered}")]
    ChecksumMismatch {
        version: String,
        recorded: String,
        discovered: String,
    },

    #[error("migration {version} failed: {source}")]
    Execution {
        version: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("migration bookkeeping failed: {0}")]
    Bookkeeping(#[source] sqlx::Error),
}

/// Anything that can end a bootstrap run.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] TransportError),

    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("smoke query failed: {0}")]
    Smoke(#[source] sqlx::Error),
}
