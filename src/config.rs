//! Run configuration: CLI flags and environment collected into one validated struct.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, ValueEnum};
use serde::Deserialize;
use url::Url;

use crate::api::client::API_BASE;
use crate::api::RetryPolicy;
use crate::error::ConfigError;
use crate::models::{ProvisionRequest, Provider};
use crate::provision::ProvisionSettings;
use crate::redact::redact_credentials;

/// Which API performs the provisioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum BackendKind {
    /// Neon API when provider is neon and a Neon key is available, otherwise the gateway.
    #[default]
    Auto,
    /// Neon API directly.
    Neon,
    /// Provisioning gateway.
    Gateway,
}

/// Resolved backend and its credentials.
#[derive(Clone, PartialEq, Eq)]
pub enum Backend {
    Neon {
        api_base: Url,
        api_key: String,
        project_id: String,
    },
    Gateway {
        url: Url,
        token: String,
    },
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Neon {
                api_base,
                project_id,
                ..
            } => f
                .debug_struct("Neon")
                .field("api_base", &api_base.as_str())
                .field("project_id", project_id)
                .finish_non_exhaustive(),
            Self::Gateway { url, .. } => f
                .debug_struct("Gateway")
                .field("url", &redact_credentials(url.as_str()))
                .finish_non_exhaustive(),
        }
    }
}

/// Flags of the `bootstrap` command.
#[derive(Clone, Args)]
pub struct BootstrapArgs {
    /// Managed Postgres provider
    #[arg(long, value_enum)]
    pub provider: Provider,

    /// Name of the database to create
    #[arg(long)]
    pub name: String,

    /// Neon project id
    #[arg(long, env = "NEON_PROJECT_ID")]
    pub org: Option<String>,

    /// Schema script applied to the new database
    #[arg(long)]
    pub schema: PathBuf,

    /// Directory of .sql migrations applied after the schema
    #[arg(long)]
    pub migrations: Option<PathBuf>,

    /// Provision and load files, but do not connect to the new database
    #[arg(long)]
    pub dry_run: bool,

    /// After migrations, upsert a row into a `_smoke` table and count its rows
    #[arg(long, conflicts_with = "dry_run")]
    pub smoke: bool,

    /// Emit a single JSON object instead of a log
    #[arg(long)]
    pub json: bool,

    /// Attempts per provisioning API request
    #[arg(long, default_value_t = 5)]
    pub retries: u32,

    /// Timeout per request attempt, in milliseconds
    #[arg(long, default_value_t = 20_000)]
    pub timeout: u64,

    /// Budget for the whole provisioning phase, in milliseconds
    #[arg(long, default_value_t = 90_000)]
    pub deadline: u64,

    /// Interval between operation polls, in milliseconds
    #[arg(long, default_value_t = 1_500)]
    pub poll_interval: u64,

    /// Role owning the new database
    #[arg(long, default_value = ProvisionRequest::DEFAULT_ROLE)]
    pub role: String,

    /// Branch to fork from (defaults to the project's primary branch)
    #[arg(long)]
    pub parent_branch: Option<String>,

    /// Provisioning backend
    #[arg(long, value_enum, default_value_t = BackendKind::Auto)]
    pub backend: BackendKind,

    /// Neon API base URL
    #[arg(long, env = "NEON_API_BASE", default_value = API_BASE)]
    pub api_base: String,

    /// Neon API key
    #[arg(long, env = "NEON_API_KEY", hide_env_values = true)]
    pub neon_api_key: Option<String>,

    /// Provisioning gateway URL
    #[arg(long, env = "BOOTSTRAP_GATEWAY_URL")]
    pub gateway_url: Option<String>,

    /// Bearer token for the provisioning gateway
    #[arg(long, env = "BOOTSTRAP_ADMIN_TOKEN", hide_env_values = true)]
    pub admin_token: Option<String>,
}

impl std::fmt::Debug for BootstrapArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let secret = |value: &Option<String>| value.as_ref().map(|_| "****");
        f.debug_struct("BootstrapArgs")
            .field("provider", &self.provider)
            .field("name", &self.name)
            .field("org", &self.org)
            .field("schema", &self.schema)
            .field("migrations", &self.migrations)
            .field("dry_run", &self.dry_run)
            .field("smoke", &self.smoke)
            .field("json", &self.json)
            .field("retries", &self.retries)
            .field("timeout", &self.timeout)
            .field("deadline", &self.deadline)
            .field("poll_interval", &self.poll_interval)
            .field("role", &self.role)
            .field("parent_branch", &self.parent_branch)
            .field("backend", &self.backend)
            .field("api_base", &self.api_base)
            .field("neon_api_key", &secret(&self.neon_api_key))
            .field(
                "gateway_url",
                &self.gateway_url.as_deref().map(redact_credentials),
            )
            .field("admin_token", &secret(&self.admin_token))
            .finish()
    }
}

/// Everything one bootstrap run needs, validated.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    pub provider: Provider,
    pub database_name: String,
    pub organization_id: Option<String>,
    pub parent_branch_id: Option<String>,
    pub role_name: String,
    pub schema_path: PathBuf,
    pub migrations_dir: Option<PathBuf>,
    pub dry_run: bool,
    pub smoke: bool,
    pub json: bool,
    pub retry: RetryPolicy,
    pub provision: ProvisionSettings,
    pub backend: Backend,
}

impl BootstrapConfig {
    pub fn provision_request(&self) -> ProvisionRequest {
        ProvisionRequest {
            provider: self.provider,
            database_name: self.database_name.clone(),
            organization_id: self.organization_id.clone(),
            parent_branch_id: self.parent_branch_id.clone(),
            role_name: self.role_name.clone(),
        }
    }
}

/// Token file written by `neonctl auth`.
#[derive(Deserialize)]
struct NeonctlCredentials {
    access_token: String,
}

/// Default location of the neonctl credentials file.
pub fn neonctl_credentials_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".config").join("neonctl").join("credentials.json"))
}

/// Access token from a neonctl credentials file, if present and well-formed.
pub fn read_neonctl_token(path: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str::<NeonctlCredentials>(&raw) {
        Ok(creds) => non_empty(Some(creds.access_token)),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring malformed neonctl credentials");
            None
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(raw.as_ref()).as_ref())
}

fn parse_http_url(field: &'static str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::Invalid {
        field,
        reason: format!("{raw:?} is not a valid URL ({e})"),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("{raw:?} must be an http(s) URL"),
        });
    }
    Ok(url)
}

impl BootstrapArgs {
    /// Use the neonctl token when no API key was given and the Neon API may be used.
    pub fn with_neonctl_fallback(mut self, credentials: Option<&Path>) -> Self {
        let wants_neon = self.provider == Provider::Neon && self.backend != BackendKind::Gateway;
        if wants_neon && non_empty(self.neon_api_key.clone()).is_none() {
            if let Some(token) = credentials.and_then(read_neonctl_token) {
                tracing::debug!("Using neonctl credentials");
                self.neon_api_key = Some(token);
            }
        }
        self
    }

    /// Validate flags and credentials. Performs no network or database access.
    pub fn into_config(self) -> Result<BootstrapConfig, ConfigError> {
        let database_name = self.name.trim().to_string();
        if database_name.is_empty() {
            return Err(ConfigError::Missing("--name"));
        }
        let role_name = self.role.trim().to_string();
        if role_name.is_empty() {
            return Err(ConfigError::Missing("--role"));
        }
        if self.retries == 0 {
            return Err(ConfigError::Invalid {
                field: "--retries",
                reason: "must be at least 1".to_string(),
            });
        }
        for (field, value) in [
            ("--timeout", self.timeout),
            ("--deadline", self.deadline),
            ("--poll-interval", self.poll_interval),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        if self.schema.as_os_str().is_empty() {
            return Err(ConfigError::Missing("--schema"));
        }
        let schema_path = expand_path(&self.schema);
        if !schema_path.is_file() {
            return Err(ConfigError::Invalid {
                field: "--schema",
                reason: format!("{} is not a readable file", schema_path.display()),
            });
        }
        let migrations_dir = self.migrations.as_deref().map(expand_path);

        let organization_id = non_empty(self.org);
        let neon_api_key = non_empty(self.neon_api_key);
        let kind = match self.backend {
            BackendKind::Auto if self.provider == Provider::Neon && neon_api_key.is_some() => {
                BackendKind::Neon
            }
            BackendKind::Auto => BackendKind::Gateway,
            explicit => explicit,
        };

        let backend = match kind {
            BackendKind::Neon => {
                if self.provider != Provider::Neon {
                    return Err(ConfigError::Invalid {
                        field: "--backend",
                        reason: format!("the neon backend cannot provision {}", self.provider),
                    });
                }
                Backend::Neon {
                    api_base: parse_http_url("--api-base", &self.api_base)?,
                    api_key: neon_api_key.ok_or(ConfigError::Missing("NEON_API_KEY"))?,
                    project_id: organization_id
                        .clone()
                        .ok_or(ConfigError::Missing("--org"))?,
                }
            }
            _ => {
                let raw = non_empty(self.gateway_url)
                    .ok_or(ConfigError::Missing("BOOTSTRAP_GATEWAY_URL"))?;
                Backend::Gateway {
                    url: parse_http_url("BOOTSTRAP_GATEWAY_URL", &raw)?,
                    token: non_empty(self.admin_token)
                        .ok_or(ConfigError::Missing("BOOTSTRAP_ADMIN_TOKEN"))?,
                }
            }
        };

        Ok(BootstrapConfig {
            provider: self.provider,
            database_name,
            organization_id,
            parent_branch_id: non_empty(self.parent_branch),
            role_name,
            schema_path,
            migrations_dir,
            dry_run: self.dry_run,
            smoke: self.smoke,
            json: self.json,
            retry: RetryPolicy {
                max_attempts: self.retries,
                timeout_per_attempt: Duration::from_millis(self.timeout),
                ..RetryPolicy::default()
            },
            provision: ProvisionSettings {
                poll_interval: Duration::from_millis(self.poll_interval),
                deadline: Duration::from_millis(self.deadline),
            },
            backend,
        })
    }
}
