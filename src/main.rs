//! Provision a Neon database and apply its schema and migrations.
//!
//! # Usage
//! ```bash
//! neon-bootstrap bootstrap --provider neon --name appdb --org <project> --schema db/schema.sql
//! neon-bootstrap bootstrap --provider neon --name appdb --schema db/schema.sql \
//!     --migrations db/migrations --dry-run --json
//! neon-bootstrap cleanup --org <project> --branch br-xxx --endpoint ep-xxx
//! ```

use std::ffi::OsString;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use neon_bootstrap::api::client::API_BASE;
use neon_bootstrap::api::{NeonClient, RetryPolicy};
use neon_bootstrap::config::{neonctl_credentials_path, read_neonctl_token};
use neon_bootstrap::models::ProvisionedResources;
use neon_bootstrap::provision::teardown;
use neon_bootstrap::{BootstrapArgs, BootstrapError, BootstrapOrchestrator, BootstrapResult};

const DEFAULT_LOG_FILTER: &str = "neon_bootstrap=info";

#[derive(Parser)]
#[command(name = "neon-bootstrap")]
#[command(about = "Provision a serverless Postgres database and bring it to a known schema")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision a database, then apply schema and migrations
    Bootstrap(BootstrapArgs),

    /// Delete an endpoint and branch left behind by an earlier run
    Cleanup(CleanupArgs),
}

#[derive(Args)]
struct CleanupArgs {
    /// Neon project id
    #[arg(long, env = "NEON_PROJECT_ID")]
    org: String,

    /// Branch to delete
    #[arg(long)]
    branch: Option<String>,

    /// Endpoint to delete
    #[arg(long)]
    endpoint: Option<String>,

    /// Neon API base URL
    #[arg(long, env = "NEON_API_BASE", default_value = API_BASE)]
    api_base: String,

    /// Neon API key
    #[arg(long, env = "NEON_API_KEY", hide_env_values = true)]
    neon_api_key: Option<String>,

    /// Attempts per API request
    #[arg(long, default_value_t = 5)]
    retries: u32,
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let raw: Vec<OsString> = std::env::args_os().collect();
    let cli = match Cli::try_parse_from(&raw) {
        Ok(cli) => cli,
        Err(e) => return ExitCode::from(usage_error(e, json_requested(&raw))),
    };

    let json = matches!(&cli.command, Commands::Bootstrap(args) if args.json);
    init_tracing(json);

    let outcome = match cli.command {
        Commands::Bootstrap(args) => cmd_bootstrap(args),
        Commands::Cleanup(args) => cmd_cleanup(args).map(|()| true),
    };

    match outcome {
        Ok(ok) => ExitCode::from(exit_status(ok)),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(exit_status(false))
        }
    }
}

/// 0 on success, 1 on any failure.
fn exit_status(ok: bool) -> u8 {
    if ok {
        0
    } else {
        1
    }
}

fn json_requested(raw: &[OsString]) -> bool {
    raw.iter().skip(1).any(|arg| arg == "--json")
}

/// Failure result for a flag error, or `None` for `--help` and `--version`.
fn usage_failure(e: &clap::Error) -> Option<BootstrapResult> {
    if !e.use_stderr() {
        return None;
    }
    // First paragraph of clap's message, without the usage hint that follows.
    let rendered = e.to_string();
    let message = rendered
        .lines()
        .take_while(|line| !line.trim().is_empty())
        .map(str::trim)
        .collect::<Vec<_>>()
        .join(" ");
    Some(BootstrapResult::failed(message.trim_start_matches("error: ")))
}

/// Flag errors exit with status 1, and in JSON mode still print one result object.
fn usage_error(e: clap::Error, json: bool) -> u8 {
    let Some(result) = usage_failure(&e) else {
        let _ = e.print();
        return exit_status(true);
    };

    if json {
        match json_line(&result) {
            Ok(line) => println!("{}", line),
            Err(err) => eprintln!("Error: {err:#}"),
        }
    } else {
        let _ = e.print();
    }
    exit_status(false)
}

/// Logs go to stderr. JSON mode keeps them off unless RUST_LOG asks for them.
fn init_tracing(json: bool) {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) if json => EnvFilter::new("off"),
        Err(_) => EnvFilter::new(DEFAULT_LOG_FILTER),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")
}

fn cmd_bootstrap(args: BootstrapArgs) -> Result<bool> {
    let json = args.json;
    let args = args.with_neonctl_fallback(neonctl_credentials_path().as_deref());

    let result = match args.into_config() {
        Ok(config) => {
            let rt = runtime()?;
            rt.block_on(async {
                match BootstrapOrchestrator::from_config(&config) {
                    Ok(orchestrator) => orchestrator.run(&config).await,
                    Err(e) => BootstrapResult::failed(&e.to_string()),
                }
            })
        }
        Err(e) => BootstrapResult::failed(&BootstrapError::from(e).to_string()),
    };

    report(&result, json)?;
    Ok(result.ok)
}

fn report(result: &BootstrapResult, json: bool) -> Result<()> {
    if json {
        println!("{}", json_line(result)?);
        return Ok(());
    }

    if !result.ok {
        eprintln!(
            "Bootstrapping failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
        return Ok(());
    }

    if let Some(url) = &result.database_url {
        println!("Database URL: {}", url);
    }
    if let Some(branch) = &result.branch_id {
        println!("Branch: {}", branch);
    }
    if let Some(endpoint) = &result.endpoint_id {
        println!("Endpoint: {}", endpoint);
    }
    if let Some(pending) = &result.pending_migrations {
        println!("Dry run. Pending migrations: {}", pending.len());
        for version in pending {
            println!("  {}", version);
        }
    } else if let Some(applied) = &result.applied_migrations {
        println!("Applied migrations: {}", applied.len());
        for version in applied {
            println!("  {}", version);
        }
    }
    if let Some(rows) = result.smoke_rows {
        println!("Smoke query: {} row(s) in _smoke", rows);
    }
    Ok(())
}

fn json_line(result: &BootstrapResult) -> Result<String> {
    serde_json::to_string(result).context("Failed to serialize result")
}

fn cmd_cleanup(args: CleanupArgs) -> Result<()> {
    if args.branch.is_none() && args.endpoint.is_none() {
        anyhow::bail!("Nothing to clean up: pass --branch and/or --endpoint");
    }

    let api_key = match args.neon_api_key {
        Some(key) => key,
        None => neonctl_credentials_path()
            .as_deref()
            .and_then(read_neonctl_token)
            .context(
                "No NEON_API_KEY set and neonctl credentials not found. Run `neonctl auth` first.",
            )?,
    };

    let policy = RetryPolicy {
        max_attempts: args.retries.max(1),
        ..RetryPolicy::default()
    };
    let client = NeonClient::with_base_url(&args.api_base, api_key, args.org, policy)
        .context("Failed to create Neon client")?;
    let resources = ProvisionedResources {
        branch_id: args.branch,
        endpoint_id: args.endpoint,
        database_created: false,
    };

    runtime()?
        .block_on(teardown(&client, &resources))
        .context("Cleanup failed")?;
    println!("Cleanup complete.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("neon-bootstrap").chain(args.iter().copied()))
    }

    #[test]
    fn unknown_provider_is_a_json_failure() {
        let err = parse(&["bootstrap", "--provider=mysql", "--name=x", "--schema=s.sql", "--json"])
            .err()
            .unwrap();

        let result = usage_failure(&err).unwrap();
        assert!(!result.ok);
        assert!(result.error.as_deref().unwrap().contains("mysql"));

        let value: serde_json::Value = serde_json::from_str(&json_line(&result).unwrap()).unwrap();
        assert_eq!(value["ok"], false);
        assert!(value["error"].as_str().unwrap().contains("--provider"));
    }

    #[test]
    fn missing_required_flag_is_a_failure() {
        let err = parse(&["bootstrap", "--provider=neon", "--schema=s.sql", "--json"])
            .err()
            .unwrap();

        let result = usage_failure(&err).unwrap();
        assert!(!result.ok);
        assert!(result.error.as_deref().unwrap().contains("--name"));
        assert_eq!(usage_error(err, true), 1);
    }

    #[test]
    fn help_and_version_are_not_failures() {
        for args in [&["--help"][..], &["--version"][..], &["bootstrap", "--help"][..]] {
            let err = parse(args).err().unwrap();
            assert!(usage_failure(&err).is_none(), "{args:?}");
        }
    }

    #[test]
    fn json_flag_detected_in_raw_args() {
        let raw: Vec<OsString> = ["neon-bootstrap", "bootstrap", "--json", "--provider=x"]
            .iter()
            .map(OsString::from)
            .collect();
        assert!(json_requested(&raw));
        assert!(!json_requested(&raw[..2]));
    }

    #[test]
    fn exit_status_follows_result() {
        assert_eq!(exit_status(true), 0);
        assert_eq!(exit_status(false), 1);
    }

    #[test]
    fn help_exits_zero() {
        let err = parse(&["--help"]).err().unwrap();
        assert_eq!(usage_error(err, false), 0);
    }

    #[test]
    fn json_output_is_one_line() {
        let result = BootstrapResult {
            ok: true,
            applied_migrations: Some(Vec::new()),
            ..BootstrapResult::default()
        };
        let line = json_line(&result).unwrap();
        assert!(!line.contains('\n'));
        assert_eq!(line, r#"{"ok":true,"appliedMigrations":[]}"#);
    }
}
