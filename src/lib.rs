//! Provision a managed Postgres database and bring it to a known schema.
//!
//! A run creates a Neon branch, compute endpoint and database (or asks a
//! provisioning gateway for one), rolls back whatever it created if a later
//! step fails, then applies a baseline schema and ordered, checksummed
//! migrations over a single connection.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod provision;
pub mod redact;

pub use config::{BootstrapArgs, BootstrapConfig};
pub use error::BootstrapError;
pub use models::BootstrapResult;
pub use orchestrator::BootstrapOrchestrator;
