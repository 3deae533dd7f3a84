//! HTTP clients for the provisioning APIs.

pub mod client;
pub mod gateway;
pub mod retry;

pub use client::NeonClient;
pub use gateway::GatewayClient;
pub use retry::{RetryPolicy, RetryingHttpClient};
