//! Library root for `analyst-bot`.
//!
//! Analyst-bot answers data questions asked in Slack:
//! - Listens for @-mentions over Socket Mode
//! - Sends the question to Snowflake Cortex Analyst, with a fixed semantic model
//! - Runs the generated SQL on the warehouse
//! - Replies in the thread with the answer, the SQL, and an optional summary
//!
//! The architecture is built around extensible traits that allow for different
//! implementations of each service.

pub mod base;
pub mod interaction;
pub mod runtime;
pub mod service;

use anyhow::anyhow;
use base::{config::Config, types::Void};
use rustls::crypto;
use tracing::info;

/// Public async entry for the binary crate.
///
/// Sets up necessary services and starts the analyst-bot runtime:
/// - Initializes the crypto provider
/// - Creates the runtime context with warehouse, analyst, and chat clients
/// - Starts the main event loop for processing mentions
pub async fn start(config: Config) -> Void {
    info!("Starting analyst-bot ...");

    // Start the crypto provider.
    crypto::ring::default_provider().install_default().map_err(|_| anyhow!("Failed to install the rustls crypto provider."))?;

    // Initialize the runtime.
    let runtime = runtime::Runtime::new(config).await?;

    // Start the runtime.
    runtime.start().await?;

    Ok(())
}
