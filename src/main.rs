//! mail-gmail-mcp-rs: Gmail MCP server over stdio
//!
//! This server exposes a small set of Gmail operations (authenticate, list,
//! read, download attachments, archive) as MCP tools over stdio, so a
//! tool-calling client can manipulate a mailbox without embedding Gmail API
//! or OAuth details itself.
//!
//! # Architecture
//!
//! - [`main`]: Process entry point with env loading and stdio serving
//! - [`config`]: Environment-driven configuration for paths and endpoints
//! - [`errors`]: Application error model with text-response conversion
//! - [`auth`]: Credential gate, token store, and OAuth consent flow
//! - [`gmail`]: Gmail REST transport behind the `MailTransport` seam
//! - [`query`]: Filter-to-query translation with system-label handling
//! - [`mime`]: Part-tree decoding for bodies and attachment descriptors
//! - [`files`]: Filename sanitization and download collision handling
//! - [`models`]: Tool input DTOs and schema-bearing types
//! - [`server`]: MCP tool handlers with validation and aggregation

mod auth;
mod config;
mod errors;
mod files;
mod gmail;
mod mime;
mod models;
mod query;
mod server;

use config::ServerConfig;
use rmcp::ServiceExt;
use rmcp::transport::stdio;
use tracing_subscriber::EnvFilter;

/// Application entry point
///
/// Initializes tracing from environment, loads config, and serves the MCP
/// server over stdio. This process expects to be spawned by an MCP client
/// via `stdio` transport; logs go to stderr because stdout carries the
/// protocol stream.
///
/// # Environment Variables
///
/// See [`ServerConfig::load_from_env`] for full configuration options.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = ServerConfig::load_from_env()?;
    tracing::info!(config_dir = %config.config_dir.display(), "configuration loaded");
    let service = server::GmailServer::new(config)?.serve(stdio()).await?;
    service.waiting().await?;
    Ok(())
}
