//! Configuration module for paths, endpoints, and server settings
//!
//! All configuration is loaded from environment variables following the
//! pattern `GMAIL_MCP_<KEY>`, with platform defaults for anything unset.
//! Endpoint overrides exist so tests and self-hosted proxies can redirect
//! Gmail/OAuth traffic without code changes.

use std::env;
use std::env::VarError;
use std::path::PathBuf;

use crate::errors::{AppError, AppResult};

/// Default Gmail REST API base URL
const DEFAULT_API_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1";
/// Default Google OAuth consent endpoint
const DEFAULT_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
/// Default Google OAuth token endpoint (code exchange and refresh)
const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Server-wide configuration
///
/// Wraps all filesystem paths and endpoint settings. Cloned into MCP tool
/// handlers via `Arc` for thread-safe shared access.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Configuration directory (default `<platform config dir>/gmail-mcp`)
    pub config_dir: PathBuf,
    /// OAuth client configuration downloaded from Google Cloud Console
    pub credentials_path: PathBuf,
    /// Persisted token bundle location
    pub token_path: PathBuf,
    /// Default directory for attachment downloads
    pub downloads_dir: PathBuf,
    /// HTTP request timeout in milliseconds
    pub http_timeout_ms: u64,
    /// Gmail REST API base URL
    pub api_base_url: String,
    /// OAuth consent endpoint
    pub auth_url: String,
    /// OAuth token endpoint
    pub token_url: String,
    /// First port tried for the loopback OAuth callback listener
    pub oauth_port_start: u16,
    /// Last port tried for the loopback OAuth callback listener
    pub oauth_port_end: u16,
}

impl ServerConfig {
    /// Load all configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if a variable is set but malformed, or if no
    /// platform config/downloads directory can be determined and no override
    /// is provided.
    ///
    /// # Example Environment
    ///
    /// ```text
    /// GMAIL_MCP_CONFIG_DIR=/home/user/.config/gmail-mcp
    /// GMAIL_MCP_DOWNLOADS_DIR=/home/user/Downloads
    /// GMAIL_MCP_HTTP_TIMEOUT_MS=30000
    /// ```
    pub fn load_from_env() -> AppResult<Self> {
        let config_dir = match path_env("GMAIL_MCP_CONFIG_DIR") {
            Some(dir) => dir,
            None => default_config_dir()?,
        };
        let credentials_path = path_env("GMAIL_MCP_CREDENTIALS_PATH")
            .unwrap_or_else(|| config_dir.join("credentials.json"));
        let token_path =
            path_env("GMAIL_MCP_TOKEN_PATH").unwrap_or_else(|| config_dir.join("token.json"));
        let downloads_dir = match path_env("GMAIL_MCP_DOWNLOADS_DIR") {
            Some(dir) => dir,
            None => default_downloads_dir()?,
        };

        let oauth_port_start = parse_u16_env("GMAIL_MCP_OAUTH_PORT_START", 8080)?;
        let oauth_port_end = parse_u16_env("GMAIL_MCP_OAUTH_PORT_END", 8090)?;
        validate_port_range(oauth_port_start, oauth_port_end)?;

        Ok(Self {
            config_dir,
            credentials_path,
            token_path,
            downloads_dir,
            http_timeout_ms: parse_u64_env("GMAIL_MCP_HTTP_TIMEOUT_MS", 30_000)?,
            api_base_url: string_env("GMAIL_MCP_API_BASE_URL", DEFAULT_API_BASE_URL),
            auth_url: string_env("GMAIL_MCP_AUTH_URL", DEFAULT_AUTH_URL),
            token_url: string_env("GMAIL_MCP_TOKEN_URL", DEFAULT_TOKEN_URL),
            oauth_port_start,
            oauth_port_end,
        })
    }
}

/// Default config directory: `<platform config dir>/gmail-mcp`
fn default_config_dir() -> AppResult<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join("gmail-mcp"))
        .ok_or_else(|| {
            AppError::InvalidInput(
                "no platform config directory found; set GMAIL_MCP_CONFIG_DIR".to_owned(),
            )
        })
}

/// Default downloads directory: platform downloads dir, or `~/Downloads`
fn default_downloads_dir() -> AppResult<PathBuf> {
    dirs::download_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Downloads")))
        .ok_or_else(|| {
            AppError::InvalidInput(
                "no downloads directory found; set GMAIL_MCP_DOWNLOADS_DIR".to_owned(),
            )
        })
}

fn validate_port_range(start: u16, end: u16) -> AppResult<()> {
    if start == 0 || start > end {
        return Err(AppError::InvalidInput(format!(
            "invalid OAuth callback port range {start}..{end}"
        )));
    }
    Ok(())
}

/// Read an optional path environment variable
///
/// Empty or whitespace-only values are treated as unset.
fn path_env(key: &str) -> Option<PathBuf> {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
}

/// Read a string environment variable with default fallback
fn string_env(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_owned())
}

/// Parse a `u16` environment variable with default fallback
///
/// Returns `default` if unset.
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set but not a valid `u16`.
fn parse_u16_env(key: &str, default: u16) -> AppResult<u16> {
    match env::var(key) {
        Ok(v) => v.parse::<u16>().map_err(|_| {
            AppError::InvalidInput(format!("invalid u16 environment variable {key}: '{v}'"))
        }),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

/// Parse a `u64` environment variable with default fallback
///
/// Returns `default` if unset.
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set but not a valid `u64`.
fn parse_u64_env(key: &str, default: u64) -> AppResult<u64> {
    match env::var(key) {
        Ok(v) => v.parse::<u64>().map_err(|_| {
            AppError::InvalidInput(format!("invalid u64 environment variable {key}: '{v}'"))
        }),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::validate_port_range;

    #[test]
    fn accepts_sane_port_ranges() {
        validate_port_range(8080, 8090).expect("range must be valid");
        validate_port_range(9000, 9000).expect("single-port range must be valid");
    }

    #[test]
    fn rejects_inverted_or_zero_port_ranges() {
        assert!(validate_port_range(8090, 8080).is_err());
        assert!(validate_port_range(0, 8080).is_err());
    }
}
