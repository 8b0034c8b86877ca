//! Application error model
//!
//! Defines a typed error hierarchy using `thiserror`. Every tool handler
//! converts these into a plain-text response at the dispatch boundary, so the
//! response channel is uniform for success and failure. No error escapes a
//! tool call as a protocol fault.

use std::path::PathBuf;

use thiserror::Error;

/// Application error type
///
/// Covers all error cases the Gmail MCP server may encounter. The `Display`
/// text of each variant is what ends up in the user-facing response.
#[derive(Debug, Error)]
pub enum AppError {
    /// No token bundle is stored; the caller must run `authenticate` first
    #[error("Not authenticated. Please call the 'authenticate' tool first.")]
    NotAuthenticated,
    /// A token is present but a working Gmail connection could not be
    /// established (expired with no refresh token, or refresh failed)
    #[error("Failed to connect to Gmail. Please re-authenticate.")]
    ServiceUnavailable,
    /// Invalid user input (required argument missing or malformed)
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// A specific Gmail API call failed; carries the underlying message
    #[error("Gmail API error: {0}")]
    Provider(String),
    /// The local OAuth client configuration needed to start interactive
    /// consent is absent. Reported, not retried.
    #[error(
        "credentials.json not found at {}\nPlease download OAuth credentials from Google Cloud Console and save them there.",
        .0.display()
    )]
    CredentialsFileMissing(PathBuf),
    /// The interactive consent flow could not start or failed outright
    #[error("authorization flow failed: {0}")]
    AuthFlow(String),
    /// Internal error (unexpected failure, external crate error)
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Convenience constructor for `InvalidInput`
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// The reason line used in per-item failure reports
    ///
    /// Provider failures report the raw provider message; everything else
    /// reports the full display text.
    pub fn item_reason(&self) -> String {
        match self {
            Self::Provider(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

/// Type alias for fallible return values
///
/// Use this for all internal functions that can fail. Provides a consistent
/// error type throughout the codebase.
pub type AppResult<T> = Result<T, AppError>;
