//! MCP server implementation with tool handlers
//!
//! Implements the `ServerHandler` trait and registers the five Gmail tools.
//! Handles input validation, business logic orchestration, and response
//! formatting. Every error is converted into a plain-text response at this
//! boundary; batch operations collect per-item outcomes instead of aborting
//! on the first failure.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content, ErrorData, ServerCapabilities, ServerInfo};
use rmcp::{ServerHandler, tool, tool_handler, tool_router};

use crate::auth::{Authenticator, FileTokenStore};
use crate::config::ServerConfig;
use crate::errors::{AppError, AppResult};
use crate::files;
use crate::gmail::{GmailClient, Header, MailTransport};
use crate::mime;
use crate::models::{
    ArchiveEmailInput, EmailFormat, GetAttachmentsInput, GetEmailInput, ListEmailsInput,
};
use crate::query::{self, FilterSpec};

/// Snippet length shown in list results before truncation
const SNIPPET_MAX_CHARS: usize = 100;
/// Messages returned by list_emails when max_results is absent or 0
const DEFAULT_MAX_RESULTS: usize = 10;
/// Hard cap on messages returned by list_emails
const MAX_RESULTS_LIMIT: usize = 50;

/// Gmail MCP server
///
/// Holds shared configuration and the credential gate. Implements MCP tool
/// handlers via `#[tool]` attribute macro and `ServerHandler` trait.
#[derive(Clone)]
pub struct GmailServer {
    /// Server config (paths, endpoints, timeouts)
    config: Arc<ServerConfig>,
    /// Credential gate wrapping the token store
    auth: Arc<Authenticator>,
    /// Shared HTTP connection pool
    http: reqwest::Client,
    /// Tool router for dispatching MCP tool calls
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl GmailServer {
    /// Create a new MCP server instance
    ///
    /// Builds the shared HTTP client and wires the file-backed token store
    /// into the credential gate.
    pub fn new(config: ServerConfig) -> AppResult<Self> {
        let config = Arc::new(config);
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.http_timeout_ms))
            .build()
            .map_err(|e| AppError::Internal(format!("failed building HTTP client: {e}")))?;
        let store = Arc::new(FileTokenStore::new(config.token_path.clone()));
        let auth = Arc::new(Authenticator::new(config.clone(), store, http.clone()));

        Ok(Self {
            config,
            auth,
            http,
            tool_router: Self::tool_router(),
        })
    }

    /// Tool: Authenticate with Gmail
    ///
    /// Reuses or silently refreshes a stored token when possible; otherwise
    /// opens a browser for OAuth consent.
    #[tool(
        name = "authenticate",
        description = "Authenticate with Gmail. Opens browser for OAuth login."
    )]
    async fn authenticate(&self) -> Result<CallToolResult, ErrorData> {
        let text = match self.authenticate_impl().await {
            Ok(text) => text,
            Err(e @ AppError::CredentialsFileMissing(_)) => format!("Error: {e}"),
            Err(e) => format!("Error during authentication: {e}"),
        };
        Ok(text_block(text))
    }

    /// Tool: List recent emails
    ///
    /// Optional label/category/unread/raw-query filters combine with AND
    /// logic. Returns a numbered summary with snippet previews.
    #[tool(
        name = "list_emails",
        description = "List recent emails from Gmail with optional label, category, and unread filters"
    )]
    async fn list_emails(
        &self,
        Parameters(input): Parameters<ListEmailsInput>,
    ) -> Result<CallToolResult, ErrorData> {
        Ok(respond(self.list_emails_impl(input).await))
    }

    /// Tool: Read a single email
    ///
    /// Returns headers, the decoded body in the requested format, and an
    /// attachment summary.
    #[tool(
        name = "get_email",
        description = "Read the full content of an email by ID"
    )]
    async fn get_email(
        &self,
        Parameters(input): Parameters<GetEmailInput>,
    ) -> Result<CallToolResult, ErrorData> {
        Ok(respond(self.get_email_impl(input).await))
    }

    /// Tool: Download attachments
    ///
    /// Saves all attachments (or one selected by exact filename) to the
    /// target directory, resolving filename collisions.
    #[tool(
        name = "get_attachments",
        description = "Download attachments from an email to a local directory"
    )]
    async fn get_attachments(
        &self,
        Parameters(input): Parameters<GetAttachmentsInput>,
    ) -> Result<CallToolResult, ErrorData> {
        Ok(respond(self.get_attachments_impl(input).await))
    }

    /// Tool: Archive emails
    ///
    /// Removes the INBOX label from each message independently and reports
    /// per-item successes and failures without aborting early.
    #[tool(
        name = "archive_email",
        description = "Archive one or more emails by removing them from the inbox"
    )]
    async fn archive_email(
        &self,
        Parameters(input): Parameters<ArchiveEmailInput>,
    ) -> Result<CallToolResult, ErrorData> {
        Ok(respond(self.archive_email_impl(input).await))
    }
}

/// MCP server handler implementation
///
/// Provides server info and capabilities to the MCP client.
#[tool_handler(router = self.tool_router)]
impl ServerHandler for GmailServer {
    fn get_info(&self) -> ServerInfo {
        let mut info = ServerInfo::default();
        info.instructions = Some(
            "Gmail MCP server. Call the 'authenticate' tool first to grant access via browser consent.".to_owned(),
        );
        info.capabilities = ServerCapabilities::builder().enable_tools().build();
        info
    }
}

/// Tool implementation methods
///
/// Private methods handle argument validation and orchestration for each
/// tool, separated from the public `#[tool]` methods that handle response
/// formatting. Authentication and validation run before any network call.
impl GmailServer {
    /// Build a Gmail client bound to the given access token
    fn client(&self, access_token: String) -> GmailClient {
        GmailClient::new(
            self.http.clone(),
            self.config.api_base_url.clone(),
            access_token,
        )
    }

    /// Produce a connected client, refreshing the stored token if needed
    async fn connect(&self) -> AppResult<GmailClient> {
        let access_token = self.auth.access_token().await?;
        Ok(self.client(access_token))
    }

    /// Fail fast when no token bundle is stored
    fn require_authenticated(&self) -> AppResult<()> {
        if self.auth.is_authenticated() {
            Ok(())
        } else {
            Err(AppError::NotAuthenticated)
        }
    }

    async fn authenticate_impl(&self) -> AppResult<String> {
        let bundle = self.auth.authenticate().await?;
        let client = self.client(bundle.access_token);
        let profile = client.get_profile().await?;
        Ok(format!(
            "Successfully authenticated as {}\nGmail MCP is ready to use.",
            profile.email_address
        ))
    }

    async fn list_emails_impl(&self, input: ListEmailsInput) -> AppResult<String> {
        self.require_authenticated()?;
        let client = self.connect().await?;
        list_emails(&client, &input).await
    }

    async fn get_email_impl(&self, input: GetEmailInput) -> AppResult<String> {
        self.require_authenticated()?;
        let email_id = required_arg(&input.email_id, "email_id")?;
        let client = self.connect().await?;
        get_email(&client, email_id, input.format).await
    }

    async fn get_attachments_impl(&self, input: GetAttachmentsInput) -> AppResult<String> {
        self.require_authenticated()?;
        let email_id = required_arg(&input.email_id, "email_id")?;
        let target_dir = input
            .save_to
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.config.downloads_dir.clone());
        let client = self.connect().await?;
        get_attachments(&client, email_id, input.filename.as_deref(), &target_dir).await
    }

    async fn archive_email_impl(&self, input: ArchiveEmailInput) -> AppResult<String> {
        self.require_authenticated()?;
        if input.email_ids.is_empty() {
            return Err(AppError::invalid("email_ids is required"));
        }
        let client = self.connect().await?;
        Ok(archive_emails(&client, &input.email_ids).await)
    }
}

/// List emails matching the input filters and format a numbered summary
pub(crate) async fn list_emails(
    transport: &dyn MailTransport,
    input: &ListEmailsInput,
) -> AppResult<String> {
    let max_results = clamp_max_results(input.max_results);
    let resolved = query::build(&FilterSpec {
        label: input.label.clone(),
        category: input.category,
        unread_only: input.unread_only.unwrap_or(false),
        raw_query: input.query.clone(),
    });

    let refs = transport
        .list_messages(&resolved.label_ids, resolved.query.as_deref(), max_results)
        .await?;
    if refs.is_empty() {
        return Ok("No emails found.".to_owned());
    }

    let mut out = format!("Found {} emails:\n", refs.len());
    for (index, msg_ref) in refs.iter().enumerate() {
        let message = transport.get_message_metadata(&msg_ref.id).await?;
        let headers = message_headers(&message.payload);
        out.push_str(&format!(
            "\n{}. ID: {}\n   From: {}\n   Subject: {}\n   Date: {}\n   Snippet: {}\n",
            index + 1,
            message.id,
            header_value(headers, "From").unwrap_or("Unknown"),
            header_value(headers, "Subject").unwrap_or("No Subject"),
            header_value(headers, "Date").unwrap_or("Unknown"),
            snippet_line(message.snippet.as_deref().unwrap_or("")),
        ));
    }
    Ok(out)
}

/// Fetch one email and format headers, body, and attachment summary
pub(crate) async fn get_email(
    transport: &dyn MailTransport,
    email_id: &str,
    format: EmailFormat,
) -> AppResult<String> {
    let message = transport.get_message_full(email_id).await?;
    let headers = message_headers(&message.payload);
    let extraction = message
        .payload
        .as_ref()
        .map(mime::extract)
        .unwrap_or_default();

    let mut out = format!(
        "From: {}\nTo: {}\nSubject: {}\nDate: {}\n",
        header_value(headers, "From").unwrap_or("Unknown"),
        header_value(headers, "To").unwrap_or("Unknown"),
        header_value(headers, "Subject").unwrap_or("No Subject"),
        header_value(headers, "Date").unwrap_or("Unknown"),
    );
    out.push('\n');

    match format {
        EmailFormat::Full => match (&extraction.body_text, &extraction.body_html) {
            (None, None) => out.push_str("(No body content)\n"),
            (text, html) => {
                if let Some(text) = text {
                    out.push_str(text);
                    out.push('\n');
                }
                if let Some(html) = html {
                    if text.is_some() {
                        out.push_str("\n--- HTML version ---\n");
                    }
                    out.push_str(html);
                    out.push('\n');
                }
            }
        },
        EmailFormat::TextOnly => {
            out.push_str(
                extraction
                    .body_text
                    .as_deref()
                    .unwrap_or("(Text body not available)"),
            );
            out.push('\n');
        }
        EmailFormat::HtmlOnly => {
            out.push_str(
                extraction
                    .body_html
                    .as_deref()
                    .unwrap_or("(HTML body not available)"),
            );
            out.push('\n');
        }
    }

    if !extraction.attachments.is_empty() {
        out.push_str(&format!(
            "\nAttachments ({}):\n",
            extraction.attachments.len()
        ));
        for attachment in &extraction.attachments {
            out.push_str(&format!(
                "  - {} ({}, {})\n",
                attachment.filename,
                attachment.mime_type,
                format_size_kb(attachment.size_bytes)
            ));
        }
    }

    Ok(out)
}

/// Download attachments to `target_dir` and report the written paths
///
/// A filename filter that matches nothing is a reported condition, not an
/// error: the call succeeds structurally with zero downloads.
pub(crate) async fn get_attachments(
    transport: &dyn MailTransport,
    email_id: &str,
    filename_filter: Option<&str>,
    target_dir: &Path,
) -> AppResult<String> {
    let message = transport.get_message_full(email_id).await?;
    let extraction = message
        .payload
        .as_ref()
        .map(mime::extract)
        .unwrap_or_default();

    if extraction.attachments.is_empty() {
        return Ok("No attachments found in this email.".to_owned());
    }

    let selected: Vec<_> = match filename_filter {
        Some(name) => {
            let matching: Vec<_> = extraction
                .attachments
                .iter()
                .filter(|a| a.filename == name)
                .collect();
            if matching.is_empty() {
                return Ok(format!("Attachment '{name}' not found in this email."));
            }
            matching
        }
        None => extraction.attachments.iter().collect(),
    };

    fs::create_dir_all(target_dir).map_err(|e| {
        AppError::Internal(format!(
            "failed creating download directory {}: {e}",
            target_dir.display()
        ))
    })?;

    let mut saved_paths = Vec::with_capacity(selected.len());
    for attachment in selected {
        let bytes = transport
            .get_attachment_data(email_id, &attachment.id)
            .await?;
        let safe_name = files::sanitize_filename(&attachment.filename);
        let path = files::unique_path(target_dir, &safe_name);
        fs::write(&path, &bytes).map_err(|e| {
            AppError::Internal(format!("failed writing {}: {e}", path.display()))
        })?;
        saved_paths.push(path);
    }

    let mut out = format!(
        "Downloaded {} attachment(s) to {}:\n",
        saved_paths.len(),
        target_dir.display()
    );
    for path in &saved_paths {
        out.push_str(&format!("  - {}\n", path.display()));
    }
    Ok(out)
}

/// Archive each message independently and aggregate the outcomes
///
/// Never aborts early: every ID is attempted, and both the success and the
/// failure lists preserve input order.
pub(crate) async fn archive_emails(transport: &dyn MailTransport, email_ids: &[String]) -> String {
    let remove_labels = ["INBOX".to_owned()];
    let mut archived = Vec::new();
    let mut failed: Vec<(String, String)> = Vec::new();

    for id in email_ids {
        match transport.modify_message(id, &remove_labels).await {
            Ok(()) => archived.push(id.clone()),
            Err(e) => failed.push((id.clone(), e.item_reason())),
        }
    }

    let mut out = String::new();
    if !archived.is_empty() {
        out.push_str(&format!(
            "Archived {} email(s): {}\n",
            archived.len(),
            archived.join(", ")
        ));
    }
    if !failed.is_empty() {
        out.push_str(&format!("Failed to archive {} email(s):\n", failed.len()));
        for (id, reason) in &failed {
            out.push_str(&format!("  {id}: {reason}\n"));
        }
    }
    out
}

/// Wrap text into a single-block tool result
fn text_block(text: String) -> CallToolResult {
    CallToolResult::success(vec![Content::text(text)])
}

/// Convert a tool outcome into a uniform text response
///
/// Errors become `Error: …` text blocks rather than protocol faults, so the
/// response channel is identical for success and failure.
fn respond(result: AppResult<String>) -> CallToolResult {
    match result {
        Ok(text) => text_block(text),
        Err(e) => text_block(format!("Error: {e}")),
    }
}

/// Clamp max_results into `[1, 50]`, defaulting absent or 0 to 10
fn clamp_max_results(input: Option<usize>) -> usize {
    match input {
        None | Some(0) => DEFAULT_MAX_RESULTS,
        Some(n) => n.min(MAX_RESULTS_LIMIT),
    }
}

/// Reject empty required string arguments
fn required_arg<'a>(value: &'a str, name: &str) -> AppResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::invalid(format!("{name} is required")));
    }
    Ok(trimmed)
}

/// Headers of a message's root part, empty when absent
fn message_headers(payload: &Option<crate::gmail::MessagePart>) -> &[Header] {
    payload
        .as_ref()
        .and_then(|p| p.headers.as_deref())
        .unwrap_or(&[])
}

/// Get header value by case-insensitive name
fn header_value<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// Truncate a snippet to the preview length, marking longer ones with `...`
fn snippet_line(snippet: &str) -> String {
    if snippet.chars().count() > SNIPPET_MAX_CHARS {
        format!("{}...", mime::truncate_chars(snippet, SNIPPET_MAX_CHARS))
    } else {
        snippet.to_owned()
    }
}

/// Attachment size in KB to one decimal
fn format_size_kb(size_bytes: u64) -> String {
    format!("{:.1} KB", size_bytes as f64 / 1024.0)
}
