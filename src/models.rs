//! Tool input DTOs
//!
//! Defines the argument structures of the MCP tool contracts. Each type is
//! annotated with `JsonSchema` for automatic schema generation. Required
//! fields are validated by the dispatcher (not the schema layer) so a missing
//! argument produces a structured text response rather than a protocol
//! fault.

use schemars::JsonSchema;
use serde::Deserialize;

use crate::query::Category;

/// Input: list_emails
///
/// All filters are optional; they combine with AND logic.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct ListEmailsInput {
    /// Maximum number of emails to return (default 10, max 50)
    pub max_results: Option<usize>,
    /// Label filter: system labels (INBOX, SENT, …) are matched natively,
    /// anything else becomes a `label:` search term
    pub label: Option<String>,
    /// Inbox category tab (primary, social, promotions, updates, forums)
    pub category: Option<Category>,
    /// Restrict to unread messages
    pub unread_only: Option<bool>,
    /// Raw Gmail search query, e.g. `from:boss@example.com newer_than:7d`
    pub query: Option<String>,
}

/// Body rendering mode for get_email
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EmailFormat {
    /// Both bodies when present
    #[default]
    Full,
    /// Plain-text body only
    TextOnly,
    /// HTML body only
    HtmlOnly,
}

/// Input: get_email
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct GetEmailInput {
    /// Message ID from list_emails (required)
    #[serde(default)]
    pub email_id: String,
    /// Body rendering mode (default `full`)
    #[serde(default)]
    pub format: EmailFormat,
}

/// Input: get_attachments
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct GetAttachmentsInput {
    /// Message ID from list_emails (required)
    #[serde(default)]
    pub email_id: String,
    /// Download only the attachment with this exact filename
    pub filename: Option<String>,
    /// Target directory (default: platform downloads directory)
    pub save_to: Option<String>,
}

/// Input: archive_email
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct ArchiveEmailInput {
    /// Message IDs to archive (required, non-empty)
    #[serde(default)]
    pub email_ids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{ArchiveEmailInput, EmailFormat, GetEmailInput, ListEmailsInput};

    #[test]
    fn list_input_defaults_to_no_filters() {
        let input: ListEmailsInput = serde_json::from_value(json!({})).expect("must deserialize");
        assert_eq!(input.max_results, None);
        assert!(input.label.is_none());
        assert!(input.category.is_none());
        assert!(input.unread_only.is_none());
        assert!(input.query.is_none());
    }

    #[test]
    fn get_email_format_defaults_to_full() {
        let input: GetEmailInput =
            serde_json::from_value(json!({"email_id": "abc"})).expect("must deserialize");
        assert_eq!(input.format, EmailFormat::Full);

        let input: GetEmailInput =
            serde_json::from_value(json!({"email_id": "abc", "format": "text_only"}))
                .expect("must deserialize");
        assert_eq!(input.format, EmailFormat::TextOnly);
    }

    #[test]
    fn missing_required_fields_deserialize_to_empty_values() {
        let input: GetEmailInput = serde_json::from_value(json!({})).expect("must deserialize");
        assert!(input.email_id.is_empty());

        let input: ArchiveEmailInput = serde_json::from_value(json!({})).expect("must deserialize");
        assert!(input.email_ids.is_empty());
    }
}
