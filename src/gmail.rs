//! Gmail REST transport
//!
//! Owns every network call to the Gmail v1 API. Operations are grouped
//! behind the [`MailTransport`] trait so the tool handlers can be driven by
//! an in-memory transport in tests. Calls surface provider failures
//! immediately as [`AppError::Provider`]; there is no retry at this layer.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use serde_json::json;

use crate::errors::{AppError, AppResult};
use crate::mime::decode_base64url;

/// Longest provider error body echoed back to the caller
const ERROR_BODY_MAX_LEN: usize = 200;

/// Gmail profile response
#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    /// The authenticated account's address
    #[serde(rename = "emailAddress")]
    pub email_address: String,
}

/// One entry of a `messages.list` response
#[derive(Debug, Clone, Deserialize)]
pub struct MessageRef {
    /// Message identifier
    pub id: String,
}

/// `messages.list` response body
#[derive(Debug, Clone, Deserialize)]
struct MessageListResponse {
    messages: Option<Vec<MessageRef>>,
}

/// A single Gmail message (metadata or full format)
#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    /// Message identifier
    pub id: String,
    /// Short plain-text preview supplied by Gmail
    pub snippet: Option<String>,
    /// Root of the MIME part tree (absent in minimal formats)
    pub payload: Option<MessagePart>,
}

/// One node of a message's MIME part tree
///
/// A node is either a leaf (text, HTML, or attachment) or a container whose
/// `parts` hold child nodes. The tree is provider-supplied and read-only for
/// the duration of one call; nesting depth is unbounded.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessagePart {
    /// MIME type, e.g. `text/plain` or `multipart/alternative`
    #[serde(rename = "mimeType")]
    pub mime_type: Option<String>,
    /// Attachment filename, empty or absent for body parts
    pub filename: Option<String>,
    /// Message headers (present on the root part)
    pub headers: Option<Vec<Header>>,
    /// Inline payload or attachment reference
    pub body: Option<PartBody>,
    /// Child parts for multipart containers
    pub parts: Option<Vec<MessagePart>>,
}

/// Name/value header pair
#[derive(Debug, Clone, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// Body payload of a MIME part
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartBody {
    /// Size in bytes as reported by Gmail; may be 0
    pub size: Option<u64>,
    /// Base64url-encoded inline data
    pub data: Option<String>,
    /// Reference for separately-fetched attachment bytes
    #[serde(rename = "attachmentId")]
    pub attachment_id: Option<String>,
}

/// `attachments.get` response body
#[derive(Debug, Clone, Deserialize)]
struct AttachmentResponse {
    data: Option<String>,
}

/// `messages.send` response body
#[derive(Debug, Clone, Deserialize)]
struct SendResponse {
    id: String,
}

/// Mail provider operations consumed by the tool handlers
///
/// Each call is blocking-style request/response and may fail independently.
/// `send_message` and `delete_message` exist for the live integration
/// harness; the tool surface itself never sends or deletes.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// List message IDs matching the given label IDs and query
    ///
    /// `query=None` omits the `q` parameter entirely (distinct from an empty
    /// query as far as Gmail is concerned).
    async fn list_messages(
        &self,
        label_ids: &[String],
        query: Option<&str>,
        max_results: usize,
    ) -> AppResult<Vec<MessageRef>>;

    /// Fetch a message in metadata format (headers + snippet, no bodies)
    async fn get_message_metadata(&self, id: &str) -> AppResult<Message>;

    /// Fetch a message in full format (complete part tree)
    async fn get_message_full(&self, id: &str) -> AppResult<Message>;

    /// Download attachment bytes by reference
    async fn get_attachment_data(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> AppResult<Vec<u8>>;

    /// Remove labels from a message
    async fn modify_message(&self, id: &str, remove_label_ids: &[String]) -> AppResult<()>;

    /// Send a raw RFC822 message; returns the new message ID
    async fn send_message(&self, raw: &[u8]) -> AppResult<String>;

    /// Permanently delete a message
    async fn delete_message(&self, id: &str) -> AppResult<()>;

    /// Look up the authenticated account's profile
    async fn get_profile(&self) -> AppResult<Profile>;
}

/// Gmail REST client bound to one access token
///
/// Constructed per tool call after the credential gate has produced a usable
/// token. `reqwest::Client` is cheaply clonable, so the server shares one
/// connection pool across calls.
#[derive(Debug, Clone)]
pub struct GmailClient {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl GmailClient {
    /// Create a client for the given API base URL and bearer token
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, access_token: String) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            access_token,
        }
    }

    /// Execute a GET request and deserialize the JSON response
    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: String) -> AppResult<T> {
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.access_token)
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|e| AppError::Provider(format!("request failed: {e}")))?;
        read_json(response).await
    }

    /// Execute a POST request with a JSON body and deserialize the response
    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        url: String,
        body: serde_json::Value,
    ) -> AppResult<T> {
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Provider(format!("request failed: {e}")))?;
        read_json(response).await
    }
}

#[async_trait]
impl MailTransport for GmailClient {
    async fn list_messages(
        &self,
        label_ids: &[String],
        query: Option<&str>,
        max_results: usize,
    ) -> AppResult<Vec<MessageRef>> {
        let mut url = format!(
            "{}/users/me/messages?maxResults={max_results}",
            self.base_url
        );
        for label_id in label_ids {
            url.push_str("&labelIds=");
            url.push_str(&urlencoding::encode(label_id));
        }
        if let Some(q) = query {
            url.push_str("&q=");
            url.push_str(&urlencoding::encode(q));
        }

        let list: MessageListResponse = self.get_json(url).await?;
        Ok(list.messages.unwrap_or_default())
    }

    async fn get_message_metadata(&self, id: &str) -> AppResult<Message> {
        let url = format!(
            "{}/users/me/messages/{}?format=metadata",
            self.base_url,
            urlencoding::encode(id)
        );
        self.get_json(url).await
    }

    async fn get_message_full(&self, id: &str) -> AppResult<Message> {
        let url = format!(
            "{}/users/me/messages/{}?format=full",
            self.base_url,
            urlencoding::encode(id)
        );
        self.get_json(url).await
    }

    async fn get_attachment_data(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> AppResult<Vec<u8>> {
        let url = format!(
            "{}/users/me/messages/{}/attachments/{}",
            self.base_url,
            urlencoding::encode(message_id),
            urlencoding::encode(attachment_id)
        );
        let attachment: AttachmentResponse = self.get_json(url).await?;
        let data = attachment
            .data
            .ok_or_else(|| AppError::Provider("attachment response carried no data".to_owned()))?;
        decode_base64url(&data)
            .ok_or_else(|| AppError::Provider("attachment data is not valid base64url".to_owned()))
    }

    async fn modify_message(&self, id: &str, remove_label_ids: &[String]) -> AppResult<()> {
        let url = format!(
            "{}/users/me/messages/{}/modify",
            self.base_url,
            urlencoding::encode(id)
        );
        let _: serde_json::Value = self
            .post_json(url, json!({ "removeLabelIds": remove_label_ids }))
            .await?;
        Ok(())
    }

    async fn send_message(&self, raw: &[u8]) -> AppResult<String> {
        let url = format!("{}/users/me/messages/send", self.base_url);
        let sent: SendResponse = self
            .post_json(url, json!({ "raw": URL_SAFE_NO_PAD.encode(raw) }))
            .await?;
        Ok(sent.id)
    }

    async fn delete_message(&self, id: &str) -> AppResult<()> {
        let url = format!(
            "{}/users/me/messages/{}",
            self.base_url,
            urlencoding::encode(id)
        );
        let response = self
            .http
            .delete(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| AppError::Provider(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(provider_error(status, &body));
        }
        Ok(())
    }

    async fn get_profile(&self) -> AppResult<Profile> {
        let url = format!("{}/users/me/profile", self.base_url);
        self.get_json(url).await
    }
}

/// Check status and deserialize a JSON response body
async fn read_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> AppResult<T> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| AppError::Provider(format!("failed reading response body: {e}")))?;
    if !status.is_success() {
        return Err(provider_error(status, &body));
    }
    serde_json::from_str(&body)
        .map_err(|e| AppError::Provider(format!("unexpected response shape: {e}")))
}

/// Build a provider error from an HTTP status and (truncated) body
fn provider_error(status: reqwest::StatusCode, body: &str) -> AppError {
    let trimmed = body.trim();
    let echoed: String = if trimmed.chars().count() > ERROR_BODY_MAX_LEN {
        let head: String = trimmed.chars().take(ERROR_BODY_MAX_LEN).collect();
        format!("{head}…")
    } else {
        trimmed.to_owned()
    };
    AppError::Provider(format!("status {status}: {echoed}"))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{Message, MessagePart, provider_error};

    #[test]
    fn deserializes_full_message_with_nested_parts() {
        let message: Message = serde_json::from_value(json!({
            "id": "msg1",
            "snippet": "Hello",
            "payload": {
                "mimeType": "multipart/mixed",
                "headers": [{"name": "Subject", "value": "Hi"}],
                "parts": [
                    {"mimeType": "text/plain", "body": {"data": "SGVsbG8", "size": 5}},
                    {
                        "mimeType": "application/pdf",
                        "filename": "doc.pdf",
                        "body": {"attachmentId": "att1", "size": 1024}
                    }
                ]
            }
        }))
        .expect("message must deserialize");

        let payload = message.payload.expect("payload present");
        let parts = payload.parts.expect("parts present");
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].filename.as_deref(), Some("doc.pdf"));
        assert_eq!(
            parts[1]
                .body
                .as_ref()
                .and_then(|b| b.attachment_id.as_deref()),
            Some("att1")
        );
    }

    #[test]
    fn tolerates_minimal_part_shapes() {
        let part: MessagePart =
            serde_json::from_value(json!({})).expect("empty part must deserialize");
        assert!(part.mime_type.is_none());
        assert!(part.parts.is_none());
    }

    #[test]
    fn provider_error_truncates_long_bodies() {
        let long_body = "x".repeat(500);
        let err = provider_error(reqwest::StatusCode::BAD_GATEWAY, &long_body);
        let text = err.to_string();
        assert!(text.contains("502"));
        assert!(text.chars().count() < 300);
    }

    /// Live roundtrip against the real Gmail API.
    ///
    /// Requires `GMAIL_MCP_TEST_ACCESS_TOKEN` with the `gmail.modify` and
    /// `gmail.send` scopes. Sends a message to the authenticated account,
    /// finds it, archives it, and deletes it again.
    #[tokio::test]
    #[ignore = "requires GMAIL_MCP_TEST_ACCESS_TOKEN with gmail.modify and gmail.send scopes"]
    async fn live_send_archive_delete_roundtrip() {
        use super::{GmailClient, MailTransport};

        let token = std::env::var("GMAIL_MCP_TEST_ACCESS_TOKEN")
            .expect("GMAIL_MCP_TEST_ACCESS_TOKEN must be set for live tests");
        let client = GmailClient::new(
            reqwest::Client::new(),
            "https://gmail.googleapis.com/gmail/v1",
            token,
        );

        let profile = client.get_profile().await.expect("profile lookup");
        let marker = format!("mail-gmail-mcp-rs live test {}", std::process::id());
        let raw = format!(
            "From: {addr}\r\nTo: {addr}\r\nSubject: {marker}\r\n\r\nintegration probe\r\n",
            addr = profile.email_address
        );

        let sent_id = client.send_message(raw.as_bytes()).await.expect("send");

        client
            .modify_message(&sent_id, &["INBOX".to_owned()])
            .await
            .expect("archive");

        let fetched = client.get_message_full(&sent_id).await.expect("fetch");
        assert_eq!(fetched.id, sent_id);

        client.delete_message(&sent_id).await.expect("cleanup");
    }
}
