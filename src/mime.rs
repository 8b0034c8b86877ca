//! Message content extraction
//!
//! Walks a Gmail message's MIME part tree depth-first to pull out the first
//! plain-text body, the first HTML body, and the flat list of attachment
//! descriptors. The walk is resilient: a malformed payload skips that part
//! without aborting extraction of its siblings.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use crate::gmail::MessagePart;

/// Attachment metadata collected during extraction
///
/// `size_bytes` is whatever Gmail reports, not recomputed from decoded
/// bytes; it may be 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    /// Reference for fetching the attachment bytes separately
    pub id: String,
    /// Sender-supplied filename, unsanitized
    pub filename: String,
    /// MIME content type (e.g. `application/pdf`)
    pub mime_type: String,
    /// Size in bytes as reported by the provider
    pub size_bytes: u64,
}

/// Result of decoding one message's part tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    /// First `text/plain` body found, decoded
    pub body_text: Option<String>,
    /// First `text/html` body found, decoded
    pub body_html: Option<String>,
    /// Attachments in depth-first visit order
    pub attachments: Vec<AttachmentRef>,
}

/// Extract bodies and attachment descriptors from a part tree
///
/// Traversal is depth-first pre-order, children in given order. The first
/// body of each type wins; later duplicates at any depth are ignored. A part
/// carrying both a filename and an attachment reference is recorded as an
/// attachment and never inspected as body content, even if mis-tagged.
pub fn extract(root: &MessagePart) -> Extraction {
    let mut extraction = Extraction::default();
    walk(
        root,
        &mut extraction.body_text,
        &mut extraction.body_html,
        &mut extraction.attachments,
    );
    extraction
}

/// Walk the part tree recursively
///
/// A multipart container has no content of its own, but its children are
/// always visited regardless of whether the part itself matched a rule.
fn walk(
    part: &MessagePart,
    body_text: &mut Option<String>,
    body_html: &mut Option<String>,
    attachments: &mut Vec<AttachmentRef>,
) {
    let filename = part.filename.as_deref().unwrap_or("");
    let attachment_id = part.body.as_ref().and_then(|b| b.attachment_id.as_deref());

    if !filename.is_empty()
        && let Some(id) = attachment_id
    {
        attachments.push(AttachmentRef {
            id: id.to_owned(),
            filename: filename.to_owned(),
            mime_type: part.mime_type.clone().unwrap_or_default(),
            size_bytes: part.body.as_ref().and_then(|b| b.size).unwrap_or(0),
        });
    } else {
        match part.mime_type.as_deref() {
            Some("text/plain") if body_text.is_none() => {
                if let Some(decoded) = decode_part_text(part) {
                    *body_text = Some(decoded);
                }
            }
            Some("text/html") if body_html.is_none() => {
                if let Some(decoded) = decode_part_text(part) {
                    *body_html = Some(decoded);
                }
            }
            _ => {}
        }
    }

    if let Some(children) = &part.parts {
        for child in children {
            walk(child, body_text, body_html, attachments);
        }
    }
}

/// Decode a part's inline payload as UTF-8 text
///
/// Returns `None` for missing or malformed payloads so one bad part cannot
/// poison the traversal.
fn decode_part_text(part: &MessagePart) -> Option<String> {
    let data = part.body.as_ref()?.data.as_deref()?;
    let bytes = decode_base64url(data)?;
    String::from_utf8(bytes).ok()
}

/// Decode base64url data, tolerating both padded and unpadded input
pub(crate) fn decode_base64url(data: &str) -> Option<Vec<u8>> {
    URL_SAFE_NO_PAD.decode(data.trim_end_matches('=')).ok()
}

/// Truncate string to maximum characters (Unicode-aware)
///
/// Preserves complete characters, never splitting multi-byte sequences.
pub fn truncate_chars(input: &str, max_chars: usize) -> String {
    input.chars().take(max_chars).collect()
}
