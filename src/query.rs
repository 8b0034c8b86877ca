//! Filter-to-query translation
//!
//! Translates the structured filter arguments of `list_emails` into Gmail's
//! native list parameters: a set of label IDs for system labels, and a
//! space-joined query string for everything else.

use schemars::JsonSchema;
use serde::Deserialize;

/// System labels Gmail addresses by native identifier rather than free-text
/// search. Matched case-insensitively; anything else becomes a `label:` query
/// fragment.
pub const SYSTEM_LABELS: [&str; 8] = [
    "INBOX",
    "SENT",
    "DRAFTS",
    "SPAM",
    "TRASH",
    "STARRED",
    "IMPORTANT",
    "UNREAD",
];

/// Gmail inbox category tab
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Primary,
    Social,
    Promotions,
    Updates,
    Forums,
}

impl Category {
    /// The lowercase name used in `category:` query fragments
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Social => "social",
            Self::Promotions => "promotions",
            Self::Updates => "updates",
            Self::Forums => "forums",
        }
    }
}

/// Caller-supplied filter set, consumed once per `list_emails` call
#[derive(Debug, Clone, Default)]
pub struct FilterSpec {
    /// Label name: system labels become label IDs, others query fragments
    pub label: Option<String>,
    /// Inbox category tab
    pub category: Option<Category>,
    /// Restrict to unread messages
    pub unread_only: bool,
    /// Raw Gmail query string, passed through verbatim as the last fragment
    pub raw_query: Option<String>,
}

/// Resolved Gmail list parameters
///
/// `query` is `None` (not an empty string) when no fragment was produced;
/// the transport omits the parameter entirely in that case, which Gmail
/// treats differently from an empty query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedQuery {
    /// Native label identifiers (uppercased canonical forms)
    pub label_ids: Vec<String>,
    /// Space-joined query fragments, absent if none were produced
    pub query: Option<String>,
}

/// Translate a filter set into Gmail list parameters
///
/// Filters combine with AND logic: each one contributes either a label ID or
/// a query fragment, and fragments are joined with single spaces.
pub fn build(filter: &FilterSpec) -> ResolvedQuery {
    let mut label_ids = Vec::new();
    let mut fragments = Vec::new();

    if let Some(label) = &filter.label {
        let canonical = label.to_ascii_uppercase();
        if SYSTEM_LABELS.contains(&canonical.as_str()) {
            label_ids.push(canonical);
        } else {
            fragments.push(format!("label:{label}"));
        }
    }

    if let Some(category) = filter.category {
        fragments.push(format!("category:{}", category.as_str()));
    }

    if filter.unread_only {
        fragments.push("is:unread".to_owned());
    }

    if let Some(raw) = &filter.raw_query
        && !raw.is_empty()
    {
        fragments.push(raw.clone());
    }

    let query = if fragments.is_empty() {
        None
    } else {
        Some(fragments.join(" "))
    };

    ResolvedQuery { label_ids, query }
}

#[cfg(test)]
mod tests {
    use super::{Category, FilterSpec, build};

    #[test]
    fn empty_filter_yields_absent_query_and_no_labels() {
        let resolved = build(&FilterSpec::default());
        assert!(resolved.label_ids.is_empty());
        assert_eq!(resolved.query, None);
    }

    #[test]
    fn system_label_becomes_label_id_never_a_fragment() {
        let resolved = build(&FilterSpec {
            label: Some("INBOX".to_owned()),
            ..FilterSpec::default()
        });
        assert_eq!(resolved.label_ids, vec!["INBOX".to_owned()]);
        assert_eq!(resolved.query, None);
    }

    #[test]
    fn system_label_match_is_case_insensitive() {
        let resolved = build(&FilterSpec {
            label: Some("iNbOx".to_owned()),
            ..FilterSpec::default()
        });
        assert_eq!(resolved.label_ids, vec!["INBOX".to_owned()]);
        assert_eq!(resolved.query, None);
    }

    #[test]
    fn custom_label_becomes_query_fragment_never_a_label_id() {
        let resolved = build(&FilterSpec {
            label: Some("MyCustomLabel".to_owned()),
            ..FilterSpec::default()
        });
        assert!(resolved.label_ids.is_empty());
        assert_eq!(resolved.query.as_deref(), Some("label:MyCustomLabel"));
    }

    #[test]
    fn category_and_unread_become_fragments() {
        let resolved = build(&FilterSpec {
            category: Some(Category::Primary),
            unread_only: true,
            ..FilterSpec::default()
        });
        assert_eq!(resolved.query.as_deref(), Some("category:primary is:unread"));
    }

    #[test]
    fn raw_query_is_appended_verbatim_as_last_fragment() {
        let resolved = build(&FilterSpec {
            unread_only: true,
            raw_query: Some("from:boss@example.com newer_than:7d".to_owned()),
            ..FilterSpec::default()
        });
        assert_eq!(
            resolved.query.as_deref(),
            Some("is:unread from:boss@example.com newer_than:7d")
        );
    }

    #[test]
    fn empty_raw_query_produces_no_fragment() {
        let resolved = build(&FilterSpec {
            raw_query: Some(String::new()),
            ..FilterSpec::default()
        });
        assert_eq!(resolved.query, None);
    }

    #[test]
    fn system_label_combines_with_fragments() {
        let resolved = build(&FilterSpec {
            label: Some("inbox".to_owned()),
            unread_only: true,
            ..FilterSpec::default()
        });
        assert_eq!(resolved.label_ids, vec!["INBOX".to_owned()]);
        assert_eq!(resolved.query.as_deref(), Some("is:unread"));
    }
}
