//! Defines the core data structures used in the email-scout application.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A person (optionally with affiliation) for whom an email is sought.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub(crate) struct Subject {
    /// Name, optionally followed by an affiliation. Also used as the search query.
    pub identifier: String,
    /// Known pages for this subject. Empty means "discover via search".
    #[serde(default, alias = "urls")]
    pub candidate_urls: Vec<String>,
    /// Link resolution already happened upstream (links file); never search again.
    #[serde(skip)]
    pub links_resolved: bool,
}

impl Subject {
    pub(crate) fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            candidate_urls: Vec::new(),
            links_resolved: false,
        }
    }

    /// A subject read back from a links file, with or without URLs.
    pub(crate) fn resolved(identifier: impl Into<String>) -> Self {
        Self {
            links_resolved: true,
            ..Self::new(identifier)
        }
    }

    #[cfg(test)]
    pub(crate) fn with_urls(identifier: impl Into<String>, urls: Vec<String>) -> Self {
        Self {
            candidate_urls: urls,
            ..Self::new(identifier)
        }
    }

    /// Whether link resolution has to go through the search engine.
    pub(crate) fn needs_search(&self) -> bool {
        self.candidate_urls.is_empty() && !self.links_resolved
    }
}

/// Unique email strings harvested for one subject, kept in lexicographic order
/// so that selection is deterministic.
pub(crate) type EmailCandidateSet = BTreeSet<String>;

/// The outcome for one subject. An empty `email` means nothing was found.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct EmailMatch {
    pub identifier: String,
    pub email: String,
}

impl EmailMatch {
    pub(crate) fn found(identifier: &str, email: String) -> Self {
        Self {
            identifier: identifier.to_string(),
            email,
        }
    }

    pub(crate) fn not_found(identifier: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            email: String::new(),
        }
    }

    pub(crate) fn is_found(&self) -> bool {
        !self.email.is_empty()
    }
}

/// Counters reported at the end of a batch run.
#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct BatchSummary {
    pub processed: usize,
    pub found: usize,
    pub cancelled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_deserializes_urls_alias() {
        let subject: Subject =
            serde_json::from_str(r#"{"identifier":"Jane Doe","urls":["https://a.org"]}"#).unwrap();
        assert_eq!(subject.candidate_urls, vec!["https://a.org".to_string()]);
        assert!(!subject.needs_search());

        let bare: Subject = serde_json::from_str(r#"{"identifier":"Jane Doe"}"#).unwrap();
        assert!(bare.needs_search());
        assert!(!Subject::resolved("Jane Doe").needs_search());
    }

    #[test]
    fn test_not_found_keeps_identifier() {
        let result = EmailMatch::not_found("Jane Doe");
        assert_eq!(result.identifier, "Jane Doe");
        assert_eq!(result.email, "");
        assert!(!result.is_found());
    }
}
