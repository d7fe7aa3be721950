//! Turns fetched page text into email candidates.

use crate::models::EmailCandidateSet;
use crate::oracle::CompletionOracle;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

/// `local-part@domain.tld`; the top-level segment needs at least two letters.
pub(crate) static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")
        .expect("Failed to compile email regex pattern. This should not happen.")
});

/// Collects every non-overlapping email-shaped substring of `text`.
/// Addresses keep their scraped case; duplicates collapse.
pub(crate) fn harvest(text: &str) -> EmailCandidateSet {
    EMAIL_REGEX
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Strategy that extracts candidate addresses for a subject from one page.
#[async_trait]
pub(crate) trait EmailExtractor: Send + Sync {
    /// Never fails: problems degrade to an empty set.
    async fn extract(&self, identifier: &str, url: &str, text: &str) -> EmailCandidateSet;
}

/// Plain regex harvesting.
#[derive(Debug, Default, Clone)]
pub(crate) struct RegexExtractor;

#[async_trait]
impl EmailExtractor for RegexExtractor {
    async fn extract(&self, _identifier: &str, url: &str, text: &str) -> EmailCandidateSet {
        let found = harvest(text);
        tracing::debug!(target: "harvest_task", "Harvested {} address(es) from {}", found.len(), url);
        found
    }
}

/// Asks a completion oracle which address on the page belongs to the subject.
pub(crate) struct OracleExtractor {
    oracle: Arc<dyn CompletionOracle>,
    snippet_chars: usize,
}

impl OracleExtractor {
    pub(crate) fn new(oracle: Arc<dyn CompletionOracle>, snippet_chars: usize) -> Self {
        Self {
            oracle,
            snippet_chars,
        }
    }

    fn build_prompt(&self, identifier: &str, url: &str, text: &str) -> String {
        let snippet: String = text.chars().take(self.snippet_chars).collect();
        format!(
            "Example:\nText: \"Contact: max.mustermann@example.com\" -> max.mustermann@example.com\n\n\
             Page: {}\n{}\n\n\
             Reply with only the email address of '{}', or 'None found'.",
            url, snippet, identifier
        )
    }
}

#[async_trait]
impl EmailExtractor for OracleExtractor {
    async fn extract(&self, identifier: &str, url: &str, text: &str) -> EmailCandidateSet {
        if text.trim().is_empty() {
            return EmailCandidateSet::new();
        }

        let prompt = self.build_prompt(identifier, url, text);
        match self.oracle.complete(&prompt).await {
            Ok(answer) => {
                let found: EmailCandidateSet = EMAIL_REGEX
                    .find(answer.trim())
                    .map(|m| m.as_str().to_string())
                    .into_iter()
                    .collect();
                tracing::debug!(target: "harvest_task", "Oracle answer for {} on {}: {:?}", identifier, url, found);
                found
            }
            Err(e) => {
                tracing::warn!(target: "harvest_task", "Oracle failed for {} on {}: {}", identifier, url, e);
                EmailCandidateSet::new()
            }
        }
    }
}
