//! Utility functions for handling hosts of candidate URLs.

use crate::error::{AppError, Result};
use url::Url;

/// Extracts the lowercase host (without "www.") from a URL string.
/// Handles missing schemes and ports.
///
/// # Arguments
/// * `url_str` - The input URL string.
///
/// # Returns
/// * `Ok(String)` containing the lowercase host if successful.
/// * `Err(AppError)` if the URL is empty, cannot be parsed or has no host.
pub(crate) fn get_host_from_url(url_str: &str) -> Result<String> {
    let url_str = url_str.trim();
    if url_str.is_empty() {
        return Err(AppError::Fetch("Input URL string is empty".to_string()));
    }

    let url_str_with_scheme = if !url_str.starts_with("http://") && !url_str.starts_with("https://")
    {
        format!("https://{}", url_str)
    } else {
        url_str.to_string()
    };

    let url = Url::parse(&url_str_with_scheme)?;

    let host = url.host_str().ok_or_else(|| {
        AppError::Fetch(format!(
            "Could not extract host from parsed URL: {}",
            url_str_with_scheme
        ))
    })?;

    Ok(host.strip_prefix("www.").unwrap_or(host).to_lowercase())
}

/// Whether `url_str` points at one of `blocked` domains or a subdomain of one.
/// Unparsable URLs fall back to a plain substring check.
pub(crate) fn is_excluded(url_str: &str, blocked: &[String]) -> bool {
    match get_host_from_url(url_str) {
        Ok(host) => blocked.iter().any(|domain| {
            host == *domain
                || host
                    .strip_suffix(domain.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        }),
        Err(e) => {
            tracing::debug!("Falling back to substring domain check for {}: {}", url_str, e);
            let lowered = url_str.to_lowercase();
            blocked.iter().any(|domain| lowered.contains(domain.as_str()))
        }
    }
}

/// Parses a target URL for fetching. Only http(s) URLs are fetchable.
pub(crate) fn parse_target(url_str: &str) -> Result<Url> {
    let url = Url::parse(url_str.trim())?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(AppError::Fetch(format!("Unsupported scheme '{}' in {}", other, url))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocklist() -> Vec<String> {
        vec!["linkedin.com".to_string(), "x.com".to_string()]
    }

    #[test]
    fn test_get_host_from_url() {
        assert_eq!(get_host_from_url("https://www.Example.com/a").unwrap(), "example.com");
        assert_eq!(get_host_from_url("example.com:8080").unwrap(), "example.com");
        assert!(get_host_from_url("").is_err());
        assert!(get_host_from_url("http://").is_err());
    }

    #[test]
    fn test_is_excluded_matches_host_and_subdomains() {
        let blocked = blocklist();
        assert!(is_excluded("https://www.linkedin.com/in/jane", &blocked));
        assert!(is_excluded("https://de.linkedin.com/in/jane", &blocked));
        assert!(is_excluded("https://x.com/jane", &blocked));
        assert!(!is_excluded("https://box.com/jane", &blocked));
        assert!(!is_excluded("https://uni.edu/~jane", &blocked));
    }

    #[test]
    fn test_parse_target_rejects_other_schemes() {
        assert!(parse_target("https://uni.edu").is_ok());
        assert!(parse_target("mailto:jane@uni.edu").is_err());
        assert!(parse_target("/relative").is_err());
    }
}
