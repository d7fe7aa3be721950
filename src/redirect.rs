//! Unwraps search-engine redirect links into the pages they point to.

use once_cell::sync::Lazy;
use url::Url;

/// Query parameter carrying the real target of a redirect link.
const REDIRECT_PARAM: &str = "uddg";

/// Join base for relative links ("/l/?uddg=...") so their query can be read.
/// It never appears in a result: `resolve` yields either the decoded target
/// or its input unchanged, so any configured engine works with this base.
static SEARCH_ORIGIN: Lazy<Url> =
    Lazy::new(|| Url::parse("https://duckduckgo.com/").expect("static URL is valid"));

/// Returns the decoded `uddg` target of a redirect link, or `raw` unchanged.
/// Never fails.
pub(crate) fn resolve(raw: &str) -> String {
    let parsed = Url::parse(raw).or_else(|_| SEARCH_ORIGIN.join(raw));
    let Ok(url) = parsed else {
        return raw.to_string();
    };

    url.query_pairs()
        .find(|(key, _)| key == REDIRECT_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|target| !target.is_empty())
        .map(decode_nested)
        .unwrap_or_else(|| raw.to_string())
}

/// Turns a raw result href into an absolute, decoded target URL.
pub(crate) fn normalize_link(raw: &str) -> String {
    let absolute = match raw.strip_prefix("//") {
        Some(rest) => format!("https://{}", rest),
        None => raw.to_string(),
    };

    let resolved = resolve(&absolute);
    if resolved != absolute {
        return resolved;
    }

    match urlencoding::decode(&absolute) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => absolute,
    }
}

/// Targets are sometimes encoded twice; decode again only while the value
/// does not yet look like an absolute URL.
fn decode_nested(target: String) -> String {
    if target.contains("://") {
        return target;
    }
    match urlencoding::decode(&target) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => target,
    }
}
