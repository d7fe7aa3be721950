//! Flattens HTML documents into visible text and collects anchor hrefs.

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};

/// Elements whose text content is never rendered.
const INVISIBLE_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

static ANCHOR_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("static selector is valid"));

/// Returns the trimmed text of every visible text node in document order,
/// joined by single spaces.
pub(crate) fn flatten_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut fragments: Vec<&str> = Vec::new();

    for node in document.tree.root().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|el| INVISIBLE_ELEMENTS.contains(&el.name()))
        });
        if !hidden {
            fragments.push(trimmed);
        }
    }

    fragments.join(" ")
}

/// Collects the `href` of every anchor accepted by `predicate`, in document
/// order and without deduplication.
pub(crate) fn collect_links<F>(html: &str, predicate: F) -> Vec<String>
where
    F: Fn(&ElementRef<'_>) -> bool,
{
    let document = Html::parse_document(html);
    document
        .select(&ANCHOR_SELECTOR)
        .filter(|anchor| predicate(anchor))
        .filter_map(|anchor| anchor.value().attr("href"))
        .filter(|href| !href.trim().is_empty())
        .map(|href| href.trim().to_string())
        .collect()
}

/// Accepts anchors marked as organic search results.
pub(crate) fn is_result_anchor(anchor: &ElementRef<'_>) -> bool {
    anchor.value().classes().any(|class| class == "result__a")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html>
          <head><title>Lab</title><style>.x { color: red }</style></head>
          <body>
            <h1>  Jane Doe </h1>
            <p>Contact: <b>jane.doe@uni.edu</b></p>
            <script>var hidden = "bot@trap.com";</script>
            <a class="result__a" href="//example.com/a">A</a>
            <a href="/other">Other</a>
            <a class="result__a big" href="//example.com/a">A again</a>
            <a class="result__snippet" href="/snippet">S</a>
          </body>
        </html>"#;

    #[test]
    fn test_flatten_text_document_order() {
        let text = flatten_text(PAGE);
        assert!(text.starts_with("Lab Jane Doe Contact: jane.doe@uni.edu"));
        assert!(!text.contains("bot@trap.com"));
        assert!(!text.contains("color"));
        assert!(!text.contains("  "));
    }

    #[test]
    fn test_flatten_text_empty_document() {
        assert_eq!(flatten_text(""), "");
    }

    #[test]
    fn test_collect_result_links_keeps_duplicates() {
        let links = collect_links(PAGE, is_result_anchor);
        assert_eq!(links, vec!["//example.com/a", "//example.com/a"]);
    }

    #[test]
    fn test_collect_all_links() {
        let links = collect_links(PAGE, |_| true);
        assert_eq!(links.len(), 4);
        assert_eq!(links[1], "/other");
    }
}
