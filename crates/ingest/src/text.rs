//! HTML to plain text.
//!
//! Each text node is trimmed and whitespace-collapsed, empty nodes are
//! dropped, and the rest are joined with a single space. Content of
//! `script`, `style` and `noscript` elements is ignored.

use scraper::{ElementRef, Html, Selector};

const SKIPPED_ELEMENTS: [&str; 3] = ["script", "style", "noscript"];

/// Extract all natural text from an HTML document. Never fails; malformed
/// markup degrades to whatever the parser recovers, possibly an empty string.
pub fn extract_text(html: &str) -> String {
    if html.trim().is_empty() {
        return String::new();
    }
    let document = Html::parse_document(html);
    element_text(document.root_element())
}

/// Extract the text of the first element matching `css`.
///
/// Returns `None` when the selector is invalid or matches nothing, so callers
/// can tell "block absent" apart from "block present but empty".
pub fn extract_text_from(html: &str, css: &str) -> Option<String> {
    let selector = Selector::parse(css).ok()?;
    let document = Html::parse_document(html);
    let element = document.select(&selector).next()?;
    Some(element_text(element))
}

pub(crate) fn element_text(element: ElementRef<'_>) -> String {
    let mut words: Vec<&str> = Vec::new();

    for node in element.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };

        let skipped = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|el| SKIPPED_ELEMENTS.contains(&el.name()))
        });
        if skipped {
            continue;
        }

        words.extend(text.split_whitespace());
    }

    words.join(" ")
}
