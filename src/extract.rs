//! Extracts email addresses from free text and from HTML documents.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Node, Selector};
use std::collections::BTreeSet;

static MAILTO_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href^='mailto:']").unwrap());
static BODY_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("body").unwrap());

/// Extracts unique email addresses found within a block of text.
///
/// Results are lowercased and sorted for deterministic output.
pub(crate) fn extract_emails_from_text(text: &str, email_regex: &Regex) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }

    let unique: BTreeSet<String> = email_regex
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect();

    unique.into_iter().collect()
}

/// Extracts email addresses from an HTML document.
///
/// Collects `mailto:` link targets, then runs the text extractor over the
/// visible body text with `<script>` and `<style>` subtrees removed. Returns
/// the union of both, lowercased and sorted.
pub(crate) fn extract_emails_from_html(
    html_content: &str,
    source_url: &str,
    email_regex: &Regex,
) -> Vec<String> {
    let mut found: BTreeSet<String> = BTreeSet::new();
    if html_content.is_empty() {
        return Vec::new();
    }

    let document = Html::parse_document(html_content);

    for element in document.select(&MAILTO_SELECTOR) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let Some(email_part) = href.strip_prefix("mailto:") else {
            continue;
        };
        let email = email_part.split('?').next().unwrap_or("").trim();
        if email.is_empty() {
            continue;
        }
        if email_regex.is_match(email) {
            tracing::debug!(target: "scrape_task", "Found via mailto link ({}): {}", source_url, email);
            found.insert(email.to_lowercase());
        } else {
            tracing::warn!(target: "scrape_task", "Mailto content failed regex check: {}", email);
        }
    }

    let text_content = visible_text(&document);
    for email in extract_emails_from_text(&text_content, email_regex) {
        tracing::debug!(target: "scrape_task", "Found via regex in text ({}): {}", source_url, email);
        found.insert(email);
    }

    found.into_iter().collect()
}

/// Concatenates the text content of the body (or the whole document when no
/// body exists), skipping `<script>` and `<style>` subtrees.
fn visible_text(document: &Html) -> String {
    let mut text_content = String::new();
    let mut stack = Vec::new();

    if let Some(body) = document.select(&BODY_SELECTOR).next() {
        stack.extend(body.children().rev());
    } else {
        stack.extend(document.tree.root().children().rev());
    }

    while let Some(node) = stack.pop() {
        match node.value() {
            Node::Element(element) => {
                if !matches!(element.name(), "script" | "style") {
                    stack.extend(node.children().rev());
                }
            }
            Node::Text(text) => {
                text_content.push_str(text.trim());
                text_content.push(' ');
            }
            _ => {}
        }
    }

    text_content
}
