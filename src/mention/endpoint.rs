//! Webmention endpoint discovery
//!
//! A target advertises its endpoint in one of three places, searched in
//! order: the HTTP `Link` header, a `<link rel="webmention">` in the
//! document head, then an `<a rel="webmention">` in the body. The first
//! match wins. Relative endpoint URLs are resolved against the
//! response's effective URL.

use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

use super::fetch::FetchedPage;

lazy_static! {
    /// One entry of a `Link` header: `<url>` followed by `;`-separated
    /// parameters in any order, quotes optional.
    static ref LINK_ENTRY: Regex =
        Regex::new(r#"^\s*<([^>]*)>\s*((?:;[^;]*)*)\s*$"#).expect("valid regex");
    /// A single `name=value` parameter, value optionally quoted.
    static ref LINK_PARAM: Regex =
        Regex::new(r#"(?i)\b([a-z][a-z0-9-]*)\s*=\s*("[^"]*"|[^";\s]+)"#).expect("valid regex");
}

/// Search a fetched response for its webmention endpoint.
pub fn find_webmention_endpoint(page: &FetchedPage) -> Option<Url> {
    if let Some(url) = endpoint_from_link_headers(&page.link_headers, &page.url) {
        return Some(url);
    }
    endpoint_from_html(&page.body, &page.url)
}

/// Parse `Link` header values (comma-separated entry lists) and return
/// the first entry with `rel="webmention"`.
pub fn endpoint_from_link_headers(headers: &[String], base: &Url) -> Option<Url> {
    for header in headers {
        for entry in split_entries(header) {
            let Some(captures) = LINK_ENTRY.captures(entry) else {
                continue;
            };
            let href = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
            let params = captures.get(2).map(|m| m.as_str()).unwrap_or_default();

            if entry_is_webmention(params) {
                if let Ok(url) = base.join(href) {
                    return Some(url);
                }
            }
        }
    }
    None
}

/// Split a header value into entries on commas outside `<...>`, so a
/// literal comma in a target URL does not break its entry apart.
fn split_entries(header: &str) -> Vec<&str> {
    let mut entries = Vec::new();
    let mut start = 0;
    let mut in_url = false;
    for (i, c) in header.char_indices() {
        match c {
            '<' => in_url = true,
            '>' => in_url = false,
            ',' if !in_url => {
                entries.push(&header[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    entries.push(&header[start..]);
    entries
}

/// Whether the entry's parameters include a rel naming "webmention".
fn entry_is_webmention(params: &str) -> bool {
    for captures in LINK_PARAM.captures_iter(params) {
        let name = &captures[1];
        if !name.eq_ignore_ascii_case("rel") {
            continue;
        }
        let value = captures[2].trim_matches('"');
        // rel is a whitespace-separated list of relation names
        if value.split_whitespace().any(|rel| rel.eq_ignore_ascii_case("webmention")) {
            return true;
        }
    }
    false
}

/// Search the document: `<head><link>` before `<body><a>`.
fn endpoint_from_html(html: &str, base: &Url) -> Option<Url> {
    let document = Html::parse_document(html);

    for selector_str in ["head link[rel][href]", "body a[rel][href]"] {
        let Ok(selector) = Selector::parse(selector_str) else {
            continue;
        };
        for element in document.select(&selector) {
            let rel = element.value().attr("rel").unwrap_or_default();
            if !rel
                .split_whitespace()
                .any(|r| r.eq_ignore_ascii_case("webmention"))
            {
                continue;
            }
            if let Some(href) = element.value().attr("href") {
                if let Ok(url) = base.join(href) {
                    return Some(url);
                }
            }
        }
    }

    None
}
