//! Microformats-2 metadata extraction
//!
//! Pulls the actor h-card, the post type and a short quote out of a
//! source page that links to one of our URLs. This is not a general
//! MF2 parser: it recognises exactly the vocabulary the mention
//! pipeline consumes (h-card, h-entry, h-feed, h-cite plus the
//! interaction property classes).

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::data::PostType;

/// `h-` root classes that belong to the microformats-2 vocabulary.
/// Anything else starting with `h-` (utility-framework height classes
/// and the like) is stripped before parsing.
const MF2_ROOT_CLASSES: [&str; 7] = [
    "h-adr", "h-card", "h-entry", "h-feed", "h-geo", "h-cite", "h-event",
];

lazy_static! {
    /// An element tag; the sanitizer only rewrites class attributes
    /// inside these, never text content.
    static ref ELEMENT_TAG: Regex = Regex::new(r"<[A-Za-z][^>]*>").expect("valid regex");
    /// A class attribute: double-quoted, single-quoted, or bare value.
    static ref CLASS_ATTR: Regex =
        Regex::new(r#"class\s*=\s*("([^"]*)"|'([^']*)'|([^\s>/]+))"#).expect("valid regex");
}

/// Everything we can learn about a mention from its source page.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pub hcard: Option<HCardData>,
    pub post_type: Option<PostType>,
    pub quote: Option<String>,
}

/// An h-card before it is persisted/deduplicated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HCardData {
    pub name: Option<String>,
    pub homepage: Option<String>,
    pub avatar: Option<String>,
}

impl HCardData {
    pub fn has_required_fields(&self) -> bool {
        let filled = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        filled(&self.name) || filled(&self.homepage) || filled(&self.avatar)
    }

    /// Raw property blob stored alongside the card.
    pub fn to_json(&self) -> String {
        serde_json::json!({
            "name": self.name,
            "homepage": self.homepage,
            "avatar": self.avatar,
        })
        .to_string()
    }
}

/// Strip `h-` class tokens that are not microformats-2 vocabulary.
///
/// Leaves every other token (including `p-`/`u-`/`e-` properties)
/// untouched, so parsing only ever sees genuine MF2 roots.
pub fn sanitize_mf_classes(html: &str) -> String {
    ELEMENT_TAG
        .replace_all(html, |tag: &Captures| {
            CLASS_ATTR
                .replace_all(&tag[0], |captures: &Captures| {
                    let value = captures
                        .get(2)
                        .or_else(|| captures.get(3))
                        .or_else(|| captures.get(4))
                        .map(|m| m.as_str())
                        .unwrap_or_default();
                    let kept: Vec<&str> = value
                        .split_whitespace()
                        .filter(|token| !token.starts_with("h-") || is_mf2_root(token))
                        .collect();
                    format!("class=\"{}\"", kept.join(" "))
                })
                .into_owned()
        })
        .into_owned()
}

fn is_mf2_root(token: &str) -> bool {
    MF2_ROOT_CLASSES.contains(&token)
}

/// Extract mention metadata from source HTML.
///
/// `target_url` is the local URL the source claims to link to;
/// `source_url` is where the HTML came from (base for resolution).
pub fn extract_metadata(html: &str, target_url: &str, source_url: &str) -> Metadata {
    let sanitized = sanitize_mf_classes(html);
    let document = Html::parse_document(&sanitized);

    let Some(anchor) = find_target_anchor(&document, target_url, source_url) else {
        return Metadata {
            hcard: top_level_hcard(&document),
            post_type: None,
            quote: None,
        };
    };

    let post_type = detect_post_type(anchor);
    let quote = extract_quote(anchor);
    let hcard = hcard_for_anchor(&document, anchor);

    Metadata {
        hcard,
        post_type,
        quote,
    }
}

/// The first anchor whose (resolved) href is the target URL.
fn find_target_anchor<'a>(
    document: &'a Html,
    target_url: &str,
    source_url: &str,
) -> Option<ElementRef<'a>> {
    let selector = Selector::parse("a[href]").ok()?;
    let base = Url::parse(source_url).ok();

    for element in document.select(&selector) {
        let href = element.value().attr("href")?;
        if href == target_url {
            return Some(element);
        }
        if let Some(base) = &base {
            if let Ok(resolved) = base.join(href) {
                if resolved.as_str() == target_url {
                    return Some(element);
                }
            }
        }
    }
    None
}

/// Post-type from the anchor's own classes, else from the nearest
/// enclosing h-cite. Precedence is fixed by `PostType::ALL`.
fn detect_post_type(anchor: ElementRef) -> Option<PostType> {
    if let Some(found) = post_type_from_classes(anchor) {
        return Some(found);
    }
    nearest_ancestor_with_class(anchor, "h-cite").and_then(post_type_from_classes)
}

fn post_type_from_classes(element: ElementRef) -> Option<PostType> {
    PostType::ALL
        .into_iter()
        .find(|t| has_class(element, t.mf2_class()))
}

/// Whitespace-token class membership, ASCII case-insensitive.
fn has_class(element: ElementRef, class: &str) -> bool {
    element.value().attr("class").is_some_and(|classes| {
        classes
            .split_whitespace()
            .any(|token| token.eq_ignore_ascii_case(class))
    })
}

/// Short excerpt describing the mention: the enclosing h-cite's (else
/// h-entry's) p-summary, falling back to its e-content text.
fn extract_quote(anchor: ElementRef) -> Option<String> {
    const MAX_QUOTE_LEN: usize = 300;

    let container = nearest_ancestor_with_class(anchor, "h-cite")
        .or_else(|| nearest_ancestor_with_class(anchor, "h-entry"))?;

    for selector_str in [".p-summary", ".e-content"] {
        let Ok(selector) = Selector::parse(selector_str) else {
            continue;
        };
        if let Some(element) = container.select(&selector).next() {
            let text = element.text().collect::<String>();
            let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
            if !text.is_empty() {
                return Some(text.chars().take(MAX_QUOTE_LEN).collect());
            }
        }
    }
    None
}

/// Pick the h-card describing the actor behind the anchor.
///
/// Preference: the p-author card of the anchor's enclosing
/// h-entry/h-feed, then a top-level card. Cards living inside an
/// h-cite describe a cited third party and are never used.
fn hcard_for_anchor(document: &Html, anchor: ElementRef) -> Option<HCardData> {
    for container_class in ["h-entry", "h-feed"] {
        if let Some(container) = nearest_ancestor_with_class(anchor, container_class) {
            if let Some(card) = author_card_within(container) {
                return Some(card);
            }
        }
    }
    top_level_hcard(document)
}

/// The `p-author` h-card inside a container, skipping cited cards.
fn author_card_within(container: ElementRef) -> Option<HCardData> {
    let selector = Selector::parse(".p-author").ok()?;

    for author in container.select(&selector) {
        if has_ancestor_with_class(author, "h-cite") {
            continue;
        }
        let card_element = if has_class(author, "h-card") {
            Some(author)
        } else {
            Selector::parse(".h-card")
                .ok()
                .and_then(|s| author.select(&s).next())
        };
        if let Some(card) = card_element.map(parse_hcard) {
            if card.has_required_fields() {
                return Some(card);
            }
        }
    }
    None
}

/// First document-order h-card outside any h-cite (and outside any
/// h-entry, so a sidebar/footer "about the author" card qualifies as
/// top-level). Falls back to any non-cited card.
fn top_level_hcard(document: &Html) -> Option<HCardData> {
    let selector = Selector::parse(".h-card").ok()?;

    let mut fallback = None;
    for element in document.select(&selector) {
        if has_ancestor_with_class(element, "h-cite") {
            continue;
        }
        let card = parse_hcard(element);
        if !card.has_required_fields() {
            continue;
        }
        if !has_ancestor_with_class(element, "h-entry") {
            return Some(card);
        }
        fallback.get_or_insert(card);
    }
    fallback
}

/// Read the properties of one h-card element.
fn parse_hcard(element: ElementRef) -> HCardData {
    // Compact form: <a class="h-card" href="...">Name</a>
    if element.value().name() == "a" {
        let name = collapse_text(element);
        return HCardData {
            name: non_empty(name),
            homepage: element.value().attr("href").map(str::to_string),
            avatar: first_attr(element, ".u-photo", "src"),
        };
    }

    let name = first_text(element, ".p-name").or_else(|| non_empty(collapse_text(element)));
    let homepage = first_attr(element, ".u-url", "href");
    let avatar = first_attr(element, ".u-photo", "src")
        .or_else(|| first_attr(element, ".u-photo", "href"));

    HCardData {
        name,
        homepage,
        avatar,
    }
}

fn nearest_ancestor_with_class<'a>(
    element: ElementRef<'a>,
    class: &str,
) -> Option<ElementRef<'a>> {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| has_class(*el, class))
}

fn has_ancestor_with_class(element: ElementRef, class: &str) -> bool {
    nearest_ancestor_with_class(element, class).is_some()
}

fn first_text(element: ElementRef, selector_str: &str) -> Option<String> {
    let selector = Selector::parse(selector_str).ok()?;
    element
        .select(&selector)
        .next()
        .and_then(|el| non_empty(collapse_text(el)))
}

fn first_attr(element: ElementRef, selector_str: &str, attr: &str) -> Option<String> {
    let selector = Selector::parse(selector_str).ok()?;
    for found in element.select(&selector) {
        if let Some(value) = found.value().attr(attr) {
            return Some(value.to_string());
        }
    }
    None
}

fn collapse_text(element: ElementRef) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s.trim().to_string())
    }
}
