//! Outbound link extraction
//!
//! Collects every anchor href from a page we published, resolves it
//! against the page's own URL, and applies the outgoing policy
//! (scheme, same-page fragments, self-mentions, allow/deny lists).

use std::collections::BTreeSet;

use scraper::{Html, Selector};
use url::Url;

use crate::config::HostPattern;

/// The policy applied to candidate links.
pub struct LinkFilter<'a> {
    /// Our own host; links here are self-mentions
    pub local_host: &'a str,
    pub allow_self_mentions: bool,
    pub allow: &'a [HostPattern],
    pub deny: &'a [HostPattern],
}

impl LinkFilter<'_> {
    fn accepts_host(&self, host: &str) -> bool {
        if host.eq_ignore_ascii_case(self.local_host) {
            return self.allow_self_mentions;
        }
        if !self.allow.is_empty() {
            return self.allow.iter().any(|p| p.matches(host));
        }
        !self.deny.iter().any(|p| p.matches(host))
    }
}

/// Find every mention-worthy link in `html`, resolved against `base`
/// (the absolute URL of the page the HTML lives at).
///
/// Returned set is deduplicated and deterministically ordered.
pub fn find_target_links(html: &str, base: &Url, filter: &LinkFilter) -> BTreeSet<String> {
    let document = Html::parse_document(html);
    let mut links = BTreeSet::new();

    let Ok(selector) = Selector::parse("a[href]") else {
        return links;
    };

    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        if let Some(url) = resolve_candidate(href, base, filter) {
            links.insert(url);
        }
    }

    links
}

/// Whether `html` contains an anchor to `target` (hrefs resolved
/// against `base`, fragments ignored). This is the verification check
/// for an incoming mention.
pub fn html_links_to(html: &str, base: &Url, target: &str) -> bool {
    let Ok(mut wanted) = Url::parse(target) else {
        return false;
    };
    wanted.set_fragment(None);

    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("a[href]") else {
        return false;
    };

    document.select(&selector).any(|element| {
        element
            .value()
            .attr("href")
            .and_then(|href| base.join(href.trim()).ok())
            .map(|mut url| {
                url.set_fragment(None);
                url == wanted
            })
            .unwrap_or(false)
    })
}

/// Resolve one href to an accepted absolute URL, or None.
fn resolve_candidate(href: &str, base: &Url, filter: &LinkFilter) -> Option<String> {
    let href = href.trim();

    if href.is_empty() {
        return None;
    }

    // Same-page fragment
    if href.starts_with('#') {
        return None;
    }

    let resolved = base.join(href).ok()?;

    if resolved.scheme() != "http" && resolved.scheme() != "https" {
        return None;
    }

    // A link that resolves back to the page itself (fragment aside) is
    // still a same-page anchor.
    let mut without_fragment = resolved.clone();
    without_fragment.set_fragment(None);
    let mut page = base.clone();
    page.set_fragment(None);
    if without_fragment == page {
        return None;
    }

    let host = resolved.host_str()?.to_ascii_lowercase();
    if !filter.accepts_host(&host) {
        return None;
    }

    Some(resolved.to_string())
}
