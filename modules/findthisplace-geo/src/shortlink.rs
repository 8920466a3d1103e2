//! Short-link resolution.
//!
//! Shortened map links (`maps.app.goo.gl`, `goo.gl/maps`, `yandex.*/maps/-/...`)
//! carry no coordinates themselves. We walk the redirect chain by hand, one GET
//! per hop, and try extraction against every `Location` we see. Google sometimes
//! bounces through a consent page whose `continue` parameter holds the real map
//! URL, so that parameter is inspected as well.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, info, warn};
use url::Url;

use findthisplace_common::Coordinates;

use crate::extractor::CoordinateExtractor;
use crate::transport::RedirectTransport;

/// Redirect hops followed before giving up.
pub const DEFAULT_MAX_HOPS: usize = 10;

static SHORT_GOOGLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://(?:maps\.app\.goo\.gl|goo\.gl/maps)/[^\s"'<>]+"#).expect("valid regex")
});

static SHORT_YANDEX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://yandex\.[a-z.]+/maps/\p{Pd}/[^\s"'<>]+"#).expect("valid regex")
});

/// First shortened map URL in `text`. Google short links take precedence.
pub fn find_short_url(text: &str) -> Option<&str> {
    SHORT_GOOGLE_RE
        .find(text)
        .or_else(|| SHORT_YANDEX_RE.find(text))
        .map(|m| m.as_str())
}

/// Generic query-parameter fallback for URLs the provider patterns miss.
///
/// Yandex hosts: `ll`, `pt`, `sll` as `lng,lat`. Everything else (and Yandex
/// hosts with none of those): `ll`, `q`, `query` as `lat,lng`.
pub fn extract_from_query(raw_url: &str) -> Option<Coordinates> {
    let parsed = Url::parse(raw_url).ok()?;
    let is_yandex = parsed.host_str().is_some_and(|h| h.contains("yandex"));

    let param = |key: &str| {
        parsed
            .query_pairs()
            .find(|(k, v)| k == key && !v.is_empty())
            .map(|(_, v)| v.into_owned())
    };

    if is_yandex {
        for key in ["ll", "pt", "sll"] {
            if let Some(val) = param(key) {
                if let Some((lng, lat)) = val.split_once(',') {
                    return Coordinates::parse(lat, lng);
                }
            }
        }
    }

    for key in ["ll", "q", "query"] {
        if let Some(val) = param(key) {
            if let Some((lat, lng)) = val.split_once(',') {
                return Coordinates::parse(lat, lng);
            }
        }
    }

    None
}

fn continue_param(location: &str) -> Option<String> {
    let parsed = Url::parse(location).ok()?;
    parsed
        .query_pairs()
        .find(|(k, v)| k == "continue" && !v.is_empty())
        .map(|(_, v)| v.into_owned())
}

fn absolutize(current: &str, location: &str) -> String {
    if location.starts_with("http://") || location.starts_with("https://") {
        return location.to_string();
    }
    Url::parse(current)
        .and_then(|base| base.join(location))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| location.to_string())
}

// ---------------------------------------------------------------------------
// ShortLinkResolver
// ---------------------------------------------------------------------------

pub struct ShortLinkResolver {
    transport: Arc<dyn RedirectTransport>,
    extractor: Arc<CoordinateExtractor>,
    max_hops: usize,
}

impl ShortLinkResolver {
    pub fn new(transport: Arc<dyn RedirectTransport>, extractor: Arc<CoordinateExtractor>) -> Self {
        Self {
            transport,
            extractor,
            max_hops: DEFAULT_MAX_HOPS,
        }
    }

    pub fn with_max_hops(mut self, max_hops: usize) -> Self {
        self.max_hops = max_hops;
        self
    }

    /// Resolve the first short map link in `text` to coordinates.
    ///
    /// Every failure mode (no short link, transport error, dead end, hop limit)
    /// yields `None` and a log line; nothing here is fatal to the caller.
    pub async fn resolve(&self, text: &str) -> Option<Coordinates> {
        let short_url = find_short_url(text)?;
        info!(url = short_url, "Resolving short map link");

        let mut current = short_url.to_string();
        for _ in 0..self.max_hops {
            let hop = match self.transport.get(&current).await {
                Ok(hop) => hop,
                Err(e) => {
                    warn!(url = current.as_str(), error = %e, "Short link hop failed");
                    return None;
                }
            };

            let Some(raw_location) = hop.location else {
                info!(
                    url = short_url,
                    status = hop.status,
                    "Short link ended without Location"
                );
                return None;
            };

            let location = absolutize(&current, &raw_location);
            debug!(from = current.as_str(), status = hop.status, to = location.as_str(), "Short link hop");

            if let Some(c) = self.coordinates_at(&location) {
                info!(url = short_url, lat = c.lat, lng = c.lng, "Short link resolved");
                return Some(c);
            }

            current = location;
        }

        warn!(url = short_url, max_hops = self.max_hops, "Short link hop limit reached, no coordinates");
        None
    }

    /// Everything we try against one resolved location, in order.
    fn coordinates_at(&self, location: &str) -> Option<Coordinates> {
        if let Some(c) = self.extractor.extract(location) {
            return Some(c);
        }
        if let Some(c) = extract_from_query(location) {
            debug!(location, "Coordinates found via query params");
            return Some(c);
        }
        let target = continue_param(location)?;
        let found = self
            .extractor
            .extract(&target)
            .or_else(|| extract_from_query(&target));
        if found.is_some() {
            debug!(location, "Coordinates found via consent continue param");
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_google_short_links() {
        assert_eq!(
            find_short_url("вот: https://maps.app.goo.gl/abc123 ищите"),
            Some("https://maps.app.goo.gl/abc123")
        );
        assert_eq!(
            find_short_url(r#"<a href="https://goo.gl/maps/XyZ9">x</a>"#),
            Some("https://goo.gl/maps/XyZ9")
        );
    }

    #[test]
    fn finds_yandex_short_links() {
        assert_eq!(
            find_short_url("https://yandex.ru/maps/-/CCUqMZg~oC"),
            Some("https://yandex.ru/maps/-/CCUqMZg~oC")
        );
        assert_eq!(find_short_url("https://yandex.ru/maps/213/moscow/"), None);
    }

    #[test]
    fn google_short_link_wins_over_yandex() {
        let text = "https://yandex.ru/maps/-/AAA https://maps.app.goo.gl/BBB";
        assert_eq!(find_short_url(text), Some("https://maps.app.goo.gl/BBB"));
    }

    #[test]
    fn query_fallback_generic_hosts() {
        let c = extract_from_query("https://maps.example.com/?q=12.5,-45.25").unwrap();
        assert_eq!((c.lat, c.lng), (12.5, -45.25));
        assert!(extract_from_query("https://maps.example.com/?q=Paris").is_none());
        assert!(extract_from_query("not a url").is_none());
    }

    #[test]
    fn query_fallback_yandex_reversed() {
        let c = extract_from_query("https://yandex.ru/web-maps/?sll=30.31,59.94&z=10").unwrap();
        assert_eq!((c.lat, c.lng), (59.94, 30.31));
    }

    #[test]
    fn relative_location_is_resolved_against_current() {
        assert_eq!(
            absolutize("https://maps.app.goo.gl/abc", "/maps?ll=1,2"),
            "https://maps.app.goo.gl/maps?ll=1,2"
        );
        assert_eq!(
            absolutize("https://a.example/x", "https://b.example/y"),
            "https://b.example/y"
        );
    }

    #[test]
    fn continue_param_is_decoded() {
        let loc = "https://consent.google.com/m?continue=https%3A%2F%2Fwww.google.com%2Fmaps%3Fll%3D51.5,-0.12&gl=GB";
        assert_eq!(
            continue_param(loc).as_deref(),
            Some("https://www.google.com/maps?ll=51.5,-0.12")
        );
    }
}
