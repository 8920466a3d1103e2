//! Heuristic coordinate extraction from free text.
//!
//! Each map provider contributes an ordered family of regular expressions that
//! scan raw text (prose, HTML, bare URLs) for a map link carrying a point. The
//! extractor walks providers in a fixed order and returns the first valid hit.
//! A syntactic match whose numbers do not parse or fall outside the valid
//! latitude/longitude range is skipped, never reported as an error.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use findthisplace_common::Coordinates;

/// Signed decimal number capture. ASCII digits only.
const NUM: &str = r"(-?[0-9]+\.?[0-9]*)";
/// Anything that can appear inside a URL before the marker we look for.
const URL_TAIL: &str = r#"[^"<>\s]*"#;

// ---------------------------------------------------------------------------
// Strategy seam
// ---------------------------------------------------------------------------

/// One source of coordinates. Sources are tried in order; first `Some` wins.
pub trait CoordinateSource: Send + Sync {
    fn provider(&self) -> Provider;
    fn try_extract(&self, text: &str) -> Option<Coordinates>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Google,
    Yandex,
    Bing,
    OpenStreetMap,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Google => write!(f, "google"),
            Provider::Yandex => write!(f, "yandex"),
            Provider::Bing => write!(f, "bing"),
            Provider::OpenStreetMap => write!(f, "osm"),
        }
    }
}

/// How the two numeric groups of a pattern map onto a point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisOrder {
    /// First group is latitude.
    LatLng,
    /// First group is longitude (Yandex).
    LngLat,
}

impl AxisOrder {
    pub fn apply(self, first: &str, second: &str) -> Option<Coordinates> {
        match self {
            AxisOrder::LatLng => Coordinates::parse(first, second),
            AxisOrder::LngLat => Coordinates::parse(second, first),
        }
    }
}

#[derive(Debug, Clone)]
enum Alternative {
    /// A single pattern with two numeric groups.
    Pair { pattern: Regex, order: AxisOrder },
    /// Latitude and longitude live in separate query parameters; both must match.
    SplitParams { lat: Regex, lng: Regex },
}

impl Alternative {
    fn try_match(&self, text: &str) -> Option<Coordinates> {
        match self {
            Alternative::Pair { pattern, order } => {
                let caps = pattern.captures(text)?;
                order.apply(caps.get(1)?.as_str(), caps.get(2)?.as_str())
            }
            Alternative::SplitParams { lat, lng } => {
                let lat = lat.captures(text)?;
                let lng = lng.captures(text)?;
                Coordinates::parse(lat.get(1)?.as_str(), lng.get(1)?.as_str())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Provider pattern families
// ---------------------------------------------------------------------------

/// Ordered pattern family for one provider.
#[derive(Debug, Clone)]
pub struct ProviderPatterns {
    provider: Provider,
    alternatives: Vec<Alternative>,
}

impl ProviderPatterns {
    fn new(provider: Provider) -> Self {
        Self {
            provider,
            alternatives: Vec::new(),
        }
    }

    fn pair(mut self, pattern: &str, order: AxisOrder) -> Self {
        self.alternatives.push(Alternative::Pair {
            pattern: Regex::new(pattern).expect("valid regex"),
            order,
        });
        self
    }

    fn split(mut self, lat: &str, lng: &str) -> Self {
        self.alternatives.push(Alternative::SplitParams {
            lat: Regex::new(lat).expect("valid regex"),
            lng: Regex::new(lng).expect("valid regex"),
        });
        self
    }

    /// `google.<tld>/maps` links: `@lat,lng`, `ll=`, `q=`, `query=`, `/search/lat,+lng`, `!3d..!4d..`.
    pub fn google() -> Self {
        let host = r"google\.[a-z.]+/maps";
        Self::new(Provider::Google)
            .pair(&format!("{host}{URL_TAIL}@{NUM},{NUM}"), AxisOrder::LatLng)
            .pair(&format!("{host}{URL_TAIL}[?&]ll={NUM},{NUM}"), AxisOrder::LatLng)
            .pair(&format!("{host}{URL_TAIL}[?&]q={NUM},{NUM}"), AxisOrder::LatLng)
            .pair(&format!("{host}{URL_TAIL}[?&]query={NUM},{NUM}"), AxisOrder::LatLng)
            .pair(&format!(r"{host}/search/{NUM},\+?{NUM}"), AxisOrder::LatLng)
            .pair(&format!("{host}{URL_TAIL}!3d{NUM}!4d{NUM}"), AxisOrder::LatLng)
    }

    /// `yandex.<tld>/maps` links. Yandex writes longitude first.
    pub fn yandex() -> Self {
        let host = r"yandex\.[a-z.]+/maps";
        Self::new(Provider::Yandex)
            .pair(&format!("{host}{URL_TAIL}[?&]ll={NUM},{NUM}"), AxisOrder::LngLat)
            .pair(&format!("{host}{URL_TAIL}[?&]pt={NUM},{NUM}"), AxisOrder::LngLat)
    }

    /// `bing.com/maps` links: `cp=lat~lng`, `sp=point.lat_lng`.
    pub fn bing() -> Self {
        let host = r"bing\.com/maps";
        Self::new(Provider::Bing)
            .pair(&format!("{host}{URL_TAIL}[?&]cp={NUM}~{NUM}"), AxisOrder::LatLng)
            .pair(&format!(r"{host}{URL_TAIL}[?&]sp=point\.{NUM}_{NUM}"), AxisOrder::LatLng)
    }

    /// `openstreetmap.org` links: `#map=zoom/lat/lng`, or `mlat=` plus `mlon=`.
    pub fn openstreetmap() -> Self {
        let host = r"openstreetmap\.org";
        Self::new(Provider::OpenStreetMap)
            .pair(&format!("{host}{URL_TAIL}#map=[0-9]+/{NUM}/{NUM}"), AxisOrder::LatLng)
            .split(
                &format!("{host}{URL_TAIL}[?&]mlat={NUM}"),
                &format!("{host}{URL_TAIL}[?&]mlon={NUM}"),
            )
    }
}

impl CoordinateSource for ProviderPatterns {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn try_extract(&self, text: &str) -> Option<Coordinates> {
        self.alternatives.iter().find_map(|alt| alt.try_match(text))
    }
}

// ---------------------------------------------------------------------------
// CoordinateExtractor
// ---------------------------------------------------------------------------

/// Ordered list of coordinate sources. New providers are appended, never branched on.
pub struct CoordinateExtractor {
    sources: Vec<Box<dyn CoordinateSource>>,
}

impl CoordinateExtractor {
    pub fn new(sources: Vec<Box<dyn CoordinateSource>>) -> Self {
        Self { sources }
    }

    /// Google, Yandex, Bing, OpenStreetMap, in that order.
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(ProviderPatterns::google()),
            Box::new(ProviderPatterns::yandex()),
            Box::new(ProviderPatterns::bing()),
            Box::new(ProviderPatterns::openstreetmap()),
        ])
    }

    /// Providers in trial order.
    pub fn providers(&self) -> Vec<Provider> {
        self.sources.iter().map(|s| s.provider()).collect()
    }

    /// First valid coordinate any source finds in `text`, with the provider that found it.
    pub fn extract_with_provider(&self, text: &str) -> Option<(Provider, Coordinates)> {
        self.sources
            .iter()
            .find_map(|s| s.try_extract(text).map(|c| (s.provider(), c)))
    }

    pub fn extract(&self, text: &str) -> Option<Coordinates> {
        self.extract_with_provider(text).map(|(_, c)| c)
    }
}

impl Default for CoordinateExtractor {
    fn default() -> Self {
        Self::standard()
    }
}

static STANDARD: LazyLock<CoordinateExtractor> = LazyLock::new(CoordinateExtractor::standard);

/// Extract with the standard provider list.
pub fn extract(text: &str) -> Option<Coordinates> {
    STANDARD.extract(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_coords(got: Option<Coordinates>, lat: f64, lng: f64) {
        let c = got.unwrap_or_else(|| panic!("expected ({lat}, {lng}), got nothing"));
        assert!((c.lat - lat).abs() < 1e-9, "lat {} != {lat}", c.lat);
        assert!((c.lng - lng).abs() < 1e-9, "lng {} != {lng}", c.lng);
    }

    // --- Google ---

    #[test]
    fn google_at_pattern() {
        assert_coords(
            extract("https://www.google.com/maps/@48.8584,2.2945,17z"),
            48.8584,
            2.2945,
        );
    }

    #[test]
    fn google_place_url_prefers_at_over_data() {
        let text = "https://www.google.ru/maps/place/Somewhere/@55.75,37.61,15z/data=!3d55.7!4d37.6";
        assert_coords(extract(text), 55.75, 37.61);
    }

    #[test]
    fn google_ll_q_and_query_params() {
        assert_coords(extract("https://maps.google.com/maps?ll=40.7128,-74.0060"), 40.7128, -74.006);
        assert_coords(extract("https://www.google.com/maps?q=-33.8688,151.2093"), -33.8688, 151.2093);
        assert_coords(
            extract("https://www.google.com/maps/search/?api=1&query=35.6762,139.6503"),
            35.6762,
            139.6503,
        );
    }

    #[test]
    fn google_search_path_with_plus() {
        assert_coords(
            extract("see https://www.google.com/maps/search/59.9343,+30.3351 there"),
            59.9343,
            30.3351,
        );
    }

    #[test]
    fn google_data_pattern() {
        assert_coords(
            extract("https://www.google.com/maps/place/X/data=!4m2!3d41.9028!4d12.4964"),
            41.9028,
            12.4964,
        );
    }

    #[test]
    fn google_link_inside_html_anchor() {
        let text = r#"Нашёл! <a href="https://www.google.de/maps/@52.52,13.405,12z">тут</a>"#;
        assert_coords(extract(text), 52.52, 13.405);
    }

    // --- Yandex ---

    #[test]
    fn yandex_reverses_axis_order() {
        assert_coords(
            extract("https://yandex.ru/maps/?ll=37.617635,55.755814&z=12"),
            55.755814,
            37.617635,
        );
        assert_coords(
            extract("https://yandex.com.tr/maps/?pt=28.9784,41.0082&z=15"),
            41.0082,
            28.9784,
        );
    }

    // --- Bing ---

    #[test]
    fn bing_cp_and_sp() {
        assert_coords(extract("https://www.bing.com/maps?cp=47.6062~-122.3321&lvl=11"), 47.6062, -122.3321);
        assert_coords(
            extract("https://bing.com/maps/default.aspx?sp=point.51.5074_-0.1278_London"),
            51.5074,
            -0.1278,
        );
    }

    // --- OpenStreetMap ---

    #[test]
    fn osm_hash_map() {
        assert_coords(
            extract("https://www.openstreetmap.org/#map=15/50.0755/14.4378"),
            50.0755,
            14.4378,
        );
    }

    #[test]
    fn osm_marker_params_need_both() {
        assert_coords(
            extract("https://www.openstreetmap.org/?mlat=64.1466&mlon=-21.9426#map=12/64.1/-21.9"),
            64.1,
            -21.9,
        );
        assert_coords(
            extract("https://www.openstreetmap.org/?mlat=64.1466&mlon=-21.9426"),
            64.1466,
            -21.9426,
        );
        assert!(extract("https://www.openstreetmap.org/?mlat=64.1466").is_none());
    }

    // --- Validation and fall-through ---

    #[test]
    fn out_of_range_is_rejected() {
        assert!(extract("https://www.google.com/maps/@91.0,10.0,17z").is_none());
        assert!(extract("https://www.bing.com/maps?cp=10.0~181.0").is_none());
        assert!(extract("https://yandex.ru/maps/?ll=200.0,10.0").is_none());
    }

    #[test]
    fn invalid_alternative_falls_through_to_next() {
        // @-pattern is out of range, ll= is fine.
        let text = "https://www.google.com/maps/@95.0,10.0?ll=45.0,10.0";
        assert_coords(extract(text), 45.0, 10.0);
    }

    #[test]
    fn invalid_provider_falls_through_to_next_provider() {
        let text = "https://www.google.com/maps/@95.0,10.0 or https://www.bing.com/maps?cp=1.5~2.5";
        assert_coords(extract(text), 1.5, 2.5);
    }

    #[test]
    fn google_is_tried_before_yandex() {
        let text = "https://yandex.ru/maps/?ll=37.6,55.7 https://www.google.com/maps/@10.0,20.0,3z";
        let (provider, c) = STANDARD.extract_with_provider(text).unwrap();
        assert_eq!(provider, Provider::Google);
        assert_coords(Some(c), 10.0, 20.0);
    }

    #[test]
    fn unrelated_text_yields_nothing() {
        assert!(extract("Это где-то под Тверью, 55.1, 37.2").is_none());
        assert!(extract("https://example.com/maps/@10.0,20.0").is_none());
        assert!(extract("").is_none());
    }

    #[test]
    fn standard_provider_order() {
        assert_eq!(
            CoordinateExtractor::standard().providers(),
            vec![Provider::Google, Provider::Yandex, Provider::Bing, Provider::OpenStreetMap]
        );
    }

    #[test]
    fn custom_source_list_is_respected() {
        let only_bing = CoordinateExtractor::new(vec![Box::new(ProviderPatterns::bing())]);
        assert!(only_bing.extract("https://www.google.com/maps/@10.0,20.0,3z").is_none());
        assert_coords(only_bing.extract("https://www.bing.com/maps?cp=1~2"), 1.0, 2.0);
    }
}
