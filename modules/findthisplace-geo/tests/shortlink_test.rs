//! Redirect-walk scenarios against a scripted transport.

use std::sync::Arc;

use findthisplace_geo::testing::MockTransport;
use findthisplace_geo::{CoordinateExtractor, Geolocator, ShortLinkResolver};

fn resolver(transport: Arc<MockTransport>) -> ShortLinkResolver {
    ShortLinkResolver::new(transport, Arc::new(CoordinateExtractor::standard()))
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[tokio::test]
async fn first_hop_location_carries_coordinates() {
    let transport = Arc::new(MockTransport::new().redirect(
        "https://maps.app.goo.gl/abc123",
        "https://www.google.com/maps?ll=40.7128,-74.0060",
    ));

    let c = resolver(transport.clone())
        .resolve("https://maps.app.goo.gl/abc123")
        .await
        .expect("coordinates");

    assert!(approx(c.lat, 40.7128));
    assert!(approx(c.lng, -74.006));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn consent_page_continue_param_is_used() {
    let transport = Arc::new(MockTransport::new().redirect(
        "https://maps.app.goo.gl/consent",
        "https://consent.google.com/m?continue=https%3A%2F%2Fwww.google.com%2Fmaps%3Fll%3D51.5,-0.12",
    ));

    let c = resolver(transport)
        .resolve("look: https://maps.app.goo.gl/consent")
        .await
        .expect("coordinates via continue");

    assert!(approx(c.lat, 51.5));
    assert!(approx(c.lng, -0.12));
}

#[tokio::test]
async fn multi_hop_with_relative_location() {
    let transport = Arc::new(
        MockTransport::new()
            .redirect("https://goo.gl/maps/q1", "https://maps.google.com/intermediate")
            .redirect("https://maps.google.com/intermediate", "/maps/@35.0,139.0,12z"),
    );

    let c = resolver(transport.clone())
        .resolve("https://goo.gl/maps/q1")
        .await
        .expect("coordinates after two hops");

    assert!(approx(c.lat, 35.0));
    assert!(approx(c.lng, 139.0));
    assert_eq!(
        transport.seen(),
        vec!["https://goo.gl/maps/q1", "https://maps.google.com/intermediate"]
    );
}

#[tokio::test]
async fn yandex_short_link_resolves_with_reversed_order() {
    let transport = Arc::new(MockTransport::new().redirect(
        "https://yandex.ru/maps/-/CCUqMZg~oC",
        "https://yandex.ru/maps/?ll=37.617635,55.755814&z=12",
    ));

    let c = resolver(transport)
        .resolve("https://yandex.ru/maps/-/CCUqMZg~oC")
        .await
        .expect("coordinates");

    assert!(approx(c.lat, 55.755814));
    assert!(approx(c.lng, 37.617635));
}

#[tokio::test]
async fn missing_location_is_a_dead_end() {
    let transport = Arc::new(MockTransport::new().dead_end("https://maps.app.goo.gl/gone", 200));
    assert!(resolver(transport)
        .resolve("https://maps.app.goo.gl/gone")
        .await
        .is_none());
}

#[tokio::test]
async fn transport_error_is_not_fatal() {
    let transport = Arc::new(MockTransport::new().fail("https://maps.app.goo.gl/err", "connection reset"));
    assert!(resolver(transport)
        .resolve("https://maps.app.goo.gl/err")
        .await
        .is_none());
}

#[tokio::test]
async fn hop_limit_stops_redirect_loops() {
    let transport = Arc::new(
        MockTransport::new()
            .redirect("https://maps.app.goo.gl/loop", "https://example.com/a")
            .redirect("https://example.com/a", "https://example.com/b")
            .redirect("https://example.com/b", "https://example.com/a"),
    );

    let resolved = resolver(transport.clone())
        .with_max_hops(5)
        .resolve("https://maps.app.goo.gl/loop")
        .await;

    assert!(resolved.is_none());
    assert_eq!(transport.calls(), 5);
}

#[tokio::test]
async fn text_without_short_link_makes_no_requests() {
    let transport = Arc::new(MockTransport::new());
    assert!(resolver(transport.clone())
        .resolve("no links here, just https://example.com")
        .await
        .is_none());
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn geolocator_skips_network_when_direct_extraction_succeeds() {
    let transport = Arc::new(MockTransport::new());
    let geo = Geolocator::new(transport.clone(), 10);

    let text = "https://www.google.com/maps/@48.8584,2.2945,17z and https://maps.app.goo.gl/other";
    let c = geo.locate(text).await.expect("direct hit");

    assert!(approx(c.lat, 48.8584));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn geolocator_falls_back_to_short_link() {
    let transport = Arc::new(MockTransport::new().redirect(
        "https://maps.app.goo.gl/abc123",
        "https://www.google.com/maps?ll=40.7128,-74.0060",
    ));
    let geo = Geolocator::new(transport.clone(), 10);

    let c = geo.locate("https://maps.app.goo.gl/abc123").await.expect("via resolver");
    assert!(approx(c.lng, -74.006));
    assert_eq!(transport.calls(), 1);
}
