use std::sync::Arc;
use std::time::Duration;

use findthisplace_common::Coordinates;

use crate::error::Result;
use crate::extractor::CoordinateExtractor;
use crate::shortlink::ShortLinkResolver;
use crate::transport::{HttpTransport, RedirectTransport};

/// Direct extraction first, short-link resolution only when that finds nothing.
pub struct Geolocator {
    extractor: Arc<CoordinateExtractor>,
    resolver: ShortLinkResolver,
}

impl Geolocator {
    pub fn new(transport: Arc<dyn RedirectTransport>, max_hops: usize) -> Self {
        let extractor = Arc::new(CoordinateExtractor::standard());
        let resolver = ShortLinkResolver::new(transport, extractor.clone()).with_max_hops(max_hops);
        Self { extractor, resolver }
    }

    /// Geolocator backed by a real HTTP client, one per pipeline run.
    pub fn http(timeout: Duration, max_hops: usize) -> Result<Self> {
        let transport = HttpTransport::new(timeout)?;
        Ok(Self::new(Arc::new(transport), max_hops))
    }

    pub fn extract(&self, text: &str) -> Option<Coordinates> {
        self.extractor.extract(text)
    }

    pub async fn locate(&self, text: &str) -> Option<Coordinates> {
        if let Some(c) = self.extractor.extract(text) {
            return Some(c);
        }
        self.resolver.resolve(text).await
    }
}
