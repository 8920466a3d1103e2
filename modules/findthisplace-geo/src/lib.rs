pub mod error;
pub mod extractor;
pub mod locate;
pub mod shortlink;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod transport;

pub use error::{ResolveError, Result};
pub use extractor::{AxisOrder, CoordinateExtractor, CoordinateSource, Provider, ProviderPatterns};
pub use locate::Geolocator;
pub use shortlink::{extract_from_query, find_short_url, ShortLinkResolver, DEFAULT_MAX_HOPS};
pub use transport::{Hop, HttpTransport, RedirectTransport};
