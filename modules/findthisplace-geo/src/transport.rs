use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, LOCATION, USER_AGENT};
use url::Url;

use crate::error::{ResolveError, Result};

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";
const BROWSER_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const BROWSER_ACCEPT_LANGUAGE: &str = "ru-RU,ru;q=0.9,en;q=0.8";

/// Default per-hop timeout for shortener requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of one GET against a shortener hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hop {
    pub status: u16,
    /// Raw `Location` header, possibly relative.
    pub location: Option<String>,
}

/// One non-following GET. Implementations must not follow redirects themselves.
#[async_trait]
pub trait RedirectTransport: Send + Sync {
    async fn get(&self, url: &str) -> Result<Hop>;
}

// ---------------------------------------------------------------------------
// HttpTransport
// ---------------------------------------------------------------------------

/// reqwest-backed transport that looks like a desktop browser and never
/// auto-follows redirects. Keeps its own cookie store so consent cookies set
/// on one hop are sent on the next.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .cookie_store(true)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RedirectTransport for HttpTransport {
    async fn get(&self, url: &str) -> Result<Hop> {
        let target = Url::parse(url)?;
        let resp = self
            .client
            .get(target)
            .header(USER_AGENT, BROWSER_USER_AGENT)
            .header(ACCEPT, BROWSER_ACCEPT)
            .header(ACCEPT_LANGUAGE, BROWSER_ACCEPT_LANGUAGE)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() && !status.is_redirection() {
            return Err(ResolveError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let location = resp
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .filter(|l| !l.is_empty());

        Ok(Hop {
            status: status.as_u16(),
            location,
        })
    }
}
