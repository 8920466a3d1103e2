// Test double for the redirect transport.
//
// MockTransport maps a URL to a canned hop (or an error) and counts calls so
// tests can assert that a comment was or was not sent through the resolver.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{ResolveError, Result};
use crate::transport::{Hop, RedirectTransport};

enum Canned {
    Redirect { status: u16, location: String },
    Final { status: u16 },
    Fail(String),
    Hang,
}

/// HashMap-based transport. Unregistered URLs fail with a network error.
pub struct MockTransport {
    routes: HashMap<String, Canned>,
    calls: AtomicUsize,
    seen: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// `url` answers 302 with `location`.
    pub fn redirect(mut self, url: &str, location: &str) -> Self {
        self.routes.insert(
            url.to_string(),
            Canned::Redirect {
                status: 302,
                location: location.to_string(),
            },
        );
        self
    }

    /// `url` answers `status` with no `Location` header.
    pub fn dead_end(mut self, url: &str, status: u16) -> Self {
        self.routes.insert(url.to_string(), Canned::Final { status });
        self
    }

    pub fn fail(mut self, url: &str, message: &str) -> Self {
        self.routes.insert(url.to_string(), Canned::Fail(message.to_string()));
        self
    }

    /// `url` never answers.
    pub fn hang(mut self, url: &str) -> Self {
        self.routes.insert(url.to_string(), Canned::Hang);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RedirectTransport for MockTransport {
    async fn get(&self, url: &str) -> Result<Hop> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(url.to_string());
        match self.routes.get(url) {
            Some(Canned::Redirect { status, location }) => Ok(Hop {
                status: *status,
                location: Some(location.clone()),
            }),
            Some(Canned::Final { status }) => Ok(Hop {
                status: *status,
                location: None,
            }),
            Some(Canned::Fail(message)) => Err(ResolveError::Network(message.clone())),
            Some(Canned::Hang) => std::future::pending().await,
            None => Err(ResolveError::Network(format!(
                "MockTransport: no route registered for {url}"
            ))),
        }
    }
}
