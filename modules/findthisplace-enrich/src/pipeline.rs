use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use findthisplace_common::{EnrichConfig, FtpError, PostScope};
use findthisplace_geo::Geolocator;

use crate::stages::{CommentStage, PostStage, UserStage};
use crate::stats::EnrichStats;
use crate::store::{DerivedStore, RawStore};

/// Batch and worker-pool sizes for one pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub batch_size: usize,
    pub resolve_concurrency: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            batch_size: 500,
            resolve_concurrency: 4,
        }
    }
}

impl From<&EnrichConfig> for PipelineSettings {
    fn from(config: &EnrichConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            resolve_concurrency: config.resolve_concurrency,
        }
    }
}

/// Runs the enrichment stages in order: comments, posts, users.
pub struct Pipeline {
    comments: CommentStage,
    posts: PostStage,
    users: UserStage,
}

impl Pipeline {
    pub fn new(
        raw: Arc<dyn RawStore>,
        derived: Arc<dyn DerivedStore>,
        geo: Arc<Geolocator>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            comments: CommentStage::new(
                raw.clone(),
                derived.clone(),
                geo,
                settings.batch_size,
                settings.resolve_concurrency,
            ),
            posts: PostStage::new(raw.clone(), derived.clone(), settings.batch_size),
            users: UserStage::new(raw, derived, settings.batch_size),
        }
    }

    /// Pipeline with a real HTTP geolocator built from config.
    pub fn from_config(
        config: &EnrichConfig,
        raw: Arc<dyn RawStore>,
        derived: Arc<dyn DerivedStore>,
    ) -> Result<Self, FtpError> {
        let geo = Geolocator::http(config.shortlink_timeout, config.shortlink_max_hops)
            .map_err(|e| FtpError::Config(format!("short-link client: {e}")))?;
        Ok(Self::new(raw, derived, Arc::new(geo), PipelineSettings::from(config)))
    }

    pub async fn run(
        &self,
        scope: &PostScope,
        cancel: &CancellationToken,
    ) -> Result<EnrichStats, FtpError> {
        let run_id = Uuid::new_v4().to_string();
        self.run_with_id(&run_id, scope, cancel).await
    }

    /// Run all three stages. A stage error aborts the run; batches already
    /// flushed stay in place and the next run picks up from there.
    pub async fn run_with_id(
        &self,
        run_id: &str,
        scope: &PostScope,
        cancel: &CancellationToken,
    ) -> Result<EnrichStats, FtpError> {
        let started = Instant::now();
        let mut stats = EnrichStats::default();
        info!(run_id, scope = %scope, "Enrichment run starting");

        let result = self.run_stages(scope, cancel, &mut stats).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let counters = serde_json::to_string(&stats).unwrap_or_default();
        match &result {
            Ok(()) => info!(run_id, elapsed_ms, stats = counters.as_str(), "Enrichment run finished"),
            Err(FtpError::Cancelled) => {
                warn!(run_id, elapsed_ms, stats = counters.as_str(), "Enrichment run cancelled")
            }
            Err(e) => {
                warn!(run_id, elapsed_ms, stats = counters.as_str(), error = %e, "Enrichment run failed")
            }
        }

        result.map(|()| stats)
    }

    async fn run_stages(
        &self,
        scope: &PostScope,
        cancel: &CancellationToken,
        stats: &mut EnrichStats,
    ) -> Result<(), FtpError> {
        self.comments.run(scope, cancel, stats).await?;
        self.posts.run(scope, cancel, stats).await?;
        self.users.run(cancel, stats).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_match_config_defaults() {
        let settings = PipelineSettings::default();
        assert_eq!(settings.batch_size, 500);
        assert_eq!(settings.resolve_concurrency, 4);
    }
}
