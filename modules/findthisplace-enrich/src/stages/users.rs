use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::info;

use findthisplace_common::{FtpError, PostHeader, ResolutionRecord, UserStats, MAX_BATCH_SIZE};

use crate::stats::EnrichStats;
use crate::store::{DerivedStore, RawStore};
use crate::tier::tier;

use super::settle_write;

fn elapsed_seconds(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}

#[derive(Debug, Default)]
struct Running {
    sum: f64,
    count: i64,
}

impl Running {
    fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

#[derive(Debug)]
struct UserAcc {
    stats: UserStats,
    author_time: Running,
    search_time: Running,
}

impl UserAcc {
    fn new(user_id: i64) -> Self {
        Self {
            stats: UserStats::empty(user_id),
            author_time: Running::default(),
            search_time: Running::default(),
        }
    }

    fn finish(mut self) -> UserStats {
        self.stats.avg_author_time_seconds = self.author_time.mean();
        self.stats.avg_search_time_seconds = self.search_time.mean();
        self.stats
    }
}

/// Per-user author and finder statistics, built from scratch every run.
#[derive(Debug, Default)]
pub struct StatsAccumulator {
    users: BTreeMap<i64, UserAcc>,
}

impl StatsAccumulator {
    /// Start with a zeroed entry for every known user.
    pub fn seeded(user_ids: impl IntoIterator<Item = i64>) -> Self {
        let users = user_ids.into_iter().map(|id| (id, UserAcc::new(id))).collect();
        Self { users }
    }

    fn user(&mut self, id: i64) -> &mut UserAcc {
        self.users.entry(id).or_insert_with(|| UserAcc::new(id))
    }

    /// Account for one post, given its resolution if one exists.
    ///
    /// Author side: every post counts toward the total; a missing resolution
    /// counts as not found. Finder side: only found posts with a positive
    /// finder id and a found date.
    pub fn add_post(&mut self, post: &PostHeader, resolution: Option<&ResolutionRecord>) {
        let found = resolution.filter(|r| r.is_found);

        let author = self.user(post.author_id);
        author.stats.author_posts_total += 1;
        if let Some(r) = found {
            author.stats.author_posts_found += 1;
            if let Some(date) = r.found_date {
                author.author_time.add(elapsed_seconds(post.created_at, date));
            }
        }

        let Some(r) = found else { return };
        let (Some(finder_id), Some(date)) = (r.found_by_id, r.found_date) else {
            return;
        };
        if finder_id <= 0 {
            return;
        }

        let search = elapsed_seconds(post.created_at, date);
        let finder = self.user(finder_id);
        finder.stats.found_total += 1;
        finder.stats.found_tiers[tier(search)] += 1;
        finder.search_time.add(search);
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Final statistics, ascending by user id.
    pub fn finish(self) -> Vec<UserStats> {
        self.users.into_values().map(UserAcc::finish).collect()
    }
}

/// Recomputes statistics for every user regardless of the run's post scope.
pub struct UserStage {
    raw: Arc<dyn RawStore>,
    derived: Arc<dyn DerivedStore>,
    batch_size: usize,
}

impl UserStage {
    pub fn new(raw: Arc<dyn RawStore>, derived: Arc<dyn DerivedStore>, batch_size: usize) -> Self {
        Self {
            raw,
            derived,
            batch_size: batch_size.clamp(1, MAX_BATCH_SIZE),
        }
    }

    pub async fn run(
        &self,
        cancel: &CancellationToken,
        stats: &mut EnrichStats,
    ) -> Result<(), FtpError> {
        let user_ids = self.raw.user_ids().await?;
        info!(users = user_ids.len(), "User stage starting");
        let mut acc = StatsAccumulator::seeded(user_ids);

        let found = self.found_resolutions(cancel).await?;

        let mut after = None;
        loop {
            if cancel.is_cancelled() {
                return Err(FtpError::Cancelled);
            }
            let headers = self.raw.post_headers_page(after, self.batch_size).await?;
            let Some(last) = headers.last() else { break };
            after = Some(last.id);

            for header in &headers {
                acc.add_post(header, found.get(&header.id));
            }

            if headers.len() < self.batch_size {
                break;
            }
        }

        let all = acc.finish();
        for chunk in all.chunks(self.batch_size) {
            if cancel.is_cancelled() {
                return Err(FtpError::Cancelled);
            }
            settle_write(self.derived.replace_user_stats(chunk).await, "user_stats", stats)?;
            stats.users_written += chunk.len() as u32;
        }

        info!(written = stats.users_written, "User stage complete");
        Ok(())
    }

    /// Every resolution marked found, keyed by post id.
    async fn found_resolutions(
        &self,
        cancel: &CancellationToken,
    ) -> Result<HashMap<i64, ResolutionRecord>, FtpError> {
        let mut found = HashMap::new();
        let mut after = None;
        loop {
            if cancel.is_cancelled() {
                return Err(FtpError::Cancelled);
            }
            let page = self.derived.resolutions_page(after, self.batch_size).await?;
            let Some(last) = page.last() else { break };
            after = Some(last.post_id);
            let exhausted = page.len() < self.batch_size;

            found.extend(page.into_iter().filter(|r| r.is_found).map(|r| (r.post_id, r)));

            if exhausted {
                break;
            }
        }
        Ok(found)
    }
}
