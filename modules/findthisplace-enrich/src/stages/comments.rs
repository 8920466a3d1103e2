use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use findthisplace_common::{
    Comment, CommentCoordinate, CommentExtraction, FtpError, PostScope, MAX_BATCH_SIZE,
};
use findthisplace_geo::Geolocator;

use crate::stats::EnrichStats;
use crate::store::{DerivedStore, RawStore};

use super::settle_write;

/// Extracts coordinates from comment text and persists one record per comment.
///
/// Comments already extracted are skipped without touching the geolocator.
/// Failed extractions are written as `Failed` and retried on the next run.
pub struct CommentStage {
    raw: Arc<dyn RawStore>,
    derived: Arc<dyn DerivedStore>,
    geo: Arc<Geolocator>,
    batch_size: usize,
    concurrency: usize,
}

impl CommentStage {
    pub fn new(
        raw: Arc<dyn RawStore>,
        derived: Arc<dyn DerivedStore>,
        geo: Arc<Geolocator>,
        batch_size: usize,
        concurrency: usize,
    ) -> Self {
        Self {
            raw,
            derived,
            geo,
            batch_size: batch_size.clamp(1, MAX_BATCH_SIZE),
            concurrency: concurrency.max(1),
        }
    }

    pub async fn run(
        &self,
        scope: &PostScope,
        cancel: &CancellationToken,
        stats: &mut EnrichStats,
    ) -> Result<(), FtpError> {
        if scope.is_empty() {
            return Ok(());
        }

        let done = self.derived.extracted_comment_ids(scope).await?;
        info!(scope = %scope, already_extracted = done.len(), "Comment stage starting");

        let mut after = None;
        loop {
            if cancel.is_cancelled() {
                return Err(FtpError::Cancelled);
            }

            let page = self.raw.comments_page(scope, after, self.batch_size).await?;
            let Some(last) = page.last() else { break };
            after = Some(last.id);
            let exhausted = page.len() < self.batch_size;

            let scanned = page.len();
            let pending: Vec<Comment> = page.into_iter().filter(|c| !done.contains(&c.id)).collect();
            stats.comments_scanned += scanned as u32;
            stats.comments_skipped += (scanned - pending.len()) as u32;

            if !pending.is_empty() {
                let batch = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(FtpError::Cancelled),
                    batch = self.locate_batch(pending) => batch,
                };

                for record in &batch {
                    match record.extraction {
                        CommentExtraction::Extracted(_) => stats.coordinates_extracted += 1,
                        CommentExtraction::Failed => stats.extraction_failed += 1,
                    }
                }

                settle_write(
                    self.derived.upsert_comment_coordinates(&batch).await,
                    "comment_coordinates",
                    stats,
                )?;
                debug!(written = batch.len(), after = ?after, "Comment batch flushed");
            }

            if exhausted {
                break;
            }
        }

        info!(
            scanned = stats.comments_scanned,
            skipped = stats.comments_skipped,
            extracted = stats.coordinates_extracted,
            failed = stats.extraction_failed,
            "Comment stage complete"
        );
        Ok(())
    }

    /// Locate every comment in the batch with at most `concurrency` short-link
    /// walks in flight. The result is ordered by comment id.
    async fn locate_batch(&self, comments: Vec<Comment>) -> Vec<CommentCoordinate> {
        let geo = Arc::clone(&self.geo);
        let mut batch: Vec<CommentCoordinate> = stream::iter(comments)
            .map(move |comment| {
                let geo = Arc::clone(&geo);
                let (comment_id, text) = (comment.id, comment.text);
                async move {
                    CommentCoordinate {
                        comment_id,
                        extraction: geo.locate(&text).await.into(),
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        batch.sort_by_key(|record| record.comment_id);
        batch
    }
}
