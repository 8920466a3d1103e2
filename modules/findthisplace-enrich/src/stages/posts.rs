use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use findthisplace_common::{
    Comment, Coordinates, FtpError, Post, PostScope, ResolutionOrigin, ResolutionRecord,
    MAX_BATCH_SIZE,
};

use crate::found_tag::is_found;
use crate::stats::EnrichStats;
use crate::store::{DerivedStore, RawStore};

use super::settle_write;

/// Highest rating first, lowest comment id among equals.
fn by_rank(a: &Comment, b: &Comment) -> Ordering {
    b.rating.cmp(&a.rating).then(a.id.cmp(&b.id))
}

/// Build the automated resolution for one post.
///
/// The finder is the author of the top-ranked comment and `found_date` is when
/// that comment was written. The location comes from the top-ranked comment
/// that has extracted coordinates, which may be a different comment.
pub fn resolve_post(
    post: &Post,
    comments: &[&Comment],
    coordinates: &HashMap<i64, Coordinates>,
) -> ResolutionRecord {
    if !is_found(&post.text) {
        return ResolutionRecord::not_found(post.id);
    }

    let finder = comments.iter().copied().min_by(|a, b| by_rank(a, b));
    let location = comments
        .iter()
        .copied()
        .filter_map(|c| coordinates.get(&c.id).map(|loc| (c, *loc)))
        .min_by(|(a, _), (b, _)| by_rank(a, b))
        .map(|(_, loc)| loc);

    ResolutionRecord {
        post_id: post.id,
        is_found: true,
        location,
        found_by_id: finder.map(|c| c.author_id),
        found_date: finder.map(|c| c.created_at),
        origin: ResolutionOrigin::Automatic,
    }
}

/// Writes one resolution per post in scope. Records under manual override
/// are filtered out by the store at write time.
pub struct PostStage {
    raw: Arc<dyn RawStore>,
    derived: Arc<dyn DerivedStore>,
    batch_size: usize,
}

impl PostStage {
    pub fn new(raw: Arc<dyn RawStore>, derived: Arc<dyn DerivedStore>, batch_size: usize) -> Self {
        Self {
            raw,
            derived,
            batch_size: batch_size.clamp(1, MAX_BATCH_SIZE),
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
        info!(scope = %scope, "Post stage starting");

        let mut after = None;
        loop {
            if cancel.is_cancelled() {
                return Err(FtpError::Cancelled);
            }

            let posts = self.raw.posts_page(scope, after, self.batch_size).await?;
            let Some(last) = posts.last() else { break };
            after = Some(last.id);
            let exhausted = posts.len() < self.batch_size;

            let batch = self.resolve_page(&posts).await?;

            stats.posts_processed += batch.len() as u32;
            for record in &batch {
                if record.is_found {
                    stats.posts_found += 1;
                }
                if record.location.is_some() {
                    stats.posts_with_coordinates += 1;
                }
            }

            settle_write(
                self.derived.upsert_resolutions(&batch).await,
                "post_resolutions",
                stats,
            )?;
            debug!(written = batch.len(), after = ?after, "Resolution batch flushed");

            if exhausted {
                break;
            }
        }

        info!(
            processed = stats.posts_processed,
            found = stats.posts_found,
            with_coordinates = stats.posts_with_coordinates,
            "Post stage complete"
        );
        Ok(())
    }

    async fn resolve_page(&self, posts: &[Post]) -> Result<Vec<ResolutionRecord>, FtpError> {
        // Comments only matter for posts carrying the marker.
        let found_ids: Vec<i64> = posts
            .iter()
            .filter(|p| is_found(&p.text))
            .map(|p| p.id)
            .collect();

        let comments = self.raw.comments_for_posts(&found_ids).await?;
        let comment_ids: Vec<i64> = comments.iter().map(|c| c.id).collect();
        let coordinates = self.derived.extracted_coordinates(&comment_ids).await?;

        let mut by_post: HashMap<i64, Vec<&Comment>> = HashMap::new();
        for comment in &comments {
            by_post.entry(comment.post_id).or_default().push(comment);
        }

        Ok(posts
            .iter()
            .map(|post| {
                let under = by_post.get(&post.id).map(Vec::as_slice).unwrap_or_default();
                resolve_post(post, under, &coordinates)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;

    fn post(id: i64, text: &str) -> Post {
        Post {
            id,
            text: text.to_string(),
            created_at: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
            tags: vec![],
            author_id: 1,
        }
    }

    fn comment(id: i64, rating: i32, author_id: i64) -> Comment {
        Comment {
            id,
            post_id: 10,
            parent_id: None,
            rating,
            text: String::new(),
            author_id,
            created_at: Utc.with_ymd_and_hms(2020, 1, 2, 0, 0, 0).unwrap() + Duration::hours(id),
        }
    }

    #[test]
    fn unmarked_post_is_not_found() {
        let c = comment(1, 50, 7);
        let record = resolve_post(&post(10, "Где это?"), &[&c], &HashMap::new());
        assert_eq!(record, ResolutionRecord::not_found(10));
    }

    #[test]
    fn finder_and_location_can_come_from_different_comments() {
        let top = comment(1, 50, 7);
        let located = comment(2, 10, 8);
        let low = comment(3, 5, 9);
        let loc = Coordinates::new(48.8584, 2.2945).unwrap();
        let coords = HashMap::from([(2, loc)]);

        let record = resolve_post(&post(10, "[НАЙДЕНО] Где это?"), &[&top, &located, &low], &coords);

        assert!(record.is_found);
        assert_eq!(record.found_by_id, Some(7));
        assert_eq!(record.found_date, Some(top.created_at));
        assert_eq!(record.location, Some(loc));
    }

    #[test]
    fn equal_ratings_prefer_lowest_comment_id() {
        let later = comment(9, 20, 3);
        let earlier = comment(4, 20, 2);
        let a = Coordinates::new(1.0, 1.0).unwrap();
        let b = Coordinates::new(2.0, 2.0).unwrap();
        let coords = HashMap::from([(9, a), (4, b)]);

        let record = resolve_post(&post(10, "[найдено]"), &[&later, &earlier], &coords);

        assert_eq!(record.found_by_id, Some(2));
        assert_eq!(record.location, Some(b));
    }

    #[test]
    fn found_post_without_comments_has_no_finder() {
        let record = resolve_post(&post(10, "[НАЙДЕНО]"), &[], &HashMap::new());
        assert!(record.is_found);
        assert_eq!(record.found_by_id, None);
        assert_eq!(record.found_date, None);
        assert_eq!(record.location, None);
    }

    #[test]
    fn negative_ratings_still_rank() {
        let a = comment(1, -3, 5);
        let b = comment(2, -1, 6);
        let record = resolve_post(&post(10, "[НАЙДЕНО]"), &[&a, &b], &HashMap::new());
        assert_eq!(record.found_by_id, Some(6));
    }
}
