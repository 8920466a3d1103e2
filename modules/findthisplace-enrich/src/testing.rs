// In-memory store for stage and pipeline tests.
//
// MemoryStore implements RawStore, DerivedStore and RunLedger over BTreeMaps
// with the same filters the Postgres store applies at write time: extracted
// comment coordinates are never replaced and manual-override resolutions are
// never touched by automated upserts.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use findthisplace_common::{
    Comment, CommentCoordinate, Coordinates, ManualEdit, Post, PostHeader, PostScope,
    ResolutionOrigin, ResolutionRecord, RunRecord, UserStats,
};

use crate::store::{
    validate_manual_edit, DerivedStore, RawStore, RunLedger, StoreError, StoreResult,
};

#[derive(Default)]
struct Inner {
    users: BTreeSet<i64>,
    posts: BTreeMap<i64, Post>,
    comments: BTreeMap<i64, Comment>,
    coordinates: BTreeMap<i64, CommentCoordinate>,
    resolutions: BTreeMap<i64, ResolutionRecord>,
    user_stats: BTreeMap<i64, UserStats>,
    runs: Vec<RunRecord>,
    fail_next_write: Option<StoreError>,
    fail_reads: Option<String>,
    writes: usize,
}

impl Inner {
    /// Consume a queued write failure, if any. Counts the attempt either way.
    fn take_write_failure(&mut self) -> StoreResult<()> {
        self.writes += 1;
        match self.fail_next_write.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn check_reads(&self) -> StoreResult<()> {
        match &self.fail_reads {
            Some(msg) => Err(StoreError::Database(msg.clone())),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // --- Builders ---

    pub fn with_users(self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.inner.lock().unwrap().users.extend(ids);
        self
    }

    pub fn with_post(self, post: Post) -> Self {
        self.insert_post(post);
        self
    }

    pub fn with_comment(self, comment: Comment) -> Self {
        self.insert_comment(comment);
        self
    }

    pub fn with_last_run(self, record: RunRecord) -> Self {
        self.inner.lock().unwrap().runs.push(record);
        self
    }

    // --- Seeding and mutation ---

    pub fn insert_post(&self, post: Post) {
        self.inner.lock().unwrap().posts.insert(post.id, post);
    }

    pub fn insert_comment(&self, comment: Comment) {
        self.inner.lock().unwrap().comments.insert(comment.id, comment);
    }

    /// Change a raw comment's rating, as if the forum had been re-scraped.
    pub fn set_rating(&self, comment_id: i64, rating: i32) {
        if let Some(c) = self.inner.lock().unwrap().comments.get_mut(&comment_id) {
            c.rating = rating;
        }
    }

    pub fn set_comment_coordinate(&self, record: CommentCoordinate) {
        self.inner
            .lock()
            .unwrap()
            .coordinates
            .insert(record.comment_id, record);
    }

    pub fn set_resolution(&self, record: ResolutionRecord) {
        self.inner
            .lock()
            .unwrap()
            .resolutions
            .insert(record.post_id, record);
    }

    /// The next derived write returns `err` without applying anything.
    pub fn fail_next_write(&self, err: StoreError) {
        self.inner.lock().unwrap().fail_next_write = Some(err);
    }

    /// Every raw read fails with a database error until cleared.
    pub fn fail_reads(&self, message: Option<&str>) {
        self.inner.lock().unwrap().fail_reads = message.map(str::to_string);
    }

    // --- Inspection ---

    pub fn comment_coordinates(&self) -> Vec<CommentCoordinate> {
        self.inner.lock().unwrap().coordinates.values().copied().collect()
    }

    pub fn resolutions(&self) -> Vec<ResolutionRecord> {
        self.inner.lock().unwrap().resolutions.values().cloned().collect()
    }

    pub fn all_user_stats(&self) -> Vec<UserStats> {
        self.inner.lock().unwrap().user_stats.values().cloned().collect()
    }

    pub fn runs(&self) -> Vec<RunRecord> {
        self.inner.lock().unwrap().runs.clone()
    }

    /// Number of derived write calls attempted, failed ones included.
    pub fn write_count(&self) -> usize {
        self.inner.lock().unwrap().writes
    }
}

#[async_trait]
impl RawStore for MemoryStore {
    async fn user_ids(&self) -> StoreResult<Vec<i64>> {
        let inner = self.inner.lock().unwrap();
        inner.check_reads()?;
        Ok(inner.users.iter().copied().collect())
    }

    async fn posts_page(
        &self,
        scope: &PostScope,
        after: Option<i64>,
        limit: usize,
    ) -> StoreResult<Vec<Post>> {
        let inner = self.inner.lock().unwrap();
        inner.check_reads()?;
        Ok(inner
            .posts
            .values()
            .filter(|p| after.is_none_or(|a| p.id > a) && scope.contains(p.id))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn post_headers_page(&self, after: Option<i64>, limit: usize) -> StoreResult<Vec<PostHeader>> {
        let inner = self.inner.lock().unwrap();
        inner.check_reads()?;
        Ok(inner
            .posts
            .values()
            .filter(|p| after.is_none_or(|a| p.id > a))
            .take(limit)
            .map(PostHeader::from)
            .collect())
    }

    async fn comments_page(
        &self,
        scope: &PostScope,
        after: Option<i64>,
        limit: usize,
    ) -> StoreResult<Vec<Comment>> {
        let inner = self.inner.lock().unwrap();
        inner.check_reads()?;
        Ok(inner
            .comments
            .values()
            .filter(|c| after.is_none_or(|a| c.id > a) && scope.contains(c.post_id))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn comments_for_posts(&self, post_ids: &[i64]) -> StoreResult<Vec<Comment>> {
        let inner = self.inner.lock().unwrap();
        inner.check_reads()?;
        Ok(inner
            .comments
            .values()
            .filter(|c| post_ids.contains(&c.post_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DerivedStore for MemoryStore {
    async fn extracted_comment_ids(&self, scope: &PostScope) -> StoreResult<HashSet<i64>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .coordinates
            .values()
            .filter(|cc| cc.extraction.is_terminal())
            .filter(|cc| {
                inner
                    .comments
                    .get(&cc.comment_id)
                    .is_some_and(|c| scope.contains(c.post_id))
            })
            .map(|cc| cc.comment_id)
            .collect())
    }

    async fn extracted_coordinates(
        &self,
        comment_ids: &[i64],
    ) -> StoreResult<HashMap<i64, Coordinates>> {
        let inner = self.inner.lock().unwrap();
        Ok(comment_ids
            .iter()
            .filter_map(|id| {
                let c = inner.coordinates.get(id)?.extraction.coordinates()?;
                Some((*id, c))
            })
            .collect())
    }

    async fn upsert_comment_coordinates(&self, batch: &[CommentCoordinate]) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.take_write_failure()?;
        for record in batch {
            let terminal = inner
                .coordinates
                .get(&record.comment_id)
                .is_some_and(|existing| existing.extraction.is_terminal());
            if !terminal {
                inner.coordinates.insert(record.comment_id, *record);
            }
        }
        Ok(())
    }

    async fn upsert_resolutions(&self, batch: &[ResolutionRecord]) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.take_write_failure()?;
        for record in batch {
            let manual = inner
                .resolutions
                .get(&record.post_id)
                .is_some_and(|existing| existing.origin.is_manual());
            if !manual {
                inner.resolutions.insert(
                    record.post_id,
                    ResolutionRecord {
                        origin: ResolutionOrigin::Automatic,
                        ..record.clone()
                    },
                );
            }
        }
        Ok(())
    }

    async fn resolutions_page(
        &self,
        after: Option<i64>,
        limit: usize,
    ) -> StoreResult<Vec<ResolutionRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .resolutions
            .values()
            .filter(|r| after.is_none_or(|a| r.post_id > a))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn replace_user_stats(&self, batch: &[UserStats]) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.take_write_failure()?;
        for stats in batch {
            inner.user_stats.insert(stats.user_id, stats.clone());
        }
        Ok(())
    }

    async fn apply_manual_edit(&self, post_id: i64, edit: &ManualEdit) -> StoreResult<bool> {
        validate_manual_edit(edit)?;
        let mut inner = self.inner.lock().unwrap();
        let Some(record) = inner.resolutions.get_mut(&post_id) else {
            return Ok(false);
        };
        if let Some(loc) = edit.location {
            record.location = Some(loc);
        }
        if let Some(finder) = edit.found_by_id {
            record.found_by_id = Some(finder);
        }
        if let Some(date) = edit.found_date {
            record.found_date = Some(date);
        }
        record.origin = ResolutionOrigin::ManualOverride;
        Ok(true)
    }

    async fn comment_coordinate(&self, comment_id: i64) -> StoreResult<Option<CommentCoordinate>> {
        Ok(self.inner.lock().unwrap().coordinates.get(&comment_id).copied())
    }

    async fn resolution(&self, post_id: i64) -> StoreResult<Option<ResolutionRecord>> {
        Ok(self.inner.lock().unwrap().resolutions.get(&post_id).cloned())
    }

    async fn user_stats(&self, user_id: i64) -> StoreResult<Option<UserStats>> {
        Ok(self.inner.lock().unwrap().user_stats.get(&user_id).cloned())
    }
}

#[async_trait]
impl RunLedger for MemoryStore {
    async fn last_run(&self) -> StoreResult<Option<RunRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.runs.iter().max_by_key(|r| r.finished_at).cloned())
    }

    async fn record_run(&self, record: &RunRecord) -> StoreResult<()> {
        self.inner.lock().unwrap().runs.push(record.clone());
        Ok(())
    }
}
