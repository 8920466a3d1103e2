// Store abstractions for the enrichment stages.
//
// RawStore: read-only view of ingested posts, comments and users.
// DerivedStore: comment coordinates, post resolutions, user statistics.
// RunLedger: when the pipeline last ran and how it ended.
//
// PgStore implements all three over one Postgres database; MemoryStore in
// `testing` implements them in memory for stage tests.

mod postgres;

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use thiserror::Error;

use findthisplace_common::{
    Comment, CommentCoordinate, Coordinates, FtpError, ManualEdit, Post, PostHeader, PostScope,
    ResolutionRecord, RunRecord, UserStats,
};

pub use postgres::PgStore;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The target row already exists. Writers treat this as already satisfied.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// A stored row does not have the shape we expect. Never skipped.
    #[error("Malformed record: {0}")]
    Decode(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<StoreError> for FtpError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Decode(msg) => FtpError::Decode(msg),
            StoreError::Validation(msg) => FtpError::Validation(msg),
            other => FtpError::Database(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// RawStore: ingested records, read-only
// ---------------------------------------------------------------------------

#[async_trait]
pub trait RawStore: Send + Sync {
    /// Every known user id, including users with no posts or comments.
    async fn user_ids(&self) -> StoreResult<Vec<i64>>;

    /// Posts in `scope` with id greater than `after`, ascending by id.
    async fn posts_page(
        &self,
        scope: &PostScope,
        after: Option<i64>,
        limit: usize,
    ) -> StoreResult<Vec<Post>>;

    /// Author and creation time of every post with id greater than `after`, ascending by id.
    async fn post_headers_page(&self, after: Option<i64>, limit: usize) -> StoreResult<Vec<PostHeader>>;

    /// Comments under posts in `scope` with id greater than `after`, ascending by id.
    async fn comments_page(
        &self,
        scope: &PostScope,
        after: Option<i64>,
        limit: usize,
    ) -> StoreResult<Vec<Comment>>;

    /// All comments under the given posts, ascending by id.
    async fn comments_for_posts(&self, post_ids: &[i64]) -> StoreResult<Vec<Comment>>;
}

// ---------------------------------------------------------------------------
// DerivedStore: enrichment output
// ---------------------------------------------------------------------------

#[async_trait]
pub trait DerivedStore: Send + Sync {
    /// Ids of comments under posts in `scope` whose extraction already succeeded.
    async fn extracted_comment_ids(&self, scope: &PostScope) -> StoreResult<HashSet<i64>>;

    /// Extracted coordinates for whichever of `comment_ids` have them.
    async fn extracted_coordinates(
        &self,
        comment_ids: &[i64],
    ) -> StoreResult<HashMap<i64, Coordinates>>;

    /// Upsert by comment id. Rows already extracted are left untouched.
    /// The whole batch succeeds or fails together.
    async fn upsert_comment_coordinates(&self, batch: &[CommentCoordinate]) -> StoreResult<()>;

    /// Upsert by post id. Rows under manual override are left untouched.
    /// The whole batch succeeds or fails together.
    async fn upsert_resolutions(&self, batch: &[ResolutionRecord]) -> StoreResult<()>;

    /// Resolutions with post id greater than `after`, ascending by post id.
    async fn resolutions_page(
        &self,
        after: Option<i64>,
        limit: usize,
    ) -> StoreResult<Vec<ResolutionRecord>>;

    /// Replace each user's statistics wholesale.
    async fn replace_user_stats(&self, batch: &[UserStats]) -> StoreResult<()>;

    /// Apply an operator correction and pin the record under manual override.
    /// Returns `false` when no resolution exists for the post.
    async fn apply_manual_edit(&self, post_id: i64, edit: &ManualEdit) -> StoreResult<bool>;

    async fn comment_coordinate(&self, comment_id: i64) -> StoreResult<Option<CommentCoordinate>>;

    async fn resolution(&self, post_id: i64) -> StoreResult<Option<ResolutionRecord>>;

    async fn user_stats(&self, user_id: i64) -> StoreResult<Option<UserStats>>;
}

/// Reject edits the serving side would consider meaningless.
pub fn validate_manual_edit(edit: &ManualEdit) -> StoreResult<()> {
    if edit.is_empty() {
        return Err(StoreError::Validation("no fields to update".to_string()));
    }
    if let Some(loc) = edit.location {
        if loc.lat == 0.0 && loc.lng == 0.0 {
            return Err(StoreError::Validation(
                "coordinates cannot both be zero".to_string(),
            ));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// RunLedger: last run time and status
// ---------------------------------------------------------------------------

#[async_trait]
pub trait RunLedger: Send + Sync {
    async fn last_run(&self) -> StoreResult<Option<RunRecord>>;

    async fn record_run(&self, record: &RunRecord) -> StoreResult<()>;
}
