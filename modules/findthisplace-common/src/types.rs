use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Geo Types ---

/// A validated WGS84 point. Latitude is within [-90, 90], longitude within [-180, 180].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    /// Build a point, rejecting out-of-range or non-finite values.
    pub fn new(lat: f64, lng: f64) -> Option<Self> {
        if !lat.is_finite() || !lng.is_finite() {
            return None;
        }
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
            return None;
        }
        Some(Self { lat, lng })
    }

    /// Parse decimal latitude/longitude strings. Any parse failure or range violation is `None`.
    pub fn parse(lat: &str, lng: &str) -> Option<Self> {
        let lat = lat.trim().parse::<f64>().ok()?;
        let lng = lng.trim().parse::<f64>().ok()?;
        Self::new(lat, lng)
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}, {:.6}", self.lat, self.lng)
    }
}

// --- Raw records (written by ingestion, read-only here) ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub tags: Vec<String>,
    pub author_id: i64,
}

/// The slice of a post the statistics pass needs: who wrote it and when.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostHeader {
    pub id: i64,
    pub author_id: i64,
    pub created_at: DateTime<Utc>,
}

impl From<&Post> for PostHeader {
    fn from(post: &Post) -> Self {
        Self {
            id: post.id,
            author_id: post.author_id,
            created_at: post.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub parent_id: Option<i64>,
    pub rating: i32,
    pub text: String,
    pub author_id: i64,
    pub created_at: DateTime<Utc>,
}

/// Which posts a run covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostScope {
    /// Full recompute over every raw post.
    All,
    /// Incremental run over an explicit set of post ids.
    Ids(Vec<i64>),
}

impl PostScope {
    pub fn ids(ids: impl IntoIterator<Item = i64>) -> Self {
        let mut ids: Vec<i64> = ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        PostScope::Ids(ids)
    }

    pub fn contains(&self, post_id: i64) -> bool {
        match self {
            PostScope::All => true,
            PostScope::Ids(ids) => ids.binary_search(&post_id).is_ok(),
        }
    }

    /// An explicit scope with no ids selects nothing.
    pub fn is_empty(&self) -> bool {
        matches!(self, PostScope::Ids(ids) if ids.is_empty())
    }
}

impl fmt::Display for PostScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PostScope::All => write!(f, "all posts"),
            PostScope::Ids(ids) => write!(f, "{} posts", ids.len()),
        }
    }
}

// --- Derived records ---

/// Outcome of coordinate extraction for one comment.
///
/// `Extracted` is terminal: the comment is never processed again.
/// `Failed` is retryable on the next run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CommentExtraction {
    Extracted(Coordinates),
    Failed,
}

impl CommentExtraction {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CommentExtraction::Extracted(_))
    }

    pub fn coordinates(&self) -> Option<Coordinates> {
        match self {
            CommentExtraction::Extracted(c) => Some(*c),
            CommentExtraction::Failed => None,
        }
    }
}

impl From<Option<Coordinates>> for CommentExtraction {
    fn from(value: Option<Coordinates>) -> Self {
        match value {
            Some(c) => CommentExtraction::Extracted(c),
            None => CommentExtraction::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CommentCoordinate {
    pub comment_id: i64,
    pub extraction: CommentExtraction,
}

/// Who last wrote a resolution record.
///
/// `ManualOverride` is terminal for automation: the pipeline never rewrites
/// location, finder or date on such a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionOrigin {
    #[default]
    Automatic,
    ManualOverride,
}

impl ResolutionOrigin {
    pub fn is_manual(&self) -> bool {
        matches!(self, ResolutionOrigin::ManualOverride)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionRecord {
    pub post_id: i64,
    pub is_found: bool,
    pub location: Option<Coordinates>,
    pub found_by_id: Option<i64>,
    pub found_date: Option<DateTime<Utc>>,
    pub origin: ResolutionOrigin,
}

impl ResolutionRecord {
    pub fn not_found(post_id: i64) -> Self {
        Self {
            post_id,
            is_found: false,
            location: None,
            found_by_id: None,
            found_date: None,
            origin: ResolutionOrigin::Automatic,
        }
    }
}

/// Fields an operator may correct by hand. Applying an edit flips the record
/// to `ResolutionOrigin::ManualOverride`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManualEdit {
    pub location: Option<Coordinates>,
    pub found_by_id: Option<i64>,
    pub found_date: Option<DateTime<Utc>>,
}

impl ManualEdit {
    pub fn is_empty(&self) -> bool {
        self.location.is_none() && self.found_by_id.is_none() && self.found_date.is_none()
    }
}

/// Number of search-time tiers a finder's results are bucketed into.
pub const TIER_COUNT: usize = 5;

/// Lifetime statistics for one user, fully recomputed every run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserStats {
    pub user_id: i64,
    pub author_posts_total: i64,
    pub author_posts_found: i64,
    pub avg_author_time_seconds: f64,
    pub found_total: i64,
    pub found_tiers: [i64; TIER_COUNT],
    pub avg_search_time_seconds: f64,
}

impl UserStats {
    pub fn empty(user_id: i64) -> Self {
        Self {
            user_id,
            ..Default::default()
        }
    }
}

// --- Run bookkeeping ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Fail,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Fail => "fail",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(RunStatus::Success),
            "fail" => Some(RunStatus::Fail),
            _ => None,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
}
