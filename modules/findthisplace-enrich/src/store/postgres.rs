// Postgres persistence for raw reads and derived writes.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::info;

use findthisplace_common::{
    Comment, CommentCoordinate, CommentExtraction, Coordinates, ManualEdit, Post, PostHeader,
    PostScope, ResolutionOrigin, ResolutionRecord, RunRecord, RunStatus, UserStats,
};

use super::{
    validate_manual_edit, DerivedStore, RawStore, RunLedger, StoreError, StoreResult,
};

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::DuplicateKey(db.message().to_string())
            }
            sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::Decode(_)
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::TypeNotFound { .. } => StoreError::Decode(err.to_string()),
            _ => StoreError::Database(err.to_string()),
        }
    }
}

fn scope_ids(scope: &PostScope) -> Option<Vec<i64>> {
    match scope {
        PostScope::All => None,
        PostScope::Ids(ids) => Some(ids.clone()),
    }
}

fn coordinates_from_row(
    what: &str,
    id: i64,
    lat: Option<f64>,
    lng: Option<f64>,
) -> StoreResult<Option<Coordinates>> {
    match (lat, lng) {
        (None, None) => Ok(None),
        (Some(lat), Some(lng)) => Coordinates::new(lat, lng).map(Some).ok_or_else(|| {
            StoreError::Decode(format!("{what} {id}: coordinates out of range ({lat}, {lng})"))
        }),
        _ => Err(StoreError::Decode(format!(
            "{what} {id}: latitude and longitude must be set together"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(sqlx::FromRow)]
struct PostRow {
    id: i64,
    text: String,
    created_at: DateTime<Utc>,
    tags: Vec<String>,
    author_id: i64,
}

impl From<PostRow> for Post {
    fn from(r: PostRow) -> Self {
        Post {
            id: r.id,
            text: r.text,
            created_at: r.created_at,
            tags: r.tags,
            author_id: r.author_id,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PostHeaderRow {
    id: i64,
    author_id: i64,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct CommentRow {
    id: i64,
    post_id: i64,
    parent_id: Option<i64>,
    rating: i32,
    text: String,
    author_id: i64,
    created_at: DateTime<Utc>,
}

impl From<CommentRow> for Comment {
    fn from(r: CommentRow) -> Self {
        Comment {
            id: r.id,
            post_id: r.post_id,
            parent_id: r.parent_id,
            rating: r.rating,
            text: r.text,
            author_id: r.author_id,
            created_at: r.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CommentCoordinateRow {
    comment_id: i64,
    extracted: bool,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

impl TryFrom<CommentCoordinateRow> for CommentCoordinate {
    type Error = StoreError;

    fn try_from(r: CommentCoordinateRow) -> StoreResult<Self> {
        let coords = coordinates_from_row("comment", r.comment_id, r.latitude, r.longitude)?;
        let extraction = match (r.extracted, coords) {
            (true, Some(c)) => CommentExtraction::Extracted(c),
            (false, None) => CommentExtraction::Failed,
            (true, None) => {
                return Err(StoreError::Decode(format!(
                    "comment {}: extracted without coordinates",
                    r.comment_id
                )))
            }
            (false, Some(_)) => {
                return Err(StoreError::Decode(format!(
                    "comment {}: coordinates on a failed extraction",
                    r.comment_id
                )))
            }
        };
        Ok(CommentCoordinate {
            comment_id: r.comment_id,
            extraction,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ResolutionRow {
    post_id: i64,
    is_found: bool,
    latitude: Option<f64>,
    longitude: Option<f64>,
    found_by_id: Option<i64>,
    found_date: Option<DateTime<Utc>>,
    manual_override: bool,
}

impl TryFrom<ResolutionRow> for ResolutionRecord {
    type Error = StoreError;

    fn try_from(r: ResolutionRow) -> StoreResult<Self> {
        Ok(ResolutionRecord {
            post_id: r.post_id,
            is_found: r.is_found,
            location: coordinates_from_row("post", r.post_id, r.latitude, r.longitude)?,
            found_by_id: r.found_by_id,
            found_date: r.found_date,
            origin: if r.manual_override {
                ResolutionOrigin::ManualOverride
            } else {
                ResolutionOrigin::Automatic
            },
        })
    }
}

#[derive(sqlx::FromRow)]
struct UserStatsRow {
    user_id: i64,
    author_posts_total: i64,
    author_posts_found: i64,
    avg_author_time_seconds: f64,
    found_total: i64,
    found_tier0: i64,
    found_tier1: i64,
    found_tier2: i64,
    found_tier3: i64,
    found_tier4: i64,
    avg_search_time_seconds: f64,
}

impl From<UserStatsRow> for UserStats {
    fn from(r: UserStatsRow) -> Self {
        UserStats {
            user_id: r.user_id,
            author_posts_total: r.author_posts_total,
            author_posts_found: r.author_posts_found,
            avg_author_time_seconds: r.avg_author_time_seconds,
            found_total: r.found_total,
            found_tiers: [
                r.found_tier0,
                r.found_tier1,
                r.found_tier2,
                r.found_tier3,
                r.found_tier4,
            ],
            avg_search_time_seconds: r.avg_search_time_seconds,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RunRow {
    run_id: String,
    finished_at: DateTime<Utc>,
    status: String,
}

// ---------------------------------------------------------------------------
// PgStore
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        info!("Migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RawStore for PgStore {
    async fn user_ids(&self) -> StoreResult<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>("SELECT id FROM raw_users ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    async fn posts_page(
        &self,
        scope: &PostScope,
        after: Option<i64>,
        limit: usize,
    ) -> StoreResult<Vec<Post>> {
        let rows = sqlx::query_as::<_, PostRow>(
            r#"
            SELECT id, text, created_at, tags, author_id
            FROM raw_posts
            WHERE ($1::BIGINT[] IS NULL OR id = ANY($1))
              AND ($2::BIGINT IS NULL OR id > $2)
            ORDER BY id ASC
            LIMIT $3
            "#,
        )
        .bind(scope_ids(scope))
        .bind(after)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Post::from).collect())
    }

    async fn post_headers_page(&self, after: Option<i64>, limit: usize) -> StoreResult<Vec<PostHeader>> {
        let rows = sqlx::query_as::<_, PostHeaderRow>(
            r#"
            SELECT id, author_id, created_at
            FROM raw_posts
            WHERE ($1::BIGINT IS NULL OR id > $1)
            ORDER BY id ASC
            LIMIT $2
            "#,
        )
        .bind(after)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| PostHeader {
                id: r.id,
                author_id: r.author_id,
                created_at: r.created_at,
            })
            .collect())
    }

    async fn comments_page(
        &self,
        scope: &PostScope,
        after: Option<i64>,
        limit: usize,
    ) -> StoreResult<Vec<Comment>> {
        let rows = sqlx::query_as::<_, CommentRow>(
            r#"
            SELECT id, post_id, parent_id, rating, text, author_id, created_at
            FROM raw_comments
            WHERE ($1::BIGINT[] IS NULL OR post_id = ANY($1))
              AND ($2::BIGINT IS NULL OR id > $2)
            ORDER BY id ASC
            LIMIT $3
            "#,
        )
        .bind(scope_ids(scope))
        .bind(after)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Comment::from).collect())
    }

    async fn comments_for_posts(&self, post_ids: &[i64]) -> StoreResult<Vec<Comment>> {
        if post_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, CommentRow>(
            r#"
            SELECT id, post_id, parent_id, rating, text, author_id, created_at
            FROM raw_comments
            WHERE post_id = ANY($1)
            ORDER BY id ASC
            "#,
        )
        .bind(post_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Comment::from).collect())
    }
}

#[async_trait]
impl DerivedStore for PgStore {
    async fn extracted_comment_ids(&self, scope: &PostScope) -> StoreResult<HashSet<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT cc.comment_id
            FROM comment_coordinates cc
            JOIN raw_comments c ON c.id = cc.comment_id
            WHERE cc.extracted
              AND ($1::BIGINT[] IS NULL OR c.post_id = ANY($1))
            "#,
        )
        .bind(scope_ids(scope))
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().collect())
    }

    async fn extracted_coordinates(
        &self,
        comment_ids: &[i64],
    ) -> StoreResult<HashMap<i64, Coordinates>> {
        if comment_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query_as::<_, CommentCoordinateRow>(
            r#"
            SELECT comment_id, extracted, latitude, longitude
            FROM comment_coordinates
            WHERE extracted AND comment_id = ANY($1)
            "#,
        )
        .bind(comment_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut out = HashMap::with_capacity(rows.len());
        for row in rows {
            let cc = CommentCoordinate::try_from(row)?;
            if let Some(c) = cc.extraction.coordinates() {
                out.insert(cc.comment_id, c);
            }
        }
        Ok(out)
    }

    async fn upsert_comment_coordinates(&self, batch: &[CommentCoordinate]) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO comment_coordinates (comment_id, extracted, latitude, longitude) ",
        );
        qb.push_values(batch, |mut b, cc| {
            let coords = cc.extraction.coordinates();
            b.push_bind(cc.comment_id)
                .push_bind(cc.extraction.is_terminal())
                .push_bind(coords.map(|c| c.lat))
                .push_bind(coords.map(|c| c.lng));
        });
        qb.push(
            r#"
            ON CONFLICT (comment_id) DO UPDATE SET
                extracted = EXCLUDED.extracted,
                latitude = EXCLUDED.latitude,
                longitude = EXCLUDED.longitude,
                updated_at = now()
            WHERE comment_coordinates.extracted = false
            "#,
        );
        qb.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn upsert_resolutions(&self, batch: &[ResolutionRecord]) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO post_resolutions \
             (post_id, is_found, latitude, longitude, found_by_id, found_date, manual_override) ",
        );
        qb.push_values(batch, |mut b, r| {
            b.push_bind(r.post_id)
                .push_bind(r.is_found)
                .push_bind(r.location.map(|c| c.lat))
                .push_bind(r.location.map(|c| c.lng))
                .push_bind(r.found_by_id)
                .push_bind(r.found_date)
                .push_bind(false);
        });
        qb.push(
            r#"
            ON CONFLICT (post_id) DO UPDATE SET
                is_found = EXCLUDED.is_found,
                latitude = EXCLUDED.latitude,
                longitude = EXCLUDED.longitude,
                found_by_id = EXCLUDED.found_by_id,
                found_date = EXCLUDED.found_date,
                updated_at = now()
            WHERE post_resolutions.manual_override = false
            "#,
        );
        qb.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn resolutions_page(
        &self,
        after: Option<i64>,
        limit: usize,
    ) -> StoreResult<Vec<ResolutionRecord>> {
        let rows = sqlx::query_as::<_, ResolutionRow>(
            r#"
            SELECT post_id, is_found, latitude, longitude, found_by_id, found_date, manual_override
            FROM post_resolutions
            WHERE ($1::BIGINT IS NULL OR post_id > $1)
            ORDER BY post_id ASC
            LIMIT $2
            "#,
        )
        .bind(after)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ResolutionRecord::try_from).collect()
    }

    async fn replace_user_stats(&self, batch: &[UserStats]) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO user_stats \
             (user_id, author_posts_total, author_posts_found, avg_author_time_seconds, \
              found_total, found_tier0, found_tier1, found_tier2, found_tier3, found_tier4, \
              avg_search_time_seconds) ",
        );
        qb.push_values(batch, |mut b, s| {
            b.push_bind(s.user_id)
                .push_bind(s.author_posts_total)
                .push_bind(s.author_posts_found)
                .push_bind(s.avg_author_time_seconds)
                .push_bind(s.found_total);
            for count in s.found_tiers {
                b.push_bind(count);
            }
            b.push_bind(s.avg_search_time_seconds);
        });
        qb.push(
            r#"
            ON CONFLICT (user_id) DO UPDATE SET
                author_posts_total = EXCLUDED.author_posts_total,
                author_posts_found = EXCLUDED.author_posts_found,
                avg_author_time_seconds = EXCLUDED.avg_author_time_seconds,
                found_total = EXCLUDED.found_total,
                found_tier0 = EXCLUDED.found_tier0,
                found_tier1 = EXCLUDED.found_tier1,
                found_tier2 = EXCLUDED.found_tier2,
                found_tier3 = EXCLUDED.found_tier3,
                found_tier4 = EXCLUDED.found_tier4,
                avg_search_time_seconds = EXCLUDED.avg_search_time_seconds,
                updated_at = now()
            "#,
        );
        qb.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn apply_manual_edit(&self, post_id: i64, edit: &ManualEdit) -> StoreResult<bool> {
        validate_manual_edit(edit)?;
        let result = sqlx::query(
            r#"
            UPDATE post_resolutions SET
                latitude = COALESCE($2, latitude),
                longitude = COALESCE($3, longitude),
                found_by_id = COALESCE($4, found_by_id),
                found_date = COALESCE($5, found_date),
                manual_override = true,
                updated_at = now()
            WHERE post_id = $1
            "#,
        )
        .bind(post_id)
        .bind(edit.location.map(|c| c.lat))
        .bind(edit.location.map(|c| c.lng))
        .bind(edit.found_by_id)
        .bind(edit.found_date)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn comment_coordinate(&self, comment_id: i64) -> StoreResult<Option<CommentCoordinate>> {
        let row = sqlx::query_as::<_, CommentCoordinateRow>(
            "SELECT comment_id, extracted, latitude, longitude FROM comment_coordinates WHERE comment_id = $1",
        )
        .bind(comment_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(CommentCoordinate::try_from).transpose()
    }

    async fn resolution(&self, post_id: i64) -> StoreResult<Option<ResolutionRecord>> {
        let row = sqlx::query_as::<_, ResolutionRow>(
            r#"
            SELECT post_id, is_found, latitude, longitude, found_by_id, found_date, manual_override
            FROM post_resolutions
            WHERE post_id = $1
            "#,
        )
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ResolutionRecord::try_from).transpose()
    }

    async fn user_stats(&self, user_id: i64) -> StoreResult<Option<UserStats>> {
        let row = sqlx::query_as::<_, UserStatsRow>(
            r#"
            SELECT user_id, author_posts_total, author_posts_found, avg_author_time_seconds,
                   found_total, found_tier0, found_tier1, found_tier2, found_tier3, found_tier4,
                   avg_search_time_seconds
            FROM user_stats
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(UserStats::from))
    }
}

#[async_trait]
impl RunLedger for PgStore {
    async fn last_run(&self) -> StoreResult<Option<RunRecord>> {
        let row = sqlx::query_as::<_, RunRow>(
            r#"
            SELECT run_id, finished_at, status
            FROM enrich_runs
            ORDER BY finished_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            let status = RunStatus::parse(&r.status).ok_or_else(|| {
                StoreError::Decode(format!("run {}: unknown status {:?}", r.run_id, r.status))
            })?;
            Ok(RunRecord {
                run_id: r.run_id,
                finished_at: r.finished_at,
                status,
            })
        })
        .transpose()
    }

    async fn record_run(&self, record: &RunRecord) -> StoreResult<()> {
        sqlx::query("INSERT INTO enrich_runs (run_id, finished_at, status) VALUES ($1, $2, $3)")
            .bind(&record.run_id)
            .bind(record.finished_at)
            .bind(record.status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
