//! The three enrichment stages, run in order by [`crate::Pipeline`]:
//! comment coordinates, then post resolutions, then user statistics.
//!
//! Stages share nothing but the derived store.

pub mod comments;
pub mod posts;
pub mod users;

use tracing::debug;

use findthisplace_common::FtpError;

use crate::stats::EnrichStats;
use crate::store::{StoreError, StoreResult};

pub use comments::CommentStage;
pub use posts::{resolve_post, PostStage};
pub use users::{StatsAccumulator, UserStage};

/// Settle a derived-store flush. Duplicate keys mean the row already holds
/// what we meant to write, so they count as success; anything else aborts.
pub(crate) fn settle_write(
    result: StoreResult<()>,
    table: &'static str,
    stats: &mut EnrichStats,
) -> Result<(), FtpError> {
    match result {
        Ok(()) => Ok(()),
        Err(StoreError::DuplicateKey(detail)) => {
            stats.write_conflicts += 1;
            debug!(table, detail = detail.as_str(), "Duplicate key on flush, treating as written");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
