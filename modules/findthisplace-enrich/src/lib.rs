pub mod found_tag;
pub mod pipeline;
pub mod scheduler;
pub mod stages;
pub mod stats;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod tier;

pub use pipeline::{Pipeline, PipelineSettings};
pub use scheduler::{ledger_status, Scheduler};
pub use stats::EnrichStats;
pub use store::{DerivedStore, PgStore, RawStore, RunLedger, StoreError};
