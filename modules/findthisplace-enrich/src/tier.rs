//! Search-time tiers.
//!
//! Elapsed time between a challenge being posted and being found is bucketed
//! into five ordinal tiers. Boundaries are strict: a value exactly on a
//! boundary belongs to the next tier.

use findthisplace_common::TIER_COUNT;

const DAY: f64 = 24.0 * 3600.0;

/// Upper bounds (exclusive) for tiers 0..=3, in seconds. Tier 4 is everything beyond.
pub const TIER_BOUNDS: [f64; TIER_COUNT - 1] = [
    6.0 * 30.0 * DAY,  // tier0: < 6 months
    12.0 * 30.0 * DAY, // tier1: < 1 year
    2.0 * 365.0 * DAY, // tier2: < 2 years
    5.0 * 365.0 * DAY, // tier3: < 5 years
];

/// Tier index in `0..TIER_COUNT` for an elapsed time in seconds.
pub fn tier(elapsed_secs: f64) -> usize {
    TIER_BOUNDS
        .iter()
        .position(|bound| elapsed_secs < *bound)
        .unwrap_or(TIER_COUNT - 1)
}
