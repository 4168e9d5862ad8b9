//! Small time helpers shared across components.

/// The indexer catch-up offset added after a successful execution before
/// computing the next reschedule time (spec §4.8 "Reschedule rule").
pub const INDEXER_CATCHUP: chrono::Duration = chrono::Duration::seconds(60);
