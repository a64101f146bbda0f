//! Test configuration helpers.

use docshard_types::config::FetchConfig;

/// Returns a fetch configuration suitable for tests.
///
/// Uses small values so that batching and cancellation paths run even on
/// tiny fixtures:
/// - `scan_batch_size`: 2
/// - `cancellation_check_interval`: 1
#[must_use]
pub fn test_fetch_config() -> FetchConfig {
    FetchConfig {
        scan_batch_size: 2,
        cancellation_check_interval: 1,
        max_history_depth: 0,
        scan_timeout: None,
    }
}
