//! Redis-backed priority queue for one project's crawl requests.
//!
//! Mirrors the source's `spider:{project_id}:*` key layout: a sorted set
//! for pending work, a hash for in-flight tracking, and sets for seen/
//! completed dedup, plus a small stats hash and a state string.

pub mod error;
pub mod keys;
pub mod queue;
pub mod state;
pub mod stats;

pub use error::QueueError;
pub use keys::QueueKeys;
pub use queue::RequestQueue;
pub use state::QueueState;
pub use stats::QueueStats;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout_separates_test_and_live_namespaces() {
        let live = QueueKeys::new(7, false);
        let test = QueueKeys::new(7, true);
        assert_eq!(live.pending(), "spider:7:pending");
        assert_eq!(test.pending(), "test_spider:7:pending");
        assert_ne!(live.pending(), test.pending());
    }

    #[test]
    fn state_blocks_pop_only_when_paused_or_stopped() {
        assert!(!QueueState::Idle.blocks_pop());
        assert!(!QueueState::Running.blocks_pop());
        assert!(QueueState::Paused.blocks_pop());
        assert!(QueueState::Stopped.blocks_pop());
        assert!(!QueueState::Completed.blocks_pop());
    }

    #[test]
    fn stats_success_rate_rounds_to_two_places() {
        let stats = QueueStats {
            total: 3,
            completed: 2,
            failed: 1,
            retried: 0,
            pending: 0,
            processing: 0,
        };
        assert_eq!(stats.success_rate(), 66.67);
    }

    #[test]
    fn stats_success_rate_is_zero_with_no_completions() {
        let stats = QueueStats::default();
        assert_eq!(stats.success_rate(), 0.0);
    }
}
