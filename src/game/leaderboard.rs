//! Leaderboard
//!
//! Best run times, sorted ascending and capped. Entries are immutable once
//! recorded; only the list is pruned.

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

/// Number of entries kept.
pub const LEADERBOARD_CAPACITY: usize = 5;

/// One recorded run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    /// Team member names at completion time
    pub team_name: String,
    /// Elapsed run time
    pub time_ms: u64,
    /// Level the run was on
    #[serde(default)]
    pub level_id: String,
    /// When the run was recorded
    pub recorded_at: DateTime<Utc>,
}

/// Sorted, capped list of best runs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Leaderboard {
    entries: Vec<LeaderboardEntry>,
}

impl Leaderboard {
    /// Empty leaderboard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from persisted entries, restoring order and capacity.
    pub fn from_entries(mut entries: Vec<LeaderboardEntry>) -> Self {
        entries.sort_by_key(|e| e.time_ms);
        entries.truncate(LEADERBOARD_CAPACITY);
        Self { entries }
    }

    /// Insert a run. Ties keep earlier entries first.
    ///
    /// Returns the 0-based rank, or `None` if the run did not make the cut.
    pub fn record(&mut self, entry: LeaderboardEntry) -> Option<usize> {
        let rank = self.entries.partition_point(|e| e.time_ms <= entry.time_ms);
        if rank >= LEADERBOARD_CAPACITY {
            return None;
        }
        self.entries.insert(rank, entry);
        self.entries.truncate(LEADERBOARD_CAPACITY);
        Some(rank)
    }

    /// Entries, fastest first.
    pub fn entries(&self) -> &[LeaderboardEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
