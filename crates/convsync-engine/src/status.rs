//! Observable sync state.
//!
//! Sync failures are never returned to the caller; they land here instead
//! so the UI and operators can see them.

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    #[default]
    Idle,
    Pushing,
    Pulling,
}

/// Outcome of one sync cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Conversations pushed and accepted by the registry.
    pub pushed: usize,
    pub push_failures: usize,
    /// Pending conversations not pushed because the remote copy is newer;
    /// the pull phase replaces them.
    pub deferred: usize,
    /// Tombstones whose remote blob is now gone.
    pub remote_deletes: usize,
    /// Conversations overwritten with newer remote content.
    pub pulled: usize,
    pub pull_failures: usize,
    /// Remote entries not newer than the local copy.
    pub up_to_date: usize,
    /// An authorization failure stopped all remote work for this cycle.
    pub halted_unauthorized: bool,
    /// Another cycle was already running; nothing was done.
    pub skipped: bool,
    pub errors: Vec<String>,
}

impl SyncReport {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && !self.halted_unauthorized
    }
}

/// Snapshot published on the engine's status channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub phase: SyncPhase,
    /// Last error of the most recent cycle, cleared by a clean cycle.
    pub last_error: Option<String>,
    /// Conversations with changes not yet accepted remotely.
    pub unsynced_count: u64,
    pub last_completed_at: Option<DateTime<Utc>>,
    pub last_report: Option<SyncReport>,
}
