//! Last-known polled snapshot.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;

use crate::channel::events::Snapshot;
use crate::telemetry::record::unix_millis;

/// Holds the newest successfully fetched snapshot.
///
/// A snapshot replaces the cached one only if its sequence is higher, so a
/// slow fetch finishing late never overwrites fresher data.
#[derive(Debug, Default)]
pub struct PollCache {
    latest: ArcSwapOption<Snapshot>,
}

impl PollCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `snapshot` if it is newer. Returns whether it was stored.
    pub fn store(&self, snapshot: Arc<Snapshot>) -> bool {
        let mut stored = false;
        self.latest.rcu(|current| match current {
            Some(existing) if existing.sequence >= snapshot.sequence => {
                stored = false;
                Some(Arc::clone(existing))
            }
            _ => {
                stored = true;
                Some(Arc::clone(&snapshot))
            }
        });
        stored
    }

    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.latest.load_full()
    }

    /// Time since the cached snapshot was received.
    pub fn age(&self) -> Option<Duration> {
        self.latest
            .load()
            .as_ref()
            .map(|s| Duration::from_millis(unix_millis().saturating_sub(s.received_at)))
    }
}
