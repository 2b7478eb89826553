use dashmap::{mapref::entry::Entry, DashMap};
use intercept_common::FlowId;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::flow::FlowHandle;

pub(crate) struct PendingEntry {
    pub(crate) handle: Box<dyn FlowHandle>,
    pub(crate) paused_at: Instant,
}

/// Summary of one paused flow, safe to hand out.
#[derive(Debug, Clone, Serialize)]
pub struct PendingInfo {
    pub id: FlowId,
    pub waiting_ms: u64,
}

/// Paused flows by id.
///
/// Removal is atomic, so whoever takes an entry owns the flow and is the
/// only party that can resume or kill it. Live handles never leave the crate.
#[derive(Clone, Default)]
pub struct PendingRegistry {
    entries: Arc<DashMap<FlowId, PendingEntry>>,
}

impl fmt::Debug for PendingRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRegistry")
            .field("pending", &self.entries.len())
            .finish()
    }
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a flow. An occupied id hands the flow back untouched.
    pub(crate) fn insert(&self, id: FlowId, handle: Box<dyn FlowHandle>) -> Result<(), Box<dyn FlowHandle>> {
        self.restore(
            id,
            PendingEntry {
                handle,
                paused_at: Instant::now(),
            },
        )
        .map_err(|entry| entry.handle)
    }

    /// Put back an entry taken earlier, keeping its original pause time.
    pub(crate) fn restore(&self, id: FlowId, entry: PendingEntry) -> Result<(), PendingEntry> {
        match self.entries.entry(id) {
            Entry::Occupied(_) => Err(entry),
            Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(())
            }
        }
    }

    /// Remove and return the flow. At most one caller ever gets it.
    pub(crate) fn take(&self, id: &FlowId) -> Option<PendingEntry> {
        self.entries.remove(id).map(|(_, entry)| entry)
    }

    pub fn contains(&self, id: &FlowId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pending(&self) -> Vec<PendingInfo> {
        let now = Instant::now();
        let mut pending: Vec<PendingInfo> = self
            .entries
            .iter()
            .map(|entry| PendingInfo {
                id: entry.key().clone(),
                waiting_ms: duration_ms(now.saturating_duration_since(entry.value().paused_at)),
            })
            .collect();
        pending.sort_by(|a, b| b.waiting_ms.cmp(&a.waiting_ms));
        pending
    }

    /// Kill every paused flow. Used on shutdown.
    pub(crate) fn abandon_all(&self) -> usize {
        let ids: Vec<FlowId> = self.entries.iter().map(|entry| entry.key().clone()).collect();
        let mut killed = 0;
        for id in ids {
            if let Some(entry) = self.take(&id) {
                warn!("Abandoning paused flow {} after {:?}", id, entry.paused_at.elapsed());
                entry.handle.kill();
                killed += 1;
            }
        }
        if killed > 0 {
            info!("Abandoned {} paused flows", killed);
        }
        killed
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
