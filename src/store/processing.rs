//! Processing flags and generation counters for in-flight async operations

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use super::StateContainer;

/// Which async operations are currently in flight, keyed by operation name.
///
/// Each key counts overlapping operations so that an older call finishing
/// first does not clear the flag of a newer call on the same key. Settled
/// keys stay in the map with a count of zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingState {
    active: BTreeMap<String, u32>,
}

impl ProcessingState {
    /// Whether any operation under `key` is in flight
    pub fn is_active(&self, key: &str) -> bool {
        self.active.get(key).is_some_and(|count| *count > 0)
    }

    /// Whether any operation at all is in flight
    pub fn any_active(&self) -> bool {
        self.active.values().any(|count| *count > 0)
    }

    /// Boolean view of the map as the UI consumes it
    pub fn flags(&self) -> BTreeMap<String, bool> {
        self.active
            .iter()
            .map(|(key, count)| (key.clone(), *count > 0))
            .collect()
    }

    fn begin(&mut self, key: &str) {
        *self.active.entry(key.to_string()).or_insert(0) += 1;
    }

    fn end(&mut self, key: &str) {
        if let Some(count) = self.active.get_mut(key) {
            *count = count.saturating_sub(1);
        }
    }
}

/// Clears its processing flag when dropped.
///
/// Held across the await of an operation so that success, error,
/// cancellation and a dropped future all lower the flag.
#[must_use = "the processing flag is cleared as soon as the guard is dropped"]
pub struct ProcessingGuard {
    container: Arc<StateContainer<ProcessingState>>,
    key: String,
}

impl ProcessingGuard {
    pub(crate) fn begin(container: Arc<StateContainer<ProcessingState>>, key: &str) -> Self {
        container.update(|state| state.begin(key));
        tracing::debug!(operation = key, "processing started");
        Self {
            container,
            key: key.to_string(),
        }
    }

    /// Operation name this guard tracks
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        self.container.update(|state| state.end(&self.key));
        tracing::debug!(operation = %self.key, "processing finished");
    }
}

/// Handle identifying one issued call of an operation kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub kind: String,
    pub generation: u64,
}

/// Monotonic per-kind counters used to discard stale completions
#[derive(Debug, Default)]
pub struct OperationCounters {
    latest: Mutex<HashMap<String, u64>>,
}

impl OperationCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a new ticket, superseding every earlier ticket of the same kind
    pub fn issue(&self, kind: &str) -> Ticket {
        let mut latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        let generation = latest.entry(kind.to_string()).or_insert(0);
        *generation += 1;
        Ticket {
            kind: kind.to_string(),
            generation: *generation,
        }
    }

    /// Whether `ticket` is still the newest call of its kind
    pub fn is_current(&self, ticket: &Ticket) -> bool {
        let latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        latest.get(&ticket.kind).copied() == Some(ticket.generation)
    }

    /// Supersede every outstanding ticket of every kind
    pub fn invalidate_all(&self) {
        let mut latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        for generation in latest.values_mut() {
            *generation += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container() -> Arc<StateContainer<ProcessingState>> {
        Arc::new(StateContainer::new())
    }

    #[test]
    fn test_guard_raises_and_clears_flag() {
        let processing = container();
        {
            let _guard = ProcessingGuard::begin(processing.clone(), "advantages");
            assert!(processing.read(|p| p.is_active("advantages")));
            assert!(!processing.read(|p| p.is_active("saving")));
        }
        assert!(!processing.read(|p| p.is_active("advantages")));
        assert!(!processing.read(ProcessingState::any_active));
    }

    #[test]
    fn test_overlapping_guards_on_same_key() {
        let processing = container();
        let first = ProcessingGuard::begin(processing.clone(), "advantages");
        let second = ProcessingGuard::begin(processing.clone(), "advantages");

        drop(first);
        assert!(processing.read(|p| p.is_active("advantages")));

        drop(second);
        assert!(!processing.read(|p| p.is_active("advantages")));
    }

    #[test]
    fn test_independent_keys_do_not_interfere() {
        let processing = container();
        let saving = ProcessingGuard::begin(processing.clone(), "saving");
        let generating = ProcessingGuard::begin(processing.clone(), "advantages");

        drop(saving);
        let flags = processing.read(ProcessingState::flags);
        assert_eq!(flags.get("advantages"), Some(&true));
        assert_eq!(flags.get("saving"), Some(&false));
        assert_eq!(flags.get("never-started"), None);

        drop(generating);
        let flags = processing.read(ProcessingState::flags);
        assert_eq!(flags.get("advantages"), Some(&false));
        assert!(!processing.read(ProcessingState::any_active));
    }

    #[test]
    fn test_newer_ticket_supersedes_older() {
        let counters = OperationCounters::new();
        let first = counters.issue("load");
        let second = counters.issue("load");
        let other = counters.issue("save");

        assert!(!counters.is_current(&first));
        assert!(counters.is_current(&second));
        assert!(counters.is_current(&other));
    }

    #[test]
    fn test_invalidate_all() {
        let counters = OperationCounters::new();
        let load = counters.issue("load");
        let save = counters.issue("save");

        counters.invalidate_all();

        assert!(!counters.is_current(&load));
        assert!(!counters.is_current(&save));
    }
}
