use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Cascading, group-based cancellation keyed by run id. Mirrors the shape
/// of a session-keyed cancel map (register / cancel / remove / groups) but
/// is backed by `tokio_util::sync::CancellationToken` rather than a
/// hand-rolled atomic flag, since that's the primitive `ok-mailbox` and
/// `ok-sessions` already cancel their long-polls and compaction calls
/// through.
#[derive(Default)]
pub struct CancelMap {
    tokens: Mutex<HashMap<Uuid, CancellationToken>>,
    groups: Mutex<HashMap<Uuid, HashSet<Uuid>>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, run_id: Uuid) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens.lock().insert(run_id, token.clone());
        token
    }

    pub fn token(&self, run_id: Uuid) -> Option<CancellationToken> {
        self.tokens.lock().get(&run_id).cloned()
    }

    /// Cancels `run_id`'s token and cascades to every run registered in its
    /// group. Returns `false` if `run_id` has no registered token.
    pub fn cancel(&self, run_id: Uuid) -> bool {
        let found = match self.tokens.lock().get(&run_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        };
        if found {
            let children: Vec<Uuid> = self
                .groups
                .lock()
                .get(&run_id)
                .map(|set| set.iter().copied().collect())
                .unwrap_or_default();
            for child in children {
                self.cancel(child);
            }
        }
        found
    }

    /// Removes a run's token and any group it owns. Does not cancel
    /// children still registered under it — only stops future cascades
    /// from this run.
    pub fn remove(&self, run_id: Uuid) {
        self.tokens.lock().remove(&run_id);
        self.groups.lock().remove(&run_id);
    }

    pub fn is_running(&self, run_id: Uuid) -> bool {
        self.tokens.lock().get(&run_id).map(|t| !t.is_cancelled()).unwrap_or(false)
    }

    pub fn add_to_group(&self, parent_run_id: Uuid, child_run_id: Uuid) {
        self.groups.lock().entry(parent_run_id).or_default().insert(child_run_id);
    }

    pub fn remove_from_group(&self, parent_run_id: Uuid, child_run_id: Uuid) {
        let mut groups = self.groups.lock();
        if let Some(set) = groups.get_mut(&parent_run_id) {
            set.remove(&child_run_id);
            if set.is_empty() {
                groups.remove(&parent_run_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_returns_a_live_token() {
        let map = CancelMap::new();
        let run_id = Uuid::new_v4();
        let token = map.register(run_id);
        assert!(!token.is_cancelled());
        assert!(map.is_running(run_id));
    }

    #[test]
    fn cancel_cascades_to_group_children() {
        let map = CancelMap::new();
        let parent = Uuid::new_v4();
        let child = Uuid::new_v4();
        let parent_token = map.register(parent);
        let child_token = map.register(child);
        map.add_to_group(parent, child);

        assert!(map.cancel(parent));
        assert!(parent_token.is_cancelled());
        assert!(child_token.is_cancelled());
    }

    #[test]
    fn cancel_of_unknown_run_is_a_no_op() {
        let map = CancelMap::new();
        assert!(!map.cancel(Uuid::new_v4()));
    }

    #[test]
    fn remove_clears_token_and_owned_group() {
        let map = CancelMap::new();
        let run_id = Uuid::new_v4();
        map.register(run_id);
        map.add_to_group(run_id, Uuid::new_v4());
        map.remove(run_id);
        assert!(!map.is_running(run_id));
        assert!(!map.cancel(run_id));
    }

    #[test]
    fn removing_parent_does_not_cancel_orphaned_children() {
        let map = CancelMap::new();
        let parent = Uuid::new_v4();
        let child = Uuid::new_v4();
        let child_token = map.register(child);
        map.register(parent);
        map.add_to_group(parent, child);

        map.remove(parent);
        assert!(!child_token.is_cancelled());
        assert!(map.is_running(child));
    }

    #[test]
    fn remove_from_group_drops_empty_group() {
        let map = CancelMap::new();
        let parent = Uuid::new_v4();
        let child = Uuid::new_v4();
        map.add_to_group(parent, child);
        map.remove_from_group(parent, child);
        map.add_to_group(parent, child);
        assert!(map.is_running(parent) == false); // parent was never registered, just checking group bookkeeping
    }
}
