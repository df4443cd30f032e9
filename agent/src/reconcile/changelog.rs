//! Applied change tracking

use std::collections::HashMap;
use std::sync::RwLock;

/// Ids of changes that reached a successful terminal state
///
/// Append-only and in memory: a restarted agent may apply a change again.
#[derive(Debug, Default)]
pub struct ChangeLog {
    applied: RwLock<HashMap<String, bool>>,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_applied(&self, change_id: &str) -> bool {
        let applied = self.applied.read().unwrap_or_else(|e| e.into_inner());
        applied.get(change_id).copied().unwrap_or(false)
    }

    pub fn mark_applied(&self, change_id: &str) {
        let mut applied = self.applied.write().unwrap_or_else(|e| e.into_inner());
        applied.insert(change_id.to_string(), true);
    }

    /// Copy of the log for reporting
    pub fn snapshot(&self) -> HashMap<String, bool> {
        self.applied.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.applied.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
