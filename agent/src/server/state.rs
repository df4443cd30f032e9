//! Server state

use std::sync::Arc;

use crate::checkin::adapter::CheckinAdapter;
use crate::reconcile::changelog::ChangeLog;
use crate::reconcile::store::AppStateStore;

/// Server state shared across handlers
pub struct ServerState {
    pub store: Arc<AppStateStore>,
    pub changes: Arc<ChangeLog>,
    pub adapter: Arc<CheckinAdapter>,
}

impl ServerState {
    pub fn new(
        store: Arc<AppStateStore>,
        changes: Arc<ChangeLog>,
        adapter: Arc<CheckinAdapter>,
    ) -> Self {
        Self {
            store,
            changes,
            adapter,
        }
    }
}
