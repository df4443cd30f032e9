//! Reconciliation of local application state against trainer changes

pub mod changelog;
pub mod reconciler;
pub mod retry;
pub mod store;
