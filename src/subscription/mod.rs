//! Subscription set management for the active focus

pub mod reconciler;

pub use reconciler::{ReconcileReport, SubscriptionReconciler};
