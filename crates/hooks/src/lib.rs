//! Hook-event capture and reconciliation.
//!
//! The host CLI runs a short-lived process before every tool call and
//! another after it. Those processes rendezvous through one JSON file
//! per call id in a shared state directory; the stop hook consumes
//! the files at turn end. No daemon is involved.

pub mod aggregator;
pub mod state;

pub use aggregator::{AggregationStats, Aggregator, EnhancedToolData, SessionActivity};
pub use state::HookStateStore;
