//! Live change fan-out.
//!
//! Per collection the hub keeps at most one upstream subscription, however
//! many local listeners there are. Every event invalidates the collection's
//! cache before any listener sees it.

pub mod hub;

pub use hub::{Listener, SubscriptionHub, SubscriptionToken};
