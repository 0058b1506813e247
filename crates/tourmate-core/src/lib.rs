//! Tourmate core - the data synchronization and offline-fallback layer.
//!
//! This crate keeps the TourMate content collections (destinations and
//! delicacies) cached with a time-to-live, fans live backend changes out to
//! local listeners, and makes sure user-generated state (visits, profile
//! edits, favorites) is always recorded locally even when the backend is
//! unreachable or the user has no remote session.
//!
//! The main entry point is [`Tourmate`], built once at process start:
//!
//! - [`cache::CacheService`]: one [`cache::ResourceCache`] per collection plus
//!   the [`subscription::SubscriptionHub`]
//! - [`ledger::VisitLedger`]: remote-first visit records with local fallback
//! - [`session::IdentityManager`]: the current local identity and roster
//! - [`sync::Reconciler`]: background mirror of local writes to the backend

pub mod cache;
pub mod clock;
pub mod geo;
pub mod ledger;
pub mod models;
pub mod remote;
pub mod service;
pub mod session;
pub mod settings;
pub mod store;
pub mod subscription;
pub mod sync;
pub mod utils;

pub use clock::{Clock, ManualClock, SystemClock};
pub use service::Tourmate;
pub use settings::CoreSettings;
