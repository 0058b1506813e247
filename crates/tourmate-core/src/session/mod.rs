//! Local identity: the current user, the account roster and the per-user
//! services that must be reset when the identity changes.

pub mod error;
pub mod manager;
pub mod password;
pub mod scoped;

pub use error::AuthError;
pub use manager::IdentityManager;
pub use scoped::{UserScoped, UserScopedCache};
