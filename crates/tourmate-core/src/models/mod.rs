//! Data models shared across the core.
//!
//! - `Destination`, `Delicacy`: cached content collections
//! - `VisitRecord` and friends: the visit ledger
//! - `UserIdentity`, `StoredAccount`, `ProfileUpdate`: local identities
//! - `ChangeEvent`, `Collection`: live change notifications

pub mod catalog;
pub mod change;
pub mod user;
pub mod visit;

pub use catalog::{CatalogItem, Coordinates, Delicacy, Destination};
pub use change::{ChangeEvent, ChangeKind, Collection};
pub use user::{ProfileUpdate, StoredAccount, UserIdentity};
pub use visit::{
    is_local_id, is_valid_rating, EntityType, Verification, VerificationMethod, VisitInput,
    VisitPatch, VisitRecord, LOCAL_ID_PREFIX, LOCAL_USER_ID, VERIFICATION_RADIUS_KM,
};
