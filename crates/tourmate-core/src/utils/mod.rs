//! Small string and id helpers.

pub mod ids;
pub mod text;

// Re-export commonly used functions at module level
pub use ids::{local_visit_id, new_user_id};
pub use text::{contains_ignore_case, email_local_part, is_valid_email, truncate};
