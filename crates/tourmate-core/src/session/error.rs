use thiserror::Error;

use crate::store::StoreError;

/// Message shown for any code outside the known set.
const DEFAULT_MESSAGE: &str = "Authentication failed. Please try again.";

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Account not found")]
    UserNotFound,

    #[error("Invalid password")]
    WrongPassword,

    #[error("Email already in use")]
    EmailAlreadyInUse,

    #[error("Invalid email format")]
    InvalidEmail,

    #[error("Password should be at least 6 characters")]
    WeakPassword,

    #[error("No user is signed in")]
    NotSignedIn,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Password hashing failed: {0}")]
    PasswordHash(String),
}

impl AuthError {
    /// Stable `auth/...` code, as shown to clients.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::UserNotFound => "auth/user-not-found",
            AuthError::WrongPassword => "auth/wrong-password",
            AuthError::EmailAlreadyInUse => "auth/email-already-in-use",
            AuthError::InvalidEmail => "auth/invalid-email",
            AuthError::WeakPassword => "auth/weak-password",
            AuthError::NotSignedIn | AuthError::Store(_) | AuthError::PasswordHash(_) => {
                "auth/unknown"
            }
        }
    }

    /// User-facing message for an auth code, with or without the `auth/`
    /// prefix.
    pub fn message_for_code(code: &str) -> &'static str {
        match code.strip_prefix("auth/").unwrap_or(code) {
            "user-not-found" => "Account not found",
            "invalid-credential" => {
                "Invalid credentials. Try resetting your password or creating a new account."
            }
            "wrong-password" => "Invalid password",
            "email-already-in-use" => "Email already in use",
            "invalid-email" => "Invalid email format",
            "weak-password" => "Password should be at least 6 characters",
            "too-many-requests" => "Too many attempts. Please try again later.",
            _ => DEFAULT_MESSAGE,
        }
    }

    pub fn user_message(&self) -> &'static str {
        Self::message_for_code(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_for_code() {
        assert_eq!(AuthError::message_for_code("auth/user-not-found"), "Account not found");
        assert_eq!(
            AuthError::message_for_code("too-many-requests"),
            "Too many attempts. Please try again later."
        );
        assert_eq!(
            AuthError::message_for_code("auth/invalid-credential"),
            "Invalid credentials. Try resetting your password or creating a new account."
        );
        assert_eq!(AuthError::message_for_code("auth/quota"), DEFAULT_MESSAGE);
    }

    #[test]
    fn test_codes_round_trip_to_messages() {
        for err in [
            AuthError::UserNotFound,
            AuthError::WrongPassword,
            AuthError::EmailAlreadyInUse,
            AuthError::InvalidEmail,
            AuthError::WeakPassword,
        ] {
            assert_eq!(err.user_message(), err.to_string());
        }
        assert_eq!(AuthError::NotSignedIn.user_message(), DEFAULT_MESSAGE);
    }
}
