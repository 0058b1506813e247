use anyhow::{Context, Result};
use keyring::Entry;

const SERVICE_NAME: &str = "tourmate";

/// Backend passwords kept in the OS keychain.
///
/// Entries are keyed by backend URL and email, so two projects with the same
/// login never share a stored password.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    backend: String,
}

impl CredentialStore {
    pub fn new(backend_url: &str) -> Self {
        Self {
            backend: backend_url.trim_end_matches('/').to_string(),
        }
    }

    fn entry(&self, email: &str) -> Result<Entry> {
        Entry::new(SERVICE_NAME, &account_name(&self.backend, email))
            .context("Failed to create keyring entry")
    }

    pub fn remember(&self, email: &str, password: &str) -> Result<()> {
        self.entry(email)?
            .set_password(password)
            .context("Failed to store password in keychain")
    }

    /// The stored password, or `None` if nothing is stored for `email`.
    pub fn password(&self, email: &str) -> Result<Option<String>> {
        match self.entry(email)?.get_password() {
            Ok(password) => Ok(Some(password)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve password from keychain"),
        }
    }

    /// Remove the stored password. Forgetting an unknown email is not an
    /// error.
    pub fn forget(&self, email: &str) -> Result<()> {
        match self.entry(email)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete credential from keychain"),
        }
    }
}

fn account_name(backend: &str, email: &str) -> String {
    format!("{}#{}", backend, email.trim().to_lowercase())
}
