use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde_json::{json, Value};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use super::password::{hash_password, verify_password};
use super::{AuthError, UserScoped};
use crate::clock::Clock;
use crate::models::{Collection, ProfileUpdate, StoredAccount, UserIdentity};
use crate::store::{load_json, save_json, KeyValueStore, StoreError, CURRENT_USER_KEY, USERS_KEY};
use crate::sync::{Reconciler, SyncJob};
use crate::utils::{email_local_part, is_valid_email, new_user_id};

/// Shortest password accepted for a new account.
const MIN_PASSWORD_LEN: usize = 6;

/// Conflict key of the backend `users` table.
const USERS_CONFLICT_KEY: &str = "auth_user_id";

/// Country written to the backend when the profile has none.
const DEFAULT_COUNTRY: &str = "Philippines";

/// Owns the current local identity and the roster of known accounts.
///
/// Identity changes (login, signup, sign-out) reset every registered
/// [`UserScoped`] service before the new identity becomes visible, so no
/// state leaks from one user to the next.
pub struct IdentityManager {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    reconciler: Option<Arc<Reconciler>>,
    current: RwLock<Option<UserIdentity>>,
    /// Serializes roster read-modify-write sequences.
    roster_lock: AsyncMutex<()>,
    scoped: Mutex<Vec<Arc<dyn UserScoped>>>,
}

impl IdentityManager {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            reconciler: None,
            current: RwLock::new(None),
            roster_lock: AsyncMutex::new(()),
            scoped: Mutex::new(Vec::new()),
        }
    }

    /// Mirror profile edits to the backend through `reconciler`.
    pub fn with_reconciler(mut self, reconciler: Arc<Reconciler>) -> Self {
        self.reconciler = Some(reconciler);
        self
    }

    pub fn register_scoped(&self, service: Arc<dyn UserScoped>) {
        debug!(service = service.name(), "Registered user-scoped service");
        self.scoped
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(service);
    }

    // =========================================================================
    // Current identity
    // =========================================================================

    /// Restore the signed-in identity from the pointer key.
    pub async fn initialize(&self) -> Result<Option<UserIdentity>, AuthError> {
        let loaded = match load_json::<UserIdentity>(self.store.as_ref(), CURRENT_USER_KEY).await {
            Ok(user) => user,
            Err(e @ StoreError::Corrupt { .. }) => {
                warn!(error = %e, "Ignoring unreadable current-user pointer");
                None
            }
            Err(e) => return Err(e.into()),
        };

        let user = match loaded {
            Some(mut user) => {
                if user.migrate_names() {
                    info!(uid = %user.uid, "Migrated name fields on current user");
                    save_json(self.store.as_ref(), CURRENT_USER_KEY, &user).await?;
                }
                Some(user)
            }
            None => None,
        };

        *self.current.write().unwrap_or_else(PoisonError::into_inner) = user.clone();
        Ok(user)
    }

    pub fn current_user(&self) -> Option<UserIdentity> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_signed_in(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn reset_user_services(&self) {
        let services = self
            .scoped
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for service in &services {
            service.reset();
        }
        debug!(count = services.len(), "Reset user-scoped services");
    }

    async fn switch_to(&self, user: UserIdentity) -> Result<(), AuthError> {
        save_json(self.store.as_ref(), CURRENT_USER_KEY, &user).await?;
        self.reset_user_services();
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(user);
        Ok(())
    }

    // =========================================================================
    // Roster
    // =========================================================================

    /// Load the roster, migrating legacy entries. Call with `roster_lock`
    /// held.
    async fn load_roster(&self) -> Result<Vec<StoredAccount>, AuthError> {
        let mut accounts: Vec<StoredAccount> = load_json(self.store.as_ref(), USERS_KEY)
            .await?
            .unwrap_or_default();

        let mut changed = false;
        for account in &mut accounts {
            changed |= account.identity.migrate_names();
            if let Some(plain) = account.password.take() {
                if account.password_hash.is_none() {
                    account.password_hash = Some(hash_password(&plain)?);
                }
                changed = true;
            }
        }

        if changed {
            info!(accounts = accounts.len(), "Migrated legacy roster entries");
            self.save_roster(&accounts).await?;
        }
        Ok(accounts)
    }

    async fn save_roster(&self, accounts: &[StoredAccount]) -> Result<(), AuthError> {
        save_json(self.store.as_ref(), USERS_KEY, accounts).await?;
        Ok(())
    }

    /// All known identities, without credentials.
    pub async fn accounts(&self) -> Result<Vec<UserIdentity>, AuthError> {
        let _guard = self.roster_lock.lock().await;
        Ok(self
            .load_roster()
            .await?
            .into_iter()
            .map(|a| a.identity)
            .collect())
    }

    // =========================================================================
    // Account operations
    // =========================================================================

    pub async fn create_account(&self, email: &str, password: &str) -> Result<UserIdentity, AuthError> {
        let email = email.trim();
        let _guard = self.roster_lock.lock().await;
        let mut accounts = self.load_roster().await?;

        if find_account(&accounts, email).is_some() {
            return Err(AuthError::EmailAlreadyInUse);
        }
        if !is_valid_email(email) {
            return Err(AuthError::InvalidEmail);
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakPassword);
        }

        let now = self.clock.now();
        let name = email_local_part(email).map(str::to_string);
        let identity = UserIdentity {
            uid: new_user_id(now),
            email: email.to_lowercase(),
            display_name: name.clone(),
            full_name: name.clone(),
            name,
            created_at: Some(now),
            ..Default::default()
        };
        accounts.push(StoredAccount {
            identity: identity.clone(),
            password_hash: Some(hash_password(password)?),
            password: None,
        });
        self.save_roster(&accounts).await?;
        self.switch_to(identity.clone()).await?;

        info!(uid = %identity.uid, "Created local account");
        Ok(identity)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<UserIdentity, AuthError> {
        let identity = {
            let _guard = self.roster_lock.lock().await;
            let accounts = self.load_roster().await?;
            let account = find_account(&accounts, email.trim()).ok_or(AuthError::UserNotFound)?;
            let verified = account
                .password_hash
                .as_deref()
                .is_some_and(|hash| verify_password(password, hash));
            if !verified {
                return Err(AuthError::WrongPassword);
            }
            account.identity.clone()
        };

        self.switch_to(identity.clone()).await?;
        info!(uid = %identity.uid, "Signed in");
        Ok(identity)
    }

    /// Existence check only. No message is sent anywhere.
    pub async fn reset_password(&self, email: &str) -> Result<(), AuthError> {
        let _guard = self.roster_lock.lock().await;
        let accounts = self.load_roster().await?;
        find_account(&accounts, email.trim()).ok_or(AuthError::UserNotFound)?;
        info!("Password reset requested for known account");
        Ok(())
    }

    /// Apply a partial edit to the current identity.
    ///
    /// The roster entry and the pointer are written together under the
    /// roster lock, then a backend upsert is queued. The local write stands
    /// whatever happens to the upsert.
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<UserIdentity, AuthError> {
        let current = self.current_user().ok_or(AuthError::NotSignedIn)?;
        let now = self.clock.now();

        let updated = {
            let _guard = self.roster_lock.lock().await;
            let mut accounts = self.load_roster().await?;

            if let Some(email) = update.email.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
                if !is_valid_email(email) {
                    return Err(AuthError::InvalidEmail);
                }
                if find_account(&accounts, email).is_some_and(|a| a.identity.uid != current.uid) {
                    return Err(AuthError::EmailAlreadyInUse);
                }
            }

            let updated = match accounts.iter_mut().find(|a| a.identity.uid == current.uid) {
                Some(account) => {
                    account.identity.apply_update(update, now);
                    account.identity.clone()
                }
                None => {
                    warn!(uid = %current.uid, "Current user missing from roster, re-creating entry");
                    let mut identity = current.clone();
                    identity.apply_update(update, now);
                    if identity.created_at.is_none() {
                        identity.created_at = Some(now);
                    }
                    accounts.push(StoredAccount {
                        identity: identity.clone(),
                        password_hash: None,
                        password: None,
                    });
                    identity
                }
            };

            self.save_roster(&accounts).await?;
            save_json(self.store.as_ref(), CURRENT_USER_KEY, &updated).await?;
            *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(updated.clone());
            updated
        };

        if let Some(reconciler) = &self.reconciler {
            let job = SyncJob::Upsert {
                collection: Collection::Users,
                record: profile_row(&updated),
                on_conflict: USERS_CONFLICT_KEY.to_string(),
            };
            if let Err(e) = reconciler.enqueue(job) {
                warn!(error = %e, "Profile saved locally, backend sync not queued");
            }
        }

        info!(uid = %updated.uid, "Profile updated");
        Ok(updated)
    }

    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.reset_user_services();
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = None;
        self.store.remove(CURRENT_USER_KEY).await?;
        info!("Signed out");
        Ok(())
    }

    /// Forget every local account and the current identity.
    pub async fn clear_all_data(&self) -> Result<(), AuthError> {
        let _guard = self.roster_lock.lock().await;
        self.store.remove(USERS_KEY).await?;
        self.store.remove(CURRENT_USER_KEY).await?;
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = None;
        self.reset_user_services();
        info!("Cleared all local identity data");
        Ok(())
    }
}

/// Emails are stored lowercased, so lookups lowercase the same way.
fn find_account<'a>(accounts: &'a [StoredAccount], email: &str) -> Option<&'a StoredAccount> {
    let email = email.to_lowercase();
    accounts
        .iter()
        .find(|a| a.identity.email.to_lowercase() == email)
}

/// Row for the backend `users` table.
fn profile_row(user: &UserIdentity) -> Value {
    let text = |value: &Option<String>| value.clone().unwrap_or_default();
    json!({
        "auth_user_id": user.uid,
        "email": user.email,
        "name": user.name.as_deref().unwrap_or(user.display()),
        "full_name": user.full_name.as_deref().unwrap_or(user.display()),
        "phone": text(&user.phone),
        "location": text(&user.location),
        "country": user.country.as_deref().unwrap_or(DEFAULT_COUNTRY),
        "zip_code": text(&user.zip_code),
        "birth_date": user.birth_date,
        "gender": text(&user.gender),
        "avatar_url": text(&user.avatar_url),
        "status": "ACTIVE",
        "is_active": true,
        "updated_at": user.updated_at,
    })
}
