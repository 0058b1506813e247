use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::email_local_part;

/// Fallback display name when nothing better is known.
const DEFAULT_NAME: &str = "User";

/// A local identity. Persisted in the roster and as the current-user pointer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    pub uid: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Inline-encoded image or URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(rename = "avatar_url", default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(rename = "zip_code", default, skip_serializing_if = "Option::is_none")]
    pub zip_code: Option<String>,
    #[serde(rename = "birth_date", default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl UserIdentity {
    /// Best available human name.
    pub fn display(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.full_name.as_deref())
            .or(self.name.as_deref())
            .unwrap_or(&self.email)
    }

    /// Records written before name fields existed carry neither `fullName`
    /// nor `name`.
    pub fn needs_name_migration(&self) -> bool {
        is_blank(&self.full_name) && is_blank(&self.name)
    }

    /// Fill the name fields from the display name or email. Returns whether
    /// anything changed, so callers only persist when needed.
    pub fn migrate_names(&mut self) -> bool {
        if !self.needs_name_migration() {
            return false;
        }
        let value = self
            .display_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .or_else(|| email_local_part(&self.email).map(str::to_string))
            .unwrap_or_else(|| DEFAULT_NAME.to_string());
        self.full_name = Some(value.clone());
        self.name = Some(value);
        true
    }

    /// Apply a partial profile edit. `birth_date` and `gender` are write-once.
    pub fn apply_update(&mut self, update: &ProfileUpdate, now: DateTime<Utc>) {
        if let Some(email) = update.email.as_deref().filter(|e| !e.trim().is_empty()) {
            self.email = email.trim().to_lowercase();
        }

        let new_name = update
            .name
            .as_deref()
            .or(update.full_name.as_deref())
            .filter(|n| !n.trim().is_empty());
        if let Some(name) = new_name {
            self.name = Some(name.to_string());
            self.full_name = Some(name.to_string());
            self.display_name = Some(name.to_string());
        }

        if let Some(avatar) = update.avatar.as_deref().filter(|a| !a.is_empty()) {
            self.avatar = Some(avatar.to_string());
            self.avatar_url = Some(avatar.to_string());
        }

        set_if_some(&mut self.phone, &update.phone);
        set_if_some(&mut self.location, &update.location);
        set_if_some(&mut self.country, &update.country);
        set_if_some(&mut self.zip_code, &update.zip_code);

        if is_blank(&self.birth_date) {
            set_if_some(&mut self.birth_date, &update.birth_date);
        }
        if is_blank(&self.gender) {
            set_if_some(&mut self.gender, &update.gender);
        }

        self.updated_at = Some(now);
    }
}

/// Roster entry: an identity plus its credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAccount {
    #[serde(flatten)]
    pub identity: UserIdentity,
    /// Argon2 PHC string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    /// Plaintext password from older app versions. Read once, hashed, dropped.
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
}

/// Partial profile edit. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default, alias = "fullName")]
    pub full_name: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default, alias = "zipCode")]
    pub zip_code: Option<String>,
    #[serde(default, alias = "birthDate")]
    pub birth_date: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map(|v| v.trim().is_empty()).unwrap_or(true)
}

fn set_if_some(target: &mut Option<String>, value: &Option<String>) {
    if let Some(v) = value {
        *target = Some(v.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn identity(email: &str) -> UserIdentity {
        UserIdentity {
            uid: "u1".to_string(),
            email: email.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_migrate_names_from_email() {
        let mut user = identity("maria@example.com");
        assert!(user.migrate_names());
        assert_eq!(user.full_name.as_deref(), Some("maria"));
        assert_eq!(user.name.as_deref(), Some("maria"));
        // Second pass finds the fields present.
        assert!(!user.migrate_names());
    }

    #[test]
    fn test_migrate_names_prefers_display_name() {
        let mut user = identity("maria@example.com");
        user.display_name = Some("Maria C".to_string());
        user.migrate_names();
        assert_eq!(user.full_name.as_deref(), Some("Maria C"));
    }

    #[test]
    fn test_birth_date_and_gender_are_write_once() {
        let mut user = identity("a@b.co");
        user.birth_date = Some("1990-01-01".to_string());

        let update = ProfileUpdate {
            birth_date: Some("2000-01-01".to_string()),
            gender: Some("female".to_string()),
            ..Default::default()
        };
        user.apply_update(&update, Utc::now());
        assert_eq!(user.birth_date.as_deref(), Some("1990-01-01"));
        assert_eq!(user.gender.as_deref(), Some("female"));

        let again = ProfileUpdate {
            gender: Some("male".to_string()),
            ..Default::default()
        };
        user.apply_update(&again, Utc::now());
        assert_eq!(user.gender.as_deref(), Some("female"));
    }

    #[test]
    fn test_name_update_propagates_to_all_name_fields() {
        let mut user = identity("a@b.co");
        let update = ProfileUpdate {
            full_name: Some("Ana Reyes".to_string()),
            avatar: Some("data:image/png;base64,AAAA".to_string()),
            ..Default::default()
        };
        user.apply_update(&update, Utc::now());
        assert_eq!(user.name.as_deref(), Some("Ana Reyes"));
        assert_eq!(user.display_name.as_deref(), Some("Ana Reyes"));
        assert_eq!(user.avatar, user.avatar_url);
    }

    #[test]
    fn test_stored_account_never_writes_plaintext() {
        let account: StoredAccount = serde_json::from_value(json!({
            "uid": "1",
            "email": "old@example.com",
            "password": "hunter22"
        }))
        .expect("legacy roster entry should parse");
        assert_eq!(account.password.as_deref(), Some("hunter22"));

        let written = serde_json::to_value(&account).expect("serialize");
        assert!(written.get("password").is_none());
        assert_eq!(written["email"], "old@example.com");
    }
}
