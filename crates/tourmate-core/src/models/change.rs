use serde::{Deserialize, Serialize};

/// Remote collections the core knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Destinations,
    Delicacies,
    UserVisits,
    Users,
}

impl Collection {
    /// Backend table name for this collection.
    pub fn table_name(&self) -> &'static str {
        match self {
            Collection::Destinations => "destinations",
            Collection::Delicacies => "local_delicacies",
            Collection::UserVisits => "user_visits",
            Collection::Users => "users",
        }
    }

    pub fn from_table_name(name: &str) -> Option<Self> {
        match name {
            "destinations" => Some(Collection::Destinations),
            "local_delicacies" => Some(Collection::Delicacies),
            "user_visits" => Some(Collection::UserVisits),
            "users" => Some(Collection::Users),
            _ => None,
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeKind::Created => write!(f, "INSERT"),
            ChangeKind::Updated => write!(f, "UPDATE"),
            ChangeKind::Deleted => write!(f, "DELETE"),
        }
    }
}

/// A single remote change notification. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub collection: Collection,
    pub kind: ChangeKind,
    pub affected_id: String,
}

impl ChangeEvent {
    pub fn new(collection: Collection, kind: ChangeKind, affected_id: impl Into<String>) -> Self {
        Self {
            collection,
            kind,
            affected_id: affected_id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_table_names_round_trip() {
        for c in [
            Collection::Destinations,
            Collection::Delicacies,
            Collection::UserVisits,
            Collection::Users,
        ] {
            assert_eq!(Collection::from_table_name(c.table_name()), Some(c));
        }
        assert_eq!(Collection::from_table_name("reviews"), None);
    }
}
