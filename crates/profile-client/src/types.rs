//! Record and query types shared by the real client and the in-memory fake.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};

/// Partial-update payload for [`set_details`](crate::ProfileService::set_details):
/// a JSON object keyed by recognized field names.
pub type DetailsMap = serde_json::Map<String, serde_json::Value>;

/// Every field name the profile server accepts in a partial update.
pub const RECOGNIZED_FIELDS: &[&str] = &[
    "email",
    "username",
    "first_name",
    "last_name",
    "phone",
    "mobile",
    "state",
    "date_joined",
    "last_login",
    "is_locked",
    "groups",
    "subscribed",
    "subscriptions",
    "ever_subscribed_websites",
];

/// Fields matched by the free-text `q` filter and the exact per-field filters.
pub const SEARCHABLE_FIELDS: &[&str] = &["email", "username", "first_name", "last_name"];

/// A user record as the profile server represents it.
///
/// An empty `username` means the server has not assigned one yet; the server
/// derives one from the email on registration (see [`derived_username`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub email: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub mobile: String,
    #[serde(default)]
    pub state: String,
    #[serde(default = "Utc::now")]
    pub date_joined: DateTime<Utc>,
    #[serde(default)]
    pub last_login: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_locked: bool,
    #[serde(default)]
    pub groups: BTreeSet<String>,
    #[serde(default = "default_subscribed")]
    pub subscribed: bool,
    #[serde(default)]
    pub subscriptions: BTreeMap<String, bool>,
    #[serde(default)]
    pub ever_subscribed_websites: BTreeSet<String>,
}

fn default_subscribed() -> bool {
    true
}

impl Default for UserRecord {
    fn default() -> Self {
        Self {
            email: String::new(),
            username: String::new(),
            first_name: String::new(),
            last_name: String::new(),
            phone: String::new(),
            mobile: String::new(),
            state: String::new(),
            date_joined: Utc::now(),
            last_login: None,
            is_locked: false,
            groups: BTreeSet::new(),
            subscribed: true,
            subscriptions: BTreeMap::new(),
            ever_subscribed_websites: BTreeSet::new(),
        }
    }
}

impl UserRecord {
    /// A registration seed: everything defaulted except the email.
    #[must_use]
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            ..Self::default()
        }
    }

    /// Look up a string field by name. Returns `None` for unknown names and
    /// for fields that are not string-valued.
    #[must_use]
    pub fn string_field(&self, field: &str) -> Option<&str> {
        match field {
            "email" => Some(&self.email),
            "username" => Some(&self.username),
            "first_name" => Some(&self.first_name),
            "last_name" => Some(&self.last_name),
            "phone" => Some(&self.phone),
            "mobile" => Some(&self.mobile),
            "state" => Some(&self.state),
            _ => None,
        }
    }
}

/// The username the profile server derives from an email when the caller does
/// not supply one: `sha256:` plus the first 23 hex characters of the SHA-256
/// digest of the lowercased email.
#[must_use]
pub fn derived_username(email: &str) -> String {
    let digest = Sha256::digest(email.to_lowercase().as_bytes());
    format!("sha256:{}", &hex::encode(digest)[..23])
}

/// Parameters for the user listing endpoint.
///
/// `extra` is forwarded verbatim to the real server for parameters this
/// library does not model; the fake rejects any entry loudly so a real/fake
/// behavioral mismatch cannot pass silently.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListQuery {
    pub offset: Option<u64>,
    /// `Some(n)` with `n <= 0` means unlimited; absent means the server
    /// default of 20.
    pub limit: Option<i64>,
    /// Field names, `-` prefix for descending.
    pub order_by: Vec<String>,
    /// Case-insensitive substring match across [`SEARCHABLE_FIELDS`].
    pub q: Option<String>,
    pub email: Option<String>,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub include_adminable: bool,
    pub was_subscribed: bool,
    pub extra: BTreeMap<String, String>,
}

impl ListQuery {
    /// The limit the server applies when the query does not name one.
    pub const DEFAULT_LIMIT: i64 = 20;

    /// A query filtering on an exact email.
    #[must_use]
    pub fn by_email(email: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            ..Self::default()
        }
    }

    /// Serialize into query-string pairs for the real server. `order_by` is
    /// comma-separated; boolean flags are sent only when set.
    #[must_use]
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        if let Some(offset) = self.offset {
            pairs.push(("offset".to_string(), offset.to_string()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit".to_string(), limit.to_string()));
        }
        if !self.order_by.is_empty() {
            pairs.push(("order_by".to_string(), self.order_by.join(",")));
        }
        if let Some(q) = &self.q {
            pairs.push(("q".to_string(), q.clone()));
        }
        for (field, value) in [
            ("email", &self.email),
            ("username", &self.username),
            ("first_name", &self.first_name),
            ("last_name", &self.last_name),
        ] {
            if let Some(value) = value {
                pairs.push((field.to_string(), value.clone()));
            }
        }
        if self.include_adminable {
            pairs.push(("include_adminable".to_string(), "true".to_string()));
        }
        if self.was_subscribed {
            pairs.push(("was_subscribed".to_string(), "true".to_string()));
        }
        for (key, value) in &self.extra {
            pairs.push((key.clone(), value.clone()));
        }
        pairs
    }

    /// The exact filter value for a searchable field, if one was given.
    #[must_use]
    pub fn field_filter(&self, field: &str) -> Option<&str> {
        match field {
            "email" => self.email.as_deref(),
            "username" => self.username.as_deref(),
            "first_name" => self.first_name.as_deref(),
            "last_name" => self.last_name.as_deref(),
            _ => None,
        }
    }
}

/// Pagination metadata returned with every listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListMeta {
    pub limit: i64,
    pub offset: u64,
    pub total_count: u64,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub previous: Option<String>,
}

/// One page of a user listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListResult {
    pub meta: ListMeta,
    pub objects: Vec<UserRecord>,
}

/// A stored key/value preference. Created via set, deleted by id; there is no
/// update in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferenceRecord {
    /// Opaque id assigned on creation. The server sends numeric ids.
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: serde_json::Value,
}

/// The member listing of a group endpoint response.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupMembers {
    pub users: Vec<UserRecord>,
}

fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::String(id) => Ok(id),
        serde_json::Value::Number(id) => Ok(id.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "preference id must be a string or number, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_username_matches_known_hash() {
        assert_eq!(
            derived_username("bob@gov.gl"),
            "sha256:8af72939b65cd3089d835d7"
        );
        // Derivation lowercases the email first.
        assert_eq!(derived_username("BOB@gov.gl"), derived_username("bob@gov.gl"));
    }

    #[test]
    fn query_pairs_cover_all_parameters() {
        let query = ListQuery {
            offset: Some(40),
            limit: Some(0),
            order_by: vec!["last_name".to_string(), "-first_name".to_string()],
            q: Some("simpson".to_string()),
            email: Some("bob@gov.gl".to_string()),
            include_adminable: true,
            was_subscribed: true,
            ..ListQuery::default()
        };

        assert_eq!(
            query.to_query_pairs(),
            vec![
                ("offset".to_string(), "40".to_string()),
                ("limit".to_string(), "0".to_string()),
                ("order_by".to_string(), "last_name,-first_name".to_string()),
                ("q".to_string(), "simpson".to_string()),
                ("email".to_string(), "bob@gov.gl".to_string()),
                ("include_adminable".to_string(), "true".to_string()),
                ("was_subscribed".to_string(), "true".to_string()),
            ]
        );
    }

    #[test]
    fn default_query_serializes_to_nothing() {
        assert!(ListQuery::default().to_query_pairs().is_empty());
    }

    #[test]
    fn user_record_deserializes_with_server_defaults() {
        let user: UserRecord = serde_json::from_value(serde_json::json!({
            "email": "bob@gov.gl",
            "username": "sha256:8af72939b65cd3089d835d7",
        }))
        .unwrap();

        assert!(user.subscribed);
        assert!(user.groups.is_empty());
        assert_eq!(user.last_login, None);
    }

    #[test]
    fn preference_id_tolerates_numbers() {
        let preference: PreferenceRecord = serde_json::from_value(serde_json::json!({
            "id": 42,
            "type": "favourites",
            "data": {"colour": "green"},
        }))
        .unwrap();
        assert_eq!(preference.id, "42");
        assert_eq!(preference.kind, "favourites");
    }
}
