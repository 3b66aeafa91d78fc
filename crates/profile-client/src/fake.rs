//! In-memory stand-in for the profile server.
//!
//! Reproduces the real service's list/filter/sort/paginate and error behavior
//! so application code and tests can run without a network dependency. Not
//! meant for concurrent use; a single mutex guards the state so the fake can
//! still be shared across an async test harness.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::ProfileError;
use crate::service::ProfileService;
use crate::sort::{CompareFn, SortKey, compare_case_insensitive, multi_key_sort};
use crate::types::{
    DetailsMap, ListMeta, ListQuery, ListResult, PreferenceRecord, RECOGNIZED_FIELDS,
    SEARCHABLE_FIELDS, UserRecord, derived_username,
};

/// Fields the fake accepts in `order_by`.
const SORTABLE_FIELDS: &[&str] = &[
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
];

#[derive(Debug, Default)]
struct FakeState {
    users: BTreeMap<String, UserRecord>,
    /// Reverse index, kept symmetric with each user's own `groups` set.
    groups: BTreeMap<String, BTreeSet<String>>,
    preferences: BTreeMap<String, Vec<PreferenceRecord>>,
    not_unique_emails: BTreeSet<String>,
    adminable_apps: Vec<String>,
    last_list_query: Option<ListQuery>,
    last_reset_password: Option<String>,
}

/// An in-memory profile server.
///
/// Test-harness controls ([`set_adminable_apps`](Self::set_adminable_apps),
/// [`mark_email_not_unique`](Self::mark_email_not_unique)) mirror the caller's
/// key configuration and the real server's data quirks, since the fake has no
/// network identity to infer them from.
#[derive(Debug)]
pub struct FakeProfileServer {
    app: String,
    state: Mutex<FakeState>,
}

impl Default for FakeProfileServer {
    fn default() -> Self {
        Self::new("mock_app")
    }
}

impl FakeProfileServer {
    /// A fake serving the given application key.
    #[must_use]
    pub fn new(app: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            state: Mutex::new(FakeState::default()),
        }
    }

    /// The current application key.
    #[must_use]
    pub fn app(&self) -> &str {
        &self.app
    }

    pub fn set_adminable_apps<I, S>(&self, apps: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state().adminable_apps = apps.into_iter().map(Into::into).collect();
    }

    /// Make `find_by_email` behave as if this email were duplicated on the
    /// real server.
    pub fn mark_email_not_unique(&self, email: &str) {
        self.state().not_unique_emails.insert(email.to_lowercase());
    }

    /// The query of the most recent `list` call, for assertions.
    #[must_use]
    pub fn last_list_query(&self) -> Option<ListQuery> {
        self.state().last_list_query.clone()
    }

    /// The username of the most recent `reset_password` call, for assertions.
    #[must_use]
    pub fn last_reset_password(&self) -> Option<String> {
        self.state().last_reset_password.clone()
    }

    /// The stored (unprojected) record for a username, for assertions.
    #[must_use]
    pub fn stored_user(&self, username: &str) -> Option<UserRecord> {
        self.state().users.get(username).cloned()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_subscription(&self, user: &UserRecord, status: bool) -> Result<(), ProfileError> {
        let mut state = self.state();
        let username = resolve_username(user)?;
        let Some(stored) = state.users.get_mut(&username) else {
            return Err(ProfileError::UnknownUser { username });
        };
        stored.subscriptions.insert(self.app.clone(), status);
        stored.subscribed = status;
        if status {
            stored.ever_subscribed_websites.insert(self.app.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl ProfileService for FakeProfileServer {
    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, ProfileError> {
        let mut state = self.state();
        let visible = visible_apps(&self.app, &state.adminable_apps);
        Ok(state
            .users
            .get_mut(username)
            .map(|stored| project(&self.app, &visible, stored)))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, ProfileError> {
        if self
            .state()
            .not_unique_emails
            .contains(&email.to_lowercase())
        {
            return Err(ProfileError::EmailNotUnique {
                email: email.to_string(),
            });
        }

        let result = self.list(&ListQuery::by_email(email)).await?;
        match result.meta.total_count {
            0 => Ok(None),
            1 => Ok(result.objects.into_iter().next()),
            _ => Err(ProfileError::EmailNotUnique {
                email: email.to_string(),
            }),
        }
    }

    async fn list(&self, query: &ListQuery) -> Result<ListResult, ProfileError> {
        let mut state = self.state();
        state.last_list_query = Some(query.clone());

        // Parameters the real server might support but this fake does not
        // model are rejected rather than silently ignored: silence here would
        // mask a fake/real behavioral mismatch.
        if let Some(param) = query.extra.keys().next() {
            return Err(ProfileError::InvalidQuery {
                message: format!("unrecognised parameter in list call: {param}"),
            });
        }

        // Default ordering on the real server is by internal id; the fake has
        // none, so email stands in as a stable, meaningful default.
        let order_by: Vec<String> = if query.order_by.is_empty() {
            vec!["email".to_string()]
        } else {
            query.order_by.clone()
        };
        for spec in &order_by {
            let key = SortKey::parse(spec);
            if !SORTABLE_FIELDS.contains(&key.field.as_str()) {
                return Err(ProfileError::InvalidQuery {
                    message: format!("cannot sort by unknown field: {}", key.field),
                });
            }
        }

        let visible = visible_apps(&self.app, &state.adminable_apps);
        let usernames: Vec<String> = state.users.keys().cloned().collect();
        let mut users: Vec<UserRecord> = usernames
            .iter()
            .filter_map(|username| {
                state
                    .users
                    .get_mut(username)
                    .map(|stored| project(&self.app, &visible, stored))
            })
            .collect();

        multi_key_sort(&mut users, &order_by, &sort_rules(), sort_field);

        // Only subscribed (or adminable) users are listed, unless the caller
        // searches by an exact email.
        if query.email.is_none() {
            let interesting: Vec<String> = if query.include_adminable {
                visible
            } else {
                vec![self.app.clone()]
            };
            if query.was_subscribed {
                users.retain(|user| {
                    interesting
                        .iter()
                        .any(|app| user.ever_subscribed_websites.contains(app))
                        && !interesting
                            .iter()
                            .any(|app| user.subscriptions.get(app).copied().unwrap_or(false))
                });
            } else {
                users.retain(|user| {
                    interesting
                        .iter()
                        .any(|app| user.subscriptions.get(app).copied().unwrap_or(false))
                });
            }
        }

        if let Some(q) = &query.q {
            let q = q.to_lowercase();
            users.retain(|user| {
                SEARCHABLE_FIELDS.iter().any(|field| {
                    user.string_field(field)
                        .unwrap_or_default()
                        .to_lowercase()
                        .contains(&q)
                })
            });
        }

        for field in SEARCHABLE_FIELDS {
            if let Some(value) = query.field_filter(field) {
                let value = value.to_lowercase();
                users.retain(|user| {
                    user.string_field(field).unwrap_or_default().to_lowercase() == value
                });
            }
        }

        // Total count reflects the full filtered set, not the page.
        let total_count = users.len() as u64;

        let offset = query.offset.unwrap_or(0);
        let mut objects: Vec<UserRecord> = users.into_iter().skip(offset as usize).collect();

        let limit = query.limit.unwrap_or(ListQuery::DEFAULT_LIMIT);
        if limit > 0 {
            objects.truncate(limit as usize);
        }

        Ok(ListResult {
            meta: ListMeta {
                limit,
                offset,
                total_count,
                next: None,
                previous: None,
            },
            objects,
        })
    }

    async fn register(&self, user: &UserRecord) -> Result<UserRecord, ProfileError> {
        let mut state = self.state();

        let mut record = user.clone();
        let username = if record.username.is_empty() {
            derived_username(&record.email)
        } else {
            record.username.clone()
        };
        if state.users.contains_key(&username) {
            return Err(username_taken_failure());
        }
        record.username = username.clone();

        // All the subscription information lives in `subscriptions`; the
        // `subscribed` flag applies to the current app.
        let subscribed = record.subscribed;
        record.subscriptions.insert(self.app.clone(), subscribed);
        let active: Vec<String> = record
            .subscriptions
            .iter()
            .filter(|(_, on)| **on)
            .map(|(app, _)| app.clone())
            .collect();
        record.ever_subscribed_websites.extend(active);

        for group in &record.groups {
            state
                .groups
                .entry(group.clone())
                .or_default()
                .insert(username.clone());
        }
        state.users.insert(username.clone(), record);

        let visible = visible_apps(&self.app, &state.adminable_apps);
        state
            .users
            .get_mut(&username)
            .map(|stored| project(&self.app, &visible, stored))
            .ok_or(ProfileError::UnknownUser { username })
    }

    async fn subscribe(&self, user: &UserRecord) -> Result<(), ProfileError> {
        self.set_subscription(user, true)
    }

    async fn unsubscribe(&self, user: &UserRecord) -> Result<(), ProfileError> {
        self.set_subscription(user, false)
    }

    async fn add_groups(
        &self,
        user: &UserRecord,
        groups: &[String],
    ) -> Result<BTreeSet<String>, ProfileError> {
        let mut state = self.state();
        let username = resolve_username(user)?;

        // An unknown user gets a skeleton record, as the real server's group
        // membership can reference users the caller never registered.
        let record = state.users.entry(username.clone()).or_insert_with(|| {
            let mut seed = user.clone();
            seed.username = username.clone();
            seed
        });
        record.groups.extend(groups.iter().cloned());
        let membership = record.groups.clone();

        for group in &membership {
            state
                .groups
                .entry(group.clone())
                .or_default()
                .insert(username.clone());
        }
        Ok(membership)
    }

    async fn remove_groups(
        &self,
        user: &UserRecord,
        groups: &[String],
    ) -> Result<BTreeSet<String>, ProfileError> {
        let mut state = self.state();
        let username = resolve_username(user)?;
        let Some(record) = state.users.get_mut(&username) else {
            return Err(ProfileError::UnknownUser { username });
        };

        // Removing a group the user is not in is a no-op, not an error.
        record.groups.retain(|group| !groups.contains(group));
        let membership = record.groups.clone();

        for group in groups {
            if let Some(members) = state.groups.get_mut(group) {
                members.remove(&username);
            }
        }
        Ok(membership)
    }

    async fn get_group(
        &self,
        group: &str,
        _query: &ListQuery,
    ) -> Result<Vec<UserRecord>, ProfileError> {
        // Listing parameters are accepted for signature parity with the real
        // endpoint but not applied by the fake.
        let mut state = self.state();
        let visible = visible_apps(&self.app, &state.adminable_apps);
        let members: Vec<String> = state
            .groups
            .get(group)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default();
        Ok(members
            .iter()
            .filter_map(|username| {
                state
                    .users
                    .get_mut(username)
                    .map(|stored| project(&self.app, &visible, stored))
            })
            .collect())
    }

    async fn set_details(
        &self,
        user: &UserRecord,
        details: DetailsMap,
    ) -> Result<UserRecord, ProfileError> {
        let mut state = self.state();
        let username = resolve_username(user)?;
        let Some(mut record) = state.users.get(&username).cloned() else {
            return Err(ProfileError::UnknownUser { username });
        };
        let mut details = details;

        // A subscriptions change for the current app implies `subscribed`.
        if !details.contains_key("subscribed") {
            let implied = details
                .get("subscriptions")
                .and_then(|value| value.as_object())
                .and_then(|subscriptions| subscriptions.get(&self.app))
                .cloned();
            if let Some(value) = implied {
                details.insert("subscribed".to_string(), value);
            }
        }

        for key in details.keys() {
            if !RECOGNIZED_FIELDS.contains(&key.as_str()) {
                return Err(ProfileError::validation(&serde_json::json!(format!(
                    "Invalid user key: {key}"
                ))));
            }
        }

        // Subscriptions are merged, not replaced. An explicit `subscribed`
        // wins over any entry for the current app in the incoming map, so it
        // is folded in before the merge.
        let mut incoming: BTreeMap<String, bool> = match details.remove("subscriptions") {
            Some(value) => {
                serde_json::from_value(value).map_err(|_| invalid_value("subscriptions"))?
            }
            None => BTreeMap::new(),
        };
        if let Some(value) = details.remove("subscribed") {
            let subscribed = value.as_bool().ok_or_else(|| invalid_value("subscribed"))?;
            incoming.insert(self.app.clone(), subscribed);
        }
        record.subscriptions.extend(incoming);
        if let Some(current) = record.subscriptions.get(&self.app) {
            record.subscribed = *current;
        }

        for (key, value) in details {
            apply_field(&mut record, &key, value)?;
        }
        if record.username.is_empty() {
            record.username = username.clone();
        }

        // Username re-validated after the merge.
        if record.username != username
            && state
                .users
                .get(&record.username)
                .is_some_and(|other| other.email != record.email)
        {
            return Err(username_taken_failure());
        }

        let new_username = record.username.clone();
        let new_groups = record.groups.clone();
        state.users.remove(&username);
        state.users.insert(new_username.clone(), record);

        // Keep the reverse index symmetric with the user's own groups set,
        // including across a rename.
        for members in state.groups.values_mut() {
            members.remove(&username);
        }
        for group in &new_groups {
            state
                .groups
                .entry(group.clone())
                .or_default()
                .insert(new_username.clone());
        }

        if new_username != username {
            if let Some(preferences) = state.preferences.remove(&username) {
                state.preferences.insert(new_username.clone(), preferences);
            }
        }

        let visible = visible_apps(&self.app, &state.adminable_apps);
        state
            .users
            .get_mut(&new_username)
            .map(|stored| project(&self.app, &visible, stored))
            .ok_or(ProfileError::UnknownUser {
                username: new_username,
            })
    }

    async fn set_user_data(
        &self,
        user: &UserRecord,
        key: &str,
        value: serde_json::Value,
    ) -> Result<PreferenceRecord, ProfileError> {
        let mut state = self.state();
        let username = resolve_username(user)?;
        let preference = PreferenceRecord {
            id: Uuid::new_v4().simple().to_string(),
            kind: key.to_string(),
            data: value,
        };
        state
            .preferences
            .entry(username)
            .or_default()
            .push(preference.clone());
        Ok(preference)
    }

    async fn get_user_data(
        &self,
        user: &UserRecord,
        key: Option<&str>,
    ) -> Result<Vec<PreferenceRecord>, ProfileError> {
        let state = self.state();
        let username = resolve_username(user)?;
        let Some(preferences) = state.preferences.get(&username) else {
            return Ok(Vec::new());
        };
        Ok(preferences
            .iter()
            .filter(|preference| key.is_none_or(|key| preference.kind == key))
            .cloned()
            .collect())
    }

    async fn delete_user_data(&self, id: &str) -> Result<(), ProfileError> {
        let mut state = self.state();
        for preferences in state.preferences.values_mut() {
            preferences.retain(|preference| preference.id != id);
        }
        Ok(())
    }

    async fn reset_password(&self, user: &UserRecord) -> Result<(), ProfileError> {
        let mut state = self.state();
        let username = resolve_username(user)?;
        if !state.users.contains_key(&username) {
            return Err(ProfileError::validation(&serde_json::json!(
                "Unknown user."
            )));
        }
        state.last_reset_password = Some(username);
        Ok(())
    }
}

fn visible_apps(app: &str, adminable: &[String]) -> Vec<String> {
    let mut apps = vec![app.to_string()];
    apps.extend(adminable.iter().cloned());
    apps
}

/// Project a stored record the way the real API returns it: subscriptions
/// restricted to the visible apps, `subscribed` recomputed from them, and any
/// active subscription folded into the stored record's
/// `ever_subscribed_websites` (which only ever grows).
fn project(app: &str, visible: &[String], stored: &mut UserRecord) -> UserRecord {
    let mut user = stored.clone();
    user.subscriptions = visible
        .iter()
        .map(|name| {
            (
                name.clone(),
                stored.subscriptions.get(name).copied().unwrap_or(false),
            )
        })
        .collect();
    user.subscribed = user.subscriptions.get(app).copied().unwrap_or(false);

    let active: Vec<String> = user
        .subscriptions
        .iter()
        .filter(|(_, on)| **on)
        .map(|(app, _)| app.clone())
        .collect();
    stored.ever_subscribed_websites.extend(active);
    user.ever_subscribed_websites = stored.ever_subscribed_websites.clone();
    user
}

fn sort_rules() -> BTreeMap<&'static str, CompareFn> {
    let mut rules: BTreeMap<&str, CompareFn> = BTreeMap::new();
    rules.insert("first_name", compare_case_insensitive);
    rules.insert("last_name", compare_case_insensitive);
    rules
}

fn sort_field(user: &UserRecord, field: &str) -> String {
    if let Some(value) = user.string_field(field) {
        return value.to_string();
    }
    match field {
        "date_joined" => user.date_joined.to_rfc3339(),
        "last_login" => user
            .last_login
            .map(|at| at.to_rfc3339())
            .unwrap_or_default(),
        "is_locked" => u8::from(user.is_locked).to_string(),
        _ => String::new(),
    }
}

fn resolve_username(user: &UserRecord) -> Result<String, ProfileError> {
    if !user.username.is_empty() {
        return Ok(user.username.clone());
    }
    if !user.email.is_empty() {
        return Ok(derived_username(&user.email));
    }
    Err(ProfileError::InvalidQuery {
        message: "user record has neither username nor email".to_string(),
    })
}

/// The 400-shaped failure the real server sends for a duplicate username.
fn username_taken_failure() -> ProfileError {
    ProfileError::validation(&serde_json::json!({
        "user": {
            "username": ["This username is already taken."],
        },
    }))
}

fn invalid_value(key: &str) -> ProfileError {
    ProfileError::validation(&serde_json::json!(format!(
        "Invalid value for user key: {key}"
    )))
}

fn apply_field(
    record: &mut UserRecord,
    key: &str,
    value: serde_json::Value,
) -> Result<(), ProfileError> {
    match key {
        "email" | "username" | "first_name" | "last_name" | "phone" | "mobile" | "state" => {
            let text = value
                .as_str()
                .ok_or_else(|| invalid_value(key))?
                .to_string();
            match key {
                "email" => record.email = text,
                "username" => record.username = text,
                "first_name" => record.first_name = text,
                "last_name" => record.last_name = text,
                "phone" => record.phone = text,
                "mobile" => record.mobile = text,
                _ => record.state = text,
            }
        }
        "date_joined" => {
            record.date_joined = serde_json::from_value(value).map_err(|_| invalid_value(key))?;
        }
        "last_login" => {
            record.last_login = serde_json::from_value(value).map_err(|_| invalid_value(key))?;
        }
        "is_locked" => {
            record.is_locked = value.as_bool().ok_or_else(|| invalid_value(key))?;
        }
        "groups" => {
            record.groups = serde_json::from_value(value).map_err(|_| invalid_value(key))?;
        }
        "ever_subscribed_websites" => {
            // Monotonic: new entries are folded in, nothing is removed.
            let extra: BTreeSet<String> =
                serde_json::from_value(value).map_err(|_| invalid_value(key))?;
            record.ever_subscribed_websites.extend(extra);
        }
        _ => return Err(invalid_value(key)),
    }
    Ok(())
}
