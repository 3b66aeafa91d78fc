//! The operation vocabulary shared by the real client and the fake.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::error::ProfileError;
use crate::types::{DetailsMap, ListQuery, ListResult, PreferenceRecord, UserRecord};

/// Operations against the profile server, implemented by both
/// [`ProfileServerClient`](crate::ProfileServerClient) and
/// [`FakeProfileServer`](crate::FakeProfileServer).
///
/// Calling code receives a handle to one of the two implementations rather
/// than reaching for a process-wide global; tests construct and inject the
/// fake explicitly.
#[async_trait]
pub trait ProfileService: Send + Sync {
    /// Look up a user by username. An absent user is `None`, not an error.
    async fn find_by_username(&self, username: &str)
    -> Result<Option<UserRecord>, ProfileError>;

    /// List users, with server-side filtering, sorting and pagination.
    async fn list(&self, query: &ListQuery) -> Result<ListResult, ProfileError>;

    /// Create a new user record. The server assigns a username when the seed
    /// record does not carry one.
    async fn register(&self, user: &UserRecord) -> Result<UserRecord, ProfileError>;

    /// Subscribe the user to the current application.
    async fn subscribe(&self, user: &UserRecord) -> Result<(), ProfileError>;

    /// Unsubscribe the user from the current application.
    async fn unsubscribe(&self, user: &UserRecord) -> Result<(), ProfileError>;

    /// Add the user to the named groups and return the resulting membership.
    ///
    /// This is a read-modify-write against the server with no client-side
    /// locking: concurrent group updates from other clients can be lost
    /// (last write wins).
    async fn add_groups(
        &self,
        user: &UserRecord,
        groups: &[String],
    ) -> Result<BTreeSet<String>, ProfileError>;

    /// Remove the user from the named groups and return the resulting
    /// membership. Removing a group the user is not in is a no-op. Subject to
    /// the same lost-update race as [`add_groups`](Self::add_groups).
    async fn remove_groups(
        &self,
        user: &UserRecord,
        groups: &[String],
    ) -> Result<BTreeSet<String>, ProfileError>;

    /// List the members of a group. An unknown group is an empty list.
    async fn get_group(
        &self,
        group: &str,
        query: &ListQuery,
    ) -> Result<Vec<UserRecord>, ProfileError>;

    /// Partially update recognized fields on the user's record. A
    /// `subscribed` entry applies to the current application's subscription
    /// flag; unrecognized keys fail loudly.
    async fn set_details(
        &self,
        user: &UserRecord,
        details: DetailsMap,
    ) -> Result<UserRecord, ProfileError>;

    /// Store a key/value preference for the user. Always appends; there is no
    /// update in place.
    async fn set_user_data(
        &self,
        user: &UserRecord,
        key: &str,
        value: serde_json::Value,
    ) -> Result<PreferenceRecord, ProfileError>;

    /// Fetch the user's preferences (unpaginated), optionally filtered by key.
    async fn get_user_data(
        &self,
        user: &UserRecord,
        key: Option<&str>,
    ) -> Result<Vec<PreferenceRecord>, ProfileError>;

    /// Delete a preference by id.
    async fn delete_user_data(&self, id: &str) -> Result<(), ProfileError>;

    /// Trigger a password-reset notification for the user.
    async fn reset_password(&self, user: &UserRecord) -> Result<(), ProfileError>;

    /// Look up a user by email via the listing endpoint.
    ///
    /// Emails are expected to be unique but the server may hold duplicates;
    /// more than one match raises [`ProfileError::EmailNotUnique`].
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, ProfileError> {
        let result = self.list(&ListQuery::by_email(email)).await?;
        match result.meta.total_count {
            0 => Ok(None),
            1 => Ok(result.objects.into_iter().next()),
            _ => Err(ProfileError::EmailNotUnique {
                email: email.to_string(),
            }),
        }
    }

    /// Ensure a user with this record's email exists on the profile server,
    /// used at account-creation time.
    ///
    /// An existing user is subscribed and their stored names are copied onto
    /// the returned record; a missing user is registered. Either way the
    /// returned record carries the server-assigned username: identity for a
    /// connected user is delegated entirely to the profile server.
    async fn connect(&self, user: &UserRecord) -> Result<UserRecord, ProfileError> {
        let mut local = user.clone();

        let details = if local.username.is_empty() {
            let found = self.find_by_email(&local.email).await?;
            if let Some(found) = &found {
                local.username = found.username.clone();
            }
            found
        } else {
            self.find_by_username(&local.username).await?
        };

        let details = match details {
            Some(details) => {
                self.subscribe(&local).await?;
                local.first_name = details.first_name.clone();
                local.last_name = details.last_name.clone();
                details
            }
            None => self.register(&local).await?,
        };

        local.username = details.username;
        Ok(local)
    }

    /// Add the user to a single group.
    async fn add_group(
        &self,
        user: &UserRecord,
        group: &str,
    ) -> Result<BTreeSet<String>, ProfileError> {
        self.add_groups(user, &[group.to_string()]).await
    }

    /// Remove the user from a single group.
    async fn remove_group(
        &self,
        user: &UserRecord,
        group: &str,
    ) -> Result<BTreeSet<String>, ProfileError> {
        self.remove_groups(user, &[group.to_string()]).await
    }
}
