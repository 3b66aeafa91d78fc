//! REST client for the profile server v2 API.

use std::collections::BTreeSet;

use async_trait::async_trait;
use reqwest::{Certificate, StatusCode};
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::ProfileServerConfig;
use crate::error::ProfileError;
use crate::service::ProfileService;
use crate::types::{
    DetailsMap, GroupMembers, ListQuery, ListResult, PreferenceRecord, RECOGNIZED_FIELDS,
    UserRecord,
};

pub const USER_LIST_PATH: &str = "/api/v2/user/";
pub const PREFERENCE_LIST_PATH: &str = "/api/v2/user-preference/";

#[must_use]
pub fn user_path(username: &str) -> String {
    format!("/api/v2/user/{username}/")
}

#[must_use]
pub fn group_path(group: &str) -> String {
    format!("/api/v2/group/{group}/")
}

#[must_use]
pub fn reset_password_path(username: &str) -> String {
    format!("/api/v2/user/{username}/reset-password/")
}

#[must_use]
pub fn preferences_path(username: &str) -> String {
    format!("/api/v2/user/{username}/preferences/")
}

#[must_use]
pub fn preference_path(id: &str) -> String {
    format!("/api/v2/user-preference/{id}/")
}

/// HTTP client for the profile server.
///
/// Every request authenticates with HTTP basic auth using the configured
/// key/secret; TLS verification can be pinned to a PEM trust anchor. Each
/// operation awaits a single request to completion, with no caching and no
/// automatic retries.
#[derive(Debug, Clone)]
pub struct ProfileServerClient {
    config: ProfileServerConfig,
    http: reqwest::Client,
    /// Template name sent with register requests, when the server should use
    /// a non-default welcome email.
    pub register_email_template: Option<String>,
    pub register_email_subject: Option<String>,
}

#[derive(Serialize)]
struct RegisterBody<'a> {
    email: &'a str,
    first_name: &'a str,
    last_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email_template: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email_subject: Option<&'a str>,
}

#[derive(Deserialize)]
struct PreferencePage {
    objects: Vec<PreferenceRecord>,
}

impl ProfileServerClient {
    pub fn new(config: ProfileServerConfig) -> Result<Self, ProfileError> {
        let mut builder = reqwest::Client::builder();
        if let Some(path) = &config.ca_file {
            let pem = std::fs::read(path).map_err(|error| ProfileError::Config {
                message: format!("cannot read CA file {}: {error}", path.display()),
            })?;
            let certificate = Certificate::from_pem(&pem).map_err(|error| ProfileError::Config {
                message: format!("invalid CA file {}: {error}", path.display()),
            })?;
            builder = builder.add_root_certificate(certificate);
        }
        let http = builder.build().map_err(|error| ProfileError::Config {
            message: error.to_string(),
        })?;

        Ok(Self {
            config,
            http,
            register_email_template: None,
            register_email_subject: None,
        })
    }

    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.endpoint(path))
            .basic_auth(&self.config.key, Some(&self.config.secret))
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.request(reqwest::Method::GET, path)
    }

    fn patch(&self, path: &str) -> reqwest::RequestBuilder {
        self.request(reqwest::Method::PATCH, path)
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.request(reqwest::Method::POST, path)
    }

    async fn set_subscription(&self, user: &UserRecord, status: bool) -> Result<(), ProfileError> {
        let response = self
            .patch(&user_path(&user.username))
            .json(&serde_json::json!({ "subscribed": status }))
            .send()
            .await?;
        expect_success(response).await
    }

    async fn patch_groups(
        &self,
        username: &str,
        groups: &BTreeSet<String>,
    ) -> Result<BTreeSet<String>, ProfileError> {
        let response = self
            .patch(&user_path(username))
            .json(&serde_json::json!({ "groups": groups }))
            .send()
            .await?;
        let updated: UserRecord = decode(response).await?;
        Ok(updated.groups)
    }

    async fn current_groups(&self, username: &str) -> Result<BTreeSet<String>, ProfileError> {
        let current = self
            .find_by_username(username)
            .await?
            .ok_or_else(|| ProfileError::UnknownUser {
                username: username.to_string(),
            })?;
        Ok(current.groups)
    }
}

#[async_trait]
impl ProfileService for ProfileServerClient {
    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, ProfileError> {
        let response = self.get(&user_path(username)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        decode(response).await.map(Some)
    }

    async fn list(&self, query: &ListQuery) -> Result<ListResult, ProfileError> {
        let response = self
            .get(USER_LIST_PATH)
            .query(&query.to_query_pairs())
            .send()
            .await?;
        decode(response).await
    }

    async fn register(&self, user: &UserRecord) -> Result<UserRecord, ProfileError> {
        let body = RegisterBody {
            email: &user.email,
            first_name: &user.first_name,
            last_name: &user.last_name,
            username: (!user.username.is_empty()).then_some(user.username.as_str()),
            email_template: self.register_email_template.as_deref(),
            email_subject: self.register_email_subject.as_deref(),
        };
        let response = self.post(USER_LIST_PATH).json(&body).send().await?;
        decode(response).await
    }

    async fn subscribe(&self, user: &UserRecord) -> Result<(), ProfileError> {
        self.set_subscription(user, true).await
    }

    async fn unsubscribe(&self, user: &UserRecord) -> Result<(), ProfileError> {
        self.set_subscription(user, false).await
    }

    async fn add_groups(
        &self,
        user: &UserRecord,
        groups: &[String],
    ) -> Result<BTreeSet<String>, ProfileError> {
        let mut merged = self.current_groups(&user.username).await?;
        merged.extend(groups.iter().cloned());
        self.patch_groups(&user.username, &merged).await
    }

    async fn remove_groups(
        &self,
        user: &UserRecord,
        groups: &[String],
    ) -> Result<BTreeSet<String>, ProfileError> {
        let current = self.current_groups(&user.username).await?;
        let remaining = current
            .into_iter()
            .filter(|group| !groups.contains(group))
            .collect();
        self.patch_groups(&user.username, &remaining).await
    }

    async fn get_group(
        &self,
        group: &str,
        query: &ListQuery,
    ) -> Result<Vec<UserRecord>, ProfileError> {
        tracing::debug!(group, "requesting group members");
        let response = self
            .get(&group_path(group))
            .query(&query.to_query_pairs())
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let members: GroupMembers = decode(response).await?;
        Ok(members.users)
    }

    async fn set_details(
        &self,
        user: &UserRecord,
        details: DetailsMap,
    ) -> Result<UserRecord, ProfileError> {
        let mut details = details;
        for key in details.keys() {
            if !RECOGNIZED_FIELDS.contains(&key.as_str()) {
                return Err(ProfileError::InvalidQuery {
                    message: format!("unrecognized details key: {key}"),
                });
            }
        }

        // If `subscribed` is not given but the subscriptions map changes the
        // current app, `subscribed` must be sent alongside it.
        if !details.contains_key("subscribed") {
            let current_app = details
                .get("subscriptions")
                .and_then(|value| value.as_object())
                .and_then(|subscriptions| subscriptions.get(self.config.app()))
                .cloned();
            if let Some(value) = current_app {
                details.insert("subscribed".to_string(), value);
            }
        }

        let response = self
            .patch(&user_path(&user.username))
            .json(&details)
            .send()
            .await?;
        decode(response).await
    }

    async fn set_user_data(
        &self,
        user: &UserRecord,
        key: &str,
        value: serde_json::Value,
    ) -> Result<PreferenceRecord, ProfileError> {
        let body = serde_json::json!({
            "user": user_path(&user.username),
            "type": key,
            "data": value,
        });
        let response = self.post(PREFERENCE_LIST_PATH).json(&body).send().await?;
        decode(response).await
    }

    async fn get_user_data(
        &self,
        user: &UserRecord,
        key: Option<&str>,
    ) -> Result<Vec<PreferenceRecord>, ProfileError> {
        let mut params = vec![("limit".to_string(), "0".to_string())];
        if let Some(key) = key {
            params.push(("type".to_string(), key.to_string()));
        }
        let response = self
            .get(&preferences_path(&user.username))
            .query(&params)
            .send()
            .await?;

        // A body that does not parse as a preference page is an empty result,
        // not an error.
        let bytes = response.bytes().await?;
        match serde_json::from_slice::<PreferencePage>(&bytes) {
            Ok(page) => Ok(page.objects),
            Err(_) => Ok(Vec::new()),
        }
    }

    async fn delete_user_data(&self, id: &str) -> Result<(), ProfileError> {
        let response = self
            .request(reqwest::Method::DELETE, &preference_path(id))
            .send()
            .await?;
        expect_success(response).await
    }

    async fn reset_password(&self, user: &UserRecord) -> Result<(), ProfileError> {
        let response = self.post(&reset_password_path(&user.username)).send().await?;
        expect_success(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ProfileError> {
    let status = response.status().as_u16();
    let bytes = response.bytes().await?;
    if (400..600).contains(&status) {
        return Err(ProfileError::Service {
            status,
            body: String::from_utf8_lossy(&bytes).trim().to_string(),
        });
    }
    serde_json::from_slice(&bytes).map_err(|error| ProfileError::Decode {
        message: error.to_string(),
    })
}

async fn expect_success(response: reqwest::Response) -> Result<(), ProfileError> {
    let status = response.status().as_u16();
    if (400..600).contains(&status) {
        let body = response.text().await.unwrap_or_default();
        return Err(ProfileError::Service {
            status,
            body: body.trim().to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ProfileServerClient {
        let config =
            ProfileServerConfig::new("https://profiles.example.com/", "app1", "secret").unwrap();
        ProfileServerClient::new(config).unwrap()
    }

    #[test]
    fn path_helpers_are_deterministic() {
        assert_eq!(user_path("sha256:abc"), "/api/v2/user/sha256:abc/");
        assert_eq!(group_path("service/1234"), "/api/v2/group/service/1234/");
        assert_eq!(
            reset_password_path("bob"),
            "/api/v2/user/bob/reset-password/"
        );
        assert_eq!(preferences_path("bob"), "/api/v2/user/bob/preferences/");
        assert_eq!(preference_path("42"), "/api/v2/user-preference/42/");
    }

    #[test]
    fn endpoint_appends_to_normalized_base() {
        assert_eq!(
            client().endpoint(USER_LIST_PATH),
            "https://profiles.example.com/api/v2/user/"
        );
    }

    #[test]
    fn register_body_omits_absent_fields() {
        let body = RegisterBody {
            email: "bob@gov.gl",
            first_name: "Bob",
            last_name: "",
            username: None,
            email_template: None,
            email_subject: None,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({
                "email": "bob@gov.gl",
                "first_name": "Bob",
                "last_name": "",
            })
        );
    }

    #[tokio::test]
    async fn set_details_rejects_unrecognized_keys() {
        let mut details = DetailsMap::new();
        details.insert("shoe_size".to_string(), serde_json::json!(43));

        let error = client()
            .set_details(&UserRecord::new("bob@gov.gl"), details)
            .await
            .unwrap_err();
        assert!(matches!(error, ProfileError::InvalidQuery { .. }));
    }
}
