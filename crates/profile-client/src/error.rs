//! Error taxonomy for profile server interactions.

use thiserror::Error;

/// Everything a profile service operation can fail with.
///
/// The real client and [`FakeProfileServer`](crate::FakeProfileServer) raise
/// the same variants for the same conditions, so error-handling paths are
/// exercised identically under test. No operation retries automatically:
/// idempotency of PATCH/POST against this API is not guaranteed, so retry
/// policy belongs to the caller.
#[derive(Debug, Error)]
pub enum ProfileError {
    /// The server answered with a 4xx/5xx status; the body is kept verbatim
    /// for diagnostics.
    #[error("profile server failure: {status}: {body}")]
    Service { status: u16, body: String },

    /// More than one account shares this email.
    #[error("email {email} is not unique on the profile server")]
    EmailNotUnique { email: String },

    /// The operation needs a registered user that does not exist.
    #[error("unknown user: {username}")]
    UnknownUser { username: String },

    /// Network-level failure; the request never produced a server response.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// The body arrived but did not decode as the expected shape.
    #[error("failed to decode profile server response: {message}")]
    Decode { message: String },

    /// Caller programming error: an unrecognized query parameter, sort field
    /// or details key. Raised loudly rather than silently ignored.
    #[error("invalid query: {message}")]
    InvalidQuery { message: String },

    /// The client could not be constructed from the given configuration.
    #[error("invalid configuration: {message}")]
    Config { message: String },
}

impl ProfileError {
    /// A 400-shaped failure carrying a JSON body in the same format the real
    /// server uses for validation errors.
    pub(crate) fn validation(body: &serde_json::Value) -> Self {
        Self::Service {
            status: 400,
            body: body.to_string(),
        }
    }
}

impl From<reqwest::Error> for ProfileError {
    fn from(error: reqwest::Error) -> Self {
        Self::Transport {
            message: error.to_string(),
        }
    }
}
