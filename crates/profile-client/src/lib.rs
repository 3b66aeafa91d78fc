//! Client library for the profile server identity service.
//!
//! The profile server is the identity service of record for users across
//! multiple applications: lookup and registration, per-application
//! subscription flags, group membership and key/value preference storage,
//! all behind a REST API.
//!
//! Two implementations of the [`ProfileService`] operation vocabulary are
//! provided: [`ProfileServerClient`], which talks HTTP to a real deployment,
//! and [`FakeProfileServer`], an in-memory stand-in with the same filtering,
//! sorting, pagination and error behavior for use in tests. Application code
//! takes a `ProfileService` handle and does not care which one it got.

pub mod client;
pub mod config;
pub mod error;
pub mod fake;
pub mod service;
pub mod sort;
pub mod types;

pub use client::ProfileServerClient;
pub use config::ProfileServerConfig;
pub use error::ProfileError;
pub use fake::FakeProfileServer;
pub use service::ProfileService;
pub use types::{
    DetailsMap, ListMeta, ListQuery, ListResult, PreferenceRecord, UserRecord, derived_username,
};
