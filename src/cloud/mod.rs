//! Control-plane interaction module
//!
//! # Module Structure
//!
//! - [`api`] - The [`CloudApi`] contract the engine depends on
//! - [`auth`] - IAM token credentials
//! - [`client`] - REST implementation of [`CloudApi`]
//! - [`http`] - HTTP utilities for REST API calls
//!
//! # Example
//!
//! ```ignore
//! use cloudmend::cloud::{Credentials, RestClient};
//!
//! fn example() -> anyhow::Result<RestClient> {
//!     RestClient::new(Credentials::from_env()?, "my-project", "cn-north-4")
//! }
//! ```

pub mod api;
pub mod auth;
pub mod client;
pub mod http;

pub use api::{CloudApi, Page};
pub use auth::Credentials;
pub use client::RestClient;
pub use http::format_api_error;
