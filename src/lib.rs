//! cloudmend - declarative compliance and remediation for cloud resources
//!
//! A policy names a resource type, a filter tree and a list of actions. The
//! [`policy::PolicyRunner`] fetches every resource of that type, keeps the
//! ones the filters match and applies the actions to them.
//!
//! # Module Structure
//!
//! - [`cloud`] - Control-plane API contract and its REST implementation
//! - [`resource`] - Resource definitions and paginated fetching
//! - [`filter`] - Filter trees and their evaluation
//! - [`action`] - Remediation actions and the executor
//! - [`policy`] - Policy documents and the runner
//! - [`report`] - Text and JSON rendering of run reports
//! - [`config`] - Persisted user configuration
//! - [`error`] - Error types

pub mod action;
pub mod cloud;
pub mod config;
pub mod error;
pub mod filter;
pub mod policy;
pub mod report;
pub mod resource;

/// Version injected at compile time via CLOUDMEND_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("CLOUDMEND_VERSION") {
    Some(v) => v,
    None => "dev",
};
