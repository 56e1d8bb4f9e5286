//! Resource abstraction layer
//!
//! Resource types are described by data, not code. Each definition names the
//! service, the list route, how pages continue, where the identity lives, and
//! the routes of the mutating operations actions may call.
//!
//! # Architecture
//!
//! - [`registry`] - Loads resource definitions from embedded JSON
//! - [`fetcher`] - Enumerates a resource collection with pagination
//!
//! # Resource Definitions
//!
//! Resources are defined in JSON files under `src/resources/`:
//! - `ces.json` - Cloud Eye alarm rules
//! - `smn.json` - Simple Message Notification topics
//!
//! # Example
//!
//! ```ignore
//! use cloudmend::resource::{fetch_all, ResourceRegistry};
//!
//! async fn list_alarms(api: &dyn CloudApi) -> anyhow::Result<Vec<serde_json::Value>> {
//!     let registry = ResourceRegistry::builtin()?;
//!     let alarm = registry.get("alarm").unwrap();
//!     Ok(fetch_all(api, alarm, &CancellationToken::new()).await?)
//! }
//! ```

mod fetcher;
mod registry;

pub use fetcher::{fetch_all, identity};
pub use registry::*;
