//! Control-plane API contract
//!
//! The engine only talks to the cloud through [`CloudApi`]. [`RestClient`]
//! implements it over HTTP; tests implement it in memory.
//!
//! [`RestClient`]: super::client::RestClient

use crate::error::RemoteServiceError;
use crate::resource::ResourceDef;
use async_trait::async_trait;
use serde_json::Value;

/// One page of a list response
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<Value>,
    /// Continuation cursor; `None` or empty ends the stream
    pub cursor: Option<String>,
}

impl Page {
    pub fn new(items: Vec<Value>, cursor: Option<String>) -> Self {
        Self { items, cursor }
    }

    /// Last page: no continuation
    pub fn last(items: Vec<Value>) -> Self {
        Self {
            items,
            cursor: None,
        }
    }

    pub fn next_cursor(&self) -> Option<&str> {
        self.cursor.as_deref().filter(|c| !c.is_empty())
    }
}

/// Remote control plane. Implementations must be safe for concurrent use.
#[async_trait]
pub trait CloudApi: Send + Sync {
    /// List one page of `resource`, continuing from `cursor`
    async fn list_page(
        &self,
        resource: &ResourceDef,
        cursor: Option<&str>,
    ) -> Result<Page, RemoteServiceError>;

    /// Delete many resources in one call
    async fn delete_batch(
        &self,
        resource: &ResourceDef,
        ids: &[String],
    ) -> Result<Value, RemoteServiceError>;

    /// Enable or disable many resources in one call
    async fn enable_batch(
        &self,
        resource: &ResourceDef,
        ids: &[String],
        enabled: bool,
    ) -> Result<Value, RemoteServiceError>;

    /// Apply a named update operation to one resource
    async fn update(
        &self,
        resource: &ResourceDef,
        operation: &str,
        id: &str,
        body: &Value,
    ) -> Result<Value, RemoteServiceError>;

    /// Create a new resource of type `resource`
    async fn create(&self, resource: &ResourceDef, body: &Value)
        -> Result<Value, RemoteServiceError>;

    /// Publish a message to the topic `topic_id` of type `resource`
    async fn publish(
        &self,
        resource: &ResourceDef,
        topic_id: &str,
        subject: &str,
        message: &str,
    ) -> Result<Value, RemoteServiceError>;
}
