//! REST control-plane client
//!
//! Maps the abstract [`CloudApi`] operations onto REST calls using the routes
//! declared in each [`ResourceDef`].

use super::api::{CloudApi, Page};
use super::auth::Credentials;
use super::http::{CallSite, HttpClient};
use crate::error::{RemoteErrorKind, RemoteServiceError};
use crate::resource::{OperationDef, Pagination, ResourceDef};
use anyhow::Result;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use url::Url;

/// Main REST client
#[derive(Clone)]
pub struct RestClient {
    credentials: Credentials,
    http: HttpClient,
    pub project_id: String,
    pub region: String,
    /// Per-service endpoint overrides
    endpoints: HashMap<String, String>,
    /// Endpoint used for every service without an explicit override
    default_endpoint: Option<String>,
}

impl RestClient {
    /// Create a new client for one project and region
    pub fn new(credentials: Credentials, project_id: &str, region: &str) -> Result<Self> {
        Ok(Self {
            credentials,
            http: HttpClient::new()?,
            project_id: project_id.to_string(),
            region: region.to_string(),
            endpoints: HashMap::new(),
            default_endpoint: None,
        })
    }

    /// Route one service to a specific endpoint
    pub fn with_endpoint(mut self, service: &str, endpoint: &str) -> Self {
        self.endpoints
            .insert(service.to_string(), endpoint.trim_end_matches('/').to_string());
        self
    }

    /// Route every service without an override to `endpoint`
    pub fn with_default_endpoint(mut self, endpoint: &str) -> Self {
        self.default_endpoint = Some(endpoint.trim_end_matches('/').to_string());
        self
    }

    // =========================================================================
    // URL helpers
    // =========================================================================

    /// Base URL of a service
    pub fn service_url(&self, service: &str) -> String {
        if let Some(endpoint) = self.endpoints.get(service) {
            return endpoint.clone();
        }
        if let Some(endpoint) = &self.default_endpoint {
            return endpoint.clone();
        }
        format!("https://{}.{}.myhuaweicloud.com", service, self.region)
    }

    /// Project-scoped URL of a path under a resource's service
    pub fn resource_url(&self, resource: &ResourceDef, path: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.service_url(&resource.service),
            resource.api_version,
            self.project_id,
            path.trim_start_matches('/')
        )
    }

    fn operation_url(&self, resource: &ResourceDef, op: &OperationDef, id: Option<&str>) -> String {
        let path = match id {
            Some(id) => op.path.replace("{id}", &urlencoding::encode(id)),
            None => op.path.clone(),
        };
        self.resource_url(resource, &path)
    }

    fn list_url(
        &self,
        resource: &ResourceDef,
        cursor: Option<&str>,
    ) -> Result<Url, RemoteServiceError> {
        let site = CallSite {
            service: &resource.service,
            operation: "list",
        };
        let mut url = Url::parse(&self.resource_url(resource, &resource.list_path)).map_err(|e| {
            RemoteServiceError::new(
                site.service,
                site.operation,
                RemoteErrorKind::Transport,
                format!("Invalid URL: {}", e),
            )
        })?;

        let mut pairs: Vec<(String, String)> = Vec::new();
        if let Value::Object(params) = &resource.params {
            for (key, value) in params {
                match value {
                    Value::Array(values) => {
                        for v in values {
                            pairs.push((key.clone(), query_value(v)));
                        }
                    }
                    Value::Null => {}
                    other => pairs.push((key.clone(), query_value(other))),
                }
            }
        }

        match &resource.pagination {
            Pagination::None => {}
            Pagination::Offset {
                limit,
                offset_param,
                ..
            } => {
                pairs.push(("limit".to_string(), limit.to_string()));
                pairs.push((offset_param.clone(), cursor.unwrap_or("0").to_string()));
            }
            Pagination::Marker {
                limit,
                marker_param,
                ..
            } => {
                pairs.push(("limit".to_string(), limit.to_string()));
                if let Some(marker) = cursor {
                    pairs.push((marker_param.clone(), marker.to_string()));
                }
            }
        }

        if !pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(pairs);
        }
        Ok(url)
    }

    async fn call(
        &self,
        resource: &ResourceDef,
        operation: &str,
        id: Option<&str>,
        body: Option<&Value>,
    ) -> Result<Value, RemoteServiceError> {
        let Some(op) = resource.operation(operation) else {
            return Err(RemoteServiceError::unsupported(&resource.service, operation));
        };
        let site = CallSite {
            service: &resource.service,
            operation,
        };
        let method = Method::from_bytes(op.method.to_uppercase().as_bytes()).map_err(|_| {
            RemoteServiceError::new(
                site.service,
                operation,
                RemoteErrorKind::Unsupported,
                format!("Unknown HTTP method: {}", op.method),
            )
        })?;
        let url = self.operation_url(resource, op, id);
        self.http
            .send(site, method, &url, self.credentials.token(), body)
            .await
    }
}

#[async_trait]
impl CloudApi for RestClient {
    async fn list_page(
        &self,
        resource: &ResourceDef,
        cursor: Option<&str>,
    ) -> Result<Page, RemoteServiceError> {
        let url = self.list_url(resource, cursor)?;
        let site = CallSite {
            service: &resource.service,
            operation: "list",
        };
        let response = self
            .http
            .send(site, Method::GET, url.as_str(), self.credentials.token(), None)
            .await?;

        let decode_error = |message: String| {
            RemoteServiceError::new(site.service, site.operation, RemoteErrorKind::Decode, message)
        };
        let items = extract_items(&response, &resource.response_path).map_err(decode_error)?;
        let next = next_cursor(resource, &response, &items, cursor).map_err(decode_error)?;

        Ok(Page::new(items, next))
    }

    async fn delete_batch(
        &self,
        resource: &ResourceDef,
        ids: &[String],
    ) -> Result<Value, RemoteServiceError> {
        let ids_field = resource
            .operation("delete-batch")
            .and_then(|op| op.ids_field.clone())
            .unwrap_or_else(|| "ids".to_string());
        let mut body = Map::new();
        body.insert(ids_field, json!(ids));
        self.call(resource, "delete-batch", None, Some(&Value::Object(body)))
            .await
    }

    async fn enable_batch(
        &self,
        resource: &ResourceDef,
        ids: &[String],
        enabled: bool,
    ) -> Result<Value, RemoteServiceError> {
        let op = resource.operation("enable-batch");
        let ids_field = op
            .and_then(|op| op.ids_field.clone())
            .unwrap_or_else(|| "ids".to_string());
        let flag_field = op
            .and_then(|op| op.flag_field.clone())
            .unwrap_or_else(|| "enabled".to_string());

        let mut body = Map::new();
        body.insert(ids_field, json!(ids));
        body.insert(flag_field, Value::Bool(enabled));
        self.call(resource, "enable-batch", None, Some(&Value::Object(body)))
            .await
    }

    async fn update(
        &self,
        resource: &ResourceDef,
        operation: &str,
        id: &str,
        body: &Value,
    ) -> Result<Value, RemoteServiceError> {
        self.call(resource, operation, Some(id), Some(body)).await
    }

    async fn create(
        &self,
        resource: &ResourceDef,
        body: &Value,
    ) -> Result<Value, RemoteServiceError> {
        self.call(resource, "create", None, Some(body)).await
    }

    async fn publish(
        &self,
        resource: &ResourceDef,
        topic_id: &str,
        subject: &str,
        message: &str,
    ) -> Result<Value, RemoteServiceError> {
        let body = json!({ "subject": subject, "message": message });
        self.call(resource, "publish", Some(topic_id), Some(&body))
            .await
    }
}

fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Follow a dot-separated path through nested objects
fn value_at<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, part| current.get(part))
}

/// Extract items from response using the response_path.
///
/// An empty body is an empty page. A body without an array at `path` is an
/// error, so a malformed page can never end a fetch early.
fn extract_items(response: &Value, path: &str) -> Result<Vec<Value>, String> {
    if response.is_null() {
        return Ok(Vec::new());
    }
    match value_at(response, path) {
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(_) => Err(format!("'{}' in list response is not an array", display_path(path))),
        None => Err(format!("List response has no '{}'", display_path(path))),
    }
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "<body>"
    } else {
        path
    }
}

/// Compute the continuation cursor for a page
fn next_cursor(
    resource: &ResourceDef,
    response: &Value,
    items: &[Value],
    cursor: Option<&str>,
) -> Result<Option<String>, String> {
    match &resource.pagination {
        Pagination::None => Ok(None),
        Pagination::Offset {
            limit, total_field, ..
        } => {
            let offset = match cursor {
                Some(c) => c
                    .parse::<usize>()
                    .map_err(|_| format!("Invalid offset cursor: {}", c))?,
                None => 0,
            };
            if items.is_empty() {
                return Ok(None);
            }
            let next = offset + items.len();
            let total = total_field
                .as_deref()
                .and_then(|field| value_at(response, field))
                .and_then(|v| v.as_u64());
            let more = match total {
                Some(total) => (next as u64) < total,
                None => items.len() >= *limit,
            };
            Ok(more.then(|| next.to_string()))
        }
        Pagination::Marker {
            limit, next_field, ..
        } => {
            if let Some(field) = next_field {
                return Ok(value_at(response, field)
                    .and_then(|v| v.as_str())
                    .filter(|s| !s.is_empty())
                    .map(|s| s.to_string()));
            }
            if items.len() < *limit {
                return Ok(None);
            }
            Ok(items
                .last()
                .and_then(|item| item.get(&resource.id_field))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()))
        }
    }
}
