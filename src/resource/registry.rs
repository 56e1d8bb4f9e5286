//! Resource Registry - Load resource definitions from JSON
//!
//! Resource definitions are embedded at compile time and parsed into a
//! [`ResourceRegistry`] value that is handed to whoever needs it. Tests can
//! build their own registry from JSON without touching the built-in one.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

/// Embedded resource JSON files (compiled into the binary)
const RESOURCE_FILES: &[&str] = &[
    include_str!("../resources/ces.json"),
    include_str!("../resources/smn.json"),
];

/// Provider prefix accepted in front of resource names (`huaweicloud.alarm`)
const PROVIDER_PREFIX: &str = "huaweicloud.";

/// How a list API continues past the first page
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "style", rename_all = "lowercase")]
pub enum Pagination {
    /// Single response, no continuation
    #[default]
    None,
    /// Numeric offset; the cursor is the offset of the next page
    Offset {
        #[serde(default = "default_page_limit")]
        limit: usize,
        /// Field holding the total number of items, when the service reports it
        #[serde(default)]
        total_field: Option<String>,
        #[serde(default = "default_offset_param")]
        offset_param: String,
    },
    /// Opaque marker; the cursor is the marker of the next page
    Marker {
        #[serde(default = "default_page_limit")]
        limit: usize,
        /// Dot path of the next marker in the response. When absent the
        /// identity of the last item on a full page is used.
        #[serde(default)]
        next_field: Option<String>,
        #[serde(default = "default_marker_param")]
        marker_param: String,
    },
}

fn default_page_limit() -> usize {
    100
}

fn default_offset_param() -> String {
    "offset".to_string()
}

fn default_marker_param() -> String {
    "marker".to_string()
}

/// Route of a mutating operation
#[derive(Debug, Clone, Deserialize)]
pub struct OperationDef {
    /// HTTP method (GET, POST, PUT, DELETE)
    pub method: String,
    /// Path relative to `{endpoint}/{api_version}/{project_id}/`; `{id}` is
    /// replaced with the URL-encoded resource identity
    pub path: String,
    /// Body field carrying the identity list for batch operations
    #[serde(default)]
    pub ids_field: Option<String>,
    /// Body field carrying the boolean of enable/disable operations
    #[serde(default)]
    pub flag_field: Option<String>,
}

/// Resource definition from JSON
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceDef {
    /// Registry key, filled in on load
    #[serde(skip)]
    pub key: String,
    pub display_name: String,
    pub service: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    pub list_path: String,
    /// Dot path of the item array in a list response (empty: the body itself)
    #[serde(default)]
    pub response_path: String,
    pub id_field: String,
    pub name_field: String,
    #[serde(default)]
    pub pagination: Pagination,
    /// Extra query parameters sent with every list request
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub operations: HashMap<String, OperationDef>,
}

fn default_api_version() -> String {
    "v1".to_string()
}

impl ResourceDef {
    pub fn operation(&self, name: &str) -> Option<&OperationDef> {
        self.operations.get(name)
    }

    /// Human-readable name of a record, if it has one
    pub fn name_of<'a>(&self, record: &'a Value) -> Option<&'a str> {
        record
            .get(&self.name_field)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }
}

/// Root structure of resources/*.json
#[derive(Debug, Clone, Deserialize)]
struct ResourceFile {
    #[serde(default)]
    resources: HashMap<String, ResourceDef>,
}

/// Resource definitions keyed by resource type name
#[derive(Debug, Clone, Default)]
pub struct ResourceRegistry {
    resources: HashMap<String, ResourceDef>,
}

impl ResourceRegistry {
    /// Registry with the definitions compiled into the binary
    pub fn builtin() -> Result<Self> {
        let mut registry = Self::default();
        for content in RESOURCE_FILES {
            registry.extend_from_json(content)?;
        }
        Ok(registry)
    }

    /// Registry from a single JSON document
    pub fn from_json(content: &str) -> Result<Self> {
        let mut registry = Self::default();
        registry.extend_from_json(content)?;
        Ok(registry)
    }

    /// Merge definitions from a JSON document; later keys win
    pub fn extend_from_json(&mut self, content: &str) -> Result<()> {
        let file: ResourceFile =
            serde_json::from_str(content).context("Failed to parse resource definitions")?;
        for (key, mut def) in file.resources {
            def.key = key.clone();
            self.resources.insert(key, def);
        }
        Ok(())
    }

    /// Get a resource definition by key
    pub fn get(&self, key: &str) -> Option<&ResourceDef> {
        let key = key.strip_prefix(PROVIDER_PREFIX).unwrap_or(key);
        self.resources.get(key)
    }

    /// Get all resource keys, sorted
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.resources.keys().map(|s| s.as_str()).collect();
        keys.sort_unstable();
        keys
    }
}
