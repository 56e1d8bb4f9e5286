//! Remediation actions
//!
//! An [`ActionSpec`] names an action and carries its parameters. The
//! [`ActionRegistry`] maps names to [`Action`] implementations; it is built
//! once and handed to the runner, so tests and concurrent runs can use
//! different registries.
//!
//! # Architecture
//!
//! - [`schema`] - Validates action parameters against the action's JSON Schema
//! - [`executor`] - Runs one action over a matched set, batching and isolating failures
//! - [`builtin`] - Alarm rule and topic actions

pub mod builtin;
pub mod executor;
pub mod schema;

use crate::cloud::CloudApi;
use crate::error::ActionError;
use crate::resource::{ResourceDef, ResourceRegistry};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub use executor::{skip_all, ExecuteOptions, Executor};

/// Action name plus its parameters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionSpec {
    #[serde(rename = "type")]
    pub name: String,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl ActionSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            params: Map::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::String(name) => Ok(Self::new(&name)),
            Value::Object(mut params) => match params.remove("type") {
                Some(Value::String(name)) => Ok(Self { name, params }),
                _ => Err("action needs a string 'type'".to_string()),
            },
            other => Err(format!("action must be a name or a mapping, got {}", other)),
        }
    }
}

impl<'de> Deserialize<'de> for ActionSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        ActionSpec::from_value(Value::deserialize(deserializer)?).map_err(serde::de::Error::custom)
    }
}

/// How an action groups matched resources into remote calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// One call covers up to `max_size` identities
    Batch { max_size: usize },
    /// One call per resource
    PerResource,
}

/// Category of a failed action result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Parameters rejected before any call
    Schema,
    /// The remote call failed
    Remote,
    /// The call could not be built for this resource
    Invalid,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Schema => "schema",
            ErrorKind::Remote => "remote",
            ErrorKind::Invalid => "invalid",
        };
        f.write_str(s)
    }
}

/// Outcome of one action on one resource
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ActionOutcome {
    Succeeded { response: Value },
    Failed { kind: ErrorKind, message: String },
    Skipped { reason: String },
}

impl ActionOutcome {
    pub fn skipped(reason: &str) -> Self {
        ActionOutcome::Skipped {
            reason: reason.to_string(),
        }
    }

    pub fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        ActionOutcome::Failed {
            kind,
            message: message.into(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ActionOutcome::Failed { .. })
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self, ActionOutcome::Succeeded { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            ActionOutcome::Succeeded { .. } => "succeeded",
            ActionOutcome::Failed { .. } => "failed",
            ActionOutcome::Skipped { .. } => "skipped",
        }
    }
}

impl From<ActionError> for ActionOutcome {
    fn from(err: ActionError) -> Self {
        match err {
            ActionError::Remote(e) => ActionOutcome::failed(ErrorKind::Remote, e.to_string()),
            ActionError::Invalid(message) => ActionOutcome::failed(ErrorKind::Invalid, message),
        }
    }
}

/// Per-resource result of an action
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionResult {
    pub action: String,
    pub resource_id: String,
    #[serde(flatten)]
    pub outcome: ActionOutcome,
}

/// Everything an action may touch while processing
pub struct ActionContext<'a> {
    pub api: &'a dyn CloudApi,
    /// Definition of the resources being remediated
    pub resource: &'a ResourceDef,
    /// All known definitions, for actions that target another resource type
    pub resources: &'a ResourceRegistry,
    pub params: &'a Map<String, Value>,
    pub policy: &'a str,
}

impl ActionContext<'_> {
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }

    /// Identities of `records` under the current resource's id field
    pub fn ids(&self, records: &[&Value]) -> Vec<String> {
        records
            .iter()
            .filter_map(|r| crate::resource::identity(r, &self.resource.id_field))
            .collect()
    }
}

/// A remediation operation
#[async_trait]
pub trait Action: Send + Sync {
    fn name(&self) -> &str;

    /// JSON Schema of the parameter mapping
    fn schema(&self) -> Value;

    fn mode(&self) -> ExecutionMode;

    /// Remediate `records`: one record in per-resource mode, up to the batch
    /// size in batch mode. Must be safe to re-run.
    async fn process(
        &self,
        ctx: &ActionContext<'_>,
        records: &[&Value],
    ) -> Result<Value, ActionError>;
}

/// Name to implementation mapping
#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in action
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for action in builtin::all() {
            registry.register(action);
        }
        registry
    }

    /// Add `action`, replacing any action of the same name
    pub fn register(&mut self, action: Arc<dyn Action>) {
        self.actions.insert(action.name().to_string(), action);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.actions.keys().map(String::as_str).collect();
        names.sort();
        names
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.names())
            .finish()
    }
}
