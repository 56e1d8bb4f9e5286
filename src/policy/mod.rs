//! Policies
//!
//! A policy names a resource type, a list of filters (AND-combined) and a list
//! of actions. Documents hold any number of policies under `policies:`.
//!
//! ```yaml
//! policies:
//!   - name: vpc-delete-alarms
//!     resource: huaweicloud.alarm
//!     filters:
//!       - namespace: SYS.VPC
//!       - type: EVENT.SYS
//!     actions:
//!       - delete
//! ```

pub mod runner;

use crate::action::{schema, ActionRegistry, ActionSpec};
use crate::error::PolicyError;
use crate::filter::FilterNode;
use crate::resource::ResourceRegistry;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

pub use runner::{PolicyRunner, RunOptions, RunReport, Summary};

/// Whether both limits must be exceeded before a run is refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitOp {
    #[default]
    Or,
    And,
}

/// `max-resources`: a plain amount or an amount/percent pair
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum MaxResources {
    Amount(usize),
    Limits {
        #[serde(default)]
        amount: Option<usize>,
        #[serde(default)]
        percent: Option<f64>,
        #[serde(default)]
        op: LimitOp,
    },
}

/// One policy
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PolicySpec {
    /// Required at the top level; nested policies may omit it
    #[serde(default)]
    pub name: String,
    pub resource: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub filters: Vec<FilterNode>,
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
    #[serde(default, rename = "max-resources", alias = "max_resources")]
    pub max_resources: Option<MaxResources>,
    #[serde(default, rename = "max-resources-percent", alias = "max_resources_percent")]
    pub max_resources_percent: Option<f64>,
}

impl PolicySpec {
    pub fn new(name: &str, resource: &str) -> Self {
        Self {
            name: name.to_string(),
            resource: resource.to_string(),
            description: None,
            filters: Vec::new(),
            actions: Vec::new(),
            max_resources: None,
            max_resources_percent: None,
        }
    }

    pub fn with_filter(mut self, filter: FilterNode) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_action(mut self, action: ActionSpec) -> Self {
        self.actions.push(action);
        self
    }

    /// The filter list as one tree
    pub fn filter_tree(&self) -> FilterNode {
        FilterNode::And(self.filters.clone())
    }

    /// Number of missing-filter levels below this policy
    pub fn nesting_depth(&self) -> usize {
        self.filters
            .iter()
            .flat_map(|f| f.missing_filters())
            .map(|m| 1 + m.policy.nesting_depth())
            .max()
            .unwrap_or(0)
    }

    /// Refuse a run that selected too much of the population
    pub fn check_limits(&self, selected: usize, population: usize) -> Result<(), PolicyError> {
        let (amount, mut percent, op) = match &self.max_resources {
            Some(MaxResources::Amount(amount)) => (Some(*amount), None, LimitOp::Or),
            Some(MaxResources::Limits { amount, percent, op }) => (*amount, *percent, *op),
            None => (None, None, LimitOp::Or),
        };
        if self.max_resources_percent.is_some() {
            percent = self.max_resources_percent;
        }
        // A zero limit is no limit
        let amount = amount.filter(|limit| *limit > 0);
        let percent = percent.filter(|limit| *limit > 0.0);

        let amount_exceeded = amount.map(|limit| selected > limit);
        let percent_exceeded = percent
            .filter(|_| population > 0)
            .map(|limit| selected as f64 > population as f64 * limit / 100.0);

        let exceeded = match (op, amount_exceeded, percent_exceeded) {
            (LimitOp::And, Some(a), Some(p)) => a && p,
            (LimitOp::And, _, _) => false,
            (LimitOp::Or, a, p) => a.unwrap_or(false) || p.unwrap_or(false),
        };
        if !exceeded {
            return Ok(());
        }

        let limit = match (amount, percent) {
            (Some(a), Some(p)) => format!("max-resources {} / {}%", a, p),
            (Some(a), None) => format!("max-resources {}", a),
            (None, Some(p)) => format!("max-resources-percent {}%", p),
            (None, None) => String::new(),
        };
        Err(PolicyError::ResourceLimitExceeded {
            policy: self.name.clone(),
            limit,
            selected,
            population,
        })
    }

    /// Problems that would make a run of this policy fail or misbehave
    pub fn validate(
        &self,
        resources: &ResourceRegistry,
        actions: &ActionRegistry,
        max_depth: usize,
    ) -> Vec<String> {
        let mut problems = Vec::new();
        if self.name.is_empty() {
            problems.push("policy has no name".to_string());
        }
        let depth = self.nesting_depth();
        if depth > max_depth {
            problems.push(
                PolicyError::NestingTooDeep {
                    depth,
                    max: max_depth,
                }
                .to_string(),
            );
        }
        self.collect_problems(resources, actions, &mut problems);
        problems
    }

    fn collect_problems(
        &self,
        resources: &ResourceRegistry,
        actions: &ActionRegistry,
        problems: &mut Vec<String>,
    ) {
        if resources.get(&self.resource).is_none() {
            problems.push(PolicyError::UnknownResource(self.resource.clone()).to_string());
        }
        for filter in &self.filters {
            problems.extend(filter.problems());
            for missing in filter.missing_filters() {
                missing.policy.collect_problems(resources, actions, problems);
            }
        }
        for spec in &self.actions {
            match actions.get(&spec.name) {
                Some(action) => {
                    if let Err(err) = schema::validate(action.as_ref(), &spec.params) {
                        problems.push(err.to_string());
                    }
                }
                None => problems.push(format!("unknown action '{}'", spec.name)),
            }
        }
    }
}

/// A policy file
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PolicyDocument {
    pub policies: Vec<PolicySpec>,
}

impl PolicyDocument {
    pub fn from_yaml(content: &str) -> Result<Self, PolicyError> {
        let doc: Self =
            serde_yaml::from_str(content).map_err(|e| PolicyError::Document(e.to_string()))?;
        doc.check_names()?;
        Ok(doc)
    }

    pub fn from_json(content: &str) -> Result<Self, PolicyError> {
        let doc: Self =
            serde_json::from_str(content).map_err(|e| PolicyError::Document(e.to_string()))?;
        doc.check_names()?;
        Ok(doc)
    }

    /// Load a `.json` file as JSON and anything else as YAML
    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PolicyError::Document(format!("{}: {}", path.display(), e)))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content),
            _ => Self::from_yaml(&content),
        }
    }

    pub fn get(&self, name: &str) -> Option<&PolicySpec> {
        self.policies.iter().find(|p| p.name == name)
    }

    fn check_names(&self) -> Result<(), PolicyError> {
        let mut seen = HashSet::new();
        for policy in &self.policies {
            if policy.name.is_empty() {
                return Err(PolicyError::Document(format!(
                    "a policy on '{}' has no name",
                    policy.resource
                )));
            }
            if !seen.insert(policy.name.as_str()) {
                return Err(PolicyError::Document(format!(
                    "duplicate policy name '{}'",
                    policy.name
                )));
            }
        }
        Ok(())
    }
}
