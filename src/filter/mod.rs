//! Filter evaluation
//!
//! A policy's filters form a tree of [`FilterNode`]s. Before evaluation the
//! tree is compiled into a [`Matcher`]: key paths and patterns are parsed once
//! and every [`MissingFilter`] is replaced by the identity set its nested
//! policy produced. Matching is then a pure, synchronous walk.
//!
//! Evaluation never fails. A leaf that cannot be evaluated (bad path, type
//! mismatch, bad pattern) is a non-match; `and`, `or` and `not` compose the
//! leaf results as plain booleans.

pub mod path;
pub mod value;

use crate::policy::PolicySpec;
use crate::resource::identity;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

pub use path::KeyPath;
pub use value::{Op, ValueFilter, ValueMatcher, ValueType};

/// Why a leaf could not be evaluated. Always resolved to a non-match.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationFault {
    #[error("malformed key path '{path}': {reason}")]
    MalformedPath { path: String, reason: String },

    #[error("cannot compare {actual} with {expected}")]
    TypeMismatch {
        actual: &'static str,
        expected: &'static str,
    },

    #[error("operator '{op}' cannot use a {found} value")]
    BadOperand { op: String, found: &'static str },

    #[error("invalid regex '{pattern}': {reason}")]
    InvalidRegex { pattern: String, reason: String },
}

/// Match a parent record when elements of a list field satisfy nested filters
#[derive(Debug, Clone, PartialEq)]
pub struct ListItemFilter {
    pub key: String,
    /// Every attribute filter must hold for the same element
    pub attrs: Vec<FilterNode>,
    /// Compare the number of matching elements instead of asking for any
    pub count: Option<(Op, usize)>,
}

/// Match records whose identity is absent from a nested policy's result
#[derive(Debug, Clone, PartialEq)]
pub struct MissingFilter {
    pub policy: PolicySpec,
}

/// Alarm rules watching one of `namespaces` with a policy on one of `metric_names`
#[derive(Debug, Clone, PartialEq)]
pub struct NamespaceMetricFilter {
    pub namespaces: Vec<String>,
    pub metric_names: Vec<String>,
}

impl NamespaceMetricFilter {
    fn desugar(&self) -> FilterNode {
        FilterNode::And(vec![
            FilterNode::Value(ValueFilter::new(
                "namespace",
                Op::In,
                Some(Value::from(self.namespaces.clone())),
            )),
            FilterNode::ListItem(ListItemFilter {
                key: "policies".to_string(),
                attrs: vec![FilterNode::Value(ValueFilter::new(
                    "metric_name",
                    Op::In,
                    Some(Value::from(self.metric_names.clone())),
                ))],
                count: None,
            }),
        ])
    }
}

const FILTER_TYPES: &[&str] = &["value", "list-item", "missing", "alarm-namespace-metric"];

/// Declarative filter tree
#[derive(Debug, Clone, PartialEq)]
pub enum FilterNode {
    Value(ValueFilter),
    ListItem(ListItemFilter),
    Missing(Box<MissingFilter>),
    NamespaceMetric(NamespaceMetricFilter),
    And(Vec<FilterNode>),
    Or(Vec<FilterNode>),
    Not(Box<FilterNode>),
}

impl FilterNode {
    pub fn not(node: FilterNode) -> Self {
        FilterNode::Not(Box::new(node))
    }

    pub fn missing(policy: PolicySpec) -> Self {
        FilterNode::Missing(Box::new(MissingFilter { policy }))
    }

    /// Every missing filter in the tree, in pre-order
    pub fn missing_filters(&self) -> Vec<&MissingFilter> {
        let mut found = Vec::new();
        self.collect_missing(&mut found);
        found
    }

    fn collect_missing<'a>(&'a self, found: &mut Vec<&'a MissingFilter>) {
        match self {
            FilterNode::Missing(missing) => found.push(missing),
            FilterNode::And(children) | FilterNode::Or(children) => {
                for child in children {
                    child.collect_missing(found);
                }
            }
            FilterNode::Not(child) => child.collect_missing(found),
            FilterNode::Value(_) | FilterNode::ListItem(_) | FilterNode::NamespaceMetric(_) => {}
        }
    }

    /// Problems that make leaves of this tree always evaluate to a non-match
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        self.collect_problems(&mut problems);
        problems
    }

    fn collect_problems(&self, problems: &mut Vec<String>) {
        match self {
            FilterNode::Value(filter) => {
                if let Err(fault) = KeyPath::parse(&filter.key) {
                    problems.push(fault.to_string());
                }
                if filter.op == Op::Regex {
                    if let Some(Err(e)) = filter
                        .value
                        .as_ref()
                        .and_then(|v| v.as_str())
                        .map(regex::Regex::new)
                    {
                        problems.push(format!("invalid regex in '{}': {}", filter.key, e));
                    }
                }
            }
            FilterNode::ListItem(filter) => {
                if let Err(fault) = KeyPath::parse(&filter.key) {
                    problems.push(fault.to_string());
                }
                for attr in &filter.attrs {
                    attr.collect_problems(problems);
                }
            }
            FilterNode::Missing(missing) => {
                for filter in &missing.policy.filters {
                    filter.collect_problems(problems);
                }
            }
            FilterNode::NamespaceMetric(_) => {}
            FilterNode::And(children) | FilterNode::Or(children) => {
                for child in children {
                    child.collect_problems(problems);
                }
            }
            FilterNode::Not(child) => child.collect_problems(problems),
        }
    }

    /// Parse the policy-document form of a filter
    pub fn from_value(value: &Value) -> Result<Self, String> {
        let Value::Object(map) = value else {
            return Err(format!("filter must be a mapping, got {}", value));
        };

        if let Some((key, inner)) = map.iter().next().filter(|_| map.len() == 1) {
            match key.as_str() {
                "and" => return Ok(FilterNode::And(parse_list(inner)?)),
                "or" => return Ok(FilterNode::Or(parse_list(inner)?)),
                "not" => {
                    let child = match inner {
                        Value::Array(_) => {
                            let mut children = parse_list(inner)?;
                            if children.len() == 1 {
                                children.remove(0)
                            } else {
                                FilterNode::And(children)
                            }
                        }
                        other => FilterNode::from_value(other)?,
                    };
                    return Ok(FilterNode::not(child));
                }
                "type" if inner.as_str().is_some_and(|t| FILTER_TYPES.contains(&t)) => {}
                "key" => {}
                // c7n shorthand: {field: value}
                field => {
                    return Ok(FilterNode::Value(ValueFilter::new(
                        field,
                        Op::implied_by(inner),
                        Some(inner.clone()),
                    )))
                }
            }
        }

        match map.get("type").and_then(|t| t.as_str()) {
            Some("value") => parse_value_filter(map).map(FilterNode::Value),
            None if map.contains_key("key") => parse_value_filter(map).map(FilterNode::Value),
            Some("list-item") => parse_list_item(map).map(FilterNode::ListItem),
            Some("missing") => {
                let policy = map
                    .get("policy")
                    .ok_or("missing filter needs a 'policy'")?;
                let policy = PolicySpec::deserialize(policy)
                    .map_err(|e| format!("invalid nested policy: {}", e))?;
                Ok(FilterNode::missing(policy))
            }
            Some("alarm-namespace-metric") => Ok(FilterNode::NamespaceMetric(NamespaceMetricFilter {
                namespaces: string_list(map, "namespaces")?,
                metric_names: string_list(map, "metric_names")?,
            })),
            Some(other) => Err(format!("unknown filter type '{}'", other)),
            None => Err("filter needs a 'type' or a 'key'".to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for FilterNode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        FilterNode::from_value(&value).map_err(serde::de::Error::custom)
    }
}

fn parse_list(value: &Value) -> Result<Vec<FilterNode>, String> {
    let Value::Array(items) = value else {
        return Err("expected a list of filters".to_string());
    };
    items.iter().map(FilterNode::from_value).collect()
}

fn parse_value_filter(map: &Map<String, Value>) -> Result<ValueFilter, String> {
    let key = map
        .get("key")
        .and_then(|k| k.as_str())
        .ok_or("value filter needs a string 'key'")?;
    let value = map.get("value").cloned();

    let op = match map.get("op") {
        Some(Value::String(op)) => op.parse::<Op>()?,
        Some(other) => return Err(format!("'op' must be a string, got {}", other)),
        None => value.as_ref().map(Op::implied_by).unwrap_or(Op::Present),
    };
    if op.needs_value() && value.is_none() {
        return Err(format!("operator '{}' on '{}' needs a 'value'", op, key));
    }

    let value_type = match map.get("value_type") {
        Some(Value::String(t)) => Some(t.parse::<ValueType>()?),
        Some(other) => return Err(format!("'value_type' must be a string, got {}", other)),
        None => None,
    };

    Ok(ValueFilter {
        key: key.to_string(),
        op,
        value,
        value_type,
    })
}

fn parse_list_item(map: &Map<String, Value>) -> Result<ListItemFilter, String> {
    let key = map
        .get("key")
        .and_then(|k| k.as_str())
        .ok_or("list-item filter needs a string 'key'")?;
    let attrs = match map.get("attrs") {
        Some(attrs) => parse_list(attrs)?,
        None => Vec::new(),
    };
    if attrs.iter().any(|a| !a.missing_filters().is_empty()) {
        return Err("missing filters cannot be nested inside list-item".to_string());
    }

    let count = match map.get("count") {
        Some(count) => {
            let count = count
                .as_u64()
                .ok_or("list-item 'count' must be a non-negative integer")?;
            let op = match map.get("count_op").and_then(|o| o.as_str()) {
                Some(op) => op.parse::<Op>()?,
                None => Op::Eq,
            };
            Some((op, count as usize))
        }
        None => None,
    };

    Ok(ListItemFilter {
        key: key.to_string(),
        attrs,
        count,
    })
}

fn string_list(map: &Map<String, Value>, field: &str) -> Result<Vec<String>, String> {
    map.get(field)
        .and_then(|v| v.as_array())
        .ok_or_else(|| format!("'{}' must be a list of strings", field))?
        .iter()
        .map(|v| {
            v.as_str()
                .map(String::from)
                .ok_or_else(|| format!("'{}' must be a list of strings", field))
        })
        .collect()
}

/// Compiled filter tree
#[derive(Debug, Clone)]
pub enum Matcher {
    Value(ValueMatcher),
    ListItem {
        path: Result<KeyPath, EvaluationFault>,
        attrs: Vec<Matcher>,
        count: Option<(Op, usize)>,
    },
    /// Matches records whose identity is not in `matched`
    Missing {
        id_field: String,
        matched: Arc<HashSet<String>>,
    },
    /// A missing filter compiled without its nested result
    Unresolved,
    And(Vec<Matcher>),
    Or(Vec<Matcher>),
    Not(Box<Matcher>),
}

impl Matcher {
    /// Compile `node`. `resolved` yields the nested identity set of each
    /// missing filter in the order of [`FilterNode::missing_filters`];
    /// `id_field` is the identity field of the records being matched.
    pub fn compile(
        node: &FilterNode,
        id_field: &str,
        resolved: &mut dyn Iterator<Item = HashSet<String>>,
    ) -> Self {
        match node {
            FilterNode::Value(filter) => Matcher::Value(ValueMatcher::compile(filter)),
            FilterNode::ListItem(filter) => Matcher::ListItem {
                path: KeyPath::parse(&filter.key),
                // Elements have no identity of their own
                attrs: filter.attrs.iter().map(Matcher::compile_static).collect(),
                count: filter.count,
            },
            FilterNode::Missing(_) => match resolved.next() {
                Some(matched) => Matcher::Missing {
                    id_field: id_field.to_string(),
                    matched: Arc::new(matched),
                },
                None => Matcher::Unresolved,
            },
            FilterNode::NamespaceMetric(filter) => {
                Matcher::compile(&filter.desugar(), id_field, resolved)
            }
            FilterNode::And(children) => Matcher::And(
                children
                    .iter()
                    .map(|child| Matcher::compile(child, id_field, resolved))
                    .collect(),
            ),
            FilterNode::Or(children) => Matcher::Or(
                children
                    .iter()
                    .map(|child| Matcher::compile(child, id_field, resolved))
                    .collect(),
            ),
            FilterNode::Not(child) => {
                Matcher::Not(Box::new(Matcher::compile(child, id_field, resolved)))
            }
        }
    }

    /// Compile a tree without nested policy results
    pub fn compile_static(node: &FilterNode) -> Self {
        Matcher::compile(node, "id", &mut std::iter::empty())
    }

    pub fn matches(&self, record: &Value) -> bool {
        match self {
            Matcher::Value(matcher) => matcher.matches(record),
            Matcher::ListItem { path, attrs, count } => {
                let Ok(path) = path else {
                    return false;
                };
                let Some(Value::Array(elements)) = path.resolve(record) else {
                    return false;
                };
                let mut matching = elements
                    .iter()
                    .filter(|element| attrs.iter().all(|attr| attr.matches(element)));
                match count {
                    Some((op, expected)) => op.compare_counts(matching.count(), *expected),
                    None => matching.next().is_some(),
                }
            }
            Matcher::Missing { id_field, matched } => match identity(record, id_field) {
                Some(id) => !matched.contains(&id),
                None => false,
            },
            Matcher::Unresolved => false,
            Matcher::And(children) => children.iter().all(|child| child.matches(record)),
            Matcher::Or(children) => children.iter().any(|child| child.matches(record)),
            Matcher::Not(child) => !child.matches(record),
        }
    }

    /// Keep matching records, preserving order
    pub fn filter(&self, records: &[Value]) -> Vec<Value> {
        records
            .iter()
            .filter(|record| self.matches(record))
            .cloned()
            .collect()
    }

    /// Split records into (matched, excluded), preserving order in both
    pub fn partition(&self, records: Vec<Value>) -> (Vec<Value>, Vec<Value>) {
        records.into_iter().partition(|record| self.matches(record))
    }
}

/// Evaluate a filter tree against one record
pub fn evaluate(node: &FilterNode, record: &Value) -> bool {
    Matcher::compile_static(node).matches(record)
}

/// Stable filter of `records` by `node`
pub fn filter(records: &[Value], node: &FilterNode) -> Vec<Value> {
    Matcher::compile_static(node).filter(records)
}
