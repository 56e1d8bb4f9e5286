//! Value filters
//!
//! Compare the value at a key path with an expected value.

use super::path::KeyPath;
use super::EvaluationFault;
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Comparison operator of a value filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    In,
    NotIn,
    Contains,
    Regex,
    Absent,
    Present,
    Empty,
    NotEmpty,
}

impl Op {
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Eq => "eq",
            Op::Ne => "ne",
            Op::Gt => "gt",
            Op::Ge => "ge",
            Op::Lt => "lt",
            Op::Le => "le",
            Op::In => "in",
            Op::NotIn => "not-in",
            Op::Contains => "contains",
            Op::Regex => "regex",
            Op::Absent => "absent",
            Op::Present => "present",
            Op::Empty => "empty",
            Op::NotEmpty => "not-empty",
        }
    }

    /// Whether the operator compares against a configured value
    pub fn needs_value(&self) -> bool {
        !matches!(self, Op::Absent | Op::Present | Op::Empty | Op::NotEmpty)
    }

    /// Operator implied by a bare `value:` when no `op:` is given
    pub fn implied_by(value: &Value) -> Op {
        match value.as_str() {
            Some("absent") => Op::Absent,
            Some("present") | Some("not-null") => Op::Present,
            Some("empty") => Op::Empty,
            _ => Op::Eq,
        }
    }

    /// Compare two counts; operators that are not orderings never hold
    pub fn compare_counts(&self, actual: usize, expected: usize) -> bool {
        match self {
            Op::Eq => actual == expected,
            Op::Ne => actual != expected,
            Op::Gt => actual > expected,
            Op::Ge => actual >= expected,
            Op::Lt => actual < expected,
            Op::Le => actual <= expected,
            _ => false,
        }
    }
}

impl FromStr for Op {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let op = match s.to_lowercase().as_str() {
            "eq" | "equal" => Op::Eq,
            "ne" | "not-equal" => Op::Ne,
            "gt" | "greater-than" => Op::Gt,
            "ge" | "gte" => Op::Ge,
            "lt" | "less-than" => Op::Lt,
            "le" | "lte" => Op::Le,
            "in" => Op::In,
            "ni" | "not-in" => Op::NotIn,
            "contains" => Op::Contains,
            "regex" => Op::Regex,
            "absent" => Op::Absent,
            "present" | "not-null" => Op::Present,
            "empty" => Op::Empty,
            "not-empty" => Op::NotEmpty,
            other => return Err(format!("unknown operator '{}'", other)),
        };
        Ok(op)
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transform applied to the resolved value before comparing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// Length of a string, array or object
    Size,
    /// Trimmed, lower-cased string
    Normalize,
}

impl FromStr for ValueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "size" => Ok(ValueType::Size),
            "normalize" => Ok(ValueType::Normalize),
            other => Err(format!("unknown value_type '{}'", other)),
        }
    }
}

impl ValueType {
    fn apply(self, value: Value) -> Result<Value, EvaluationFault> {
        match (self, value) {
            (ValueType::Size, Value::String(s)) => Ok(Value::from(s.chars().count())),
            (ValueType::Size, Value::Array(a)) => Ok(Value::from(a.len())),
            (ValueType::Size, Value::Object(o)) => Ok(Value::from(o.len())),
            (ValueType::Normalize, Value::String(s)) => Ok(Value::String(s.trim().to_lowercase())),
            (ValueType::Size, other) => Err(EvaluationFault::BadOperand {
                op: "size".to_string(),
                found: type_name(&other),
            }),
            (ValueType::Normalize, other) => Err(EvaluationFault::BadOperand {
                op: "normalize".to_string(),
                found: type_name(&other),
            }),
        }
    }
}

/// Declarative value filter
#[derive(Debug, Clone, PartialEq)]
pub struct ValueFilter {
    pub key: String,
    pub op: Op,
    pub value: Option<Value>,
    pub value_type: Option<ValueType>,
}

impl ValueFilter {
    pub fn new(key: &str, op: Op, value: Option<Value>) -> Self {
        Self {
            key: key.to_string(),
            op,
            value,
            value_type: None,
        }
    }

    /// `key == value`
    pub fn eq(key: &str, value: impl Into<Value>) -> Self {
        Self::new(key, Op::Eq, Some(value.into()))
    }

    pub fn with_value_type(mut self, value_type: ValueType) -> Self {
        self.value_type = Some(value_type);
        self
    }
}

/// Value filter with its path and pattern compiled
#[derive(Debug, Clone)]
pub struct ValueMatcher {
    path: Result<KeyPath, EvaluationFault>,
    op: Op,
    expected: Value,
    value_type: Option<ValueType>,
    regex: Option<Result<Regex, EvaluationFault>>,
}

impl ValueMatcher {
    pub fn compile(filter: &ValueFilter) -> Self {
        let expected = filter.value.clone().unwrap_or(Value::Null);
        let regex = (filter.op == Op::Regex).then(|| compile_regex(&expected));
        Self {
            path: KeyPath::parse(&filter.key),
            op: filter.op,
            expected,
            value_type: filter.value_type,
            regex,
        }
    }

    /// Evaluate, turning any fault into a non-match
    pub fn matches(&self, record: &Value) -> bool {
        self.try_matches(record).unwrap_or_else(|fault| {
            tracing::trace!("value filter fault: {}", fault);
            false
        })
    }

    pub fn try_matches(&self, record: &Value) -> Result<bool, EvaluationFault> {
        let path = self.path.as_ref().map_err(Clone::clone)?;
        let resolved = match (path.resolve(record), self.value_type) {
            (Some(Value::Null), _) | (None, _) => None,
            (Some(value), Some(value_type)) => Some(value_type.apply(value)?),
            (Some(value), None) => Some(value),
        };

        let actual = match (self.op, resolved) {
            (Op::Absent, resolved) => return Ok(resolved.is_none()),
            (Op::Present, resolved) => return Ok(resolved.is_some()),
            (_, None) => return Ok(false),
            (_, Some(actual)) => actual,
        };

        let expected = &self.expected;
        match self.op {
            Op::Eq => Ok(loose_eq(&actual, expected)),
            Op::Ne => Ok(!loose_eq(&actual, expected)),
            Op::Gt => Ok(order(&actual, expected)? == Ordering::Greater),
            Op::Ge => Ok(order(&actual, expected)? != Ordering::Less),
            Op::Lt => Ok(order(&actual, expected)? == Ordering::Less),
            Op::Le => Ok(order(&actual, expected)? != Ordering::Greater),
            Op::In => membership(&actual, expected),
            Op::NotIn => membership(&actual, expected).map(|found| !found),
            Op::Contains => contains(&actual, expected),
            Op::Regex => {
                let regex = self
                    .regex
                    .clone()
                    .unwrap_or_else(|| compile_regex(expected))?;
                match &actual {
                    Value::String(s) => Ok(regex.is_match(s)),
                    other => Err(EvaluationFault::BadOperand {
                        op: "regex".to_string(),
                        found: type_name(other),
                    }),
                }
            }
            Op::Empty => Ok(is_empty(&actual)),
            Op::NotEmpty => Ok(!is_empty(&actual)),
            Op::Absent | Op::Present => unreachable!(),
        }
    }
}

/// Patterns match from the start of the value
fn compile_regex(pattern: &Value) -> Result<Regex, EvaluationFault> {
    let Some(pattern) = pattern.as_str() else {
        return Err(EvaluationFault::InvalidRegex {
            pattern: pattern.to_string(),
            reason: "pattern must be a string".to_string(),
        });
    };
    Regex::new(&format!("^(?:{})", pattern)).map_err(|e| EvaluationFault::InvalidRegex {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

/// JSON equality where numbers compare by value (`1 == 1.0`)
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Order two numbers or two strings
pub fn order(a: &Value, b: &Value) -> Result<Ordering, EvaluationFault> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .zip(y.as_f64())
            .and_then(|(x, y)| x.partial_cmp(&y))
            .ok_or(EvaluationFault::TypeMismatch {
                actual: "number",
                expected: "number",
            }),
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        _ => Err(EvaluationFault::TypeMismatch {
            actual: type_name(a),
            expected: type_name(b),
        }),
    }
}

fn membership(actual: &Value, expected: &Value) -> Result<bool, EvaluationFault> {
    match expected {
        Value::Array(options) => Ok(options.iter().any(|option| loose_eq(actual, option))),
        other => Err(EvaluationFault::BadOperand {
            op: "in".to_string(),
            found: type_name(other),
        }),
    }
}

fn contains(actual: &Value, expected: &Value) -> Result<bool, EvaluationFault> {
    match (actual, expected) {
        (Value::Array(items), _) => Ok(items.iter().any(|item| loose_eq(item, expected))),
        (Value::String(haystack), Value::String(needle)) => Ok(haystack.contains(needle.as_str())),
        (Value::Object(map), Value::String(key)) => Ok(map.contains_key(key)),
        _ => Err(EvaluationFault::TypeMismatch {
            actual: type_name(actual),
            expected: type_name(expected),
        }),
    }
}

/// Empty strings and collections; scalars are never empty
fn is_empty(value: &Value) -> bool {
    match value {
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
