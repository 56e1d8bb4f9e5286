//! Key paths
//!
//! A small path language over JSON records:
//!
//! | Syntax            | Meaning                                              |
//! |-------------------|------------------------------------------------------|
//! | `a.b.c`           | nested fields                                        |
//! | `"odd.key"`       | quoted field name                                    |
//! | `a[0]`, `a[-1]`   | array index, negative counts from the end            |
//! | `a[*].b`          | project the rest of the path over every element      |
//! | `a[]`             | flatten one level, then project                      |
//! | `a[?b=='x']`      | keep elements whose `b` equals `'x'`, then project   |
//! | `a[?n>=`3`]`      | JSON literal in backticks                            |
//! | `a[?flag]`        | keep elements where `flag` is truthy                 |
//! | `@`               | the current value                                    |
//!
//! Projections drop elements that resolve to nothing, so
//! `policies[?metric_name=='deleteVpc']` is an empty array when no element
//! matches. Pair it with `not-empty` to ask "does the list contain one?".

use super::value::{loose_eq, order};
use super::EvaluationFault;
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
enum Step {
    Field(String),
    Index(i64),
    Project,
    Flatten,
    Select(Box<Selector>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Comparison {
    // Longest tokens first so `>=` is not read as `>`
    const TOKENS: [(&'static str, Comparison); 6] = [
        ("==", Comparison::Eq),
        ("!=", Comparison::Ne),
        (">=", Comparison::Ge),
        ("<=", Comparison::Le),
        (">", Comparison::Gt),
        ("<", Comparison::Lt),
    ];

    fn holds(self, actual: &Value, expected: &Value) -> bool {
        match self {
            Comparison::Eq => loose_eq(actual, expected),
            Comparison::Ne => !loose_eq(actual, expected),
            _ => match order(actual, expected) {
                Ok(ordering) => match self {
                    Comparison::Gt => ordering == Ordering::Greater,
                    Comparison::Ge => ordering != Ordering::Less,
                    Comparison::Lt => ordering == Ordering::Less,
                    Comparison::Le => ordering != Ordering::Greater,
                    Comparison::Eq | Comparison::Ne => unreachable!(),
                },
                Err(_) => false,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Selector {
    path: KeyPath,
    comparison: Option<(Comparison, Value)>,
}

impl Selector {
    fn keeps(&self, element: &Value) -> bool {
        let resolved = self.path.resolve(element);
        match &self.comparison {
            None => resolved.as_ref().map(truthy).unwrap_or(false),
            Some((comparison, expected)) => match resolved {
                Some(actual) => comparison.holds(&actual, expected),
                None => false,
            },
        }
    }
}

/// A parsed key path
#[derive(Debug, Clone, PartialEq)]
pub struct KeyPath {
    source: String,
    steps: Vec<Step>,
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl KeyPath {
    pub fn parse(source: &str) -> Result<Self, EvaluationFault> {
        let fault = |reason: &str| EvaluationFault::MalformedPath {
            path: source.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = source.trim();
        if trimmed.is_empty() {
            return Err(fault("empty path"));
        }
        if trimmed == "@" {
            return Ok(Self {
                source: source.to_string(),
                steps: Vec::new(),
            });
        }

        let chars: Vec<char> = trimmed.chars().collect();
        let mut steps = Vec::new();
        let mut pos = 0;

        loop {
            // Field name, unless the segment starts with a bracket
            match chars.get(pos) {
                Some('[') => {}
                Some('"') => {
                    let end = chars[pos + 1..]
                        .iter()
                        .position(|&c| c == '"')
                        .map(|i| pos + 1 + i)
                        .ok_or_else(|| fault("unterminated quoted field"))?;
                    let name: String = chars[pos + 1..end].iter().collect();
                    steps.push(Step::Field(name));
                    pos = end + 1;
                }
                Some(_) => {
                    let start = pos;
                    while pos < chars.len() && !matches!(chars[pos], '.' | '[' | ']') {
                        pos += 1;
                    }
                    let name: String = chars[start..pos].iter().collect();
                    steps.push(Step::Field(name.trim().to_string()));
                }
                None => return Err(fault("path ends with '.'")),
            }

            while chars.get(pos) == Some(&'[') {
                let (step, next) = parse_bracket(&chars, pos, &fault)?;
                steps.push(step);
                pos = next;
            }

            match chars.get(pos) {
                None => break,
                Some('.') => pos += 1,
                Some(c) => return Err(fault(&format!("unexpected '{}'", c))),
            }
        }

        if steps
            .iter()
            .any(|s| matches!(s, Step::Field(name) if name.is_empty()))
        {
            return Err(fault("empty field name"));
        }

        Ok(Self {
            source: source.to_string(),
            steps,
        })
    }

    /// Resolve against a record. `None` means the path does not exist.
    pub fn resolve(&self, value: &Value) -> Option<Value> {
        resolve_steps(&self.steps, value)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// Parse `[...]` starting at `open`; returns the step and the position after `]`
fn parse_bracket(
    chars: &[char],
    open: usize,
    fault: &dyn Fn(&str) -> EvaluationFault,
) -> Result<(Step, usize), EvaluationFault> {
    let close = matching_bracket(chars, open).ok_or_else(|| fault("unbalanced '['"))?;
    let inner: String = chars[open + 1..close].iter().collect();
    let inner = inner.trim();

    let step = if inner.is_empty() {
        Step::Flatten
    } else if inner == "*" {
        Step::Project
    } else if let Some(expr) = inner.strip_prefix('?') {
        Step::Select(Box::new(parse_selector(expr.trim(), fault)?))
    } else {
        let index = inner
            .parse::<i64>()
            .map_err(|_| fault(&format!("invalid index '{}'", inner)))?;
        Step::Index(index)
    };

    Ok((step, close + 1))
}

/// Position of the `]` closing the `[` at `open`, skipping quoted literals
fn matching_bracket(chars: &[char], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (i, &c) in chars.iter().enumerate().skip(open) {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '`' | '"' => quote = Some(c),
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_selector(
    expr: &str,
    fault: &dyn Fn(&str) -> EvaluationFault,
) -> Result<Selector, EvaluationFault> {
    if expr.is_empty() {
        return Err(fault("empty selector"));
    }

    let Some((at, comparison, token_len)) = find_comparison(expr) else {
        return Ok(Selector {
            path: KeyPath::parse(expr)?,
            comparison: None,
        });
    };

    let left = expr[..at].trim();
    let right = expr[at + token_len..].trim();
    if left.is_empty() {
        return Err(fault("selector has no left-hand side"));
    }
    let path = KeyPath::parse(left)?;
    let literal = parse_literal(right).ok_or_else(|| fault(&format!("invalid literal '{}'", right)))?;

    Ok(Selector {
        path,
        comparison: Some((comparison, literal)),
    })
}

/// First comparison operator outside quotes: (byte offset, operator, token length)
fn find_comparison(expr: &str) -> Option<(usize, Comparison, usize)> {
    let mut quote: Option<char> = None;
    for (i, c) in expr.char_indices() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        if matches!(c, '\'' | '`' | '"') {
            quote = Some(c);
            continue;
        }
        for (token, comparison) in Comparison::TOKENS {
            if expr[i..].starts_with(token) {
                return Some((i, comparison, token.len()));
            }
        }
    }
    None
}

fn parse_literal(raw: &str) -> Option<Value> {
    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        return Some(Value::String(raw[1..raw.len() - 1].to_string()));
    }
    if raw.len() >= 2 && raw.starts_with('`') && raw.ends_with('`') {
        return serde_json::from_str(&raw[1..raw.len() - 1]).ok();
    }
    serde_json::from_str(raw).ok()
}

fn resolve_steps(steps: &[Step], value: &Value) -> Option<Value> {
    let Some((step, rest)) = steps.split_first() else {
        return Some(value.clone());
    };

    match step {
        Step::Field(name) => resolve_steps(rest, value.as_object()?.get(name)?),
        Step::Index(index) => {
            let items = value.as_array()?;
            let position = if *index < 0 {
                items.len().checked_sub(index.unsigned_abs() as usize)?
            } else {
                *index as usize
            };
            resolve_steps(rest, items.get(position)?)
        }
        Step::Project => Some(project(rest, value.as_array()?.iter())),
        Step::Flatten => {
            let mut flat = Vec::new();
            for item in value.as_array()? {
                match item {
                    Value::Array(inner) => flat.extend(inner.iter().cloned()),
                    other => flat.push(other.clone()),
                }
            }
            Some(project(rest, flat.iter()))
        }
        Step::Select(selector) => {
            let kept = value.as_array()?.iter().filter(|item| selector.keeps(item));
            Some(project(rest, kept))
        }
    }
}

fn project<'a>(rest: &[Step], items: impl Iterator<Item = &'a Value>) -> Value {
    Value::Array(
        items
            .filter_map(|item| resolve_steps(rest, item))
            .filter(|v| !v.is_null())
            .collect(),
    )
}

/// JMESPath truthiness
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Number(_) => true,
    }
}
