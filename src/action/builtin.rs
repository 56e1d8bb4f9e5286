//! Built-in actions for alarm rules and notification topics

use super::{Action, ActionContext, ExecutionMode};
use crate::error::ActionError;
use crate::filter::KeyPath;
use async_trait::async_trait;
use regex::{Captures, Regex};
use serde_json::{json, Map, Value};
use std::sync::{Arc, OnceLock};

/// Largest identity list accepted by the batch endpoints
pub const MAX_BATCH: usize = 100;

/// Every built-in action
pub fn all() -> Vec<Arc<dyn Action>> {
    vec![
        Arc::new(Delete),
        Arc::new(SetEnabled { enabled: true }),
        Arc::new(SetEnabled { enabled: false }),
        Arc::new(UpdateNotification),
        Arc::new(CreateAlarmRule),
        Arc::new(Notify),
    ]
}

fn no_params() -> Value {
    json!({"type": "object", "additionalProperties": false})
}

/// Delete matched resources in batches
pub struct Delete;

#[async_trait]
impl Action for Delete {
    fn name(&self) -> &str {
        "delete"
    }

    fn schema(&self) -> Value {
        no_params()
    }

    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Batch { max_size: MAX_BATCH }
    }

    async fn process(&self, ctx: &ActionContext<'_>, records: &[&Value]) -> Result<Value, ActionError> {
        let ids = ctx.ids(records);
        Ok(ctx.api.delete_batch(ctx.resource, &ids).await?)
    }
}

/// `enable` / `disable`
pub struct SetEnabled {
    pub enabled: bool,
}

#[async_trait]
impl Action for SetEnabled {
    fn name(&self) -> &str {
        if self.enabled {
            "enable"
        } else {
            "disable"
        }
    }

    fn schema(&self) -> Value {
        no_params()
    }

    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Batch { max_size: MAX_BATCH }
    }

    async fn process(&self, ctx: &ActionContext<'_>, records: &[&Value]) -> Result<Value, ActionError> {
        let ids = ctx.ids(records);
        Ok(ctx.api.enable_batch(ctx.resource, &ids, self.enabled).await?)
    }
}

/// Replace the notification settings of each resource
pub struct UpdateNotification;

#[async_trait]
impl Action for UpdateNotification {
    fn name(&self) -> &str {
        "update-notification"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["notification_enabled"],
            "properties": {
                "notification_enabled": {"type": "boolean"},
                "alarm_notifications": {"type": "array", "items": {"type": "object"}},
                "ok_notifications": {"type": "array", "items": {"type": "object"}},
                "notification_begin_time": {"type": "string", "pattern": "^[0-2][0-9]:[0-5][0-9]$"},
                "notification_end_time": {"type": "string", "pattern": "^[0-2][0-9]:[0-5][0-9]$"}
            },
            "additionalProperties": false
        })
    }

    fn mode(&self) -> ExecutionMode {
        ExecutionMode::PerResource
    }

    async fn process(&self, ctx: &ActionContext<'_>, records: &[&Value]) -> Result<Value, ActionError> {
        let body = Value::Object(ctx.params.clone());
        let mut responses = Vec::with_capacity(records.len());
        for id in ctx.ids(records) {
            responses.push(ctx.api.update(ctx.resource, "update-notifications", &id, &body).await?);
        }
        Ok(single_or_list(responses))
    }
}

/// Create a rule for each matched record from a template
///
/// String values of `rule` may reference record fields as `{path}`. A string
/// that is exactly one placeholder takes the field's value with its type; any
/// other string gets the field's text spliced in.
pub struct CreateAlarmRule;

#[async_trait]
impl Action for CreateAlarmRule {
    fn name(&self) -> &str {
        "create-alarm-rule"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["rule"],
            "properties": {
                "rule": {"type": "object"},
                "target": {"type": "string"}
            },
            "additionalProperties": false
        })
    }

    fn mode(&self) -> ExecutionMode {
        ExecutionMode::PerResource
    }

    async fn process(&self, ctx: &ActionContext<'_>, records: &[&Value]) -> Result<Value, ActionError> {
        let target_name = ctx.param_str("target").unwrap_or("alarm");
        let target = ctx
            .resources
            .get(target_name)
            .ok_or_else(|| ActionError::Invalid(format!("unknown target resource '{}'", target_name)))?;
        let template = ctx.params.get("rule").cloned().unwrap_or(Value::Object(Map::new()));

        let mut responses = Vec::with_capacity(records.len());
        for record in records {
            let body = expand(&template, record)?;
            responses.push(ctx.api.create(target, &body).await?);
        }
        Ok(single_or_list(responses))
    }
}

/// Publish one message per batch to an SMN topic
pub struct Notify;

#[async_trait]
impl Action for Notify {
    fn name(&self) -> &str {
        "notify"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["topic_urn"],
            "properties": {
                "topic_urn": {"type": "string", "minLength": 1},
                "subject": {"type": "string"},
                "message": {"type": "string"}
            },
            "additionalProperties": false
        })
    }

    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Batch { max_size: MAX_BATCH }
    }

    async fn process(&self, ctx: &ActionContext<'_>, records: &[&Value]) -> Result<Value, ActionError> {
        let topic = ctx
            .resources
            .get("topic")
            .ok_or_else(|| ActionError::Invalid("no 'topic' resource is registered".to_string()))?;
        let topic_urn = ctx.param_str("topic_urn").unwrap_or_default();

        let ids = ctx.ids(records);
        let context = json!({
            "policy": ctx.policy,
            "resource": ctx.resource.key,
            "count": ids.len(),
            "ids": ids.join(", "),
        });
        let subject = ctx
            .param_str("subject")
            .map(|s| render(s, &context))
            .transpose()?
            .unwrap_or_else(|| format!("cloudmend: {}", ctx.policy));
        let message = render(
            ctx.param_str("message")
                .unwrap_or("Policy {policy} matched {count} {resource} resources: {ids}"),
            &context,
        )?;

        Ok(ctx.api.publish(topic, topic_urn, &subject, &message).await?)
    }
}

fn single_or_list(mut responses: Vec<Value>) -> Value {
    if responses.len() == 1 {
        responses.remove(0)
    } else {
        Value::Array(responses)
    }
}

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{([A-Za-z_][A-Za-z0-9_.\[\]\-]*)\}").expect("placeholder pattern is valid")
    })
}

fn lookup(record: &Value, path: &str) -> Result<Value, ActionError> {
    KeyPath::parse(path)
        .ok()
        .and_then(|p| p.resolve(record))
        .filter(|v| !v.is_null())
        .ok_or_else(|| ActionError::Invalid(format!("record has no field '{}'", path)))
}

/// Expand `{path}` placeholders in every string of `template`
pub fn expand(template: &Value, record: &Value) -> Result<Value, ActionError> {
    match template {
        Value::String(s) => {
            if let Some(caps) = placeholder().captures(s) {
                if caps.get(0).map(|m| m.as_str().len()) == Some(s.len()) {
                    return lookup(record, &caps[1]);
                }
            }
            render(s, record).map(Value::String)
        }
        Value::Array(items) => items
            .iter()
            .map(|item| expand(item, record))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| Ok((k.clone(), expand(v, record)?)))
            .collect::<Result<Map<_, _>, ActionError>>()
            .map(Value::Object),
        other => Ok(other.clone()),
    }
}

fn render(text: &str, record: &Value) -> Result<String, ActionError> {
    let mut missing = None;
    let rendered = placeholder().replace_all(text, |caps: &Captures| match lookup(record, &caps[1]) {
        Ok(Value::String(s)) => s,
        Ok(other) => other.to_string(),
        Err(err) => {
            missing.get_or_insert(err);
            String::new()
        }
    });
    match missing {
        Some(err) => Err(err),
        None => Ok(rendered.into_owned()),
    }
}
