//! Action Executor
//!
//! Splits the matched records into units (batches or single records), runs the
//! units on a bounded pool and writes each outcome back into the slot of its
//! input position, so results come out in input order however the calls
//! finish.

use super::{schema, ActionContext, ActionOutcome, ActionRegistry, ActionResult, ActionSpec, ErrorKind, ExecutionMode};
use crate::cloud::CloudApi;
use crate::resource::{identity, ResourceDef, ResourceRegistry};
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::ops::Range;
use tokio_util::sync::CancellationToken;

/// Default number of concurrent action calls
pub const DEFAULT_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, Copy)]
pub struct ExecuteOptions {
    /// Upper bound on in-flight remote calls
    pub concurrency: usize,
    /// Report what would run without calling anything
    pub dry_run: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            dry_run: false,
        }
    }
}

/// Runs actions for one policy
pub struct Executor<'a> {
    pub api: &'a dyn CloudApi,
    pub actions: &'a ActionRegistry,
    pub resources: &'a ResourceRegistry,
    pub options: ExecuteOptions,
    pub cancel: &'a CancellationToken,
}

impl Executor<'_> {
    /// Run `spec` over `records` (all of type `resource`), one result per
    /// record in input order. Never fails: every problem becomes a result.
    pub async fn execute(
        &self,
        policy: &str,
        resource: &ResourceDef,
        spec: &ActionSpec,
        records: &[Value],
    ) -> Vec<ActionResult> {
        let ids: Vec<String> = records
            .iter()
            .map(|r| identity(r, &resource.id_field).unwrap_or_default())
            .collect();

        let Some(action) = self.actions.get(&spec.name) else {
            tracing::warn!("Policy {}: unknown action '{}'", policy, spec.name);
            let outcome =
                ActionOutcome::failed(ErrorKind::Schema, format!("unknown action '{}'", spec.name));
            return fill(&spec.name, ids, outcome);
        };

        if let Err(err) = schema::validate(action.as_ref(), &spec.params) {
            tracing::warn!("Policy {}: {}", policy, err);
            return fill(&spec.name, ids, ActionOutcome::failed(ErrorKind::Schema, err.to_string()));
        }

        if self.options.dry_run {
            return skip_all(&spec.name, ids, "dry-run");
        }

        let units = split_units(records.len(), action.mode());
        tracing::info!(
            "Policy {}: running {} on {} {} records in {} calls",
            policy,
            spec.name,
            records.len(),
            resource.key,
            units.len()
        );

        let ctx = ActionContext {
            api: self.api,
            resource,
            resources: self.resources,
            params: &spec.params,
            policy,
        };
        let ctx = &ctx;
        let action = action.as_ref();
        let cancel = self.cancel;

        let completed: Vec<(Range<usize>, Option<ActionOutcome>)> = stream::iter(units)
            .map(move |range: Range<usize>| async move {
                if cancel.is_cancelled() {
                    return (range, None);
                }
                let batch: Vec<&Value> = records[range.clone()].iter().collect();
                let outcome = match action.process(ctx, &batch).await {
                    Ok(response) => ActionOutcome::Succeeded { response },
                    Err(err) => {
                        tracing::warn!(
                            "{} failed for {} records starting at {}: {}",
                            ctx.policy,
                            range.len(),
                            range.start,
                            err
                        );
                        ActionOutcome::from(err)
                    }
                };
                (range, Some(outcome))
            })
            .buffer_unordered(self.options.concurrency.max(1))
            .collect()
            .await;

        let mut slots: Vec<Option<ActionOutcome>> = vec![None; records.len()];
        for (range, outcome) in completed {
            let outcome = outcome.unwrap_or_else(|| ActionOutcome::skipped("cancelled"));
            for slot in &mut slots[range] {
                *slot = Some(outcome.clone());
            }
        }

        ids.into_iter()
            .zip(slots)
            .map(|(resource_id, slot)| ActionResult {
                action: spec.name.clone(),
                resource_id,
                outcome: slot.unwrap_or_else(|| ActionOutcome::skipped("cancelled")),
            })
            .collect()
    }
}

/// Contiguous index ranges, one per remote call
fn split_units(len: usize, mode: ExecutionMode) -> Vec<Range<usize>> {
    let size = match mode {
        ExecutionMode::Batch { max_size } => max_size.max(1),
        ExecutionMode::PerResource => 1,
    };
    (0..len)
        .step_by(size)
        .map(|start| start..(start + size).min(len))
        .collect()
}

fn fill(action: &str, ids: Vec<String>, outcome: ActionOutcome) -> Vec<ActionResult> {
    ids.into_iter()
        .map(|resource_id| ActionResult {
            action: action.to_string(),
            resource_id,
            outcome: outcome.clone(),
        })
        .collect()
}

/// A `Skipped(reason)` result for each identity
pub fn skip_all(action: &str, ids: Vec<String>, reason: &str) -> Vec<ActionResult> {
    fill(action, ids, ActionOutcome::skipped(reason))
}
