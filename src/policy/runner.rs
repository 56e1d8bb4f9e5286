//! Policy Runner
//!
//! Fetch, filter, then act. Missing filters recurse into [`PolicyRunner::evaluate`]
//! for their nested policy; those fetches run alongside the outer fetch and
//! all of them complete before any record is matched.

use super::PolicySpec;
use crate::action::{
    skip_all, ActionOutcome, ActionRegistry, ActionResult, ExecuteOptions, Executor,
};
use crate::cloud::CloudApi;
use crate::error::PolicyError;
use crate::filter::Matcher;
use crate::resource::{fetch_all, identity, ResourceRegistry};
use chrono::{DateTime, Utc};
use futures::future::{self, BoxFuture, FutureExt};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Default limit on nested missing-filter levels
pub const DEFAULT_MAX_DEPTH: usize = 3;

/// Action name used for records excluded by the filters
pub const FILTER_STAGE: &str = "filter";

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub concurrency: usize,
    pub max_depth: usize,
    pub dry_run: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            concurrency: ExecuteOptions::default().concurrency,
            max_depth: DEFAULT_MAX_DEPTH,
            dry_run: false,
        }
    }
}

/// Fetched population split by the filters
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    pub population: usize,
    pub matched: Vec<Value>,
    pub excluded: Vec<Value>,
}

/// Counts of action outcomes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Everything one policy run produced
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub policy: String,
    pub resource: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub population: usize,
    pub matched: usize,
    /// Action outcomes, in action order then input order
    pub results: Vec<ActionResult>,
    /// One `Skipped` entry per record the filters excluded
    pub excluded: Vec<ActionResult>,
    pub cancelled: bool,
}

impl RunReport {
    pub fn summary(&self) -> Summary {
        let mut summary = Summary::default();
        for result in &self.results {
            match result.outcome {
                ActionOutcome::Succeeded { .. } => summary.succeeded += 1,
                ActionOutcome::Failed { .. } => summary.failed += 1,
                ActionOutcome::Skipped { .. } => summary.skipped += 1,
            }
        }
        summary
    }

    pub fn has_failures(&self) -> bool {
        self.results.iter().any(|r| r.outcome.is_failed())
    }
}

/// Runs policies against one control plane
pub struct PolicyRunner {
    api: Arc<dyn CloudApi>,
    resources: ResourceRegistry,
    actions: ActionRegistry,
    options: RunOptions,
}

impl PolicyRunner {
    pub fn new(api: Arc<dyn CloudApi>, resources: ResourceRegistry, actions: ActionRegistry) -> Self {
        Self {
            api,
            resources,
            actions,
            options: RunOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Run `policy`: fetch, filter, check limits, then each action in order
    pub async fn run(
        &self,
        policy: &PolicySpec,
        cancel: &CancellationToken,
    ) -> Result<RunReport, PolicyError> {
        let started_at = Utc::now();
        let resource = self
            .resources
            .get(&policy.resource)
            .ok_or_else(|| PolicyError::UnknownResource(policy.resource.clone()))?;

        let depth = policy.nesting_depth();
        if depth > self.options.max_depth {
            return Err(PolicyError::NestingTooDeep {
                depth,
                max: self.options.max_depth,
            });
        }

        let mut report = RunReport {
            run_id: Uuid::new_v4(),
            policy: policy.name.clone(),
            resource: resource.key.clone(),
            started_at,
            finished_at: started_at,
            population: 0,
            matched: 0,
            results: Vec::new(),
            excluded: Vec::new(),
            cancelled: false,
        };
        tracing::info!("Running policy {} on {} ({})", policy.name, resource.key, report.run_id);

        let evaluation = match self.evaluate(policy, 0, cancel).await {
            Ok(evaluation) => evaluation,
            Err(PolicyError::Cancelled) => {
                tracing::info!("Policy {} cancelled before filtering", policy.name);
                report.cancelled = true;
                report.finished_at = Utc::now();
                return Ok(report);
            }
            Err(err) => return Err(err),
        };

        report.population = evaluation.population;
        report.matched = evaluation.matched.len();
        tracing::info!(
            "Policy {}: {} of {} {} records matched",
            policy.name,
            report.matched,
            report.population,
            resource.key
        );
        policy.check_limits(report.matched, report.population)?;

        let excluded_ids = evaluation
            .excluded
            .iter()
            .map(|r| identity(r, &resource.id_field).unwrap_or_default())
            .collect();
        report.excluded = skip_all(FILTER_STAGE, excluded_ids, "excluded by filters");

        if !evaluation.matched.is_empty() {
            let executor = Executor {
                api: self.api.as_ref(),
                actions: &self.actions,
                resources: &self.resources,
                options: ExecuteOptions {
                    concurrency: self.options.concurrency,
                    dry_run: self.options.dry_run,
                },
                cancel,
            };
            for spec in &policy.actions {
                let results = executor
                    .execute(&policy.name, resource, spec, &evaluation.matched)
                    .await;
                report.results.extend(results);
            }
        }

        report.cancelled = cancel.is_cancelled();
        report.finished_at = Utc::now();
        let summary = report.summary();
        tracing::info!(
            "Policy {} finished: {} succeeded, {} failed, {} skipped",
            policy.name,
            summary.succeeded,
            summary.failed,
            summary.skipped
        );
        Ok(report)
    }

    /// Fetch and filter `policy`'s resources without running actions.
    /// `depth` counts the missing filters above this policy.
    pub fn evaluate<'a>(
        &'a self,
        policy: &'a PolicySpec,
        depth: usize,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Evaluation, PolicyError>> {
        async move {
            if depth > self.options.max_depth {
                return Err(PolicyError::NestingTooDeep {
                    depth,
                    max: self.options.max_depth,
                });
            }
            let resource = self
                .resources
                .get(&policy.resource)
                .ok_or_else(|| PolicyError::UnknownResource(policy.resource.clone()))?;

            let tree = policy.filter_tree();
            let nested = tree.missing_filters();
            if !nested.is_empty() {
                tracing::debug!(
                    "Policy {} evaluates {} nested policies at depth {}",
                    policy.name,
                    nested.len(),
                    depth + 1
                );
            }

            let outer = async {
                fetch_all(self.api.as_ref(), resource, cancel)
                    .await
                    .map_err(PolicyError::from)
            };
            let inner = future::try_join_all(
                nested
                    .iter()
                    .map(|missing| self.matched_ids(&missing.policy, depth + 1, cancel)),
            );
            let (records, matched_sets) = future::try_join(outer, inner).await?;

            let matcher = Matcher::compile(&tree, &resource.id_field, &mut matched_sets.into_iter());
            let population = records.len();
            let (matched, excluded) = matcher.partition(records);
            Ok(Evaluation {
                population,
                matched,
                excluded,
            })
        }
        .boxed()
    }

    /// Identities of the records a nested policy matches
    async fn matched_ids(
        &self,
        policy: &PolicySpec,
        depth: usize,
        cancel: &CancellationToken,
    ) -> Result<HashSet<String>, PolicyError> {
        let resource = self
            .resources
            .get(&policy.resource)
            .ok_or_else(|| PolicyError::UnknownResource(policy.resource.clone()))?;
        let evaluation = self.evaluate(policy, depth, cancel).await?;
        Ok(evaluation
            .matched
            .iter()
            .filter_map(|r| identity(r, &resource.id_field))
            .collect())
    }
}
