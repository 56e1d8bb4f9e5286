//! Policy runs against an in-memory control plane
//!
//! The stub pages its records, records every mutating call and can be told
//! to fail calls for chosen identities or whole resource types.

use async_trait::async_trait;
use cloudmend::action::{ActionOutcome, ActionRegistry, ActionSpec, ErrorKind};
use cloudmend::cloud::{CloudApi, Page};
use cloudmend::error::{PolicyError, RemoteErrorKind, RemoteServiceError};
use cloudmend::filter::FilterNode;
use cloudmend::policy::{PolicyDocument, PolicyRunner, PolicySpec, RunOptions};
use cloudmend::resource::{ResourceDef, ResourceRegistry};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
enum Call {
    List(String, Option<String>),
    Delete(Vec<String>),
    Enable(Vec<String>, bool),
    Update(String),
    Create(Value),
}

#[derive(Default)]
struct MemoryApi {
    records: HashMap<String, Vec<Value>>,
    page_size: usize,
    failing_ids: HashSet<String>,
    failing_resources: HashSet<String>,
    calls: Mutex<Vec<Call>>,
}

impl MemoryApi {
    fn new(page_size: usize) -> Self {
        Self {
            page_size,
            ..Self::default()
        }
    }

    fn with_records(mut self, resource: &str, records: Vec<Value>) -> Self {
        self.records.insert(resource.to_string(), records);
        self
    }

    fn failing_id(mut self, id: &str) -> Self {
        self.failing_ids.insert(id.to_string());
        self
    }

    fn failing_resource(mut self, resource: &str) -> Self {
        self.failing_resources.insert(resource.to_string());
        self
    }

    fn log(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn mutations(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, Call::List(..)))
            .collect()
    }

    fn fail(&self, operation: &str) -> RemoteServiceError {
        RemoteServiceError::new("ces", operation, RemoteErrorKind::Http(500), "internal error")
    }
}

#[async_trait]
impl CloudApi for MemoryApi {
    async fn list_page(
        &self,
        resource: &ResourceDef,
        cursor: Option<&str>,
    ) -> Result<Page, RemoteServiceError> {
        self.log(Call::List(resource.key.clone(), cursor.map(String::from)));
        if self.failing_resources.contains(&resource.key) {
            return Err(self.fail("list"));
        }
        let all = self.records.get(&resource.key).cloned().unwrap_or_default();
        let start: usize = cursor.map(|c| c.parse().unwrap()).unwrap_or(0);
        let end = (start + self.page_size).min(all.len());
        let next = (end < all.len()).then(|| end.to_string());
        Ok(Page::new(all[start..end].to_vec(), next))
    }

    async fn delete_batch(&self, _: &ResourceDef, ids: &[String]) -> Result<Value, RemoteServiceError> {
        self.log(Call::Delete(ids.to_vec()));
        Ok(json!({}))
    }

    async fn enable_batch(
        &self,
        _: &ResourceDef,
        ids: &[String],
        enabled: bool,
    ) -> Result<Value, RemoteServiceError> {
        self.log(Call::Enable(ids.to_vec(), enabled));
        Ok(Value::Null)
    }

    async fn update(
        &self,
        _: &ResourceDef,
        operation: &str,
        id: &str,
        _: &Value,
    ) -> Result<Value, RemoteServiceError> {
        self.log(Call::Update(id.to_string()));
        if self.failing_ids.contains(id) {
            return Err(self.fail(operation));
        }
        Ok(json!({"alarm_id": id}))
    }

    async fn create(&self, _: &ResourceDef, body: &Value) -> Result<Value, RemoteServiceError> {
        self.log(Call::Create(body.clone()));
        Ok(json!({"alarm_id": "al-new"}))
    }

    async fn publish(&self, _: &ResourceDef, _: &str, _: &str, _: &str) -> Result<Value, RemoteServiceError> {
        Ok(Value::Null)
    }
}

fn alarm(id: &str, namespace: &str, kind: &str, metrics: &[&str]) -> Value {
    let policies: Vec<Value> = metrics.iter().map(|m| json!({"metric_name": m})).collect();
    json!({
        "alarm_id": id,
        "name": format!("{}-name", id),
        "namespace": namespace,
        "type": kind,
        "policies": policies
    })
}

fn runner(api: &Arc<MemoryApi>) -> PolicyRunner {
    let api: Arc<dyn CloudApi> = api.clone();
    PolicyRunner::new(
        api,
        ResourceRegistry::builtin().unwrap(),
        ActionRegistry::builtin(),
    )
}

fn policy(yaml: &str) -> PolicySpec {
    PolicyDocument::from_yaml(yaml).unwrap().policies.remove(0)
}

const CREATE_IF_MISSING: &str = r#"
policies:
  - name: ensure-vpc-delete-alarm
    resource: huaweicloud.alarm
    filters:
      - type: missing
        policy:
          resource: huaweicloud.alarm
          filters:
            - type: alarm-namespace-metric
              namespaces: [SYS.VPC]
              metric_names: [deleteVpc]
    actions:
      - type: create-alarm-rule
        rule:
          alarm_name: "{name}-vpc-guard"
          namespace: SYS.VPC
          type: EVENT.SYS
"#;

#[tokio::test]
async fn delete_applies_only_to_the_matching_record() {
    let api = Arc::new(MemoryApi::new(100).with_records(
        "alarm",
        vec![
            alarm("al-1", "SYS.VPC", "EVENT.SYS", &[]),
            alarm("al-2", "SYS.ECS", "EVENT.SYS", &[]),
        ],
    ));
    let policy = policy(
        r#"
policies:
  - name: vpc-event-alarms
    resource: alarm
    filters:
      - namespace: SYS.VPC
      - type: EVENT.SYS
    actions:
      - delete
"#,
    );

    let report = runner(&api).run(&policy, &CancellationToken::new()).await.unwrap();

    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].resource_id, "al-1");
    assert!(report.results[0].outcome.is_succeeded());
    assert_eq!(api.mutations(), vec![Call::Delete(vec!["al-1".to_string()])]);
    assert_eq!(report.excluded.len(), 1);
    assert!(!report.cancelled);
}

#[tokio::test]
async fn fetch_follows_every_page() {
    let records = (0..5).map(|i| alarm(&format!("al-{}", i), "SYS.VPC", "EVENT.SYS", &[])).collect();
    let api = Arc::new(MemoryApi::new(2).with_records("alarm", records));

    let report = runner(&api)
        .run(&PolicySpec::new("all", "alarm"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.population, 5);
    assert_eq!(report.matched, 5);
    let lists: Vec<_> = api.calls().into_iter().filter(|c| matches!(c, Call::List(..))).collect();
    assert_eq!(
        lists,
        vec![
            Call::List("alarm".into(), None),
            Call::List("alarm".into(), Some("2".into())),
            Call::List("alarm".into(), Some("4".into())),
        ]
    );
}

#[tokio::test]
async fn missing_filter_with_no_nested_match_selects_everything() {
    let records = (0..5)
        .map(|i| alarm(&format!("al-{}", i), "SYS.ECS", "EVENT.SYS", &["deleteServer"]))
        .collect();
    let api = Arc::new(MemoryApi::new(100).with_records("alarm", records));

    let report = runner(&api)
        .run(&policy(CREATE_IF_MISSING), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.matched, 5);
    assert_eq!(report.results.len(), 5);
    assert!(report.results.iter().all(|r| r.action == "create-alarm-rule" && r.outcome.is_succeeded()));

    let creates: Vec<_> = api
        .mutations()
        .into_iter()
        .filter_map(|c| match c {
            Call::Create(body) => Some(body["alarm_name"].as_str().unwrap().to_string()),
            _ => None,
        })
        .collect();
    assert_eq!(creates.len(), 5);
    assert!(creates.contains(&"al-0-name-vpc-guard".to_string()));
}

#[tokio::test]
async fn missing_filter_is_a_set_difference_by_identity() {
    let api = Arc::new(MemoryApi::new(100).with_records(
        "alarm",
        vec![
            alarm("al-1", "SYS.VPC", "EVENT.SYS", &["deleteVpc"]),
            alarm("al-2", "SYS.ECS", "EVENT.SYS", &["deleteVpc"]),
            alarm("al-3", "SYS.VPC", "EVENT.SYS", &["modifyVpc"]),
        ],
    ));
    let runner = runner(&api);
    let policy = policy(CREATE_IF_MISSING);

    let cancel = CancellationToken::new();
    let first = runner.evaluate(&policy, 0, &cancel).await.unwrap();
    let second = runner.evaluate(&policy, 0, &cancel).await.unwrap();

    let ids = |records: &[Value]| -> Vec<String> {
        records.iter().map(|r| r["alarm_id"].as_str().unwrap().to_string()).collect()
    };
    assert_eq!(ids(&first.matched), vec!["al-2", "al-3"]);
    assert_eq!(ids(&first.matched), ids(&second.matched));
    assert!(api.mutations().is_empty());
}

#[tokio::test]
async fn failed_update_does_not_stop_other_resources_or_actions() {
    let records = vec![
        alarm("al-1", "SYS.VPC", "EVENT.SYS", &[]),
        alarm("al-2", "SYS.VPC", "EVENT.SYS", &[]),
        alarm("al-3", "SYS.VPC", "EVENT.SYS", &[]),
    ];
    let api = Arc::new(MemoryApi::new(100).with_records("alarm", records).failing_id("al-2"));
    let policy = PolicySpec::new("quiet-vpc", "alarm")
        .with_action(ActionSpec::new("update-notification").with_param("notification_enabled", false))
        .with_action(ActionSpec::new("disable"));

    let report = runner(&api).run(&policy, &CancellationToken::new()).await.unwrap();

    let updates: Vec<_> = report.results.iter().filter(|r| r.action == "update-notification").collect();
    assert_eq!(updates.len(), 3);
    assert!(updates[0].outcome.is_succeeded());
    assert!(matches!(
        &updates[1].outcome,
        ActionOutcome::Failed { kind: ErrorKind::Remote, message } if message.contains("internal error")
    ));
    assert!(updates[2].outcome.is_succeeded());

    // The next action still runs for every resource
    let disables: Vec<_> = report.results.iter().filter(|r| r.action == "disable").collect();
    assert_eq!(disables.len(), 3);
    assert!(api
        .mutations()
        .contains(&Call::Enable(vec!["al-1".into(), "al-2".into(), "al-3".into()], false)));
    assert!(report.has_failures());
    assert_eq!(report.summary().failed, 1);
}

#[tokio::test]
async fn invalid_parameters_fail_without_calls() {
    let api = Arc::new(MemoryApi::new(100).with_records("alarm", vec![alarm("al-1", "SYS.VPC", "EVENT.SYS", &[])]));
    let policy = PolicySpec::new("bad-params", "alarm")
        .with_action(ActionSpec::new("update-notification").with_param("notification_enabled", "yes"))
        .with_action(ActionSpec::new("delete"));

    let report = runner(&api).run(&policy, &CancellationToken::new()).await.unwrap();

    assert!(matches!(report.results[0].outcome, ActionOutcome::Failed { kind: ErrorKind::Schema, .. }));
    assert!(report.results[1].outcome.is_succeeded());
    assert_eq!(api.mutations(), vec![Call::Delete(vec!["al-1".to_string()])]);
}

#[tokio::test]
async fn nested_fetch_failure_aborts_the_run() {
    let api = Arc::new(
        MemoryApi::new(100)
            .with_records("alarm", vec![alarm("al-1", "SYS.VPC", "EVENT.SYS", &[])])
            .failing_resource("topic"),
    );
    let policy = PolicySpec::new("needs-topics", "alarm")
        .with_filter(FilterNode::missing(PolicySpec::new("topics", "topic")))
        .with_action(ActionSpec::new("delete"));

    let err = runner(&api).run(&policy, &CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, PolicyError::Fetch(_)));
    assert!(api.mutations().is_empty());
}

#[tokio::test]
async fn empty_match_runs_no_actions() {
    let api = Arc::new(MemoryApi::new(100).with_records("alarm", vec![alarm("al-1", "SYS.ECS", "EVENT.SYS", &[])]));
    let policy = PolicySpec::new("none", "alarm")
        .with_filter(serde_yaml::from_str("namespace: SYS.VPC").unwrap())
        .with_action(ActionSpec::new("resize"));

    let report = runner(&api).run(&policy, &CancellationToken::new()).await.unwrap();

    assert!(report.results.is_empty());
    assert_eq!(report.excluded.len(), 1);
    assert!(api.mutations().is_empty());
}

#[tokio::test]
async fn cancelled_run_reports_instead_of_truncating() {
    let api = Arc::new(MemoryApi::new(100).with_records("alarm", vec![alarm("al-1", "SYS.VPC", "EVENT.SYS", &[])]));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = runner(&api)
        .run(&PolicySpec::new("p", "alarm").with_action(ActionSpec::new("delete")), &cancel)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert!(report.results.is_empty());
    assert!(api.calls().is_empty());
}

#[test]
fn dry_run_reports_skips_without_mutating() {
    let api = Arc::new(MemoryApi::new(100).with_records(
        "alarm",
        vec![
            alarm("al-1", "SYS.VPC", "EVENT.SYS", &[]),
            alarm("al-2", "SYS.VPC", "EVENT.SYS", &[]),
        ],
    ));
    let runner = runner(&api).with_options(RunOptions {
        dry_run: true,
        ..RunOptions::default()
    });
    let policy = PolicySpec::new("p", "alarm").with_action(ActionSpec::new("delete"));

    let report = tokio_test::block_on(runner.run(&policy, &CancellationToken::new())).unwrap();

    assert_eq!(report.results.len(), 2);
    assert!(report.results.iter().all(|r| r.outcome == ActionOutcome::skipped("dry-run")));
    assert!(api.mutations().is_empty());
}

#[test]
fn resource_limit_blocks_actions() {
    let records = (0..4).map(|i| alarm(&format!("al-{}", i), "SYS.VPC", "EVENT.SYS", &[])).collect();
    let api = Arc::new(MemoryApi::new(100).with_records("alarm", records));
    let policy = policy(
        r#"
policies:
  - name: bounded
    resource: alarm
    max-resources-percent: 50
    actions: [delete]
"#,
    );

    let result = tokio_test::block_on(runner(&api).run(&policy, &CancellationToken::new()));

    assert!(matches!(
        result,
        Err(PolicyError::ResourceLimitExceeded { selected: 4, population: 4, .. })
    ));
    assert!(api.mutations().is_empty());
}
