//! Integration tests for the REST client using wiremock
//!
//! These tests verify the client against mocked endpoints: pagination styles,
//! status-code mapping, and the bodies of mutating calls.

use cloudmend::action::ActionRegistry;
use cloudmend::cloud::{format_api_error, CloudApi, Credentials, RestClient};
use cloudmend::error::{FetchError, RemoteErrorKind};
use cloudmend::policy::{PolicyDocument, PolicyRunner};
use cloudmend::resource::{fetch_all, ResourceRegistry};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_json, header, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PROJECT: &str = "test-project";

fn client(server: &MockServer) -> RestClient {
    RestClient::new(Credentials::new("test-token"), PROJECT, "cn-north-4")
        .expect("client builds")
        .with_default_endpoint(&server.uri())
}

fn registry() -> ResourceRegistry {
    ResourceRegistry::builtin().expect("built-in resources load")
}

/// Test module for list pagination
mod pagination_tests {
    use super::*;

    /// Offset pagination follows the reported total
    #[tokio::test]
    async fn test_offset_pagination_uses_total_count() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v2/test-project/alarms"))
            .and(query_param("offset", "0"))
            .and(query_param("limit", "100"))
            .and(header("X-Auth-Token", "test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "alarms": [{"alarm_id": "al-1"}, {"alarm_id": "al-2"}],
                "count": 3
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v2/test-project/alarms"))
            .and(query_param("offset", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "alarms": [{"alarm_id": "al-3"}],
                "count": 3
            })))
            .expect(1)
            .mount(&server)
            .await;

        let resources = registry();
        let alarms = fetch_all(
            &client(&server),
            resources.get("alarm").unwrap(),
            &CancellationToken::new(),
        )
        .await
        .expect("fetch should succeed");

        let ids: Vec<_> = alarms.iter().map(|a| a["alarm_id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["al-1", "al-2", "al-3"]);
    }

    /// Marker pagination follows page_info.next_marker
    #[tokio::test]
    async fn test_marker_pagination() {
        let server = MockServer::start().await;

        // First page
        Mock::given(method("GET"))
            .and(path("/v2/test-project/notifications/topics"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "topics": [{"topic_urn": "urn:smn:a"}, {"topic_urn": "urn:smn:b"}],
                "page_info": {"next_marker": "m2"}
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        // Second page
        Mock::given(method("GET"))
            .and(path("/v2/test-project/notifications/topics"))
            .and(query_param("marker", "m2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "topics": [{"topic_urn": "urn:smn:c"}],
                "page_info": {"next_marker": ""}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let resources = registry();
        let topics = fetch_all(
            &client(&server),
            resources.get("topic").unwrap(),
            &CancellationToken::new(),
        )
        .await
        .expect("fetch should succeed");

        assert_eq!(topics.len(), 3);
        assert_eq!(topics[2]["topic_urn"], "urn:smn:c");
    }
}

/// Test module for status mapping
mod error_tests {
    use super::*;

    /// 403 aborts the fetch with a permission error
    #[tokio::test]
    async fn test_403_aborts_fetch() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v2/test-project/alarms"))
            .respond_with(
                ResponseTemplate::new(403).set_body_json(json!({"error_code": "CES.0001"})),
            )
            .mount(&server)
            .await;

        let resources = registry();
        let err = fetch_all(
            &client(&server),
            resources.get("alarm").unwrap(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        let FetchError::Remote { resource, source } = err else {
            panic!("expected a remote error");
        };
        assert_eq!(resource, "alarm");
        assert_eq!(source.kind, RemoteErrorKind::Http(403));
        assert_eq!(source.service, "ces");
        assert!(format_api_error(&source).contains("Permission denied"));
    }

    /// A 200 page without the item array aborts the fetch instead of ending it
    #[tokio::test]
    async fn test_page_without_items_aborts_fetch() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v2/test-project/alarms"))
            .and(query_param("offset", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "alarms": [{"alarm_id": "al-1"}, {"alarm_id": "al-2"}],
                "count": 3
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v2/test-project/alarms"))
            .and(query_param("offset", "2"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"error_msg": "throttled"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let resources = registry();
        let err = fetch_all(
            &client(&server),
            resources.get("alarm").unwrap(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        let FetchError::Remote { resource, source } = err else {
            panic!("expected a remote error");
        };
        assert_eq!(resource, "alarm");
        assert_eq!(source.kind, RemoteErrorKind::Decode);
    }

    /// A body that is not JSON is a decode error
    #[tokio::test]
    async fn test_garbage_body_is_decode_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v2/test-project/alarms"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let resources = registry();
        let err = client(&server)
            .list_page(resources.get("alarm").unwrap(), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::Decode);
    }

    /// Operations a resource does not define never reach the network
    #[tokio::test]
    async fn test_undefined_operation_is_unsupported() {
        let server = MockServer::start().await;

        let resources = registry();
        let err = client(&server)
            .delete_batch(resources.get("topic").unwrap(), &["urn:smn:a".to_string()])
            .await
            .unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::Unsupported);
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }
}

/// Test module for mutating calls
mod mutation_tests {
    use super::*;

    #[tokio::test]
    async fn test_delete_batch_body() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v2/test-project/alarms/batch-delete"))
            .and(body_json(json!({"alarm_ids": ["al-1", "al-2"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"alarm_ids": ["al-1", "al-2"]})))
            .expect(1)
            .mount(&server)
            .await;

        let resources = registry();
        let response = client(&server)
            .delete_batch(resources.get("alarm").unwrap(), &["al-1".to_string(), "al-2".to_string()])
            .await
            .expect("delete should succeed");
        assert_eq!(response["alarm_ids"][1], "al-2");
    }

    /// Empty success bodies decode to null
    #[tokio::test]
    async fn test_enable_batch_with_empty_response() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v2/test-project/alarms/action"))
            .and(body_json(json!({"alarm_ids": ["al-1"], "alarm_enabled": false})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let resources = registry();
        let response = client(&server)
            .enable_batch(resources.get("alarm").unwrap(), &["al-1".to_string()], false)
            .await
            .expect("disable should succeed");
        assert!(response.is_null());
    }

    #[tokio::test]
    async fn test_update_notifications_route() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/v2/test-project/alarms/al123/notifications"))
            .and(body_json(json!({"notification_enabled": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let resources = registry();
        client(&server)
            .update(
                resources.get("alarm").unwrap(),
                "update-notifications",
                "al123",
                &json!({"notification_enabled": false}),
            )
            .await
            .expect("update should succeed");
    }

    #[tokio::test]
    async fn test_publish_to_topic() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path_regex(r"^/v2/test-project/notifications/topics/[^/]+/publish$"))
            .and(body_json(json!({"subject": "hello", "message": "world"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message_id": "m-1"})))
            .expect(1)
            .mount(&server)
            .await;

        let resources = registry();
        let response = client(&server)
            .publish(resources.get("topic").unwrap(), "urn:smn:cn-north-4:p:ops", "hello", "world")
            .await
            .expect("publish should succeed");
        assert_eq!(response["message_id"], "m-1");
    }
}

/// A whole policy run against a mocked service
mod policy_run_tests {
    use super::*;

    #[tokio::test]
    async fn test_policy_deletes_only_matching_alarm() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v2/test-project/alarms"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "alarms": [
                    {"alarm_id": "al-vpc", "namespace": "SYS.VPC", "type": "EVENT.SYS"},
                    {"alarm_id": "al-ecs", "namespace": "SYS.ECS", "type": "EVENT.SYS"}
                ],
                "count": 2
            })))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/v2/test-project/alarms/batch-delete"))
            .and(body_json(json!({"alarm_ids": ["al-vpc"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let doc = PolicyDocument::from_yaml(
            r#"
policies:
  - name: delete-vpc-event-alarms
    resource: huaweicloud.alarm
    filters:
      - namespace: SYS.VPC
      - type: EVENT.SYS
    actions:
      - delete
"#,
        )
        .unwrap();

        let runner = PolicyRunner::new(Arc::new(client(&server)), registry(), ActionRegistry::builtin());
        let report = runner
            .run(&doc.policies[0], &CancellationToken::new())
            .await
            .expect("run should succeed");

        assert_eq!(report.population, 2);
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].resource_id, "al-vpc");
        assert!(report.results[0].outcome.is_succeeded());
    }
}
