//! HTTP transport tests against a wiremock server.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use flow_studio_client::{
    CONFLICT_MESSAGE, FlowApi, FlowPersistence, FlowStudioClientConfig, FlowStudioError,
    HttpFlowApi, NodeTestRequest, PollPolicy, PollingStatusSource, RunKey, RunStatus,
    RunStatusSource, TestFlowRequest,
};
use flow_studio_core::{Flow, FlowEditor, FlowId, NodeKind, Position};
use futures::StreamExt as _;
use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

#[derive(Clone)]
struct SequenceResponder {
    templates: Arc<Mutex<VecDeque<ResponseTemplate>>>,
}

impl SequenceResponder {
    fn new(templates: Vec<ResponseTemplate>) -> Self {
        Self {
            templates: Arc::new(Mutex::new(templates.into_iter().collect())),
        }
    }
}

impl Respond for SequenceResponder {
    fn respond(&self, _req: &Request) -> ResponseTemplate {
        let mut templates = self.templates.lock().expect("mutex should not be poisoned");
        templates
            .pop_front()
            .unwrap_or_else(|| ResponseTemplate::new(500).set_body_string("no more responses"))
    }
}

fn api_for(server: &MockServer) -> HttpFlowApi {
    let config = FlowStudioClientConfig::new(server.uri()).api_token("test-token");
    HttpFlowApi::new(&config).expect("client creation should succeed")
}

fn invoices_flow() -> Flow {
    let mut editor = FlowEditor::draft("org-1");
    editor.rename_flow("Invoices Q3");
    let trigger = editor
        .drop_node("trigger-manual", Position::default())
        .unwrap()
        .unwrap()
        .id()
        .clone();
    editor
        .drop_node_connected("filter", Position::new(120.0, 0.0), &trigger)
        .unwrap();
    editor.into_flow()
}

fn stored(flow: &Flow, id: &str) -> Value {
    let mut body = serde_json::to_value(flow).unwrap();
    body["id"] = json!(id);
    body["slug"] = json!(flow.effective_slug());
    body
}

#[tokio::test]
async fn save_creates_with_snake_case_body_and_bearer_token() {
    let server = MockServer::start().await;
    let flow = invoices_flow();

    Mock::given(method("POST"))
        .and(path("/flows"))
        .and(header("authorization", "Bearer test-token"))
        .and(body_partial_json(json!({
            "org_id": "org-1",
            "name": "Invoices Q3",
            "slug": "invoices-q3",
            "variables_schema": {}
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(stored(&flow, "f-7")))
        .expect(1)
        .mount(&server)
        .await;

    let persistence = FlowPersistence::new(Arc::new(api_for(&server)));
    let outcome = persistence.save(&flow).await.unwrap();
    assert!(outcome.is_created());
    assert_eq!(outcome.flow().id(), Some(&FlowId::new("f-7")));
    assert!(outcome.flow().definition.structurally_eq(&flow.definition));
}

#[tokio::test]
async fn update_puts_to_the_flow_resource() {
    let server = MockServer::start().await;
    let mut flow = invoices_flow();
    flow.id = Some(FlowId::new("f-7"));

    Mock::given(method("PUT"))
        .and(path("/flows/f-7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(stored(&flow, "f-7")))
        .expect(1)
        .mount(&server)
        .await;

    let persistence = FlowPersistence::new(Arc::new(api_for(&server)));
    assert!(!persistence.save(&flow).await.unwrap().is_created());
}

#[tokio::test]
async fn duplicate_name_maps_to_conflict() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/flows"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({ "detail": "slug taken" })))
        .mount(&server)
        .await;

    let err = api_for(&server).create_flow(&invoices_flow()).await.unwrap_err();
    assert!(matches!(err, FlowStudioError::Conflict { .. }));
    assert_eq!(err.user_message(), CONFLICT_MESSAGE);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn server_errors_map_to_transport_with_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flows/f-1"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let err = api_for(&server).get_flow(&FlowId::new("f-1")).await.unwrap_err();
    match err {
        FlowStudioError::Transport { message, status } => {
            assert_eq!(status, Some(503));
            assert!(message.contains("maintenance"));
        }
        other => panic!("expected transport error, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_flow_maps_to_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flows/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = api_for(&server).get_flow(&FlowId::new("gone")).await.unwrap_err();
    assert!(matches!(err, FlowStudioError::NotFound { .. }));
}

#[tokio::test]
async fn submit_returns_the_run_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/test/flow"))
        .and(body_partial_json(json!({ "flow_id": "f-7", "input": { "n": 1 } })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "workflow_id": "wf-9", "run_id": "r-1" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let request = TestFlowRequest {
        flow_definition: invoices_flow().definition,
        flow_id: Some(FlowId::new("f-7")),
        input: Some(json!({ "n": 1 })),
    };
    let key = api_for(&server).submit_test(&request).await.unwrap();
    assert_eq!(key, RunKey::new("wf-9", "r-1"));
}

#[tokio::test]
async fn pending_status_is_none_for_404_and_null() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/test/flow/r-404"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/test/flow/r-null"))
        .respond_with(ResponseTemplate::new(200).set_body_json(Value::Null))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/test/flow/r-done"))
        .and(query_param("workflow_id", "wf-1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "status": "COMPLETED", "result": { "rows": 2 } })),
        )
        .mount(&server)
        .await;

    let api = api_for(&server);
    assert_eq!(api.test_status(&RunKey::new("wf-1", "r-404")).await.unwrap(), None);
    assert_eq!(api.test_status(&RunKey::new("wf-1", "r-null")).await.unwrap(), None);
    let done = api
        .test_status(&RunKey::new("wf-1", "r-done"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(done.status, RunStatus::Completed);
    assert_eq!(done.result, Some(json!({ "rows": 2 })));
}

#[tokio::test]
async fn cancel_accepts_bare_and_status_acks() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/test/flow/cancel"))
        .and(body_partial_json(json!({ "workflow_id": "wf-1", "run_id": "r-1" })))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/test/flow/cancel"))
        .and(body_partial_json(json!({ "run_id": "r-2" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "CANCELED" })))
        .mount(&server)
        .await;

    let api = api_for(&server);
    let bare = api.cancel_test(&RunKey::new("wf-1", "r-1")).await.unwrap();
    assert_eq!(bare.status, None);
    let acked = api.cancel_test(&RunKey::new("wf-1", "r-2")).await.unwrap();
    assert_eq!(acked.status, Some(RunStatus::Terminated));
}

#[tokio::test]
async fn node_test_sends_type_config_and_input() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/test/node"))
        .and(body_partial_json(json!({
            "type": "filter",
            "config": { "condition": "amount > 10" },
            "input": { "amount": 12 }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "passed": true })))
        .expect(1)
        .mount(&server)
        .await;

    let result = api_for(&server)
        .test_node(&NodeTestRequest {
            kind: NodeKind::Filter,
            config: json!({ "condition": "amount > 10" }),
            input: json!({ "amount": 12 }),
        })
        .await
        .unwrap();
    assert_eq!(result["passed"], true);
}

#[tokio::test]
async fn polling_source_follows_a_run_to_completion() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/test/flow/r-1"))
        .respond_with(SequenceResponder::new(vec![
            ResponseTemplate::new(404),
            ResponseTemplate::new(200).set_body_json(json!({ "status": "RUNNING" })),
            ResponseTemplate::new(200).set_body_json(json!({ "status": "RUNNING" })),
            ResponseTemplate::new(200)
                .set_body_json(json!({ "status": "COMPLETED", "result": { "ok": true } })),
        ]))
        .expect(4)
        .mount(&server)
        .await;

    let api: Arc<dyn FlowApi> = Arc::new(api_for(&server));
    let policy = PollPolicy::default().interval(Duration::from_millis(10));
    let source = PollingStatusSource::new(api, policy);
    let statuses: Vec<RunStatus> = source
        .subscribe(RunKey::new("wf-1", "r-1"))
        .map(|item| item.unwrap().status)
        .collect()
        .await;
    assert_eq!(
        statuses,
        vec![RunStatus::Running, RunStatus::Running, RunStatus::Completed]
    );
}
