use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use warp::Filter;

use forge_core::{
    CapabilityError, CodeGenerator, GenerationRequest, TestGenerator, TestPlan, TestRequest,
    UplinkSettings,
};
use forge_uplink::{ChatClient, RetryPolicy, Uplink};

#[derive(Debug, Clone)]
struct Recorded {
    auth: Option<String>,
    body: Value,
}

/// Chat endpoint replaying canned responses; the last one repeats
struct FakeEndpoint {
    url: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl FakeEndpoint {
    fn start(replies: Vec<(u16, Value)>) -> Self {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let queue = Arc::new(Mutex::new(VecDeque::from(replies)));
        let log = requests.clone();
        let route = warp::post()
            .and(warp::path!("v1" / "chat" / "completions"))
            .and(warp::header::optional::<String>("authorization"))
            .and(warp::body::json())
            .map(move |auth: Option<String>, body: Value| {
                log.lock().push(Recorded { auth, body });
                let mut queue = queue.lock();
                let (status, reply) = if queue.len() > 1 {
                    queue.pop_front().unwrap()
                } else {
                    queue.front().cloned().unwrap()
                };
                warp::reply::with_status(
                    warp::reply::json(&reply),
                    warp::http::StatusCode::from_u16(status).unwrap(),
                )
            });
        let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);
        Self {
            url: format!("http://{addr}/v1/chat/completions"),
            requests,
        }
    }

    fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().clone()
    }

    fn uplink(&self, key: Option<&str>, retry: RetryPolicy) -> Uplink {
        let settings = UplinkSettings {
            endpoint: self.url.clone(),
            model: "forge-test-model".into(),
            timeout_secs: 5,
            ..UplinkSettings::default()
        };
        let client = ChatClient::new(&settings, key.map(str::to_string))
            .unwrap()
            .with_retry(retry);
        Uplink::new(client)
    }
}

fn chat_reply(content: Option<&str>) -> Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }]
    })
}

fn generation_request() -> GenerationRequest {
    GenerationRequest {
        task: "add function add(a, b)".into(),
        target: PathBuf::from("app.py"),
        file_content: "# empty\n".into(),
        prior_error: None,
        prior_code: None,
        attempt: 1,
    }
}

fn test_request() -> TestRequest {
    TestRequest {
        interface: "def add(a, b):".into(),
        task: "add function add(a, b)".into(),
        target: PathBuf::from("app.py"),
        session: "0badc0de".into(),
        observation_path: ".forge/sessions/0badc0de/observations.json".into(),
        directive: "write a JSON array".into(),
        prior_error: Some("Linter error:\nE999".into()),
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        base_delay: Duration::from_millis(10),
    }
}

#[tokio::test]
async fn test_generator_round_trip() {
    let code = "```python\ndef add(a, b):\n    return a + b\n```";
    let endpoint = FakeEndpoint::start(vec![(200, chat_reply(Some(code)))]);
    let uplink = endpoint.uplink(Some("sk-test"), RetryPolicy::none());

    let reply = uplink.generate(&generation_request()).await.unwrap();
    assert_eq!(reply, code);

    let requests = endpoint.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].auth.as_deref(), Some("Bearer sk-test"));
    let body = &requests[0].body;
    assert_eq!(body["model"], "forge-test-model");
    assert_eq!(body["messages"][0]["role"], "system");
    assert!(body["messages"][1]["content"]
        .as_str()
        .unwrap()
        .contains("add function add(a, b)"));
    assert!(body.get("response_format").is_none());
}

#[tokio::test]
async fn test_tester_returns_plan_payload() {
    let plan = json!({
        "test_file_path": "test_0badc0de.py",
        "test_code": "import json\n",
        "lint_command": "python -m py_compile test_0badc0de.py",
        "test_command": "python test_0badc0de.py",
    });
    let fenced = format!("```json\n{plan}\n```");
    let endpoint = FakeEndpoint::start(vec![(200, chat_reply(Some(&fenced)))]);
    let uplink = endpoint.uplink(None, RetryPolicy::none());

    let payload = uplink.generate_tests(&test_request()).await.unwrap();
    let parsed = TestPlan::from_value(payload).unwrap();
    assert_eq!(parsed.test_file_path, "test_0badc0de.py");

    let requests = endpoint.requests();
    assert!(requests[0].auth.is_none());
    assert_eq!(requests[0].body["response_format"]["type"], "json_object");
    let user = requests[0].body["messages"][1]["content"].as_str().unwrap();
    assert!(user.contains("E999"));
}

#[tokio::test]
async fn test_transient_status_is_retried() {
    let endpoint = FakeEndpoint::start(vec![
        (503, json!({ "error": "overloaded" })),
        (429, json!({ "error": "slow down" })),
        (200, chat_reply(Some("x = 2"))),
    ]);
    let uplink = endpoint.uplink(None, fast_retry());

    let reply = uplink.generate(&generation_request()).await.unwrap();
    assert_eq!(reply, "x = 2");
    assert_eq!(endpoint.requests().len(), 3);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let endpoint = FakeEndpoint::start(vec![(500, json!({ "error": "down" }))]);
    let uplink = endpoint.uplink(None, fast_retry());

    let err = uplink.generate(&generation_request()).await.unwrap_err();
    assert!(matches!(err, CapabilityError::Status { status: 500, .. }), "{err}");
    assert_eq!(endpoint.requests().len(), 3);
}

#[tokio::test]
async fn test_client_errors_fail_fast() {
    let endpoint = FakeEndpoint::start(vec![(401, json!({ "error": "bad key" }))]);
    let uplink = endpoint.uplink(Some("wrong"), fast_retry());

    match uplink.generate(&generation_request()).await {
        Err(CapabilityError::Status { status, body }) => {
            assert_eq!(status, 401);
            assert!(body.contains("bad key"));
        }
        other => panic!("expected status error, got {other:?}"),
    }
    assert_eq!(endpoint.requests().len(), 1);
}

#[tokio::test]
async fn test_empty_and_undecodable_replies() {
    let endpoint = FakeEndpoint::start(vec![(200, chat_reply(None))]);
    let uplink = endpoint.uplink(None, RetryPolicy::none());
    assert_eq!(
        uplink.generate(&generation_request()).await.unwrap_err(),
        CapabilityError::Empty
    );

    let endpoint = FakeEndpoint::start(vec![(200, chat_reply(Some("I cannot help with that.")))]);
    let uplink = endpoint.uplink(None, RetryPolicy::none());
    assert!(matches!(
        uplink.generate_tests(&test_request()).await,
        Err(CapabilityError::Decode(_))
    ));
}

#[tokio::test]
async fn test_unreachable_endpoint_is_transport_error() {
    let settings = UplinkSettings {
        endpoint: "http://127.0.0.1:9/v1/chat/completions".into(),
        timeout_secs: 2,
        ..UplinkSettings::default()
    };
    let uplink = Uplink::new(
        ChatClient::new(&settings, None)
            .unwrap()
            .with_retry(RetryPolicy::none()),
    );
    let err = uplink.generate(&generation_request()).await.unwrap_err();
    assert!(
        matches!(err, CapabilityError::Transport(_) | CapabilityError::Timeout(_)),
        "{err}"
    );
    assert!(err.is_retryable());
}
