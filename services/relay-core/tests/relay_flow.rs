//! End-to-end tests for the relay core against a fake Ollama endpoint.

use std::sync::Arc;
use std::time::Duration;

use relay_core::{
    CommandRouter, InboundEvent, OllamaClient, Relay, SamplingOptions, SessionStore, Turn,
    APOLOGY_REPLY,
};
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ALLOWED: &str = "@alice:example.org";
const ROOM: &str = "!dm:example.org";

fn build_relay(ollama_url: &str, prompt: &str) -> Relay {
    let llm = Arc::new(OllamaClient::new(ollama_url, "llama3", Duration::from_secs(5)));
    let router = CommandRouter::new(llm, SamplingOptions::default());
    Relay::new(ALLOWED, Arc::new(SessionStore::new(prompt)), router)
}

fn dm(body: &str) -> InboundEvent {
    InboundEvent {
        sender: ALLOWED.into(),
        room_id: ROOM.into(),
        participant_count: 2,
        body: body.into(),
    }
}

async fn history_of(relay: &Relay) -> Vec<Turn> {
    let session = relay.sessions().get_or_create(ALLOWED);
    let session = session.lock().await;
    session.history().to_vec()
}

// ─────────────────────────────────────────────────────────────────────────────
// Chat exchange
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_chat_reply_is_recorded_and_returned() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": {"role": "assistant", "content": "4"},
            "done": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let relay = build_relay(&server.uri(), "be terse");
    let reply = relay.handle(dm("What is 2+2?")).await.unwrap();

    assert_eq!(reply.room_id, ROOM);
    assert_eq!(reply.text, "4");
    assert_eq!(
        history_of(&relay).await,
        vec![Turn::user("What is 2+2?"), Turn::assistant("4")]
    );
}

#[tokio::test]
async fn test_system_prompt_is_sent_but_never_stored() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": {"role": "assistant", "content": "hello"},
            "done": true
        })))
        .mount(&server)
        .await;

    let relay = build_relay(&server.uri(), "be terse");
    relay.handle(dm("hi")).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let body: Value = requests[0].body_json().unwrap();
    assert_eq!(
        body["messages"],
        json!([
            {"role": "system", "content": "be terse"},
            {"role": "user", "content": "hi"}
        ])
    );
    assert_eq!(body["stream"], false);

    assert!(history_of(&relay)
        .await
        .iter()
        .all(|t| t.content != "be terse"));
}

#[tokio::test]
async fn test_second_turn_carries_full_history() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": {"role": "assistant", "content": "noted"},
            "done": true
        })))
        .mount(&server)
        .await;

    let relay = build_relay(&server.uri(), "p");
    relay.handle(dm("first")).await.unwrap();
    relay.handle(dm("/setprompt new prompt")).await.unwrap();
    relay.handle(dm("second")).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let body: Value = requests[1].body_json().unwrap();
    assert_eq!(
        body["messages"],
        json!([
            {"role": "system", "content": "new prompt"},
            {"role": "user", "content": "first"},
            {"role": "assistant", "content": "noted"},
            {"role": "user", "content": "second"}
        ])
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Failure handling
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_unreachable_endpoint_yields_apology() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let uri = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let relay = build_relay(&uri, "p");
    let reply = relay.handle(dm("anyone there?")).await.unwrap();

    assert_eq!(reply.text, APOLOGY_REPLY);
    assert_eq!(history_of(&relay).await, vec![Turn::user("anyone there?")]);
}

#[tokio::test]
async fn test_server_error_yields_apology() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let relay = build_relay(&server.uri(), "p");
    let reply = relay.handle(dm("hi")).await.unwrap();

    assert_eq!(reply.text, APOLOGY_REPLY);
    assert_eq!(history_of(&relay).await, vec![Turn::user("hi")]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands and filtering
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_commands_never_reach_the_model() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let relay = build_relay(&server.uri(), "p");
    for body in ["/help", "/viewprompt", "/viewconversation", "/clear", "/setprompt x"] {
        assert!(relay.handle(dm(body)).await.is_some());
    }
}

#[tokio::test]
async fn test_group_room_and_stranger_are_dropped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let relay = build_relay(&server.uri(), "p");

    let mut group = dm("hi all");
    group.participant_count = 3;
    assert!(relay.handle(group).await.is_none());

    let mut stranger = dm("hi");
    stranger.sender = "@mallory:example.org".into();
    assert!(relay.handle(stranger).await.is_none());

    assert!(relay.handle(dm("")).await.is_none());
    assert!(relay.sessions().is_empty());
}
