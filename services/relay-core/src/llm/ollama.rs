//! Ollama chat client.
//!
//! Talks to a local Ollama instance over `POST /api/chat` with streaming
//! disabled.

use super::{build_messages, InferenceError, LlmClient, SamplingOptions};
use crate::session::Turn;
use async_trait::async_trait;
use relay_common::LlmConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Ollama client bound to one model.
pub struct OllamaClient {
    base_url: String,
    model: String,
    client: Client,
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<Turn>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    seed: u64,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaResponseMessage,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaResponseMessage {
    #[serde(default)]
    role: String,
    content: String,
}

impl OllamaClient {
    /// Create a new Ollama client.
    ///
    /// `base_url` is the Ollama root, e.g. `http://localhost:11434`.
    pub fn new(base_url: &str, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.into(),
            client: Client::builder()
                .timeout(timeout)
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    pub fn from_config(config: &LlmConfig) -> Self {
        Self::new(
            &config.endpoint,
            config.model.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    fn build_request<'a>(
        &'a self,
        history: &[Turn],
        system_prompt: &str,
        options: &SamplingOptions,
    ) -> OllamaChatRequest<'a> {
        OllamaChatRequest {
            model: &self.model,
            messages: build_messages(history, system_prompt),
            stream: false,
            options: OllamaOptions {
                temperature: options.temperature,
                top_k: options.top_k,
                top_p: options.top_p,
                seed: options.resolve_seed(),
            },
        }
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn query(
        &self,
        history: &[Turn],
        system_prompt: &str,
        options: &SamplingOptions,
    ) -> Result<String, InferenceError> {
        let start = Instant::now();
        let url = self.chat_url();
        let request = self.build_request(history, system_prompt, options);

        tracing::debug!(
            model = %self.model,
            messages = request.messages.len(),
            seed = request.options.seed,
            "Sending chat request to Ollama"
        );

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| InferenceError::Transport {
                endpoint: url.clone(),
                message: if e.is_timeout() {
                    format!("timed out: {e}")
                } else {
                    e.to_string()
                },
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let result: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::Decode(e.to_string()))?;

        if !result.done {
            tracing::debug!("Ollama response not marked done");
        }

        tracing::debug!(
            model = %self.model,
            role = %result.message.role,
            latency_ms = start.elapsed().as_millis() as u64,
            "Received Ollama reply"
        );

        Ok(result.message.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base_url: &str) -> OllamaClient {
        OllamaClient::new(base_url, "llama3", Duration::from_secs(5))
    }

    #[test]
    fn strips_trailing_slash() {
        let c = client("http://192.168.1.100:11434/");
        assert_eq!(c.chat_url(), "http://192.168.1.100:11434/api/chat");
    }

    #[test]
    fn provider_name_is_ollama() {
        assert_eq!(client("http://localhost:11434").name(), "ollama");
    }

    #[test]
    fn request_serializes_system_first_without_streaming() {
        let c = client("http://localhost:11434");
        let options = SamplingOptions {
            temperature: Some(0.7),
            top_k: None,
            top_p: Some(0.9),
            seed: Some(1234),
        };
        let request = c.build_request(&[Turn::user("hi")], "be terse", &options);
        let json: Value = serde_json::to_value(&request).unwrap();

        assert_eq!(json["model"], "llama3");
        assert_eq!(json["stream"], false);
        assert_eq!(
            json["messages"],
            json!([
                {"role": "system", "content": "be terse"},
                {"role": "user", "content": "hi"}
            ])
        );
        assert_eq!(json["options"]["temperature"], 0.7);
        assert_eq!(json["options"]["seed"], 1234);
        assert!(json["options"].get("top_k").is_none());
    }

    #[test]
    fn response_deserializes() {
        let raw = r#"{"message":{"role":"assistant","content":"Hello from Ollama!"},"done":true,"eval_count":5}"#;
        let resp: OllamaChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.message.content, "Hello from Ollama!");
        assert_eq!(resp.message.role, "assistant");
        assert!(resp.done);
    }

    #[tokio::test]
    async fn query_returns_reply_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(json!({
                "model": "llama3",
                "stream": false,
                "messages": [
                    {"role": "system", "content": "be terse"},
                    {"role": "user", "content": "What is 2+2?"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message": {"role": "assistant", "content": "4"},
                "done": true
            })))
            .expect(1)
            .mount(&server)
            .await;

        let reply = client(&server.uri())
            .query(
                &[Turn::user("What is 2+2?")],
                "be terse",
                &SamplingOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(reply, "4");
    }

    #[tokio::test]
    async fn each_request_draws_its_own_seed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message": {"role": "assistant", "content": "ok"},
                "done": true
            })))
            .mount(&server)
            .await;

        let c = client(&server.uri());
        for _ in 0..2 {
            c.query(&[Turn::user("hi")], "", &SamplingOptions::default())
                .await
                .unwrap();
        }

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
        for request in &requests {
            let body: Value = request.body_json().unwrap();
            let seed = body["options"]["seed"].as_u64().unwrap();
            assert!(seed < crate::llm::SEED_RANGE);
        }
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(404).set_body_string("model not found"))
            .mount(&server)
            .await;

        let err = client(&server.uri())
            .query(&[Turn::user("hi")], "", &SamplingOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            InferenceError::Status { status: 404, ref body } if body == "model not found"
        ));
    }

    #[tokio::test]
    async fn malformed_body_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = client(&server.uri())
            .query(&[Turn::user("hi")], "", &SamplingOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, InferenceError::Decode(_)));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let uri = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let err = client(&uri)
            .query(&[Turn::user("hi")], "", &SamplingOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_transport());
    }
}
