//! gateway.rs — opaque prompt→text model invocation.
//!
//! The rest of the pipeline only sees `ModelGateway`; the concrete provider
//! speaks the OpenAI-compatible chat-completions protocol over reqwest.
//! Any failure here is transient from the state machine's point of view:
//! the evaluator records it as a bad attempt and retries within its budget.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Invoke the model with a system and a user prompt; returns raw text.
    async fn invoke(&self, system_prompt: &str, user_prompt: &str) -> Result<String, GatewayError>;

    /// Version tag recorded on every persisted evaluation.
    fn version(&self) -> &str;
}

/// OpenAI-compatible provider (Chat Completions API).
pub struct OpenAiGateway {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    version: String,
}

impl OpenAiGateway {
    pub fn new(model: &str, api_key: &str, base_url: &str) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("content-evaluator/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Self {
            http,
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            version: format!("llm-{model}"),
        }
    }
}

#[async_trait]
impl ModelGateway for OpenAiGateway {
    async fn invoke(&self, system_prompt: &str, user_prompt: &str) -> Result<String, GatewayError> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }

        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: system_prompt,
                },
                Msg {
                    role: "user",
                    content: user_prompt,
                },
            ],
            temperature: 0.7,
        };

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(GatewayError::Status(resp.status().as_u16()));
        }

        let body: Resp = resp.json().await?;
        let content = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();
        if content.is_empty() {
            return Err(GatewayError::EmptyCompletion);
        }
        Ok(content)
    }

    fn version(&self) -> &str {
        &self.version
    }
}

/// Scripted gateway for tests and local runs: plays back a fixed sequence
/// of responses/failures, then repeats `fallthrough` once the script runs
/// out. Counts invocations so tests can assert on the retry budget.
pub struct MockGateway {
    script: std::sync::Mutex<std::collections::VecDeque<Result<String, String>>>,
    fallthrough: Option<String>,
    calls: std::sync::atomic::AtomicU32,
}

impl MockGateway {
    pub fn scripted<I>(script: I) -> Self
    where
        I: IntoIterator<Item = Result<String, String>>,
    {
        Self {
            script: std::sync::Mutex::new(script.into_iter().collect()),
            fallthrough: None,
            calls: std::sync::atomic::AtomicU32::new(0),
        }
    }

    /// Gateway that answers every call with the same response.
    pub fn always(response: &str) -> Self {
        Self {
            script: std::sync::Mutex::new(std::collections::VecDeque::new()),
            fallthrough: Some(response.to_string()),
            calls: std::sync::atomic::AtomicU32::new(0),
        }
    }

    /// Gateway that fails every call.
    pub fn always_failing() -> Self {
        Self::scripted(std::iter::empty())
    }

    pub fn invocations(&self) -> u32 {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelGateway for MockGateway {
    async fn invoke(&self, _system: &str, _user: &str) -> Result<String, GatewayError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let next = self.script.lock().expect("mock script lock").pop_front();
        match next {
            Some(Ok(text)) => Ok(text),
            Some(Err(_)) => Err(GatewayError::EmptyCompletion),
            None => match &self.fallthrough {
                Some(text) => Ok(text.clone()),
                None => Err(GatewayError::EmptyCompletion),
            },
        }
    }

    fn version(&self) -> &str {
        "mock-v1"
    }
}
