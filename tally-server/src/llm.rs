//! Hosted-model client and reply normalization.
//!
//! Every caller goes through [`ModelClient`]; every reply comes back as a
//! [`ModelReply`] so downstream code never touches raw response shapes.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::LlmSection;

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// A model reply normalized to one of two shapes: plain text, or a
/// structured value the API returned directly.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelReply {
    Text(String),
    Structured(Value),
}

#[derive(Debug, Error)]
pub enum ReplyError {
    #[error("model reply is not valid JSON: {0}")]
    NotJson(#[source] serde_json::Error),
}

impl ModelReply {
    /// The reply as trimmed text
    pub fn text(&self) -> String {
        match self {
            ModelReply::Text(s) => s.trim().to_string(),
            ModelReply::Structured(v) => v.to_string(),
        }
    }

    /// The reply as JSON. Text replies may be wrapped in a fenced code
    /// block; the fence is stripped before parsing.
    pub fn json_payload(&self) -> Result<Value, ReplyError> {
        match self {
            ModelReply::Structured(v) => Ok(v.clone()),
            ModelReply::Text(s) => {
                serde_json::from_str(strip_fences(s)).map_err(ReplyError::NotJson)
            }
        }
    }
}

/// Strip a surrounding ``` fence (with optional `json` tag) from a reply
fn strip_fences(s: &str) -> &str {
    let s = s.trim();
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    match rest.rsplit_once("```") {
        Some((body, _)) => body.trim(),
        None => rest.trim(),
    }
}

/// The hosted text-completion collaborator
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, req: CompletionRequest) -> Result<ModelReply>;
}

/// OpenAI-compatible chat-completions client
pub struct HostedModel {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl HostedModel {
    pub fn from_config(llm: &LlmSection) -> Result<Self> {
        let api_key = std::env::var(&llm.api_key_env)
            .with_context(|| format!("{} is not set", llm.api_key_env))?;
        Ok(Self {
            client: reqwest::Client::new(),
            base_url: llm.base_url.trim_end_matches('/').to_string(),
            model: llm.model.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl ModelClient for HostedModel {
    async fn complete(&self, req: CompletionRequest) -> Result<ModelReply> {
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: &'a [ChatMessage],
            max_tokens: u32,
            temperature: f32,
        }

        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }

        #[derive(Deserialize)]
        struct Choice {
            message: MsgOut,
        }

        #[derive(Deserialize)]
        struct MsgOut {
            content: Option<Value>,
        }

        let body = Req {
            model: &self.model,
            messages: &req.messages,
            max_tokens: req.max_tokens,
            temperature: req.temperature,
        };

        let url = format!("{}/v1/chat/completions", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("model request")?;

        let status = resp.status();
        if !status.is_success() {
            let txt = resp.text().await.unwrap_or_default();
            bail!("model error: {status} {txt}");
        }

        let out: Resp = resp.json().await.context("parse model response")?;
        let content = out
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content);

        Ok(match content {
            Some(Value::String(s)) => ModelReply::Text(s.trim().to_string()),
            Some(other) => ModelReply::Structured(other),
            None => ModelReply::Text(String::new()),
        })
    }
}
