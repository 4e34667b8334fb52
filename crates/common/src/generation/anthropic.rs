//! Cloud generation through the Anthropic Messages API (server-sent events)

use super::{check_status, framed_tokens, Frame, GenerationBackend, TokenStream};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const PROVIDER: &str = "anthropic";

pub struct AnthropicBackend {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    version: String,
    max_tokens: u32,
}

#[derive(Serialize)]
struct UserMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: [UserMessage<'a>; 1],
    stream: bool,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEventBody {
    ContentBlockDelta { delta: Delta },
    MessageStop,
    Error { error: ApiError },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

/// One SSE line; only `data:` lines carry events
fn parse_line(line: &str) -> Result<Frame> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(Frame::Skip);
    };

    let event: StreamEventBody = serde_json::from_str(data.trim())
        .map_err(|e| AppError::generation(PROVIDER, format!("malformed event: {}", e)))?;

    Ok(match event {
        StreamEventBody::ContentBlockDelta {
            delta: Delta::TextDelta { text },
        } if !text.is_empty() => Frame::Token(text),
        StreamEventBody::MessageStop => Frame::Done,
        StreamEventBody::Error { error } => return Err(AppError::generation(PROVIDER, error.message)),
        _ => Frame::Skip,
    })
}

impl AnthropicBackend {
    pub fn new(
        api_key: String,
        base_url: String,
        model: String,
        version: String,
        max_tokens: u32,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().connect_timeout(connect_timeout).build()?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            version,
            max_tokens,
        })
    }
}

#[async_trait]
impl GenerationBackend for AnthropicBackend {
    async fn stream(&self, system_prompt: &str, question: &str) -> Result<TokenStream> {
        let url = format!("{}/v1/messages", self.base_url);
        debug!(model = %self.model, "Opening Anthropic message stream");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.version)
            .json(&MessagesRequest {
                model: &self.model,
                max_tokens: self.max_tokens,
                system: system_prompt,
                messages: [UserMessage {
                    role: "user",
                    content: question,
                }],
                stream: true,
            })
            .send()
            .await
            .map_err(|e| AppError::generation(PROVIDER, format!("request failed: {}", e)))?;

        let response = check_status(PROVIDER, response).await?;
        Ok(framed_tokens(response.bytes_stream(), PROVIDER, parse_line))
    }

    fn name(&self) -> &'static str {
        PROVIDER
    }
}
