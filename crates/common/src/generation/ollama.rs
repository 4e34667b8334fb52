//! Local generation through Ollama's streaming chat endpoint

use super::{check_status, framed_tokens, Frame, GenerationBackend, TokenStream};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const PROVIDER: &str = "ollama";

pub struct OllamaBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    stream: bool,
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

/// One NDJSON line of a streaming chat response
fn parse_line(line: &str) -> Result<Frame> {
    let chunk: ChatChunk = serde_json::from_str(line)
        .map_err(|e| AppError::generation(PROVIDER, format!("malformed stream line: {}", e)))?;

    if let Some(error) = chunk.error {
        return Err(AppError::generation(PROVIDER, error));
    }

    let content = chunk.message.map(|m| m.content).unwrap_or_default();
    Ok(match (content.is_empty(), chunk.done) {
        (false, false) => Frame::Token(content),
        (false, true) => Frame::Final(content),
        (true, true) => Frame::Done,
        (true, false) => Frame::Skip,
    })
}

impl OllamaBackend {
    pub fn new(base_url: String, model: String, connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().connect_timeout(connect_timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        })
    }
}

#[async_trait]
impl GenerationBackend for OllamaBackend {
    async fn stream(&self, system_prompt: &str, question: &str) -> Result<TokenStream> {
        let url = format!("{}/api/chat", self.base_url);
        debug!(model = %self.model, "Opening Ollama chat stream");

        let response = self
            .client
            .post(&url)
            .json(&ChatRequest {
                model: &self.model,
                messages: [
                    ChatMessage {
                        role: "system",
                        content: system_prompt,
                    },
                    ChatMessage {
                        role: "user",
                        content: question,
                    },
                ],
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
