//! Generation backends and the answer streamer
//!
//! Provides:
//! - The `GenerationBackend` capability trait (local Ollama, Anthropic)
//! - Lazy line framing over an HTTP byte stream
//! - The answer streamer state machine with status, error and done events
//!
//! Provider identity is only looked at in [`create_backend`].

mod anthropic;
mod ollama;
pub mod streamer;

pub use anthropic::AnthropicBackend;
pub use ollama::OllamaBackend;
pub use streamer::{AnswerStreamer, StatusStage, StreamEvent};

use crate::config::{LlmConfig, LlmProvider};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::collections::VecDeque;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Tokens in generation order; errors are terminal
pub type TokenStream = BoxStream<'static, Result<String>>;

/// A provider that streams an answer for a system prompt and question
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Open the stream. Connection failures surface here, mid-stream
    /// failures as an `Err` item. Dropping the stream stops generation.
    async fn stream(&self, system_prompt: &str, question: &str) -> Result<TokenStream>;

    /// Provider name for logs and metrics
    fn name(&self) -> &'static str;
}

/// Build the configured backend
pub fn create_backend(config: &LlmConfig) -> Result<Arc<dyn GenerationBackend>> {
    let connect_timeout = Duration::from_secs(config.connect_timeout_secs);

    let backend: Arc<dyn GenerationBackend> = match config.provider {
        LlmProvider::Local => Arc::new(OllamaBackend::new(
            config.ollama_base_url.clone(),
            config.ollama_model.clone(),
            connect_timeout,
        )?),
        LlmProvider::Claude => {
            let api_key = config
                .anthropic_api_key
                .clone()
                .filter(|key| !key.is_empty())
                .ok_or_else(|| AppError::Configuration {
                    message: "llm.anthropic_api_key is required for the claude provider".to_string(),
                })?;
            Arc::new(AnthropicBackend::new(
                api_key,
                config.anthropic_base_url.clone(),
                config.anthropic_model.clone(),
                config.anthropic_version.clone(),
                config.max_tokens,
                connect_timeout,
            )?)
        }
    };

    info!(provider = backend.name(), "Generation backend configured");
    Ok(backend)
}

/// What one framed line means to a backend
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Frame {
    Token(String),
    /// Last token, carried on the closing line
    Final(String),
    Skip,
    Done,
}

struct Framer<S> {
    bytes: S,
    provider: &'static str,
    buffer: Vec<u8>,
    lines: VecDeque<String>,
    eof: bool,
    finished: bool,
}

impl<S> Framer<S> {
    fn split_lines(&mut self) {
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line).trim_end_matches(['\r', '\n']).to_string();
            self.lines.push_back(line);
        }
    }
}

/// Turn a lazily read body into tokens, one parsed line at a time
///
/// The body is only polled when the consumer asks for the next token.
/// A body that ends before `parse` reports `Frame::Done` is an error.
pub(crate) fn framed_tokens<S, B, E, F>(bytes: S, provider: &'static str, parse: F) -> TokenStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
    F: Fn(&str) -> Result<Frame> + Send + Sync + 'static,
{
    let framer = Framer {
        bytes: Box::pin(bytes),
        provider,
        buffer: Vec::new(),
        lines: VecDeque::new(),
        eof: false,
        finished: false,
    };

    stream::unfold((framer, parse), |(mut framer, parse)| async move {
        loop {
            if framer.finished {
                return None;
            }

            if let Some(line) = framer.lines.pop_front() {
                if line.trim().is_empty() {
                    continue;
                }
                match parse(&line) {
                    Ok(Frame::Token(token)) => return Some((Ok(token), (framer, parse))),
                    Ok(Frame::Final(token)) => {
                        framer.finished = true;
                        return Some((Ok(token), (framer, parse)));
                    }
                    Ok(Frame::Skip) => continue,
                    Ok(Frame::Done) => {
                        framer.finished = true;
                        return None;
                    }
                    Err(e) => {
                        framer.finished = true;
                        return Some((Err(e), (framer, parse)));
                    }
                }
            }

            if framer.eof {
                framer.finished = true;
                let err = AppError::generation(framer.provider, "stream ended before completion");
                return Some((Err(err), (framer, parse)));
            }

            match framer.bytes.next().await {
                Some(Ok(chunk)) => {
                    framer.buffer.extend_from_slice(chunk.as_ref());
                    framer.split_lines();
                }
                Some(Err(e)) => {
                    framer.finished = true;
                    let err = AppError::generation(framer.provider, format!("stream read failed: {}", e));
                    return Some((Err(err), (framer, parse)));
                }
                None => {
                    framer.eof = true;
                    if !framer.buffer.is_empty() {
                        framer.buffer.push(b'\n');
                        framer.split_lines();
                    }
                }
            }
        }
    })
    .boxed()
}

/// Reject a non-success response with its body
pub(crate) async fn check_status(provider: &'static str, response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await;
    Err(AppError::generation(provider, status_message(status, body)))
}

fn status_message<E: Display>(status: reqwest::StatusCode, body: std::result::Result<String, E>) -> String {
    match body {
        Ok(body) => format!("HTTP {}: {}", status, body),
        Err(e) => format!("HTTP {}: <body unavailable: {}>", status, e),
    }
}
