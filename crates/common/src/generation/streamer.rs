//! Answer Streamer - drives one generation and frames it for the caller
//!
//! Event order is `Status* -> Token* -> (Error)? -> Done`. The stream is
//! pull-based: nothing is requested from the backend until the caller polls,
//! and dropping the stream drops the backend's body, ending generation.

use super::{GenerationBackend, TokenStream};
use crate::context::{build_system_prompt, resolve_audience, ContextAssembler, ContextPayload, ContextQuery};
use crate::errors::AppError;
use crate::metrics;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use tracing::{info, warn};

pub const DONE_SENTINEL: &str = "[DONE]";
pub const ERROR_PREFIX: &str = "[ERROR] ";
pub const STATUS_PREFIX: &str = "[STATUS] ";

/// Progress checkpoints emitted before any content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusStage {
    Retrieving,
    Generating,
}

impl StatusStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusStage::Retrieving => "retrieving",
            StatusStage::Generating => "generating",
        }
    }
}

/// One caller-visible event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Status(StatusStage),
    Token(String),
    Error(String),
    Done,
}

impl StreamEvent {
    /// SSE `data:` payload; token newlines are escaped so one event stays one line
    pub fn to_sse_data(&self) -> String {
        match self {
            StreamEvent::Status(stage) => format!("{}{}", STATUS_PREFIX, stage.as_str()),
            StreamEvent::Token(token) => token.replace('\n', "\\n"),
            StreamEvent::Error(message) => format!("{}{}", ERROR_PREFIX, message.replace('\n', " ")),
            StreamEvent::Done => DONE_SENTINEL.to_string(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done)
    }
}

/// Records the generation outcome exactly once, when the stream goes away
struct OutcomeGuard {
    provider: &'static str,
    tokens: u64,
    outcome: Option<&'static str>,
}

impl Drop for OutcomeGuard {
    fn drop(&mut self) {
        let outcome = self.outcome.unwrap_or("cancelled");
        metrics::record_generation(self.provider, outcome, self.tokens);
        if outcome == "cancelled" {
            info!(provider = self.provider, tokens = self.tokens, "Generation cancelled by caller");
        } else {
            info!(provider = self.provider, tokens = self.tokens, outcome = outcome, "Generation finished");
        }
    }
}

enum Phase {
    Start(ContextQuery),
    Assemble(ContextQuery),
    Connect { prompt: String, question: String },
    Streaming(TokenStream),
    Finish,
    Finished,
}

struct Machine {
    assembler: Option<ContextAssembler>,
    backend: Arc<dyn GenerationBackend>,
    phase: Phase,
    guard: OutcomeGuard,
}

impl Machine {
    fn fail(&mut self, err: AppError) -> StreamEvent {
        warn!(provider = self.backend.name(), error = %err, "Answer stream failed");
        self.guard.outcome = Some("error");
        self.phase = Phase::Finish;
        StreamEvent::Error(err.to_string())
    }

    async fn step(&mut self) -> Option<StreamEvent> {
        loop {
            match std::mem::replace(&mut self.phase, Phase::Finished) {
                Phase::Start(query) => {
                    self.phase = Phase::Assemble(query);
                    return Some(StreamEvent::Status(StatusStage::Retrieving));
                }
                Phase::Assemble(query) => {
                    let Some(assembler) = self.assembler.as_ref() else {
                        let err = AppError::Internal {
                            message: "no context assembler configured".to_string(),
                        };
                        return Some(self.fail(err));
                    };
                    match assembler.assemble(&query).await {
                        Ok(payload) => {
                            self.phase = Phase::Connect {
                                prompt: build_system_prompt(&payload),
                                question: query.question,
                            };
                            return Some(StreamEvent::Status(StatusStage::Generating));
                        }
                        Err(e) => return Some(self.fail(e)),
                    }
                }
                Phase::Connect { prompt, question } => match self.backend.stream(&prompt, &question).await {
                    Ok(tokens) => self.phase = Phase::Streaming(tokens),
                    Err(e) => return Some(self.fail(e)),
                },
                Phase::Streaming(mut tokens) => match tokens.next().await {
                    Some(Ok(token)) => {
                        self.guard.tokens += 1;
                        self.phase = Phase::Streaming(tokens);
                        return Some(StreamEvent::Token(token));
                    }
                    Some(Err(e)) => return Some(self.fail(e)),
                    None => {
                        self.guard.outcome = Some("done");
                        self.phase = Phase::Finished;
                        return Some(StreamEvent::Done);
                    }
                },
                Phase::Finish => {
                    self.phase = Phase::Finished;
                    return Some(StreamEvent::Done);
                }
                Phase::Finished => return None,
            }
        }
    }
}

/// Streams answers through one configured backend
#[derive(Clone)]
pub struct AnswerStreamer {
    assembler: Option<ContextAssembler>,
    backend: Arc<dyn GenerationBackend>,
}

impl AnswerStreamer {
    pub fn new(assembler: ContextAssembler, backend: Arc<dyn GenerationBackend>) -> Self {
        Self {
            assembler: Some(assembler),
            backend,
        }
    }

    /// Streamer for already-assembled payloads only
    pub fn without_assembler(backend: Arc<dyn GenerationBackend>) -> Self {
        Self {
            assembler: None,
            backend,
        }
    }

    pub fn provider(&self) -> &'static str {
        self.backend.name()
    }

    pub fn assembler(&self) -> Option<&ContextAssembler> {
        self.assembler.as_ref()
    }

    fn run(&self, phase: Phase) -> BoxStream<'static, StreamEvent> {
        let machine = Machine {
            assembler: self.assembler.clone(),
            backend: Arc::clone(&self.backend),
            phase,
            guard: OutcomeGuard {
                provider: self.backend.name(),
                tokens: 0,
                outcome: None,
            },
        };

        stream::unfold(machine, |mut machine| async move {
            let event = machine.step().await?;
            Some((event, machine))
        })
        .boxed()
    }

    /// Stream an answer for an assembled payload: tokens, then `Done`
    pub fn generate(&self, payload: &ContextPayload, question: &str) -> BoxStream<'static, StreamEvent> {
        self.run(Phase::Connect {
            prompt: build_system_prompt(payload),
            question: question.to_string(),
        })
    }

    /// Full request: status checkpoints, context assembly, then generation
    pub fn respond(&self, query: ContextQuery) -> BoxStream<'static, StreamEvent> {
        let audience = resolve_audience(query.audience.as_deref(), query.job_title.as_deref(), &query.question);
        metrics::record_chat_request(audience.as_str());
        self.run(Phase::Start(query))
    }
}
