//! Grounded question answering bound to one document.
//!
//! [`GroundedAssistant::bind`] acquires a [`GroundedSession`] for a
//! loaded document; the session answers free-form questions about it
//! until [`GroundedSession::clear`] releases it. A session holds
//! conversation state and must only be used by one task at a time.
//!
//! [`ProviderAssistant`] implements the pair on top of any
//! `edgequake-llm` chat provider. Binding places the assistant
//! instructions and the document text in system messages; each question
//! is appended to a running thread. A [`RateLimiter`] starts a fresh
//! thread every `max_requests_per_session` questions, and each question
//! gets a fixed number of attempts with a fixed pause between them.

use crate::config::ExtractionConfig;
use crate::error::ExtractError;
use crate::pipeline::document::LoadedDocument;
use crate::prompts::{DEFAULT_SYSTEM_PROMPT, DOCUMENT_HEADER};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Failures of the grounded Q&A collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The document could not be bound (no text, upload refused, ...).
    #[error("cannot bind document: {0}")]
    Bind(String),

    /// Every attempt of one question failed.
    #[error("no answer after {attempts} attempts: {detail}")]
    Exhausted { attempts: u32, detail: String },

    /// The session was already released.
    #[error("session already released")]
    Closed,
}

/// Binds documents into question-answering sessions.
#[async_trait]
pub trait GroundedAssistant: Send + Sync {
    async fn bind(&self, document: &LoadedDocument)
    -> Result<Box<dyn GroundedSession>, SessionError>;
}

/// One document-bound conversation.
#[async_trait]
pub trait GroundedSession: Send {
    /// Ask one question; the answer is free text that may hold a JSON block.
    async fn send(&mut self, question: &str) -> Result<String, SessionError>;

    /// Release the session. Later `send` calls fail with [`SessionError::Closed`].
    async fn clear(&mut self);
}

// ── Rate limiter ─────────────────────────────────────────────────────────

/// Request counter that rotates the conversation every `max` questions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimiter {
    count: u32,
    max: u32,
}

impl RateLimiter {
    pub fn new(max: u32) -> Self {
        Self {
            count: 0,
            max: max.max(1),
        }
    }

    /// Count one question. Returns true when a fresh thread must be started
    /// first (the first question, and every `max`-th after it).
    pub fn acquire(&mut self) -> bool {
        if self.count >= self.max {
            self.count = 0;
        }
        let rotate = self.count == 0;
        self.count += 1;
        rotate
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

// ── Provider-backed assistant ────────────────────────────────────────────

/// Request settings shared by every session of one assistant.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub system_prompt: String,
    pub temperature: f32,
    pub max_tokens: usize,
    pub attempts_per_request: u32,
    pub pause_after_attempt: Duration,
    pub pause_before_request: Duration,
    pub max_requests_per_session: u32,
    pub max_document_chars: usize,
}

impl SessionSettings {
    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self {
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            attempts_per_request: config.attempts_per_request.max(1),
            pause_after_attempt: config.pause_after_attempt(),
            pause_before_request: config.pause_before_request(),
            max_requests_per_session: config.max_requests_per_session,
            max_document_chars: config.max_document_chars,
        }
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

/// [`GroundedAssistant`] over an `edgequake-llm` chat provider.
pub struct ProviderAssistant {
    provider: Arc<dyn LLMProvider>,
    settings: SessionSettings,
}

impl ProviderAssistant {
    pub fn new(provider: Arc<dyn LLMProvider>, settings: SessionSettings) -> Self {
        Self { provider, settings }
    }

    /// Resolve the provider from `config` and wrap it.
    pub fn from_config(config: &ExtractionConfig) -> Result<Self, ExtractError> {
        let provider = resolve_provider(config)?;
        Ok(Self::new(provider, SessionSettings::from_config(config)))
    }
}

/// Cut `text` to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte, _)) => &text[..byte],
        None => text,
    }
}

#[async_trait]
impl GroundedAssistant for ProviderAssistant {
    async fn bind(
        &self,
        document: &LoadedDocument,
    ) -> Result<Box<dyn GroundedSession>, SessionError> {
        let text = document.marked_text();
        if document.pages.iter().all(|p| p.trim().is_empty()) {
            return Err(SessionError::Bind(format!(
                "'{}' has no extractable text",
                document.path.display()
            )));
        }
        let bound = truncate_chars(&text, self.settings.max_document_chars);
        if bound.len() < text.len() {
            warn!(
                "Document text truncated to {} characters for the session",
                self.settings.max_document_chars
            );
        }
        info!(
            "Bound '{}' ({} pages) to a new session",
            document.path.display(),
            document.page_count()
        );

        Ok(Box::new(ProviderSession {
            provider: Arc::clone(&self.provider),
            context: vec![
                ChatMessage::system(self.settings.system_prompt.as_str()),
                ChatMessage::system(format!("{DOCUMENT_HEADER}\n\n{bound}")),
            ],
            thread: Vec::new(),
            limiter: RateLimiter::new(self.settings.max_requests_per_session),
            settings: self.settings.clone(),
            closed: false,
        }))
    }
}

struct ProviderSession {
    provider: Arc<dyn LLMProvider>,
    context: Vec<ChatMessage>,
    thread: Vec<ChatMessage>,
    limiter: RateLimiter,
    settings: SessionSettings,
    closed: bool,
}

#[async_trait]
impl GroundedSession for ProviderSession {
    async fn send(&mut self, question: &str) -> Result<String, SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        if self.limiter.acquire() && !self.thread.is_empty() {
            debug!("Rotating conversation thread");
            self.thread.clear();
        }
        sleep(self.settings.pause_before_request).await;

        let mut messages = self.context.clone();
        messages.extend(self.thread.iter().cloned());
        messages.push(ChatMessage::user(question));
        debug!("Request: {}", question);

        let options = self.settings.options();
        let attempts = self.settings.attempts_per_request;
        let start = Instant::now();
        let mut last_err = String::from("no attempt made");

        for attempt in 0..attempts {
            if attempt > 0 {
                warn!(
                    "Retry {}/{} after {:?}",
                    attempt,
                    attempts - 1,
                    self.settings.pause_after_attempt
                );
                sleep(self.settings.pause_after_attempt).await;
            }

            match self.provider.chat(&messages, Some(&options)).await {
                Ok(response) => {
                    debug!(
                        "{} input tokens, {} output tokens, {:?}",
                        response.prompt_tokens,
                        response.completion_tokens,
                        start.elapsed()
                    );
                    debug!("Response: {}", response.content);
                    self.thread.push(ChatMessage::user(question));
                    self.thread
                        .push(ChatMessage::assistant(response.content.as_str()));
                    return Ok(response.content);
                }
                Err(e) => {
                    warn!("Attempt {} failed: {}", attempt + 1, e);
                    last_err = e.to_string();
                }
            }
        }

        Err(SessionError::Exhausted {
            attempts,
            detail: last_err,
        })
    }

    async fn clear(&mut self) {
        if !self.closed {
            self.closed = true;
            self.thread.clear();
            self.context.clear();
            self.limiter.reset();
            debug!("Session released");
        }
    }
}

// ── Provider resolution ──────────────────────────────────────────────────

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, ExtractError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        ExtractError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. the pre-built `config.provider`;
/// 2. `config.provider_name` with the configured model;
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, when both are set;
/// 4. OpenAI, when `OPENAI_API_KEY` is set;
/// 5. whatever `ProviderFactory::from_env` detects.
pub fn resolve_provider(config: &ExtractionConfig) -> Result<Arc<dyn LLMProvider>, ExtractError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        return create_provider(name, config.model_or_default());
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return create_provider("openai", config.model_or_default());
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| ExtractError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limiter_rotates_every_max_requests() {
        let mut limiter = RateLimiter::new(3);
        let rotations: Vec<bool> = (0..7).map(|_| limiter.acquire()).collect();
        assert_eq!(
            rotations,
            vec![true, false, false, true, false, false, true]
        );
        assert_eq!(limiter.count(), 1);
        limiter.reset();
        assert!(limiter.acquire());
    }

    #[test]
    fn limiter_max_is_at_least_one() {
        let mut limiter = RateLimiter::new(0);
        assert!(limiter.acquire());
        assert!(limiter.acquire());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abc", 0), "");
    }

    #[test]
    fn settings_fall_back_to_builtin_prompt() {
        let s = SessionSettings::from_config(&ExtractionConfig::default());
        assert_eq!(s.system_prompt, DEFAULT_SYSTEM_PROMPT);
        assert_eq!(s.attempts_per_request, 3);
        let opts = s.options();
        assert_eq!(opts.temperature, Some(0.1));
        assert_eq!(opts.max_tokens, Some(4096));
    }

    #[test]
    fn session_error_display() {
        let e = SessionError::Exhausted {
            attempts: 3,
            detail: "HTTP 503".into(),
        };
        assert_eq!(e.to_string(), "no answer after 3 attempts: HTTP 503");
    }
}
