//! Configuration types for market report extraction.
//!
//! Every knob lives in [`ExtractionConfig`], built through
//! [`ExtractionConfigBuilder`]. The config is cheap to clone and is shared
//! by every document of a batch.

use crate::error::ExtractError;
use crate::pipeline::json::DEFAULT_FENCE_PATTERN;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Model used when neither the config nor the environment names one.
pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";

/// Quarter labels accepted as a submarket start marker.
pub const DEFAULT_QUARTER_LABELS: &[&str] = &[
    "2Q 2023", "3Q 2023", "4Q 2023", "1Q 2024", "2Q 2024", "3Q 2024", "4Q 2024",
];

/// Configuration for extracting one or more market reports.
///
/// # Example
/// ```rust
/// use market_report_extract::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .work_dir("./results")
///     .model("gpt-4.1-mini")
///     .extended_targets(true)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_requests_per_session, 10);
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Cache root. Each document caches under
    /// `<work_dir>/<prep_filename(file stem)>`. Default: `./results`.
    pub work_dir: PathBuf,

    /// Root of the per-market segmentation output. Default: `./submarkets`.
    pub submarkets_dir: PathBuf,

    /// LLM model identifier. If None, [`DEFAULT_MODEL`].
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens per answer. Default: 4096.
    pub max_tokens: usize,

    /// Attempts per question before the session gives up. Default: 3.
    pub attempts_per_request: u32,

    /// Fixed pause after a failed attempt, in milliseconds. Default: 100.
    pub pause_after_attempt_ms: u64,

    /// Pause before every question, in milliseconds. Default: 100.
    pub pause_before_request_ms: u64,

    /// Questions per conversation thread before it is rotated. Default: 10.
    pub max_requests_per_session: u32,

    /// Cap on the document text bound into a session, in characters.
    /// Default: 400 000.
    pub max_document_chars: usize,

    /// Quarter labels accepted by the segmenter.
    pub quarter_labels: Vec<String>,

    /// Regex locating the JSON block in an answer; group 1 is the body.
    pub json_fence_pattern: String,

    /// Also extract property lists, supply/demand and sample/existing
    /// units for every submarket. Default: false.
    pub extended_targets: bool,

    /// Documents processed at once by the batch runner. Default: 1.
    pub concurrency: usize,

    /// Custom assistant instructions. If None, the built-in ones.
    pub system_prompt: Option<String>,

    /// PDF user password for encrypted reports.
    pub password: Option<String>,

    /// Optional progress callback for per-target events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("./results"),
            submarkets_dir: PathBuf::from("./submarkets"),
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 4096,
            attempts_per_request: 3,
            pause_after_attempt_ms: 100,
            pause_before_request_ms: 100,
            max_requests_per_session: 10,
            max_document_chars: 400_000,
            quarter_labels: DEFAULT_QUARTER_LABELS.iter().map(|s| s.to_string()).collect(),
            json_fence_pattern: DEFAULT_FENCE_PATTERN.to_string(),
            extended_targets: false,
            concurrency: 1,
            system_prompt: None,
            password: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("work_dir", &self.work_dir)
            .field("submarkets_dir", &self.submarkets_dir)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("attempts_per_request", &self.attempts_per_request)
            .field("max_requests_per_session", &self.max_requests_per_session)
            .field("max_document_chars", &self.max_document_chars)
            .field("quarter_labels", &self.quarter_labels)
            .field("extended_targets", &self.extended_targets)
            .field("concurrency", &self.concurrency)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ExtractionProgressCallback>"),
            )
            .finish()
    }
}

impl ExtractionConfig {
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn model_or_default(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    pub fn pause_after_attempt(&self) -> Duration {
        Duration::from_millis(self.pause_after_attempt_ms)
    }

    pub fn pause_before_request(&self) -> Duration {
        Duration::from_millis(self.pause_before_request_ms)
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.work_dir = dir.into();
        self
    }

    pub fn submarkets_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.submarkets_dir = dir.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn attempts_per_request(mut self, n: u32) -> Self {
        self.config.attempts_per_request = n.max(1);
        self
    }

    pub fn pause_after_attempt_ms(mut self, ms: u64) -> Self {
        self.config.pause_after_attempt_ms = ms;
        self
    }

    pub fn pause_before_request_ms(mut self, ms: u64) -> Self {
        self.config.pause_before_request_ms = ms;
        self
    }

    pub fn max_requests_per_session(mut self, n: u32) -> Self {
        self.config.max_requests_per_session = n.max(1);
        self
    }

    pub fn max_document_chars(mut self, n: usize) -> Self {
        self.config.max_document_chars = n;
        self
    }

    pub fn quarter_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.quarter_labels = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn json_fence_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.config.json_fence_pattern = pattern.into();
        self
    }

    pub fn extended_targets(mut self, v: bool) -> Self {
        self.config.extended_targets = v;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, ExtractError> {
        let c = &self.config;
        if c.quarter_labels.is_empty() {
            return Err(ExtractError::InvalidConfig(
                "At least one quarter label is required".into(),
            ));
        }
        if c.max_document_chars == 0 {
            return Err(ExtractError::InvalidConfig(
                "max_document_chars must be ≥ 1".into(),
            ));
        }
        if let Err(e) = regex::Regex::new(&c.json_fence_pattern) {
            return Err(ExtractError::InvalidConfig(format!(
                "JSON fence pattern does not compile: {e}"
            )));
        }
        Ok(self.config)
    }
}
