//! Configuration for the extraction pipeline.
//!
//! Every knob lives in one [`ExtractorConfig`] struct built via its
//! [`ExtractorConfigBuilder`]. Keeping the whole surface in a single struct
//! makes it trivial to share across the worker and service, log it, and diff
//! two runs to understand why their behaviour differs.
//!
//! # Design choice: builder over constructor
//! A fifteen-field constructor is unreadable and breaks on every new field.
//! The builder lets callers set only what they care about and rely on
//! well-documented defaults for the rest.

/// Default primary vision model for page transcription.
pub const DEFAULT_VISION_MODEL: &str = "nvidia/nemotron-nano-12b-v2-vl:free";

/// Default fallback vision model, declared to the provider as the second
/// entry in the `models` + `route: "fallback"` request shape.
pub const FALLBACK_VISION_MODEL: &str = "qwen/qwen-2.5-vl-7b-instruct:free";

/// Default text model for note generation (no vision input).
pub const DEFAULT_NOTES_MODEL: &str = "mistralai/devstral-2512:free";

/// Default chat-completions endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Configuration for an [`crate::service::Extractor`].
///
/// Built via [`ExtractorConfig::builder()`], [`ExtractorConfig::from_env()`],
/// or [`ExtractorConfig::default()`].
///
/// # Example
/// ```rust
/// use pagescribe::ExtractorConfig;
///
/// let config = ExtractorConfig::builder()
///     .api_key("sk-or-...")
///     .models(["google/gemini-flash-1.5"])
///     .step_delay_ms(250)
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Vision-API credential. `None` is a fatal condition at step time: the
    /// job is parked `paused` with a configuration error and is not retried
    /// automatically until reconfigured.
    pub api_key: Option<String>,

    /// Ordered candidate vision models. When more than one is configured the
    /// whole list is declared to the provider with `route: "fallback"`, so an
    /// unavailable primary fails over server-side without a round trip.
    /// Always non-empty and deduplicated (order-preserving).
    pub models: Vec<String>,

    /// Model used for the downstream notes aggregator. Single model, no
    /// fallback list — note generation tolerates a simpler retry loop.
    pub notes_model: String,

    /// Chat-completions endpoint URL. Overridable for self-hosted gateways.
    pub endpoint: String,

    /// Rasterisation scale applied to nominal PDF point sizes. Default: 2.0.
    ///
    /// 2× of a 612×792 pt letter page yields 1224×1584 px — enough for a VLM
    /// to read body text reliably while the lossless PNG stays well under
    /// request-size limits.
    pub render_scale: f32,

    /// Hard cap on stored transcription characters per page. Default: 12 000.
    ///
    /// Bounds both row size and the prompt budget of everything downstream
    /// that concatenates page texts.
    pub max_page_chars: usize,

    /// Max completion tokens for a page transcription call. Default: 1800.
    pub max_tokens: u32,

    /// Max completion tokens for a per-page notes call. Default: 2000.
    pub notes_max_tokens: u32,

    /// Max completion tokens for the combine pass, which rewrites a whole
    /// chapter's notes in one response. Default: 4000.
    pub combine_max_tokens: u32,

    /// Sampling temperature for transcription. Default: 0.2.
    ///
    /// Low temperature keeps the model faithful to what is on the page —
    /// exactly what transcription wants.
    pub temperature: f32,

    /// Sampling temperature for note generation. Default: 0.3, slightly
    /// warmer than transcription since notes are a rewrite, not a copy.
    pub notes_temperature: f32,

    /// Delay before the next step after a successful page. Default: 500 ms.
    ///
    /// Yields between pages so a long job never turns into a tight burst of
    /// back-to-back requests against the provider's per-minute limits.
    pub step_delay_ms: u64,

    /// Delay before the automatic retry after a model-call failure.
    /// Default: 60 000 ms, on the theory that provider-side outages resolve
    /// within a minute. Download and render failures are NOT auto-retried —
    /// see the failure table in [`crate::job`].
    pub model_retry_delay_ms: u64,

    /// Delay before retrying a failed page-note generation. Default: 30 000 ms.
    pub notes_retry_delay_ms: u64,

    /// Worker poll interval when the task queue is empty. Default: 250 ms.
    pub poll_interval_ms: u64,

    /// Timeout for downloading the source PDF. Default: 120 s.
    pub download_timeout_secs: u64,

    /// Per-HTTP-call timeout for model requests. Default: 120 s.
    pub api_timeout_secs: u64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            models: vec![
                DEFAULT_VISION_MODEL.to_string(),
                FALLBACK_VISION_MODEL.to_string(),
            ],
            notes_model: DEFAULT_NOTES_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            render_scale: 2.0,
            max_page_chars: 12_000,
            max_tokens: 1800,
            notes_max_tokens: 2000,
            combine_max_tokens: 4000,
            temperature: 0.2,
            notes_temperature: 0.3,
            step_delay_ms: 500,
            model_retry_delay_ms: 60_000,
            notes_retry_delay_ms: 30_000,
            poll_interval_ms: 250,
            download_timeout_secs: 120,
            api_timeout_secs: 120,
        }
    }
}

impl ExtractorConfig {
    /// Create a new builder.
    pub fn builder() -> ExtractorConfigBuilder {
        ExtractorConfigBuilder {
            config: Self::default(),
        }
    }

    /// Load configuration from the environment.
    ///
    /// Reads `OPENROUTER_API_KEY` for the credential and
    /// `OPENROUTER_VISION_MODELS` (comma/newline separated) or
    /// `OPENROUTER_VISION_MODEL` (single override) for the candidate list,
    /// falling back to the built-in primary/fallback pair.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(key) = std::env::var("OPENROUTER_API_KEY") {
            if !key.is_empty() {
                config.api_key = Some(key);
            }
        }
        config.models = parse_model_list(
            std::env::var("OPENROUTER_VISION_MODELS").ok().as_deref(),
            std::env::var("OPENROUTER_VISION_MODEL").ok().as_deref(),
        );
        if let Ok(model) = std::env::var("OPENROUTER_NOTES_MODEL") {
            if !model.is_empty() {
                config.notes_model = model;
            }
        }
        config
    }

    /// The configured primary model (first entry of the candidate list).
    pub fn primary_model(&self) -> &str {
        self.models
            .first()
            .map(String::as_str)
            .unwrap_or(DEFAULT_VISION_MODEL)
    }
}

/// Parse an ordered vision-model list from the two env override forms.
///
/// `raw` (multi-model) wins over `single`; both fall back to the built-in
/// pair. Entries are trimmed, empty entries dropped, duplicates removed with
/// first-occurrence order preserved, and an all-empty result falls back too.
pub(crate) fn parse_model_list(raw: Option<&str>, single: Option<&str>) -> Vec<String> {
    let parts: Vec<String> = match (raw, single) {
        (Some(raw), _) => raw
            .split(['\n', ','])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        (None, Some(single)) if !single.trim().is_empty() => {
            vec![single.trim().to_string()]
        }
        _ => vec![],
    };

    let mut seen = std::collections::HashSet::new();
    let mut models: Vec<String> = Vec::new();
    for m in parts {
        if seen.insert(m.clone()) {
            models.push(m);
        }
    }

    if models.is_empty() {
        vec![
            DEFAULT_VISION_MODEL.to_string(),
            FALLBACK_VISION_MODEL.to_string(),
        ]
    } else {
        models
    }
}

/// Builder for [`ExtractorConfig`].
#[derive(Debug)]
pub struct ExtractorConfigBuilder {
    config: ExtractorConfig,
}

impl ExtractorConfigBuilder {
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    /// Replace the candidate model list. Empty input keeps the defaults.
    pub fn models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let list: Vec<String> = models.into_iter().map(Into::into).collect();
        if !list.is_empty() {
            self.config.models = list;
        }
        self
    }

    pub fn notes_model(mut self, model: impl Into<String>) -> Self {
        self.config.notes_model = model.into();
        self
    }

    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.endpoint = url.into();
        self
    }

    pub fn render_scale(mut self, scale: f32) -> Self {
        self.config.render_scale = scale.clamp(0.5, 8.0);
        self
    }

    pub fn max_page_chars(mut self, n: usize) -> Self {
        self.config.max_page_chars = n.max(1);
        self
    }

    pub fn max_tokens(mut self, n: u32) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn notes_max_tokens(mut self, n: u32) -> Self {
        self.config.notes_max_tokens = n;
        self
    }

    pub fn combine_max_tokens(mut self, n: u32) -> Self {
        self.config.combine_max_tokens = n;
        self
    }

    pub fn notes_temperature(mut self, t: f32) -> Self {
        self.config.notes_temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn step_delay_ms(mut self, ms: u64) -> Self {
        self.config.step_delay_ms = ms;
        self
    }

    pub fn model_retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.model_retry_delay_ms = ms;
        self
    }

    pub fn notes_retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.notes_retry_delay_ms = ms;
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms.max(1);
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn build(self) -> ExtractorConfig {
        self.config
    }
}
