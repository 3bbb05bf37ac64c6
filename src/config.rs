//! Configuration types for statement extraction.
//!
//! All extraction behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. The API credential is not part of the
//! config: it is resolved once at startup into an [`ApiKey`] and handed to the
//! backend constructor.

use crate::error::ExtractionError;
use crate::pipeline::llm::InferenceBackend;
use crate::progress::ProgressCallback;
use std::fmt;
use std::sync::Arc;

/// Environment variables searched for the Gemini API key, in order.
pub const API_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "API_KEY"];

/// Default model for the native Gemini backend.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";

/// Configuration for an extraction cycle.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use ledgerlens::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .render_scale(2.0)
///     .jpeg_quality(80)
///     .model("gemini-2.5-flash")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Upscaling factor applied to native PDF page size. Range: 0.5–4.0. Default: 2.0.
    pub render_scale: f32,

    /// JPEG quality for rasterised PDF pages. Range: 1–100. Default: 80.
    pub jpeg_quality: u8,

    /// Maximum number of rasterisation jobs in flight. Default: 4.
    pub render_concurrency: usize,

    /// Provider name: "gemini" (native REST) or any edgequake-llm provider
    /// ("openai", "anthropic", "ollama", …). If None, uses
    /// `LEDGERLENS_PROVIDER` or falls back to "gemini".
    pub provider_name: Option<String>,

    /// Model identifier. If None, uses the provider default.
    pub model: Option<String>,

    /// Pre-constructed backend. Takes precedence over `provider_name`.
    pub backend: Option<Arc<dyn InferenceBackend>>,

    /// Override of the Gemini API base URL (proxies, tests).
    pub base_url: Option<String>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum output tokens for the reply. Default: 16384.
    ///
    /// A truncated reply is unparseable JSON.
    pub max_tokens: usize,

    /// Custom extraction prompt. If None, uses the built-in default.
    pub system_prompt: Option<String>,

    /// HTTP timeout for the inference call in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Optional progress event sink.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            render_scale: 2.0,
            jpeg_quality: 80,
            render_concurrency: 4,
            provider_name: None,
            model: None,
            backend: None,
            base_url: None,
            temperature: 0.1,
            max_tokens: 16384,
            system_prompt: None,
            api_timeout_secs: 120,
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("render_scale", &self.render_scale)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("render_concurrency", &self.render_concurrency)
            .field("provider_name", &self.provider_name)
            .field("model", &self.model)
            .field("backend", &self.backend.as_ref().map(|b| b.name().to_string()))
            .field("base_url", &self.base_url)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("system_prompt", &self.system_prompt.as_ref().map(|_| "<custom>"))
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ExtractionProgressCallback>"),
            )
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    /// The prompt sent with every request.
    pub fn prompt(&self) -> &str {
        self.system_prompt
            .as_deref()
            .unwrap_or(crate::prompts::DEFAULT_EXTRACTION_PROMPT)
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn render_scale(mut self, scale: f32) -> Self {
        self.config.render_scale = scale.clamp(0.5, 4.0);
        self
    }

    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.jpeg_quality = quality.clamp(1, 100);
        self
    }

    pub fn render_concurrency(mut self, n: usize) -> Self {
        self.config.render_concurrency = n.max(1);
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn backend(mut self, backend: Arc<dyn InferenceBackend>) -> Self {
        self.config.backend = Some(backend);
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = Some(url.into());
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

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, ExtractionError> {
        let c = &self.config;
        if !(0.5..=4.0).contains(&c.render_scale) {
            return Err(ExtractionError::InvalidConfig(format!(
                "Render scale must be 0.5–4.0, got {}",
                c.render_scale
            )));
        }
        if c.max_tokens == 0 {
            return Err(ExtractionError::InvalidConfig(
                "max_tokens must be ≥ 1".into(),
            ));
        }
        if let Some(prompt) = &c.system_prompt {
            if prompt.trim().is_empty() {
                return Err(ExtractionError::InvalidConfig(
                    "Custom system prompt is empty".into(),
                ));
            }
        }
        Ok(self.config)
    }
}

// ── Credential ───────────────────────────────────────────────────────────

/// Process-scoped API key for the inference service.
///
/// Resolved once at startup and injected into the backend. `Debug` never
/// prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Resolve the key from [`API_KEY_VARS`], first non-empty wins.
    pub fn from_env() -> Result<Self, ExtractionError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Resolve the key through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ExtractionError> {
        API_KEY_VARS
            .iter()
            .filter_map(|var| lookup(*var))
            .map(|v| v.trim().to_string())
            .find(|v| !v.is_empty())
            .map(Self)
            .ok_or_else(|| ExtractionError::MissingCredential {
                vars: API_KEY_VARS.iter().map(|v| v.to_string()).collect(),
            })
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_fixed_render_settings() {
        let c = ExtractionConfig::default();
        assert_eq!(c.render_scale, 2.0);
        assert_eq!(c.jpeg_quality, 80);
        assert!(c.render_concurrency >= 1);
        assert!(c.prompt().contains("YYYY-MM-DD"));
    }

    #[test]
    fn builder_clamps_values() {
        let c = ExtractionConfig::builder()
            .render_scale(9.0)
            .jpeg_quality(0)
            .render_concurrency(0)
            .temperature(5.0)
            .build()
            .unwrap();
        assert_eq!(c.render_scale, 4.0);
        assert_eq!(c.jpeg_quality, 1);
        assert_eq!(c.render_concurrency, 1);
        assert_eq!(c.temperature, 2.0);
    }

    #[test]
    fn builder_rejects_empty_prompt() {
        let err = ExtractionConfig::builder()
            .system_prompt("   ")
            .build()
            .unwrap_err();
        assert!(matches!(err, ExtractionError::InvalidConfig(_)));
    }

    #[test]
    fn custom_prompt_overrides_default() {
        let c = ExtractionConfig::builder()
            .system_prompt("List the rows.")
            .build()
            .unwrap();
        assert_eq!(c.prompt(), "List the rows.");
    }

    #[test]
    fn api_key_lookup_order_and_missing() {
        let key = ApiKey::from_lookup(|var| match var {
            "GEMINI_API_KEY" => Some("  ".into()),
            "API_KEY" => Some("k-123".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(key.expose(), "k-123");

        let err = ApiKey::from_lookup(|_| None).unwrap_err();
        assert!(matches!(err, ExtractionError::MissingCredential { .. }));
    }

    #[test]
    fn api_key_debug_is_redacted() {
        let key = ApiKey::new("super-secret");
        assert!(!format!("{key:?}").contains("super-secret"));
    }
}
