//! Inference: assemble the single multimodal request and send it.
//!
//! Every cycle makes exactly one call. The request carries the instruction
//! prompt, the transaction schema and every payload of the batch in order;
//! the reply text is handed to [`crate::pipeline::parse`] untouched.
//!
//! Two backends implement [`InferenceBackend`]:
//!
//! * [`GeminiBackend`] calls the Gemini `generateContent` REST endpoint
//!   directly, so the schema travels as a structured-output
//!   `responseSchema` rather than as prompt text.
//! * [`LlmProviderBackend`] wraps any `edgequake-llm` provider (OpenAI,
//!   Anthropic, Ollama, …). Those take the schema inline in the system
//!   message.
//!
//! There is no retry here. A failed call is reported as
//! [`ExtractionError::InferenceRequestFailed`] and the user decides whether
//! to run the cycle again.

use crate::config::{ApiKey, ExtractionConfig, DEFAULT_GEMINI_MODEL};
use crate::error::ExtractionError;
use crate::pipeline::encode::{ImagePayload, PayloadBatch};
use crate::prompts::with_inline_schema;
use crate::schema::{TransactionSchema, TRANSACTION_SCHEMA};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default Gemini REST base URL.
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Environment variable naming the provider when none is configured.
pub const PROVIDER_ENV_VAR: &str = "LEDGERLENS_PROVIDER";

/// Model used with a named `edgequake-llm` provider when none is given.
pub const DEFAULT_PROVIDER_MODEL: &str = "gpt-4.1-nano";

/// Everything the model sees for one cycle.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub instructions: String,
    pub schema: &'static TransactionSchema,
    pub images: PayloadBatch,
    pub temperature: f32,
    pub max_tokens: usize,
}

impl InferenceRequest {
    /// Pair the configured prompt and sampling settings with a batch.
    pub fn new(config: &ExtractionConfig, images: PayloadBatch) -> Self {
        Self {
            instructions: config.prompt().to_string(),
            schema: &TRANSACTION_SCHEMA,
            images,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

/// Raw reply text plus token accounting (0 when the service reports none).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InferenceResponse {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// A multimodal model that can answer an [`InferenceRequest`].
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Send the request and return the reply text.
    ///
    /// An empty reply is an error, not an empty success.
    async fn infer(&self, request: &InferenceRequest) -> Result<InferenceResponse, ExtractionError>;

    /// Short label for logs, e.g. `gemini/gemini-2.5-flash`.
    fn name(&self) -> &str;
}

// ── Gemini REST ──────────────────────────────────────────────────────────

/// Native Gemini `generateContent` backend.
pub struct GeminiBackend {
    api_key: ApiKey,
    model: String,
    base_url: String,
    label: String,
    client: reqwest::Client,
    timeout_secs: u64,
}

impl GeminiBackend {
    pub fn new(api_key: ApiKey, model: impl Into<String>, timeout_secs: u64) -> Self {
        let model = model.into();
        Self {
            api_key,
            label: format!("gemini/{model}"),
            model,
            base_url: GEMINI_BASE_URL.to_string(),
            client: reqwest::Client::new(),
            timeout_secs,
        }
    }

    /// Point the backend at another host (proxy, mock server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }
}

impl std::fmt::Debug for GeminiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiBackend")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text {
        text: &'a str,
    },
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: &'a ImagePayload,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    response_schema: Value,
    temperature: f32,
    max_output_tokens: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

/// Instruction text first, then one `inlineData` part per payload.
fn build_body(request: &InferenceRequest) -> GenerateContentRequest<'_> {
    let mut parts = Vec::with_capacity(request.images.len() + 1);
    parts.push(Part::Text {
        text: &request.instructions,
    });
    parts.extend(
        request
            .images
            .iter()
            .map(|inline_data| Part::Inline { inline_data }),
    );

    GenerateContentRequest {
        contents: vec![Content { parts }],
        generation_config: GenerationConfig {
            response_mime_type: "application/json",
            response_schema: request.schema.response_schema(),
            temperature: request.temperature,
            max_output_tokens: request.max_tokens,
        },
    }
}

fn request_failed(reason: impl Into<String>) -> ExtractionError {
    ExtractionError::InferenceRequestFailed {
        reason: reason.into(),
    }
}

#[async_trait]
impl InferenceBackend for GeminiBackend {
    async fn infer(&self, request: &InferenceRequest) -> Result<InferenceResponse, ExtractionError> {
        let body = build_body(request);
        debug!(
            "POST {} with {} image part(s)",
            self.endpoint(),
            request.images.len()
        );

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", self.api_key.expose())
            .json(&body)
            .timeout(Duration::from_secs(self.timeout_secs))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    request_failed(format!("timed out after {}s", self.timeout_secs))
                } else {
                    request_failed(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(request_failed(format!("Gemini API returned {status}: {body}")));
        }

        let reply: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| request_failed(format!("Failed to read Gemini response: {e}")))?;

        let (input_tokens, output_tokens) = reply
            .usage_metadata
            .as_ref()
            .map(|u| (u.prompt_token_count, u.candidates_token_count))
            .unwrap_or_default();

        let first = reply.candidates.first();
        let text: String = first
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.iter().filter_map(|p| p.text.as_deref()).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            let why = reply
                .prompt_feedback
                .and_then(|f| f.block_reason)
                .map(|r| format!("blocked: {r}"))
                .or_else(|| {
                    first
                        .and_then(|c| c.finish_reason.clone())
                        .map(|r| format!("finish reason {r}"))
                })
                .unwrap_or_else(|| "no candidates".to_string());
            warn!("Gemini returned an empty reply ({})", why);
            return Err(request_failed(format!("The model returned an empty response ({why})")));
        }

        debug!(
            "Gemini reply: {} chars, {} input tokens, {} output tokens",
            text.len(),
            input_tokens,
            output_tokens
        );
        Ok(InferenceResponse {
            text,
            input_tokens,
            output_tokens,
        })
    }

    fn name(&self) -> &str {
        &self.label
    }
}

// ── edgequake-llm providers ──────────────────────────────────────────────

/// Backend over any `edgequake-llm` chat provider with vision support.
pub struct LlmProviderBackend {
    provider: Arc<dyn LLMProvider>,
    label: String,
}

impl LlmProviderBackend {
    pub fn new(provider: Arc<dyn LLMProvider>, label: impl Into<String>) -> Self {
        Self {
            provider,
            label: label.into(),
        }
    }
}

/// Build `CompletionOptions` from the request.
fn build_options(request: &InferenceRequest) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(request.temperature),
        max_tokens: Some(request.max_tokens),
        ..Default::default()
    }
}

/// System message with the inline schema, then one user turn carrying every
/// image in batch order. The user text is empty; the images are the input.
fn build_messages(request: &InferenceRequest) -> Vec<ChatMessage> {
    let images: Vec<ImageData> = request
        .images
        .iter()
        .map(|p| ImageData::new(p.data.clone(), p.mime_type.as_str()))
        .collect();

    vec![
        ChatMessage::system(with_inline_schema(&request.instructions, request.schema)),
        ChatMessage::user_with_images("", images),
    ]
}

#[async_trait]
impl InferenceBackend for LlmProviderBackend {
    async fn infer(&self, request: &InferenceRequest) -> Result<InferenceResponse, ExtractionError> {
        let messages = build_messages(request);
        let options = build_options(request);

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| request_failed(e.to_string()))?;

        if response.content.trim().is_empty() {
            return Err(request_failed("The model returned an empty response"));
        }

        debug!(
            "{}: {} input tokens, {} output tokens",
            self.label, response.prompt_tokens, response.completion_tokens
        );
        Ok(InferenceResponse {
            text: response.content,
            input_tokens: response.prompt_tokens as u64,
            output_tokens: response.completion_tokens as u64,
        })
    }

    fn name(&self) -> &str {
        &self.label
    }
}

// ── Resolution ───────────────────────────────────────────────────────────

/// Resolve the backend, from most-specific to least-specific.
///
/// 1. **Pre-built backend** (`config.backend`), used as-is.
/// 2. **Named provider** (`config.provider_name`).
/// 3. **`LEDGERLENS_PROVIDER`** from the environment.
/// 4. **`gemini`**.
///
/// For `gemini` the API key is read here, so a missing credential fails
/// before any file is touched. `auto` lets `edgequake-llm` pick whichever
/// provider has a key in the environment.
pub fn resolve_backend(
    config: &ExtractionConfig,
) -> Result<Arc<dyn InferenceBackend>, ExtractionError> {
    resolve_backend_with(config, |var| std::env::var(var).ok())
}

/// [`resolve_backend`] reading `LEDGERLENS_PROVIDER` and the Gemini key
/// through `lookup` instead of the process environment.
pub fn resolve_backend_with(
    config: &ExtractionConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Arc<dyn InferenceBackend>, ExtractionError> {
    if let Some(ref backend) = config.backend {
        return Ok(Arc::clone(backend));
    }

    let provider = config
        .provider_name
        .clone()
        .or_else(|| lookup(PROVIDER_ENV_VAR).filter(|p| !p.is_empty()))
        .unwrap_or_else(|| "gemini".to_string())
        .to_ascii_lowercase();

    let backend: Arc<dyn InferenceBackend> = match provider.as_str() {
        "gemini" => {
            let api_key = ApiKey::from_lookup(&lookup)?;
            let model = config.model.as_deref().unwrap_or(DEFAULT_GEMINI_MODEL);
            let mut backend = GeminiBackend::new(api_key, model, config.api_timeout_secs);
            if let Some(ref url) = config.base_url {
                backend = backend.with_base_url(url);
            }
            Arc::new(backend)
        }
        "auto" => {
            let (llm, _embedding) =
                ProviderFactory::from_env().map_err(|e| ExtractionError::ProviderNotConfigured {
                    provider: "auto".to_string(),
                    hint: format!(
                        "No LLM provider could be auto-detected from environment.\n\
                        Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or pass --provider.\n\
                        Error: {e}"
                    ),
                })?;
            Arc::new(LlmProviderBackend::new(llm, "auto"))
        }
        name => {
            let model = config.model.as_deref().unwrap_or(DEFAULT_PROVIDER_MODEL);
            let llm = ProviderFactory::create_llm_provider(name, model).map_err(|e| {
                ExtractionError::ProviderNotConfigured {
                    provider: name.to_string(),
                    hint: format!("{e}"),
                }
            })?;
            Arc::new(LlmProviderBackend::new(llm, format!("{name}/{model}")))
        }
    };

    info!("Using inference backend {}", backend.name());
    Ok(backend)
}
