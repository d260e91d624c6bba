use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use log::{debug, info};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Map, Value};
use studio_contracts::generation::{GeneratedImage, GenerationRequest, GenerationResult, TokenUsage};

use crate::config::StudioConfig;
use crate::error::{FailureKind, ProviderError, Result, StudioError};
use crate::http::{build_client, response_json_or_error, transport_error};
use crate::prompt::{build_prompt_parts, render_for_debug, PromptPart};
use crate::retry::{RetryExhausted, RetryPolicy};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationOutput {
    pub result: GenerationResult,
    /// What was sent, for the provenance receipt. Sanitised before writing.
    pub provider_request: Map<String, Value>,
}

/// Adapter from a [`GenerationRequest`] to one image model. An empty result is
/// a valid answer; only transport, credential and request problems are errors.
pub trait ImageGenerator: Send + Sync {
    fn model(&self) -> &str;
    fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput>;
}

pub(crate) fn generation_error(exhausted: RetryExhausted) -> StudioError {
    match exhausted.last.kind() {
        FailureKind::Unauthorized => StudioError::Unauthorized(exhausted.last),
        FailureKind::Rejected => StudioError::BadRequest(exhausted.last),
        _ => StudioError::GenerationUnavailable {
            attempts: exhausted.attempts,
            source: exhausted.last,
        },
    }
}

pub struct GeminiGenerator {
    api_base: String,
    api_key: String,
    model: String,
    max_dim: u32,
    policy: RetryPolicy,
    http: HttpClient,
}

impl GeminiGenerator {
    pub fn new(config: &StudioConfig) -> Self {
        Self {
            api_base: config.endpoints.generation.clone(),
            api_key: config.credentials.generation_key.clone().unwrap_or_default(),
            model: config.image_model.clone(),
            max_dim: config.limits.generation_max_dim,
            policy: config.retries.generate.clone(),
            http: build_client(config.timeouts.generate),
        }
    }

    fn endpoint_for_model(&self) -> String {
        let trimmed = self.model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn to_gemini_parts(parts: &[PromptPart]) -> Vec<Value> {
        parts
            .iter()
            .map(|part| match part {
                PromptPart::Text(text) => json!({ "text": text }),
                PromptPart::Image(image) => json!({
                    "inlineData": {
                        "mimeType": image.mime_type,
                        "data": BASE64.encode(&image.bytes),
                    }
                }),
            })
            .collect()
    }

    /// Ratio, size and count go through exactly as requested.
    fn generation_config(request: &GenerationRequest) -> Value {
        json!({
            "candidateCount": request.count(),
            "responseModalities": ["IMAGE", "TEXT"],
            "imageConfig": {
                "aspectRatio": request.aspect_ratio().as_str(),
                "imageSize": request.detail().provider_size(),
            },
        })
    }

    fn build_payload(request: &GenerationRequest, parts: &[PromptPart]) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": Self::to_gemini_parts(parts),
            }],
            "generationConfig": Self::generation_config(request),
        })
    }

    fn parse_response(
        payload: &Value,
        max_images: usize,
    ) -> std::result::Result<GenerationResult, ProviderError> {
        let mut images = Vec::new();
        let mut feedback = Vec::new();

        if let Some(reason) = payload
            .get("promptFeedback")
            .and_then(|value| value.get("blockReason"))
            .and_then(Value::as_str)
        {
            feedback.push(format!("prompt blocked: {reason}"));
        }

        let candidates = payload
            .get("candidates")
            .and_then(Value::as_array)
            .map(|rows| rows.as_slice())
            .unwrap_or_default();
        for candidate in candidates {
            let parts = candidate
                .get("content")
                .and_then(|content| content.get("parts"))
                .and_then(Value::as_array)
                .map(|rows| rows.as_slice())
                .unwrap_or_default();
            for part in parts {
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    let text = text.trim();
                    if !text.is_empty() {
                        feedback.push(text.to_string());
                    }
                }
                let Some(inline) = part
                    .get("inlineData")
                    .or_else(|| part.get("inline_data"))
                    .and_then(Value::as_object)
                else {
                    continue;
                };
                let data = inline
                    .get("data")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if data.is_empty() {
                    continue;
                }
                let bytes = BASE64.decode(data.as_bytes()).map_err(|err| {
                    ProviderError::invalid_payload("Gemini", format!("image base64 decode failed: {err}"))
                })?;
                let mime_type = inline
                    .get("mimeType")
                    .or_else(|| inline.get("mime_type"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                images.push(GeneratedImage { bytes, mime_type });
            }
            if let Some(reason) = candidate.get("finishReason").and_then(Value::as_str) {
                if matches!(reason, "SAFETY" | "PROHIBITED_CONTENT" | "IMAGE_SAFETY") {
                    feedback.push(format!("finish reason: {reason}"));
                }
            }
        }
        images.truncate(max_images);

        let usage = payload.get("usageMetadata");
        let count = |key: &str| {
            usage
                .and_then(|usage| usage.get(key))
                .and_then(Value::as_u64)
                .unwrap_or(0)
        };
        let token_usage = TokenUsage {
            input: count("promptTokenCount"),
            output: count("candidatesTokenCount"),
            total: count("totalTokenCount"),
        };

        Ok(GenerationResult {
            images,
            token_usage,
            model_text_feedback: (!feedback.is_empty()).then(|| feedback.join("\n")),
        })
    }
}

impl ImageGenerator for GeminiGenerator {
    fn model(&self) -> &str {
        &self.model
    }

    fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput> {
        let parts = build_prompt_parts(request, self.max_dim);
        let payload = Self::build_payload(request, &parts);
        let endpoint = self.endpoint_for_model();
        debug!(
            "generation prompt:\n{}\n\n[config: {}]",
            render_for_debug(&parts),
            payload["generationConfig"]
        );

        let response_payload = self
            .policy
            .run("Gemini generation", |_| {
                let response = self
                    .http
                    .post(&endpoint)
                    .header("x-goog-api-key", &self.api_key)
                    .json(&payload)
                    .send()
                    .map_err(|err| transport_error("Gemini", err))?;
                response_json_or_error("Gemini", response)
            })
            .map_err(generation_error)?;

        let result = Self::parse_response(&response_payload, request.count() as usize)
            .map_err(|err| StudioError::GenerationUnavailable {
                attempts: 1,
                source: err,
            })?;
        info!(
            "Gemini returned {} image(s); tokens in={} out={}",
            result.images.len(),
            result.token_usage.input,
            result.token_usage.output
        );
        debug!(
            "generation response text: {}",
            result.model_text_feedback.as_deref().unwrap_or("(none)")
        );

        let mut provider_request = Map::new();
        provider_request.insert("endpoint".to_string(), Value::String(endpoint));
        provider_request.insert("model".to_string(), Value::String(self.model.clone()));
        provider_request.insert("payload".to_string(), payload);
        Ok(GenerationOutput {
            result,
            provider_request,
        })
    }
}
