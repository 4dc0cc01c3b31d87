use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::error::StudioError;
use crate::llm::prompts::{build_synthesis_prompt, STYLE_ANALYSIS_PROMPT};
use crate::llm::{ImageSynthesizer, StyleAnalyzer};
use crate::utils::http::build_http_client;
use crate::utils::timing::log_llm_timing;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    parts: Option<Vec<GeminiPart>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
        /// Set on reasoning summaries from thinking models; never part of the answer.
        #[serde(default)]
        thought: bool,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiInlineData,
    },
    Other(Value),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    #[serde(default)]
    mime_type: String,
    data: String,
}

/// How a failed call is reported before it is turned into a user-facing error.
#[derive(Debug)]
enum CallFailure {
    Authentication(String),
    Service(String),
}

impl CallFailure {
    fn into_studio_error(self, context: &str) -> StudioError {
        match self {
            CallFailure::Authentication(detail) => {
                warn!("Gemini rejected the API key: {}", detail);
                StudioError::Authentication
            }
            CallFailure::Service(detail) => StudioError::Service(format!("{context}: {detail}")),
        }
    }
}

const ANALYSIS_FAILURE_CONTEXT: &str = "Failed to analyze image style";
const SYNTHESIS_FAILURE_CONTEXT: &str = "Failed to generate image";

fn truncate_for_log(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated}... (truncated)")
}

fn summarize_parts(parts: &[Value]) -> Vec<Value> {
    parts
        .iter()
        .map(|part| {
            if let Some(text) = part.get("text").and_then(|value| value.as_str()) {
                json!({ "text": truncate_for_log(text, 200) })
            } else if let Some(inline_data) = part.get("inlineData") {
                let mime_type = inline_data
                    .get("mimeType")
                    .and_then(|value| value.as_str())
                    .unwrap_or("unknown");
                let data_len = inline_data
                    .get("data")
                    .and_then(|value| value.as_str())
                    .map(|value| value.len())
                    .unwrap_or(0);
                json!({ "inlineData": { "mimeType": mime_type, "dataLen": data_len } })
            } else {
                json!({ "unknownPart": true })
            }
        })
        .collect()
}

fn summarize_payload(payload: &Value) -> Value {
    let mut summary = Map::new();

    if let Some(parts) = payload
        .pointer("/contents/parts")
        .and_then(|value| value.as_array())
    {
        summary.insert("parts".to_string(), Value::Array(summarize_parts(parts)));
    }

    if let Some(config) = payload.get("generationConfig") {
        summary.insert("generationConfig".to_string(), config.clone());
    }

    Value::Object(summary)
}

fn summarize_response(response: &GeminiResponse) -> Value {
    let mut text_parts = 0usize;
    let mut image_parts = 0usize;
    let mut thought_parts = 0usize;
    let mut other_parts = 0usize;
    let mut text_preview = None;

    for part in candidate_parts(response) {
        match part {
            GeminiPart::Text { thought: true, .. } => thought_parts += 1,
            GeminiPart::Text { text, .. } => {
                text_parts += 1;
                if text_preview.is_none() && !text.trim().is_empty() {
                    text_preview = Some(truncate_for_log(text, 200));
                }
            }
            GeminiPart::InlineData { .. } => image_parts += 1,
            GeminiPart::Other(_) => other_parts += 1,
        }
    }

    json!({
        "candidates": response.candidates.as_ref().map(|candidates| candidates.len()).unwrap_or(0),
        "textParts": text_parts,
        "inlineParts": image_parts,
        "thoughtParts": thought_parts,
        "otherParts": other_parts,
        "textPreview": text_preview,
        "blockReason": response.prompt_feedback.as_ref().and_then(|feedback| feedback.block_reason.clone()),
    })
}

/// Pulls `error.message` and any `error.details[].reason` out of an error body.
fn summarize_error_body(body: &str) -> (Option<String>, Vec<String>, String) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return (None, Vec::new(), "empty response body".to_string());
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let message = value
            .pointer("/error/message")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
            .or_else(|| {
                value
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(|v| v.to_string())
            });
        let reasons = value
            .pointer("/error/details")
            .and_then(|v| v.as_array())
            .map(|details| {
                details
                    .iter()
                    .filter_map(|detail| detail.get("reason").and_then(|v| v.as_str()))
                    .map(|reason| reason.to_string())
                    .collect()
            })
            .unwrap_or_default();
        return (message, reasons, truncate_for_log(&value.to_string(), 2000));
    }

    (None, Vec::new(), truncate_for_log(trimmed, 2000))
}

fn is_invalid_key(status: StatusCode, message: Option<&str>, reasons: &[String]) -> bool {
    status == StatusCode::UNAUTHORIZED
        || message.is_some_and(|message| message.contains("API key not valid"))
        || reasons.iter().any(|reason| reason == "API_KEY_INVALID")
}

fn build_inline_request(
    image_base64: &str,
    mime_type: &str,
    prompt: &str,
    response_modalities: Option<&[&str]>,
) -> Value {
    let mut payload = json!({
        "contents": {
            "parts": [
                { "inlineData": { "data": image_base64, "mimeType": mime_type } },
                { "text": prompt },
            ]
        }
    });
    if let Some(modalities) = response_modalities {
        if let Some(object) = payload.as_object_mut() {
            object.insert(
                "generationConfig".to_string(),
                json!({ "responseModalities": modalities }),
            );
        }
    }
    payload
}

fn candidate_parts(response: &GeminiResponse) -> impl Iterator<Item = &GeminiPart> {
    response
        .candidates
        .as_deref()
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.content.as_ref())
        .and_then(|content| content.parts.as_deref())
        .unwrap_or(&[])
        .iter()
}

fn extract_text(response: &GeminiResponse) -> Option<String> {
    let texts: Vec<&str> = candidate_parts(response)
        .filter_map(|part| match part {
            GeminiPart::Text {
                text,
                thought: false,
            } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    if texts.is_empty() {
        None
    } else {
        Some(texts.concat())
    }
}

fn first_inline_image(response: &GeminiResponse) -> Option<String> {
    candidate_parts(response).find_map(|part| match part {
        GeminiPart::InlineData { inline_data }
            if !inline_data.data.is_empty()
                && (inline_data.mime_type.is_empty()
                    || inline_data.mime_type.starts_with("image/")) =>
        {
            Some(inline_data.data.clone())
        }
        _ => None,
    })
}

fn describe_missing_output(response: &GeminiResponse) -> String {
    if let Some(reason) = response
        .prompt_feedback
        .as_ref()
        .and_then(|feedback| feedback.block_reason.as_deref())
    {
        return format!("request was blocked ({reason})");
    }
    if let Some(reason) = response
        .candidates
        .as_deref()
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.finish_reason.as_deref())
    {
        return format!("model returned no text (finish reason {reason})");
    }
    "model returned no text".to_string()
}

/// Client for the hosted Gemini `generateContent` endpoint.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: Client,
    api_key: String,
    api_base: String,
    analysis_model: String,
    image_model: String,
}

impl GeminiClient {
    pub fn new(config: &Config) -> Result<Self, StudioError> {
        Ok(Self {
            http: build_http_client(config.http_timeout_seconds)?,
            api_key: config.gemini_api_key.clone(),
            api_base: config.gemini_api_base.clone(),
            analysis_model: config.analysis_model.clone(),
            image_model: config.image_model.clone(),
        })
    }

    fn redact(&self, text: &str) -> String {
        let key = self.api_key.trim();
        if key.is_empty() {
            return text.to_string();
        }
        text.replace(key, "[redacted]")
    }

    async fn generate_content(
        &self,
        model: &str,
        payload: Value,
    ) -> Result<GeminiResponse, CallFailure> {
        let url = format!("{}/models/{}:generateContent", self.api_base, model);

        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!(target: "llm.gemini", model = model, payload = %summarize_payload(&payload));
        }

        let response = match self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&payload)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                let err_text = self.redact(&err.to_string());
                error!(
                    "Gemini request failed to send: {} (timeout={}, connect={}, model={})",
                    err_text,
                    err.is_timeout(),
                    err.is_connect(),
                    model
                );
                return Err(CallFailure::Service(err_text));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let (message, reasons, body_summary) = summarize_error_body(&body);
            warn!(
                "Gemini API error: status={}, model={}, body={}",
                status,
                model,
                self.redact(&body_summary)
            );
            let detail = self.redact(&message.clone().unwrap_or(body_summary));
            if is_invalid_key(status, message.as_deref(), &reasons) {
                return Err(CallFailure::Authentication(detail));
            }
            return Err(CallFailure::Service(format!(
                "request failed with status {status}: {detail}"
            )));
        }

        let value = response.json::<GeminiResponse>().await.map_err(|err| {
            error!("Failed to decode Gemini response from {}: {}", model, err);
            CallFailure::Service(format!("malformed response: {}", self.redact(&err.to_string())))
        })?;
        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!(target: "llm.gemini", model = model, response = %summarize_response(&value));
        }
        Ok(value)
    }
}

#[async_trait]
impl StyleAnalyzer for GeminiClient {
    async fn analyze_style(
        &self,
        image_base64: &str,
        mime_type: &str,
    ) -> Result<String, StudioError> {
        let payload = build_inline_request(image_base64, mime_type, STYLE_ANALYSIS_PROMPT, None);
        let model = self.analysis_model.as_str();
        let metadata = json!({ "mimeType": mime_type, "imageLen": image_base64.len() });

        log_llm_timing("gemini", model, "analyze_style", Some(metadata), || async {
            let response = self
                .generate_content(model, payload)
                .await
                .map_err(|failure| failure.into_studio_error(ANALYSIS_FAILURE_CONTEXT))?;
            extract_text(&response).ok_or_else(|| {
                StudioError::Service(format!(
                    "{ANALYSIS_FAILURE_CONTEXT}: {}",
                    describe_missing_output(&response)
                ))
            })
        })
        .await
    }
}

#[async_trait]
impl ImageSynthesizer for GeminiClient {
    async fn synthesize(
        &self,
        image_base64: &str,
        mime_type: &str,
        style_description: &str,
    ) -> Result<Option<String>, StudioError> {
        let prompt = build_synthesis_prompt(style_description);
        let payload = build_inline_request(image_base64, mime_type, &prompt, Some(&["IMAGE"]));
        let model = self.image_model.as_str();
        let metadata = json!({ "mimeType": mime_type, "imageLen": image_base64.len() });

        log_llm_timing("gemini", model, "synthesize", Some(metadata), || async {
            let response = self
                .generate_content(model, payload)
                .await
                .map_err(|failure| failure.into_studio_error(SYNTHESIS_FAILURE_CONTEXT))?;
            let image = first_inline_image(&response);
            if image.is_none() {
                warn!(
                    "Gemini image model returned no image: {}",
                    summarize_response(&response)
                );
            }
            Ok(image)
        })
        .await
    }
}
