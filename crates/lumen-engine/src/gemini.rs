use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use lumen_contracts::jobs::{JobFailure, JobHandle, JobSnapshot, JobStatus};
use lumen_contracts::media::{MediaKind, MediaRequest};
use lumen_contracts::search::{GroundingChunk, WebSource};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::failures::{is_retryable_transport_error, truncate_text};
use crate::provider::{
    ContentPart, ContentRequest, ContentResponse, GeneratedImage, GenerativeProvider,
    ProviderHttpError,
};

const PROVIDER_LABEL: &str = "Gemini";
const MAX_ERROR_MESSAGE_CHARS: usize = 300;

/// Gemini REST transport (`generateContent`, `predictLongRunning`, operations).
pub struct GeminiProvider {
    api_base: String,
    request_timeout: Duration,
    transport_retries: usize,
    transport_backoff: Duration,
    http: HttpClient,
}

impl GeminiProvider {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            api_base: config.api_base.clone(),
            request_timeout: config.request_timeout,
            transport_retries: config.transport_retries,
            transport_backoff: config.transport_backoff,
            http: HttpClient::new(),
        }
    }

    fn model_path(model: &str) -> String {
        let trimmed = model.trim();
        if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        }
    }

    fn endpoint_for_model(&self, model: &str, method: &str) -> String {
        format!("{}/{}:{method}", self.api_base, Self::model_path(model))
    }

    fn operation_endpoint(&self, handle: &JobHandle) -> String {
        format!("{}/{}", self.api_base, handle.as_str().trim_start_matches('/'))
    }

    fn build_content_payload(request: &ContentRequest) -> Value {
        let parts: Vec<Value> = request
            .parts
            .iter()
            .map(|part| match part {
                ContentPart::Text(text) => json!({ "text": text }),
                ContentPart::InlineImage { mime_type, bytes } => json!({
                    "inlineData": {
                        "mimeType": mime_type,
                        "data": BASE64.encode(bytes),
                    }
                }),
            })
            .collect();

        let mut payload = Map::new();
        payload.insert(
            "contents".to_string(),
            json!([{ "role": "user", "parts": parts }]),
        );
        if let Some(instruction) = request.system_instruction.as_deref() {
            payload.insert(
                "systemInstruction".to_string(),
                json!({ "parts": [{ "text": instruction }] }),
            );
        }

        let mut generation_config = Map::new();
        if let Some(temperature) = request.temperature {
            generation_config.insert("temperature".to_string(), json!(temperature));
        }
        if let Some(image) = request.image_config.as_ref() {
            let mut image_config = Map::new();
            image_config.insert(
                "aspectRatio".to_string(),
                Value::String(image.aspect_ratio.clone()),
            );
            if let Some(size) = image.image_size.as_ref() {
                image_config.insert("imageSize".to_string(), Value::String(size.clone()));
            }
            generation_config.insert("imageConfig".to_string(), Value::Object(image_config));
        }
        if !generation_config.is_empty() {
            payload.insert(
                "generationConfig".to_string(),
                Value::Object(generation_config),
            );
        }
        if request.google_search {
            payload.insert("tools".to_string(), json!([{ "googleSearch": {} }]));
        }
        Value::Object(payload)
    }

    fn build_video_payload(request: &MediaRequest) -> Value {
        let mut instance = Map::new();
        instance.insert("prompt".to_string(), Value::String(request.prompt.clone()));
        if let Some(image) = request.reference_image.as_ref() {
            instance.insert(
                "image".to_string(),
                json!({
                    "bytesBase64Encoded": BASE64.encode(&image.bytes),
                    "mimeType": image.mime_type,
                }),
            );
        }

        let mut parameters = Map::new();
        parameters.insert("sampleCount".to_string(), json!(1));
        parameters.insert(
            "aspectRatio".to_string(),
            Value::String(request.aspect_ratio.as_str().to_string()),
        );
        if let Some(resolution) = request.output_resolution {
            parameters.insert(
                "resolution".to_string(),
                Value::String(resolution.to_string()),
            );
        }

        json!({
            "instances": [Value::Object(instance)],
            "parameters": Value::Object(parameters),
        })
    }

    fn parse_content_response(payload: &Value) -> Result<ContentResponse> {
        let candidate = payload
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|rows| rows.first())
            .cloned()
            .unwrap_or(Value::Null);
        let parts = candidate
            .get("content")
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut texts = Vec::new();
        let mut images = Vec::new();
        for part in &parts {
            if part.get("thought").and_then(Value::as_bool) == Some(true) {
                continue;
            }
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                texts.push(text.to_string());
            }
            let inline = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(Value::as_object);
            let Some(inline) = inline else {
                continue;
            };
            let data = inline
                .get("data")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if data.is_empty() {
                continue;
            }
            let bytes = BASE64
                .decode(data.as_bytes())
                .context("Gemini image base64 decode failed")?;
            let mime_type = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .unwrap_or("image/png")
                .to_string();
            images.push(GeneratedImage { mime_type, bytes });
        }

        let grounding = candidate
            .get("groundingMetadata")
            .and_then(|meta| meta.get("groundingChunks"))
            .and_then(Value::as_array)
            .map(|chunks| chunks.iter().map(Self::parse_grounding_chunk).collect())
            .unwrap_or_default();

        let text = texts.concat();
        Ok(ContentResponse {
            text: (!text.is_empty()).then_some(text),
            images,
            grounding,
        })
    }

    fn parse_grounding_chunk(chunk: &Value) -> GroundingChunk {
        let string_field = |web: &Value, key: &str| {
            web.get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        GroundingChunk {
            web: chunk.get("web").filter(|web| web.is_object()).map(|web| WebSource {
                uri: string_field(web, "uri"),
                title: string_field(web, "title"),
            }),
        }
    }

    /// Operation JSON -> job snapshot. `fallback` names the job when the reply omits it.
    fn parse_operation(payload: &Value, fallback: &JobHandle) -> JobSnapshot {
        let handle = payload
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(JobHandle::new)
            .unwrap_or_else(|| fallback.clone());

        if let Some(error) = payload.get("error").filter(|error| error.is_object()) {
            let code = error
                .get("code")
                .and_then(Value::as_u64)
                .and_then(|code| u16::try_from(code).ok())
                .map(rpc_code_to_http_status);
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Video generation failed.")
                .to_string();
            return JobSnapshot {
                handle,
                status: JobStatus::Failed(JobFailure { code, message }),
            };
        }

        if payload.get("done").and_then(Value::as_bool) != Some(true) {
            return JobSnapshot {
                handle,
                status: JobStatus::Pending,
            };
        }

        JobSnapshot {
            handle,
            status: JobStatus::Done(Self::extract_video_uri(payload)),
        }
    }

    fn extract_video_uri(payload: &Value) -> Option<String> {
        let response = payload.get("response")?;
        [
            "/generateVideoResponse/generatedSamples/0/video/uri",
            "/generatedVideos/0/video/uri",
            "/generatedSamples/0/video/uri",
        ]
        .into_iter()
        .find_map(|pointer| response.pointer(pointer).and_then(Value::as_str))
        .map(str::trim)
        .filter(|uri| !uri.is_empty())
        .map(str::to_string)
    }

    fn post_with_transport_retries(
        &self,
        endpoint: &str,
        api_key: &str,
        payload: &Value,
    ) -> Result<HttpResponse> {
        for attempt in 0..=self.transport_retries {
            let response = self
                .http
                .post(endpoint)
                .query(&[("key", api_key)])
                .timeout(self.request_timeout)
                .json(payload)
                .send();

            match response {
                Ok(ok) => return Ok(ok),
                Err(raw) => {
                    let err = anyhow::Error::new(raw.without_url())
                        .context(format!("Gemini request failed ({endpoint})"));
                    if !is_retryable_transport_error(&err) || attempt >= self.transport_retries {
                        return Err(err);
                    }
                    warn!(
                        endpoint,
                        attempt = attempt + 1,
                        max_retries = self.transport_retries,
                        "Gemini transport retry after transient request failure"
                    );
                    thread::sleep(
                        self.transport_backoff
                            .mul_f64(attempt as f64 + 1.0),
                    );
                }
            }
        }

        unreachable!("Gemini transport retry loop should always return a response or error")
    }
}

impl GenerativeProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate_content(&self, api_key: &str, request: &ContentRequest) -> Result<ContentResponse> {
        let endpoint = self.endpoint_for_model(&request.model, "generateContent");
        let payload = Self::build_content_payload(request);
        debug!(model = %request.model, search = request.google_search, "Gemini generateContent");
        let response = self.post_with_transport_retries(&endpoint, api_key, &payload)?;
        let response_payload = response_json_or_error(PROVIDER_LABEL, response)?;
        Self::parse_content_response(&response_payload)
    }

    fn submit_video(&self, api_key: &str, request: &MediaRequest) -> Result<JobSnapshot> {
        if request.kind != MediaKind::Video {
            anyhow::bail!("Gemini video submit called with a non-video request");
        }
        let endpoint = self.endpoint_for_model(&request.model, "predictLongRunning");
        let payload = Self::build_video_payload(request);
        // Submission is not idempotent; a transport retry could start a second job.
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key)])
            .timeout(self.request_timeout)
            .json(&payload)
            .send()
            .map_err(|err| err.without_url())
            .with_context(|| format!("Gemini video submit failed ({endpoint})"))?;
        let response_payload = response_json_or_error(PROVIDER_LABEL, response)?;
        let Some(name) = response_payload.get("name").and_then(Value::as_str) else {
            anyhow::bail!("Gemini video submit returned no operation name");
        };
        Ok(Self::parse_operation(&response_payload, &JobHandle::new(name)))
    }

    fn refresh_video(&self, api_key: &str, handle: &JobHandle) -> Result<JobSnapshot> {
        let endpoint = self.operation_endpoint(handle);
        let response = self
            .http
            .get(&endpoint)
            .query(&[("key", api_key)])
            .timeout(self.request_timeout)
            .send()
            .map_err(|err| err.without_url())
            .with_context(|| format!("Gemini operation poll failed ({endpoint})"))?;
        let response_payload = response_json_or_error(PROVIDER_LABEL, response)?;
        Ok(Self::parse_operation(&response_payload, handle))
    }
}

/// google.rpc status codes carried by long-running operation errors.
fn rpc_code_to_http_status(code: u16) -> u16 {
    match code {
        3 => 400,
        4 => 504,
        5 => 404,
        7 => 403,
        8 => 429,
        13 => 500,
        14 => 503,
        16 => 401,
        other if other >= 100 => other,
        _ => 500,
    }
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .map_err(|err| err.without_url())
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        return Err(ProviderHttpError {
            provider: provider.to_string(),
            status: code,
            message: provider_error_message(&body, status.canonical_reason()),
        }
        .into());
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

/// `error.message` from a Google error body, else the trimmed body, else the reason phrase.
fn provider_error_message(body: &str, reason: Option<&str>) -> String {
    let from_json = serde_json::from_str::<Value>(body).ok().and_then(|value| {
        value
            .pointer("/error/message")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|message| !message.is_empty())
            .map(str::to_string)
    });
    let message = from_json
        .or_else(|| {
            let trimmed = body.trim();
            (!trimmed.is_empty() && !trimmed.starts_with('{') && !trimmed.starts_with('<'))
                .then(|| trimmed.to_string())
        })
        .unwrap_or_else(|| reason.unwrap_or("request failed").to_string());
    truncate_text(&message, MAX_ERROR_MESSAGE_CHARS)
}

#[cfg(test)]
mod tests {
    use lumen_contracts::jobs::{JobFailure, JobHandle, JobStatus};
    use lumen_contracts::media::{GenerationRequest, MediaKind, MediaRequestBuilder, ReferenceImage};
    use lumen_contracts::models::ResolutionTier;
    use serde_json::json;

    use super::{provider_error_message, GeminiProvider};
    use crate::config::EngineConfig;
    use crate::provider::{ContentPart, ContentRequest, ImageConfig};

    #[test]
    fn endpoints_are_built_from_base_and_model() {
        let provider = GeminiProvider::new(&EngineConfig::default());
        assert_eq!(
            provider.endpoint_for_model("gemini-2.5-flash", "generateContent"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent"
        );
        assert_eq!(
            provider.endpoint_for_model("models/veo-3.1-generate-preview", "predictLongRunning"),
            "https://generativelanguage.googleapis.com/v1beta/models/veo-3.1-generate-preview:predictLongRunning"
        );
        assert_eq!(
            provider.operation_endpoint(&JobHandle::new("models/veo/operations/abc")),
            "https://generativelanguage.googleapis.com/v1beta/models/veo/operations/abc"
        );
    }

    #[test]
    fn content_payload_includes_instruction_image_config_and_search_tool() {
        let request = ContentRequest {
            model: "gemini-3-pro-image-preview".to_string(),
            parts: vec![
                ContentPart::InlineImage {
                    mime_type: "image/jpeg".to_string(),
                    bytes: b"ref".to_vec(),
                },
                ContentPart::Text("a lighthouse".to_string()),
            ],
            system_instruction: Some("be brief".to_string()),
            temperature: Some(0.7),
            image_config: Some(ImageConfig {
                aspect_ratio: "4:3".to_string(),
                image_size: Some("2K".to_string()),
            }),
            google_search: true,
        };
        let payload = GeminiProvider::build_content_payload(&request);
        assert_eq!(payload["contents"][0]["role"], "user");
        assert_eq!(
            payload["contents"][0]["parts"][0]["inlineData"]["mimeType"],
            "image/jpeg"
        );
        assert_eq!(payload["contents"][0]["parts"][0]["inlineData"]["data"], "cmVm");
        assert_eq!(payload["contents"][0]["parts"][1]["text"], "a lighthouse");
        assert_eq!(payload["systemInstruction"]["parts"][0]["text"], "be brief");
        assert_eq!(payload["generationConfig"]["temperature"], 0.7);
        assert_eq!(payload["generationConfig"]["imageConfig"]["aspectRatio"], "4:3");
        assert_eq!(payload["generationConfig"]["imageConfig"]["imageSize"], "2K");
        assert_eq!(payload["tools"], json!([{ "googleSearch": {} }]));
    }

    #[test]
    fn plain_text_payload_omits_optional_sections() {
        let payload =
            GeminiProvider::build_content_payload(&ContentRequest::text("gemini-2.5-flash", "hi"));
        assert!(payload.get("systemInstruction").is_none());
        assert!(payload.get("generationConfig").is_none());
        assert!(payload.get("tools").is_none());
    }

    #[test]
    fn video_payload_follows_tier_and_conditioning() {
        let request = GenerationRequest::new(
            "waves",
            Some(ReferenceImage {
                bytes: b"png".to_vec(),
                mime_type: "image/png".to_string(),
            }),
            "9:16",
            ResolutionTier::Hd,
            Some(6),
        )
        .expect("valid request");
        let built = MediaRequestBuilder::default()
            .build(MediaKind::Video, &request)
            .expect("buildable");
        let payload = GeminiProvider::build_video_payload(&built);
        assert_eq!(payload["instances"][0]["prompt"], "waves (Duration: 6 seconds)");
        assert_eq!(payload["instances"][0]["image"]["bytesBase64Encoded"], "cG5n");
        assert_eq!(payload["instances"][0]["image"]["mimeType"], "image/png");
        assert_eq!(payload["parameters"]["aspectRatio"], "9:16");
        assert_eq!(payload["parameters"]["resolution"], "1080p");
        assert_eq!(payload["parameters"]["sampleCount"], 1);

        let standard = GenerationRequest::new("waves", None, "16:9", ResolutionTier::Standard, None)
            .expect("valid request");
        let built = MediaRequestBuilder::default()
            .build(MediaKind::Video, &standard)
            .expect("buildable");
        let payload = GeminiProvider::build_video_payload(&built);
        assert!(payload["instances"][0].get("image").is_none());
        assert!(payload["parameters"].get("resolution").is_none());
    }

    #[test]
    fn content_response_collects_text_images_and_grounding() -> anyhow::Result<()> {
        let payload = json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "thinking...", "thought": true},
                    {"text": "Rust is "},
                    {"text": "fast."},
                    {"inlineData": {"mimeType": "image/jpeg", "data": "aGk="}},
                    {"inline_data": {"data": "eW8="}}
                ]},
                "groundingMetadata": {"groundingChunks": [
                    {"web": {"uri": "https://a.test", "title": "a.test"}},
                    {"retrievedContext": {"uri": "gs://x"}},
                    {"web": {}}
                ]}
            }]
        });
        let parsed = GeminiProvider::parse_content_response(&payload)?;
        assert_eq!(parsed.text.as_deref(), Some("Rust is fast."));
        assert_eq!(parsed.images.len(), 2);
        assert_eq!(parsed.images[0].mime_type, "image/jpeg");
        assert_eq!(parsed.images[0].bytes, b"hi".to_vec());
        assert_eq!(parsed.images[1].mime_type, "image/png");
        assert_eq!(parsed.grounding.len(), 3);
        assert_eq!(
            parsed.grounding[0].web.as_ref().and_then(|web| web.uri.as_deref()),
            Some("https://a.test")
        );
        assert!(parsed.grounding[1].web.is_none());
        assert_eq!(
            parsed.grounding[2].web.as_ref().map(|web| web.title.is_none()),
            Some(true)
        );
        Ok(())
    }

    #[test]
    fn empty_candidates_parse_to_empty_response() -> anyhow::Result<()> {
        let parsed = GeminiProvider::parse_content_response(&json!({}))?;
        assert!(parsed.text.is_none());
        assert!(parsed.images.is_empty());
        assert!(parsed.grounding.is_empty());
        Ok(())
    }

    #[test]
    fn operation_states_map_to_job_status() {
        let fallback = JobHandle::new("models/veo/operations/op-1");

        let pending = GeminiProvider::parse_operation(&json!({"name": "op-2"}), &fallback);
        assert_eq!(pending.handle.as_str(), "op-2");
        assert_eq!(pending.status, JobStatus::Pending);

        let done = GeminiProvider::parse_operation(
            &json!({
                "done": true,
                "response": {"generateVideoResponse": {"generatedSamples": [
                    {"video": {"uri": "https://files.test/v1:download?alt=media"}}
                ]}}
            }),
            &fallback,
        );
        assert_eq!(done.handle, fallback);
        assert_eq!(
            done.status,
            JobStatus::Done(Some("https://files.test/v1:download?alt=media".to_string()))
        );

        let sdk_shape = GeminiProvider::parse_operation(
            &json!({"done": true, "response": {"generatedVideos": [{"video": {"uri": "u"}}]}}),
            &fallback,
        );
        assert_eq!(sdk_shape.status, JobStatus::Done(Some("u".to_string())));

        let empty = GeminiProvider::parse_operation(&json!({"done": true}), &fallback);
        assert_eq!(empty.status, JobStatus::Done(None));

        let failed = GeminiProvider::parse_operation(
            &json!({"done": true, "error": {"code": 8, "message": "Quota exhausted"}}),
            &fallback,
        );
        assert_eq!(
            failed.status,
            JobStatus::Failed(JobFailure {
                code: Some(429),
                message: "Quota exhausted".to_string(),
            })
        );
    }

    #[test]
    fn error_bodies_are_reduced_to_their_message() {
        assert_eq!(
            provider_error_message(
                r#"{"error": {"code": 404, "message": "Requested entity was not found.", "status": "NOT_FOUND"}}"#,
                Some("Not Found"),
            ),
            "Requested entity was not found."
        );
        assert_eq!(provider_error_message("upstream busy", None), "upstream busy");
        assert_eq!(
            provider_error_message("<html>502</html>", Some("Bad Gateway")),
            "Bad Gateway"
        );
        assert_eq!(provider_error_message("{\"odd\": 1}", None), "request failed");
    }
}
