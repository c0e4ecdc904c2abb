use std::collections::BTreeMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use lumen_contracts::jobs::{JobHandle, JobSnapshot};
use lumen_contracts::media::MediaRequest;
use lumen_contracts::search::GroundingChunk;
use thiserror::Error;

#[derive(Clone, PartialEq, Eq)]
pub enum ContentPart {
    Text(String),
    InlineImage { mime_type: String, bytes: Vec<u8> },
}

impl std::fmt::Debug for ContentPart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::InlineImage { mime_type, bytes } => f
                .debug_struct("InlineImage")
                .field("mime_type", mime_type)
                .field("bytes", &bytes.len())
                .finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageConfig {
    pub aspect_ratio: String,
    pub image_size: Option<String>,
}

/// One `generateContent`-style call: text, image or grounded search.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentRequest {
    pub model: String,
    pub parts: Vec<ContentPart>,
    pub system_instruction: Option<String>,
    pub temperature: Option<f64>,
    pub image_config: Option<ImageConfig>,
    pub google_search: bool,
}

impl ContentRequest {
    pub fn text(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            parts: vec![ContentPart::Text(prompt.into())],
            system_instruction: None,
            temperature: None,
            image_config: None,
            google_search: false,
        }
    }

    pub fn prompt_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text(text) => Some(text.as_str()),
                ContentPart::InlineImage { .. } => None,
            })
            .collect::<Vec<&str>>()
            .join("\n")
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl GeneratedImage {
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, BASE64.encode(&self.bytes))
    }

    pub fn extension(&self) -> &'static str {
        let lowered = self.mime_type.to_ascii_lowercase();
        if lowered.contains("jpeg") || lowered.contains("jpg") {
            return "jpg";
        }
        if lowered.contains("webp") {
            return "webp";
        }
        "png"
    }
}

impl std::fmt::Debug for GeneratedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedImage")
            .field("mime_type", &self.mime_type)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentResponse {
    pub text: Option<String>,
    pub images: Vec<GeneratedImage>,
    pub grounding: Vec<GroundingChunk>,
}

/// Non-2xx provider reply, reduced to its status and human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{provider} request failed ({status}): {message}")]
pub struct ProviderHttpError {
    pub provider: String,
    pub status: u16,
    pub message: String,
}

/// Network surface of a generative AI provider. The credential is passed per call.
pub trait GenerativeProvider: Send + Sync {
    fn name(&self) -> &str;
    fn generate_content(
        &self,
        api_key: &str,
        request: &ContentRequest,
    ) -> anyhow::Result<ContentResponse>;
    fn submit_video(&self, api_key: &str, request: &MediaRequest) -> anyhow::Result<JobSnapshot>;
    fn refresh_video(&self, api_key: &str, handle: &JobHandle) -> anyhow::Result<JobSnapshot>;
}

#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn GenerativeProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: GenerativeProvider + 'static>(&mut self, provider: P) {
        self.providers
            .insert(provider.name().to_string(), Arc::new(provider));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn GenerativeProvider>> {
        self.providers.get(name.trim()).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_uri_carries_mime_and_base64_payload() {
        let image = GeneratedImage {
            mime_type: "image/png".to_string(),
            bytes: b"abc".to_vec(),
        };
        assert_eq!(image.data_uri(), "data:image/png;base64,YWJj");
        assert_eq!(image.extension(), "png");
        let jpeg = GeneratedImage {
            mime_type: "image/jpeg".to_string(),
            bytes: Vec::new(),
        };
        assert_eq!(jpeg.extension(), "jpg");
    }

    #[test]
    fn prompt_text_skips_inline_images() {
        let mut request = ContentRequest::text("m", "describe");
        request.parts.insert(
            0,
            ContentPart::InlineImage {
                mime_type: "image/png".to_string(),
                bytes: vec![1, 2, 3],
            },
        );
        assert_eq!(request.prompt_text(), "describe");
    }

    #[test]
    fn http_error_display_is_a_single_line() {
        let err = ProviderHttpError {
            provider: "Gemini".to_string(),
            status: 429,
            message: "Resource exhausted.".to_string(),
        };
        assert_eq!(err.to_string(), "Gemini request failed (429): Resource exhausted.");
    }
}
