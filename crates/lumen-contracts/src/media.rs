use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::ClassifiedError;
use crate::models::{Capability, ModelSelector, ResolutionTier};

pub const HD_IMAGE_SIZE: &str = "2K";
pub const HD_VIDEO_RESOLUTION: &str = "1080p";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "9:16")]
    Portrait,
    #[serde(rename = "4:3")]
    Classic,
    #[serde(rename = "3:4")]
    ClassicPortrait,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 5] = [
        AspectRatio::Square,
        AspectRatio::Landscape,
        AspectRatio::Portrait,
        AspectRatio::Classic,
        AspectRatio::ClassicPortrait,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Square => "1:1",
            Self::Landscape => "16:9",
            Self::Portrait => "9:16",
            Self::Classic => "4:3",
            Self::ClassicPortrait => "3:4",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, ClassifiedError> {
        let trimmed = raw.trim();
        Self::ALL
            .into_iter()
            .find(|ratio| ratio.as_str() == trimmed)
            .ok_or_else(|| {
                ClassifiedError::invalid(format!(
                    "aspect ratio '{trimmed}' is not supported (use one of {}).",
                    Self::ALL.map(Self::as_str).join(", ")
                ))
            })
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct ReferenceImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl fmt::Debug for ReferenceImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceImage")
            .field("bytes", &format_args!("<{} bytes>", self.bytes.len()))
            .field("mime_type", &self.mime_type)
            .finish()
    }
}

/// Validated user input for an image or video generation. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    prompt: String,
    reference_image: Option<ReferenceImage>,
    aspect_ratio: AspectRatio,
    resolution_tier: ResolutionTier,
    duration_hint: Option<u32>,
}

impl GenerationRequest {
    /// `aspect_ratio` is the raw user choice; it must be one of [`AspectRatio::ALL`].
    pub fn new(
        prompt: &str,
        reference_image: Option<ReferenceImage>,
        aspect_ratio: &str,
        resolution_tier: ResolutionTier,
        duration_hint: Option<u32>,
    ) -> Result<Self, ClassifiedError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(ClassifiedError::invalid("prompt must not be empty."));
        }
        let aspect_ratio = AspectRatio::parse(aspect_ratio)?;
        if duration_hint == Some(0) {
            return Err(ClassifiedError::invalid(
                "duration must be a positive number of seconds.",
            ));
        }
        if let Some(image) = reference_image.as_ref() {
            if image.bytes.is_empty() {
                return Err(ClassifiedError::invalid("reference image is empty."));
            }
            if !image.mime_type.trim().to_ascii_lowercase().starts_with("image/") {
                return Err(ClassifiedError::invalid(format!(
                    "reference image type '{}' is not an image.",
                    image.mime_type
                )));
            }
        }
        Ok(Self {
            prompt: prompt.to_string(),
            reference_image,
            aspect_ratio,
            resolution_tier,
            duration_hint,
        })
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn reference_image(&self) -> Option<&ReferenceImage> {
        self.reference_image.as_ref()
    }

    pub fn aspect_ratio(&self) -> AspectRatio {
        self.aspect_ratio
    }

    pub fn resolution_tier(&self) -> ResolutionTier {
        self.resolution_tier
    }

    pub fn duration_hint(&self) -> Option<u32> {
        self.duration_hint
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn capability(self) -> Capability {
        match self {
            Self::Image => Capability::Image,
            Self::Video => Capability::Video,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conditioning {
    TextOnly,
    ImageConditioned,
}

/// Provider-agnostic description of a generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRequest {
    pub kind: MediaKind,
    pub model: String,
    pub prompt: String,
    pub conditioning: Conditioning,
    pub reference_image: Option<ReferenceImage>,
    pub aspect_ratio: AspectRatio,
    /// `imageSize` for images, `resolution` for video. `None` on the standard tier.
    pub output_resolution: Option<&'static str>,
    pub duration_seconds: Option<u32>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MediaRequestBuilder {
    selector: ModelSelector,
}

impl MediaRequestBuilder {
    pub fn new(selector: ModelSelector) -> Self {
        Self { selector }
    }

    pub fn build(
        &self,
        kind: MediaKind,
        request: &GenerationRequest,
    ) -> Result<MediaRequest, ClassifiedError> {
        let tier = request.resolution_tier();
        let selection = self
            .selector
            .select(kind.capability(), tier)
            .map_err(ClassifiedError::InvalidArgument)?;

        // A fallback model does not serve the requested tier; keep its native size.
        let output_resolution = match (kind, tier) {
            _ if selection.fallback_reason.is_some() => None,
            (_, ResolutionTier::Standard) => None,
            (MediaKind::Image, ResolutionTier::Hd) => Some(HD_IMAGE_SIZE),
            (MediaKind::Video, ResolutionTier::Hd) => Some(HD_VIDEO_RESOLUTION),
        };
        let conditioning = if request.reference_image().is_some() {
            Conditioning::ImageConditioned
        } else {
            Conditioning::TextOnly
        };
        let duration_seconds = match kind {
            MediaKind::Video => request.duration_hint(),
            MediaKind::Image => None,
        };
        let prompt = match duration_seconds {
            Some(seconds) => format!("{} (Duration: {seconds} seconds)", request.prompt()),
            None => request.prompt().to_string(),
        };

        Ok(MediaRequest {
            kind,
            model: selection.model.name,
            prompt,
            conditioning,
            reference_image: request.reference_image().cloned(),
            aspect_ratio: request.aspect_ratio(),
            output_resolution,
            duration_seconds,
            fallback_reason: selection.fallback_reason,
        })
    }
}
