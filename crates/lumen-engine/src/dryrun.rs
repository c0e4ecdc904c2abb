use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use image::{ImageFormat, Rgb, RgbImage};
use lumen_contracts::jobs::{JobHandle, JobSnapshot, JobStatus};
use lumen_contracts::media::{AspectRatio, MediaKind, MediaRequest};
use lumen_contracts::search::{GroundingChunk, WebSource};
use sha2::{Digest, Sha256};

use crate::provider::{ContentRequest, ContentResponse, GeneratedImage, GenerativeProvider};

const DEFAULT_REFRESHES_UNTIL_DONE: u32 = 2;

/// Offline provider: deterministic text, solid-colour PNGs, and video jobs that
/// finish after a fixed number of refreshes. No network access.
pub struct DryrunProvider {
    refreshes_until_done: u32,
    jobs: Mutex<HashMap<String, u32>>,
}

impl Default for DryrunProvider {
    fn default() -> Self {
        Self::new(DEFAULT_REFRESHES_UNTIL_DONE)
    }
}

impl DryrunProvider {
    pub fn new(refreshes_until_done: u32) -> Self {
        Self {
            refreshes_until_done,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    fn image_for(request: &ContentRequest) -> Result<GeneratedImage> {
        let ratio = request
            .image_config
            .as_ref()
            .and_then(|config| AspectRatio::parse(&config.aspect_ratio).ok())
            .unwrap_or_default();
        let (width, height) = dims_for(ratio);
        let (r, g, b) = color_from_prompt(&request.prompt_text());
        let mut image = RgbImage::new(width, height);
        for pixel in image.pixels_mut() {
            *pixel = Rgb([r, g, b]);
        }
        let mut bytes = Cursor::new(Vec::new());
        image
            .write_to(&mut bytes, ImageFormat::Png)
            .context("failed to encode dryrun image")?;
        Ok(GeneratedImage {
            mime_type: "image/png".to_string(),
            bytes: bytes.into_inner(),
        })
    }

    fn search_reply(query: &str) -> ContentResponse {
        let id = short_id(query);
        let chunk = |uri: String, title: &str| GroundingChunk {
            web: Some(WebSource {
                uri: Some(uri),
                title: Some(title.to_string()),
            }),
        };
        ContentResponse {
            text: Some(format!("[dryrun] Summary for: {}", first_line(query))),
            images: Vec::new(),
            grounding: vec![
                chunk(format!("https://example.com/{id}/1"), "example.com"),
                chunk(format!("https://example.org/{id}/2"), "example.org"),
            ],
        }
    }
}

impl GenerativeProvider for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate_content(&self, _api_key: &str, request: &ContentRequest) -> Result<ContentResponse> {
        if request.image_config.is_some() {
            return Ok(ContentResponse {
                text: None,
                images: vec![Self::image_for(request)?],
                grounding: Vec::new(),
            });
        }
        let prompt = request.prompt_text();
        if request.google_search {
            return Ok(Self::search_reply(&prompt));
        }
        Ok(ContentResponse {
            text: Some(format!("[dryrun:{}] {}", request.model, first_line(&prompt))),
            images: Vec::new(),
            grounding: Vec::new(),
        })
    }

    fn submit_video(&self, _api_key: &str, request: &MediaRequest) -> Result<JobSnapshot> {
        if request.kind != MediaKind::Video {
            anyhow::bail!("dryrun video submit called with a non-video request");
        }
        let name = format!("dryrun/operations/{}", uuid::Uuid::new_v4().simple());
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), 0);
        Ok(JobSnapshot {
            handle: JobHandle::new(name),
            status: JobStatus::Pending,
        })
    }

    fn refresh_video(&self, _api_key: &str, handle: &JobHandle) -> Result<JobSnapshot> {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(refreshes) = jobs.get_mut(handle.as_str()) else {
            anyhow::bail!("dryrun operation {handle} not found");
        };
        *refreshes += 1;
        let status = if *refreshes >= self.refreshes_until_done {
            jobs.remove(handle.as_str());
            let id = handle.as_str().rsplit('/').next().unwrap_or_default();
            JobStatus::Done(Some(format!("dryrun://video/{id}.mp4?alt=media")))
        } else {
            JobStatus::Pending
        };
        Ok(JobSnapshot {
            handle: handle.clone(),
            status,
        })
    }
}

fn dims_for(ratio: AspectRatio) -> (u32, u32) {
    match ratio {
        AspectRatio::Square => (64, 64),
        AspectRatio::Landscape => (64, 36),
        AspectRatio::Portrait => (36, 64),
        AspectRatio::Classic => (64, 48),
        AspectRatio::ClassicPortrait => (48, 64),
    }
}

fn color_from_prompt(prompt: &str) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

fn short_id(prompt: &str) -> String {
    let digest = Sha256::digest(prompt.as_bytes());
    hex::encode(&digest[..4])
}

fn first_line(text: &str) -> &str {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default()
}
