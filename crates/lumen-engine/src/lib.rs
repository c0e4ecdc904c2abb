pub mod cancel;
pub mod config;
pub mod credentials;
pub mod dryrun;
pub mod failures;
pub mod gemini;
pub mod inflight;
pub mod poller;
pub mod provider;
pub mod text;

use std::sync::Arc;

use lumen_contracts::errors::{classify, ClassifiedError, FailureSignal};
use lumen_contracts::events::EventWriter;
use lumen_contracts::media::{GenerationRequest, MediaKind, MediaRequestBuilder};
use lumen_contracts::models::{Capability, ModelSelector, ResolutionTier};
use lumen_contracts::search::{self, GroundedResponse, SearchResultItem};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::{EngineConfig, PollPolicy};
use crate::credentials::{CredentialSelector, CredentialSource};
use crate::dryrun::DryrunProvider;
use crate::failures::failure_signal;
use crate::gemini::GeminiProvider;
use crate::inflight::{request_fingerprint, InFlightJobs};
use crate::poller::JobPoller;
use crate::provider::{
    ContentPart, ContentRequest, GeneratedImage, GenerativeProvider, ImageConfig, ProviderRegistry,
};

pub fn default_provider_registry(config: &EngineConfig) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry.register(DryrunProvider::default());
    registry.register(GeminiProvider::new(config));
    registry
}

/// User-facing operations over one provider. Every call resolves the credential
/// immediately before it touches the network.
pub struct GenerationEngine {
    provider: Arc<dyn GenerativeProvider>,
    credentials: Arc<dyn CredentialSource>,
    selector: Arc<dyn CredentialSelector>,
    models: ModelSelector,
    builder: MediaRequestBuilder,
    poll: PollPolicy,
    in_flight: InFlightJobs,
    events: Option<EventWriter>,
}

impl GenerationEngine {
    pub fn new(
        provider: Arc<dyn GenerativeProvider>,
        credentials: Arc<dyn CredentialSource>,
        selector: Arc<dyn CredentialSelector>,
        poll: PollPolicy,
    ) -> Self {
        let models = ModelSelector::default();
        Self {
            provider,
            credentials,
            selector,
            builder: MediaRequestBuilder::new(models.clone()),
            models,
            poll,
            in_flight: InFlightJobs::new(),
            events: None,
        }
    }

    pub fn with_events(mut self, events: Option<EventWriter>) -> Self {
        self.events = events;
        self
    }

    pub fn optimize_prompt(
        &self,
        raw: &str,
        tone: &str,
        category: &str,
    ) -> Result<String, ClassifiedError> {
        if raw.trim().is_empty() {
            return Err(ClassifiedError::invalid("prompt must not be empty."));
        }
        let mut request = ContentRequest::text(self.model_for(Capability::Text)?, raw.trim());
        request.system_instruction = Some(text::optimize_system_instruction(tone, category));
        request.temperature = Some(text::OPTIMIZE_TEMPERATURE);

        let reply = self.generate_text(&request, "optimize_prompt")?;
        Ok(reply.unwrap_or_else(|| text::EMPTY_OPTIMIZE_REPLY.to_string()))
    }

    pub fn generate_app_code(
        &self,
        name: &str,
        description: &str,
        features: &[String],
    ) -> Result<String, ClassifiedError> {
        if name.trim().is_empty() {
            return Err(ClassifiedError::invalid("app name must not be empty."));
        }
        let request = ContentRequest::text(
            self.model_for(Capability::Text)?,
            text::app_code_prompt(name, description, features),
        );
        let reply = self.generate_text(&request, "generate_app_code")?;
        Ok(text::sanitize_app_code(&reply.unwrap_or_default()))
    }

    /// First image the model returns, or `None` if it answered without one.
    pub fn generate_image(
        &self,
        request: &GenerationRequest,
    ) -> Result<Option<GeneratedImage>, ClassifiedError> {
        let media = self.builder.build(MediaKind::Image, request)?;
        if let Some(reason) = media.fallback_reason.as_deref() {
            warn!(reason, "image model fallback");
        }
        let api_key = self.require_key(Capability::Image)?;

        let mut parts = Vec::with_capacity(2);
        if let Some(image) = media.reference_image.as_ref() {
            parts.push(ContentPart::InlineImage {
                mime_type: image.mime_type.clone(),
                bytes: image.bytes.clone(),
            });
        }
        parts.push(ContentPart::Text(media.prompt.clone()));
        let content = ContentRequest {
            model: media.model.clone(),
            parts,
            system_instruction: None,
            temperature: None,
            image_config: Some(ImageConfig {
                aspect_ratio: media.aspect_ratio.as_str().to_string(),
                image_size: media.output_resolution.map(str::to_string),
            }),
            google_search: false,
        };

        let response = self
            .provider
            .generate_content(&api_key, &content)
            .map_err(|err| self.classified(&failure_signal(&err), Capability::Image))?;
        let image = response.images.into_iter().next();
        info!(
            model = %media.model,
            aspect_ratio = media.aspect_ratio.as_str(),
            returned = image.is_some(),
            "image generated"
        );
        self.emit(
            "image_generated",
            json!({
                "model": media.model,
                "aspect_ratio": media.aspect_ratio.as_str(),
                "resolution": media.output_resolution,
                "conditioned": media.reference_image.is_some(),
                "mime_type": image.as_ref().map(|image| image.mime_type.clone()),
                "bytes": image.as_ref().map(|image| image.bytes.len()),
            }),
        );
        Ok(image)
    }

    /// Submits a video job and blocks until it finishes, fails, times out or is cancelled.
    pub fn generate_video(
        &self,
        request: &GenerationRequest,
        cancel: &CancelToken,
    ) -> Result<Option<String>, ClassifiedError> {
        if !self.selector.has_selected_key() {
            if let Err(err) = self.selector.open_select_key() {
                warn!(error = %err, "credential selection failed");
            }
        }
        let media = self.builder.build(MediaKind::Video, request)?;
        if let Some(reason) = media.fallback_reason.as_deref() {
            warn!(reason, "video model fallback");
        }
        let _claim = self.in_flight.claim(request_fingerprint(&media))?;

        let result = JobPoller::new(self.provider.as_ref(), self.credentials.as_ref(), self.poll)
            .with_events(self.events.as_ref())
            .run(&media, cancel);
        if let Err(err) = result.as_ref() {
            self.after_failure(err);
        }
        result
    }

    /// Grounded web search. Never fails: problems come back as a single diagnostic item.
    pub fn search(&self, query: &str) -> Vec<SearchResultItem> {
        let Some(api_key) = self.credentials.api_key() else {
            debug!("search skipped: no credential");
            return search::missing_credential_results();
        };
        let model = match self.model_for(Capability::Search) {
            Ok(model) => model,
            Err(err) => {
                warn!(error = %err, "no search model");
                return search::search_error_results();
            }
        };
        let mut request = ContentRequest::text(model, search::search_prompt(query));
        request.google_search = true;

        let results = match self.provider.generate_content(&api_key, &request) {
            Ok(response) => search::normalize(GroundedResponse {
                text: response.text,
                chunks: response.grounding,
            }),
            Err(err) => {
                warn!(error = %failure_signal(&err).message, "search failed");
                search::search_error_results()
            }
        };
        self.emit(
            "search_completed",
            json!({ "model": request.model, "results": results.len() }),
        );
        results
    }

    fn generate_text(
        &self,
        request: &ContentRequest,
        operation: &str,
    ) -> Result<Option<String>, ClassifiedError> {
        let api_key = self.require_key(Capability::Text)?;
        let response = self
            .provider
            .generate_content(&api_key, request)
            .map_err(|err| self.classified(&failure_signal(&err), Capability::Text))?;
        let reply = response
            .text
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty());
        info!(
            operation,
            model = %request.model,
            chars = ?reply.as_ref().map(String::len),
            "text generated"
        );
        self.emit(
            "text_generated",
            json!({
                "operation": operation,
                "model": request.model,
                "empty": reply.is_none(),
            }),
        );
        Ok(reply)
    }

    fn model_for(&self, capability: Capability) -> Result<String, ClassifiedError> {
        self.models
            .select(capability, ResolutionTier::Standard)
            .map(|selection| selection.model.name)
            .map_err(ClassifiedError::InvalidArgument)
    }

    fn require_key(&self, capability: Capability) -> Result<String, ClassifiedError> {
        self.credentials
            .api_key()
            .ok_or_else(|| self.classified(&FailureSignal::missing_credential(), capability))
    }

    fn classified(&self, signal: &FailureSignal, capability: Capability) -> ClassifiedError {
        let err = classify(signal, capability);
        warn!(
            capability = capability.as_str(),
            kind = err.kind(),
            status = ?signal.status,
            "call failed"
        );
        self.after_failure(&err);
        err
    }

    fn after_failure(&self, err: &ClassifiedError) {
        if !err.requests_credential_reselection() {
            return;
        }
        if let Err(select_err) = self.selector.open_select_key() {
            warn!(error = %select_err, "credential re-selection failed");
        }
    }

    fn emit(&self, event_type: &str, payload: Value) {
        let Some(events) = self.events.as_ref() else {
            return;
        };
        if let Err(err) = events.emit(event_type, payload) {
            warn!(event_type, error = %err, "failed to write event");
        }
    }
}
