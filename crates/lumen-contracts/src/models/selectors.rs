use super::registry::{Capability, ModelRegistry, ModelSpec, ResolutionTier};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_default(),
        }
    }

    /// First model serving both capability and tier, else the first with the capability.
    pub fn select(
        &self,
        capability: Capability,
        tier: ResolutionTier,
    ) -> Result<ModelSelection, String> {
        let candidates = self.registry.by_capability(capability);
        if let Some(model) = candidates.iter().find(|model| model.serves(tier)) {
            return Ok(ModelSelection {
                model: model.clone(),
                fallback_reason: None,
            });
        }
        let Some(model) = candidates.first().cloned() else {
            return Err(format!(
                "No models available for capability '{}'.",
                capability.as_str()
            ));
        };
        Ok(ModelSelection {
            fallback_reason: Some(format!(
                "No '{}' model for tier '{}'; using {}.",
                capability.as_str(),
                tier.as_str(),
                model.name
            )),
            model,
        })
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::ModelSelector;
    use crate::models::{Capability, ModelRegistry, ModelSpec, ResolutionTier};

    fn spec(name: &str, capability: Capability, tier: Option<ResolutionTier>) -> ModelSpec {
        ModelSpec {
            name: name.to_string(),
            provider: "gemini".to_string(),
            capabilities: vec![capability],
            tier,
        }
    }

    #[test]
    fn default_registry_maps_tiers_to_model_variants() -> Result<(), String> {
        let selector = ModelSelector::new(None);
        let image_standard = selector.select(Capability::Image, ResolutionTier::Standard)?;
        let image_hd = selector.select(Capability::Image, ResolutionTier::Hd)?;
        let video_standard = selector.select(Capability::Video, ResolutionTier::Standard)?;
        let video_hd = selector.select(Capability::Video, ResolutionTier::Hd)?;
        let search = selector.select(Capability::Search, ResolutionTier::Hd)?;

        assert_eq!(image_standard.model.name, "gemini-2.5-flash-image");
        assert_eq!(image_hd.model.name, "gemini-3-pro-image-preview");
        assert_eq!(video_standard.model.name, "veo-3.1-fast-generate-preview");
        assert_eq!(video_hd.model.name, "veo-3.1-generate-preview");
        assert_eq!(search.model.name, "gemini-2.5-flash");
        assert!(search.fallback_reason.is_none());
        Ok(())
    }

    #[test]
    fn selector_falls_back_when_tier_has_no_model() -> Result<(), String> {
        let mut models = IndexMap::new();
        models.insert(
            "image-standard".to_string(),
            spec("image-standard", Capability::Image, Some(ResolutionTier::Standard)),
        );
        let selection = ModelSelector::new(Some(ModelRegistry::new(Some(models))))
            .select(Capability::Image, ResolutionTier::Hd)?;
        assert_eq!(selection.model.name, "image-standard");
        assert_eq!(
            selection.fallback_reason.as_deref(),
            Some("No 'image' model for tier 'hd'; using image-standard.")
        );
        Ok(())
    }

    #[test]
    fn selector_errors_when_capability_missing() {
        let mut models = IndexMap::new();
        models.insert(
            "text-only".to_string(),
            spec("text-only", Capability::Text, None),
        );
        let err = ModelSelector::new(Some(ModelRegistry::new(Some(models))))
            .select(Capability::Video, ResolutionTier::Standard)
            .err()
            .unwrap_or_default();
        assert_eq!(err, "No models available for capability 'video'.");
    }

    #[test]
    fn tier_parsing_accepts_aliases() {
        assert_eq!(ResolutionTier::parse("HD"), Some(ResolutionTier::Hd));
        assert_eq!(ResolutionTier::parse(" standard "), Some(ResolutionTier::Standard));
        assert_eq!(ResolutionTier::parse("ultra"), None);
    }
}
