use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Text,
    Image,
    Video,
    Search,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Search => "search",
        }
    }

    /// Human-readable name used in error messages.
    pub fn label(self) -> &'static str {
        match self {
            Self::Text => "text generation",
            Self::Image => "image generation",
            Self::Video => "video generation (Veo)",
            Self::Search => "grounded search",
        }
    }
}

/// Coarse quality selector. Picks the model variant; never sent to the provider as-is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionTier {
    #[default]
    Standard,
    Hd,
}

impl ResolutionTier {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "standard" | "sd" | "default" => Some(Self::Standard),
            "hd" | "high" => Some(Self::Hd),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Hd => "hd",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<Capability>,
    /// `None` means the model serves every tier.
    pub tier: Option<ResolutionTier>,
}

impl ModelSpec {
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn serves(&self, tier: ResolutionTier) -> bool {
        self.tier.map(|own| own == tier).unwrap_or(true)
    }
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    pub fn by_capability(&self, capability: Capability) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .cloned()
            .collect()
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, capabilities: &[Capability], tier: Option<ResolutionTier>| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                provider: "gemini".to_string(),
                capabilities: capabilities.to_vec(),
                tier,
            },
        );
    };

    insert(
        "gemini-2.5-flash",
        &[Capability::Text, Capability::Search],
        None,
    );
    insert(
        "gemini-2.5-flash-image",
        &[Capability::Image],
        Some(ResolutionTier::Standard),
    );
    insert(
        "gemini-3-pro-image-preview",
        &[Capability::Image],
        Some(ResolutionTier::Hd),
    );
    insert(
        "veo-3.1-fast-generate-preview",
        &[Capability::Video],
        Some(ResolutionTier::Standard),
    );
    insert(
        "veo-3.1-generate-preview",
        &[Capability::Video],
        Some(ResolutionTier::Hd),
    );

    map
}
