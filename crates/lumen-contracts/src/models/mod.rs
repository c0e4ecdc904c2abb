mod registry;
mod selectors;

pub use registry::{Capability, ModelRegistry, ModelSpec, ResolutionTier};
pub use selectors::{ModelSelection, ModelSelector};
