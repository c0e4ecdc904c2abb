use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use lumen_contracts::errors::ClassifiedError;
use lumen_contracts::media::MediaRequest;
use sha2::{Digest, Sha256};

/// Request fingerprint -> in-flight job. One poll loop per user intent.
#[derive(Debug, Clone, Default)]
pub struct InFlightJobs {
    active: Arc<Mutex<HashSet<String>>>,
}

impl InFlightJobs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects a second claim on the same fingerprint until the first guard is dropped.
    pub fn claim(&self, fingerprint: String) -> Result<InFlightGuard, ClassifiedError> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(fingerprint.clone()) {
            return Err(ClassifiedError::AlreadyInFlight);
        }
        Ok(InFlightGuard {
            active: Arc::clone(&self.active),
            fingerprint,
        })
    }
}

#[derive(Debug)]
pub struct InFlightGuard {
    active: Arc<Mutex<HashSet<String>>>,
    fingerprint: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.fingerprint);
    }
}

/// Stable hash of everything that makes two submissions the same request.
pub fn request_fingerprint(request: &MediaRequest) -> String {
    let mut hasher = Sha256::new();
    for field in [
        request.model.as_str(),
        request.prompt.as_str(),
        request.aspect_ratio.as_str(),
        request.output_resolution.unwrap_or_default(),
    ] {
        hasher.update(field.as_bytes());
        hasher.update([0u8]);
    }
    if let Some(image) = request.reference_image.as_ref() {
        hasher.update(image.mime_type.as_bytes());
        hasher.update([0u8]);
        hasher.update(&image.bytes);
    }
    hex::encode(hasher.finalize())
}
