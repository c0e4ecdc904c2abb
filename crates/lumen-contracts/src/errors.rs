use std::time::Duration;

use thiserror::Error;

use crate::models::Capability;

const ACCESS_DENIED_MARKER: &str = "requested entity was not found";
const QUOTA_MARKER: &str = "quota";
const MAX_GENERIC_MESSAGE_CHARS: usize = 300;

/// User-facing failure categories. `Display` is the sentence shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassifiedError {
    #[error("API key missing. Please add your Gemini API key in Settings.")]
    MissingCredential,
    #[error("Invalid request: {0}")]
    InvalidArgument(String),
    #[error("{0}")]
    AccessDenied(String),
    #[error("{0}")]
    QuotaExceeded(String),
    #[error(
        "Generation timed out after {} seconds. The model is taking too long.",
        .budget.as_secs()
    )]
    TimedOut { budget: Duration },
    #[error("Generation was cancelled.")]
    Cancelled,
    #[error("An identical request is already in progress. Please wait for it to finish.")]
    AlreadyInFlight,
    #[error("{0}")]
    Generic(String),
}

impl ClassifiedError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingCredential => "missing_credential",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::AccessDenied(_) => "access_denied",
            Self::QuotaExceeded(_) => "quota_exceeded",
            Self::TimedOut { .. } => "timed_out",
            Self::Cancelled => "cancelled",
            Self::AlreadyInFlight => "already_in_flight",
            Self::Generic(_) => "generic",
        }
    }

    /// Whether the caller should reopen credential selection before surfacing this error.
    pub fn requests_credential_reselection(&self) -> bool {
        matches!(self, Self::AccessDenied(_))
    }
}

/// Raw failure observed at a call boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureSignal {
    pub credential_missing: bool,
    pub status: Option<u16>,
    pub message: String,
    pub timed_out_after: Option<Duration>,
}

impl FailureSignal {
    pub fn missing_credential() -> Self {
        Self {
            credential_missing: true,
            ..Self::default()
        }
    }

    pub fn provider(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn timed_out(budget: Duration) -> Self {
        Self {
            timed_out_after: Some(budget),
            ..Self::default()
        }
    }
}

/// Maps a failure to its category. Rules are evaluated in order; the first match wins.
pub fn classify(signal: &FailureSignal, capability: Capability) -> ClassifiedError {
    if signal.credential_missing {
        return ClassifiedError::MissingCredential;
    }

    let lowered = signal.message.to_ascii_lowercase();
    if signal.status == Some(404) || lowered.contains(ACCESS_DENIED_MARKER) {
        return ClassifiedError::AccessDenied(format!(
            "Access Denied: The selected project does not have access to {}. \
             Please select a paid project with billing enabled.",
            capability.label()
        ));
    }

    if signal.status == Some(429) || lowered.contains(QUOTA_MARKER) {
        return ClassifiedError::QuotaExceeded(format!(
            "Quota Exceeded: You have reached the usage limit for {}. Please try again later.",
            capability.label()
        ));
    }

    if let Some(budget) = signal.timed_out_after {
        return ClassifiedError::TimedOut { budget };
    }

    let message = signal.message.trim();
    if message.is_empty() {
        return ClassifiedError::Generic(format!("{} failed.", capitalize(capability.label())));
    }
    ClassifiedError::Generic(truncate_chars(message, MAX_GENERIC_MESSAGE_CHARS))
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn truncate_chars(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
