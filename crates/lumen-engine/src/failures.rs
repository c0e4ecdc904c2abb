use lumen_contracts::errors::FailureSignal;

use crate::provider::ProviderHttpError;

const MAX_SIGNAL_MESSAGE_CHARS: usize = 600;

/// Reduces an internal error chain to what the classifier looks at.
pub fn failure_signal(err: &anyhow::Error) -> FailureSignal {
    for cause in err.chain() {
        if let Some(http) = cause.downcast_ref::<ProviderHttpError>() {
            return FailureSignal::provider(Some(http.status), http.message.clone());
        }
    }
    let status = err.chain().find_map(|cause| {
        cause
            .downcast_ref::<reqwest::Error>()
            .and_then(reqwest::Error::status)
            .map(|status| status.as_u16())
    });
    FailureSignal::provider(status, error_chain_text(err, MAX_SIGNAL_MESSAGE_CHARS))
}

/// Transport failures and 5xx replies are worth another attempt; 4xx are final.
pub fn is_retryable(err: &anyhow::Error) -> bool {
    if is_retryable_transport_error(err) {
        return true;
    }
    err.chain().any(|cause| {
        cause
            .downcast_ref::<ProviderHttpError>()
            .map(|http| http.status >= 500)
            .unwrap_or(false)
    })
}

pub(crate) fn is_retryable_transport_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<reqwest::Error>()
            .map(|reqwest_err| {
                reqwest_err.is_timeout() || reqwest_err.is_connect() || reqwest_err.is_request()
            })
            .unwrap_or(false)
    })
}

pub fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts.last().map(|existing| existing == trimmed).unwrap_or(false) {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return "unknown error".to_string();
    }
    truncate_text(&parts.join(": "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
