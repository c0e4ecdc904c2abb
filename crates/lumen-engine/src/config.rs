use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_POLL_INTERVAL_S: f64 = 10.0;
pub const DEFAULT_POLL_TIMEOUT_S: f64 = 300.0;

/// Bounded retry for a single dropped status refresh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    /// Delay before retry `n` is `backoff * n`.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: Duration::ZERO,
        }
    }

    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        self.backoff
            .saturating_mul(u32::try_from(attempt.max(1)).unwrap_or(u32::MAX))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// Hard wall-clock ceiling measured from submission.
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs_f64(DEFAULT_POLL_INTERVAL_S),
            timeout: Duration::from_secs_f64(DEFAULT_POLL_TIMEOUT_S),
            retry: RetryPolicy {
                max_retries: 2,
                backoff: Duration::from_secs(1),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub api_base: String,
    pub request_timeout: Duration,
    pub transport_retries: usize,
    pub transport_backoff: Duration,
    pub poll: PollPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(non_empty_env)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let api_base = lookup("GEMINI_API_BASE")
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let number = |key: &str, default: f64, min: f64, max: f64| {
            value_as_f64(lookup(key).as_deref(), default, min, max)
        };

        Self {
            api_base,
            request_timeout: Duration::from_secs_f64(number(
                "LUMEN_REQUEST_TIMEOUT_SECS",
                90.0,
                15.0,
                300.0,
            )),
            transport_retries: number("LUMEN_TRANSPORT_RETRIES", 2.0, 0.0, 4.0).round() as usize,
            transport_backoff: Duration::from_secs_f64(number(
                "LUMEN_TRANSPORT_BACKOFF_SECS",
                1.2,
                0.1,
                10.0,
            )),
            poll: PollPolicy {
                interval: Duration::from_secs_f64(number(
                    "LUMEN_POLL_INTERVAL_SECS",
                    DEFAULT_POLL_INTERVAL_S,
                    1.0,
                    60.0,
                )),
                timeout: Duration::from_secs_f64(number(
                    "LUMEN_POLL_TIMEOUT_SECS",
                    DEFAULT_POLL_TIMEOUT_S,
                    10.0,
                    1800.0,
                )),
                retry: RetryPolicy {
                    max_retries: number("LUMEN_POLL_RETRIES", 2.0, 0.0, 5.0).round() as usize,
                    backoff: Duration::from_secs_f64(number(
                        "LUMEN_POLL_RETRY_BACKOFF_SECS",
                        1.0,
                        0.1,
                        10.0,
                    )),
                },
            },
        }
    }
}

/// `$LUMEN_HOME/settings.json`, falling back to `~/.lumen/settings.json`.
pub fn settings_path() -> PathBuf {
    settings_path_from(non_empty_env)
}

fn settings_path_from(lookup: impl Fn(&str) -> Option<String>) -> PathBuf {
    let home = lookup("LUMEN_HOME")
        .map(PathBuf::from)
        .or_else(|| {
            lookup("HOME")
                .or_else(|| lookup("USERPROFILE"))
                .map(|home| PathBuf::from(home).join(".lumen"))
        })
        .unwrap_or_else(|| PathBuf::from(".lumen"));
    home.join("settings.json")
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn value_as_f64(raw: Option<&str>, default: f64, min: f64, max: f64) -> f64 {
    raw.and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .unwrap_or(default)
        .clamp(min, max)
}
