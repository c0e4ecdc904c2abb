use std::time::Instant;

use lumen_contracts::errors::{classify, ClassifiedError, FailureSignal};
use lumen_contracts::events::EventWriter;
use lumen_contracts::jobs::{JobSnapshot, JobStatus, JobTracker};
use lumen_contracts::media::MediaRequest;
use lumen_contracts::models::Capability;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::PollPolicy;
use crate::credentials::CredentialSource;
use crate::failures::{failure_signal, is_retryable};
use crate::provider::GenerativeProvider;

/// Drives one video job from submission to a terminal state under a wall-clock budget.
pub struct JobPoller<'a> {
    provider: &'a dyn GenerativeProvider,
    credentials: &'a dyn CredentialSource,
    policy: PollPolicy,
    events: Option<&'a EventWriter>,
}

impl<'a> JobPoller<'a> {
    pub fn new(
        provider: &'a dyn GenerativeProvider,
        credentials: &'a dyn CredentialSource,
        policy: PollPolicy,
    ) -> Self {
        Self {
            provider,
            credentials,
            policy,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Option<&'a EventWriter>) -> Self {
        self.events = events;
        self
    }

    /// Submits `request` and polls until done. Returns the downloadable locator
    /// with the credential attached, or `None` when the job finished without one.
    pub fn run(
        &self,
        request: &MediaRequest,
        cancel: &CancelToken,
    ) -> Result<Option<String>, ClassifiedError> {
        if cancel.is_cancelled() {
            return Err(ClassifiedError::Cancelled);
        }
        let api_key = self.current_key()?;
        let submitted = self
            .provider
            .submit_video(&api_key, request)
            .map_err(|err| self.fail(&failure_signal(&err)))?;
        let started = Instant::now();
        info!(operation = %submitted.handle, model = %request.model, "video job submitted");
        self.emit(
            "video_submitted",
            json!({
                "operation": submitted.handle.as_str(),
                "model": request.model,
                "aspect_ratio": request.aspect_ratio.as_str(),
                "resolution": request.output_resolution,
            }),
        );

        let mut tracker = JobTracker::new(submitted);
        loop {
            match tracker.status() {
                JobStatus::Done(locator) => {
                    let locator = locator.clone();
                    return self.finish(&tracker, locator, started);
                }
                JobStatus::Failed(failure) => {
                    let signal = FailureSignal::provider(failure.code, failure.message.clone());
                    return Err(self.fail(&signal));
                }
                JobStatus::Pending => {}
            }

            if started.elapsed() > self.policy.timeout {
                warn!(
                    operation = %tracker.handle(),
                    polls = tracker.polls(),
                    "video job exceeded its polling budget"
                );
                return Err(self.fail(&FailureSignal::timed_out(self.policy.timeout)));
            }
            if cancel.wait(self.policy.interval) {
                info!(operation = %tracker.handle(), "video job polling cancelled");
                self.emit(
                    "video_failed",
                    json!({ "operation": tracker.handle().as_str(), "kind": "cancelled" }),
                );
                return Err(ClassifiedError::Cancelled);
            }

            let snapshot = self.refresh(&mut tracker, started, cancel)?;
            debug!(
                operation = %snapshot.handle,
                poll = tracker.polls(),
                status = snapshot.status.label(),
                "video job polled"
            );
            self.emit(
                "video_polled",
                json!({
                    "operation": snapshot.handle.as_str(),
                    "poll": tracker.polls(),
                    "status": snapshot.status.label(),
                    "elapsed_s": started.elapsed().as_secs_f64(),
                }),
            );
            tracker
                .observe(snapshot)
                .map_err(|err| ClassifiedError::Generic(err.to_string()))?;
        }
    }

    /// One status refresh, retrying transient failures under the policy's retry
    /// budget. Retries stop once the polling budget measured from `started` is spent.
    fn refresh(
        &self,
        tracker: &mut JobTracker,
        started: Instant,
        cancel: &CancelToken,
    ) -> Result<JobSnapshot, ClassifiedError> {
        let handle = tracker
            .next_poll()
            .map_err(|err| ClassifiedError::Generic(err.to_string()))?
            .clone();
        let mut attempt = 0;
        loop {
            let api_key = self.current_key()?;
            match self.provider.refresh_video(&api_key, &handle) {
                Ok(snapshot) => return Ok(snapshot),
                Err(err) => {
                    if !is_retryable(&err) || attempt >= self.policy.retry.max_retries {
                        return Err(self.fail(&failure_signal(&err)));
                    }
                    if started.elapsed() > self.policy.timeout {
                        warn!(
                            operation = %handle,
                            attempt,
                            error = %err,
                            "polling budget spent while retrying video status refresh"
                        );
                        return Err(self.fail(&FailureSignal::timed_out(self.policy.timeout)));
                    }
                    attempt += 1;
                    warn!(
                        operation = %handle,
                        attempt,
                        max_retries = self.policy.retry.max_retries,
                        "retrying video status refresh after transient failure"
                    );
                    if cancel.wait(self.policy.retry.delay_for_attempt(attempt)) {
                        return Err(ClassifiedError::Cancelled);
                    }
                }
            }
        }
    }

    fn finish(
        &self,
        tracker: &JobTracker,
        locator: Option<String>,
        started: Instant,
    ) -> Result<Option<String>, ClassifiedError> {
        info!(
            operation = %tracker.handle(),
            polls = tracker.polls(),
            has_locator = locator.is_some(),
            "video job completed"
        );
        self.emit(
            "video_completed",
            json!({
                "operation": tracker.handle().as_str(),
                "polls": tracker.polls(),
                "elapsed_s": started.elapsed().as_secs_f64(),
                "has_locator": locator.is_some(),
            }),
        );
        let Some(locator) = locator else {
            return Ok(None);
        };
        let api_key = self.current_key()?;
        Ok(Some(append_credential(&locator, &api_key)))
    }

    fn current_key(&self) -> Result<String, ClassifiedError> {
        self.credentials
            .api_key()
            .ok_or_else(|| self.fail(&FailureSignal::missing_credential()))
    }

    fn fail(&self, signal: &FailureSignal) -> ClassifiedError {
        let classified = classify(signal, Capability::Video);
        self.emit(
            "video_failed",
            json!({
                "kind": classified.kind(),
                "status": signal.status,
                "message": classified.to_string(),
            }),
        );
        classified
    }

    fn emit(&self, event_type: &str, payload: Value) {
        let Some(events) = self.events else {
            return;
        };
        if let Err(err) = events.emit(event_type, payload) {
            warn!(event_type, error = %err, "failed to write event");
        }
    }
}

/// Attaches `key=<credential>` to a result locator, dropping any existing `key`
/// segment. Every other query segment is kept byte for byte.
pub fn append_credential(locator: &str, api_key: &str) -> String {
    let (base, fragment) = match locator.split_once('#') {
        Some((base, fragment)) => (base, Some(fragment)),
        None => (locator, None),
    };
    let (path, query) = base.split_once('?').unwrap_or((base, ""));
    let credential = format!("key={}", urlencoding::encode(api_key));
    let segments: Vec<&str> = query
        .split('&')
        .filter(|segment| !segment.is_empty() && *segment != "key" && !segment.starts_with("key="))
        .chain(std::iter::once(credential.as_str()))
        .collect();

    let mut out = format!("{path}?{}", segments.join("&"));
    if let Some(fragment) = fragment {
        out.push('#');
        out.push_str(fragment);
    }
    out
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::thread;
    use std::time::{Duration, Instant};

    use anyhow::Result;
    use lumen_contracts::errors::ClassifiedError;
    use lumen_contracts::events::EventWriter;
    use lumen_contracts::jobs::{JobFailure, JobHandle, JobSnapshot, JobStatus};
    use lumen_contracts::media::{GenerationRequest, MediaKind, MediaRequest, MediaRequestBuilder};
    use lumen_contracts::models::ResolutionTier;

    use super::{append_credential, JobPoller};
    use crate::cancel::CancelToken;
    use crate::config::{PollPolicy, RetryPolicy};
    use crate::credentials::StaticCredential;
    use crate::provider::{
        ContentRequest, ContentResponse, GenerativeProvider, ProviderHttpError,
    };

    type Scripted = Result<JobSnapshot>;

    struct ScriptedProvider {
        submit: Mutex<Option<Scripted>>,
        refreshes: Mutex<VecDeque<Scripted>>,
        refresh_calls: AtomicUsize,
        submit_delay: Duration,
    }

    impl ScriptedProvider {
        fn new(submit: Scripted, refreshes: Vec<Scripted>) -> Self {
            Self {
                submit: Mutex::new(Some(submit)),
                refreshes: Mutex::new(refreshes.into()),
                refresh_calls: AtomicUsize::new(0),
                submit_delay: Duration::ZERO,
            }
        }

        fn with_submit_delay(mut self, delay: Duration) -> Self {
            self.submit_delay = delay;
            self
        }

        fn refresh_calls(&self) -> usize {
            self.refresh_calls.load(Ordering::SeqCst)
        }
    }

    impl GenerativeProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn generate_content(&self, _: &str, _: &ContentRequest) -> Result<ContentResponse> {
            anyhow::bail!("not scripted")
        }

        fn submit_video(&self, _: &str, _: &MediaRequest) -> Result<JobSnapshot> {
            thread::sleep(self.submit_delay);
            self.submit
                .lock()
                .expect("submit lock")
                .take()
                .unwrap_or_else(|| Err(anyhow::anyhow!("submitted twice")))
        }

        fn refresh_video(&self, _: &str, handle: &JobHandle) -> Result<JobSnapshot> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            self.refreshes
                .lock()
                .expect("refresh lock")
                .pop_front()
                .unwrap_or_else(|| Ok(snapshot_for(handle, JobStatus::Pending)))
        }
    }

    fn snapshot_for(handle: &JobHandle, status: JobStatus) -> JobSnapshot {
        JobSnapshot {
            handle: handle.clone(),
            status,
        }
    }

    fn snap(status: JobStatus) -> Scripted {
        Ok(snapshot_for(&JobHandle::new("models/veo/operations/op-1"), status))
    }

    fn http(status: u16, message: &str) -> Scripted {
        Err(anyhow::Error::new(ProviderHttpError {
            provider: "Gemini".to_string(),
            status,
            message: message.to_string(),
        }))
    }

    fn fast_policy() -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(2),
            timeout: Duration::from_secs(5),
            retry: RetryPolicy {
                max_retries: 2,
                backoff: Duration::from_millis(1),
            },
        }
    }

    fn video_request() -> MediaRequest {
        let request = GenerationRequest::new("waves", None, "16:9", ResolutionTier::Standard, None)
            .expect("valid request");
        MediaRequestBuilder::default()
            .build(MediaKind::Video, &request)
            .expect("buildable request")
    }

    #[test]
    fn completed_job_returns_locator_with_key_appended_once() {
        let provider = ScriptedProvider::new(
            snap(JobStatus::Pending),
            vec![
                snap(JobStatus::Pending),
                snap(JobStatus::Done(Some(
                    "https://files.test/v1beta/files/abc:download?alt=media&key=stale".to_string(),
                ))),
            ],
        );
        let key = StaticCredential::new(Some("k-1"));
        let poller = JobPoller::new(&provider, &key, fast_policy());
        let locator = poller
            .run(&video_request(), &CancelToken::new())
            .expect("job completes");
        assert_eq!(
            locator.as_deref(),
            Some("https://files.test/v1beta/files/abc:download?alt=media&key=k-1")
        );
        assert_eq!(provider.refresh_calls(), 2);
    }

    #[test]
    fn done_without_locator_is_not_an_error() {
        let provider = ScriptedProvider::new(snap(JobStatus::Done(None)), Vec::new());
        let key = StaticCredential::new(Some("k-1"));
        let poller = JobPoller::new(&provider, &key, fast_policy());
        assert_eq!(poller.run(&video_request(), &CancelToken::new()), Ok(None));
        assert_eq!(provider.refresh_calls(), 0);
    }

    #[test]
    fn pending_job_times_out_and_never_reports_done() {
        let provider = ScriptedProvider::new(snap(JobStatus::Pending), Vec::new());
        let key = StaticCredential::new(Some("k-1"));
        let policy = PollPolicy {
            timeout: Duration::from_millis(30),
            ..fast_policy()
        };
        let poller = JobPoller::new(&provider, &key, policy);
        let started = Instant::now();
        let err = poller.run(&video_request(), &CancelToken::new()).err();
        assert_eq!(
            err,
            Some(ClassifiedError::TimedOut {
                budget: Duration::from_millis(30)
            })
        );
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(provider.refresh_calls() >= 1);
    }

    #[test]
    fn cancellation_stops_the_wait_between_polls() {
        let provider = ScriptedProvider::new(snap(JobStatus::Pending), Vec::new());
        let key = StaticCredential::new(Some("k-1"));
        let policy = PollPolicy {
            interval: Duration::from_secs(30),
            ..fast_policy()
        };
        let cancel = CancelToken::new();
        let remote = cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.cancel();
        });
        let started = Instant::now();
        let poller = JobPoller::new(&provider, &key, policy);
        assert_eq!(
            poller.run(&video_request(), &cancel),
            Err(ClassifiedError::Cancelled)
        );
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(provider.refresh_calls(), 0);
        assert!(canceller.join().is_ok());
    }

    #[test]
    fn transient_refresh_failures_are_retried_within_budget() {
        let provider = ScriptedProvider::new(
            snap(JobStatus::Pending),
            vec![
                http(503, "backend unavailable"),
                snap(JobStatus::Done(Some("https://files.test/v.mp4".to_string()))),
            ],
        );
        let key = StaticCredential::new(Some("k-1"));
        let poller = JobPoller::new(&provider, &key, fast_policy());
        let locator = poller
            .run(&video_request(), &CancelToken::new())
            .expect("retry recovers");
        assert_eq!(locator.as_deref(), Some("https://files.test/v.mp4?key=k-1"));
        assert_eq!(provider.refresh_calls(), 2);
    }

    #[test]
    fn exhausted_retries_surface_the_classified_failure() {
        let provider = ScriptedProvider::new(
            snap(JobStatus::Pending),
            vec![http(503, "down"), http(503, "down"), http(503, "still down")],
        );
        let key = StaticCredential::new(Some("k-1"));
        let poller = JobPoller::new(&provider, &key, fast_policy());
        assert_eq!(
            poller.run(&video_request(), &CancelToken::new()),
            Err(ClassifiedError::Generic("still down".to_string()))
        );
        assert_eq!(provider.refresh_calls(), 3);
    }

    #[test]
    fn retries_stop_once_the_polling_budget_is_spent() {
        let provider = ScriptedProvider::new(
            snap(JobStatus::Pending),
            (0..10).map(|_| http(503, "down")).collect(),
        );
        let key = StaticCredential::new(Some("k-1"));
        let policy = PollPolicy {
            interval: Duration::from_millis(2),
            timeout: Duration::from_millis(20),
            retry: RetryPolicy {
                max_retries: 9,
                backoff: Duration::from_millis(15),
            },
        };
        let poller = JobPoller::new(&provider, &key, policy);
        assert_eq!(
            poller.run(&video_request(), &CancelToken::new()),
            Err(ClassifiedError::TimedOut {
                budget: Duration::from_millis(20)
            })
        );
        assert!(provider.refresh_calls() < 10);
    }

    #[test]
    fn slow_submission_does_not_eat_the_polling_budget() {
        let provider = ScriptedProvider::new(
            snap(JobStatus::Pending),
            vec![snap(JobStatus::Done(Some("https://files.test/v.mp4".to_string())))],
        )
        .with_submit_delay(Duration::from_millis(60));
        let key = StaticCredential::new(Some("k-1"));
        let policy = PollPolicy {
            timeout: Duration::from_millis(40),
            ..fast_policy()
        };
        let poller = JobPoller::new(&provider, &key, policy);
        assert_eq!(
            poller.run(&video_request(), &CancelToken::new()),
            Ok(Some("https://files.test/v.mp4?key=k-1".to_string()))
        );
        assert_eq!(provider.refresh_calls(), 1);
    }

    #[test]
    fn not_found_during_polling_is_access_denied_without_retry() {
        let provider = ScriptedProvider::new(
            snap(JobStatus::Pending),
            vec![http(404, "Requested entity was not found.")],
        );
        let key = StaticCredential::new(Some("k-1"));
        let poller = JobPoller::new(&provider, &key, fast_policy());
        let err = poller.run(&video_request(), &CancelToken::new()).err();
        assert!(matches!(err, Some(ClassifiedError::AccessDenied(_))));
        assert_eq!(provider.refresh_calls(), 1);
    }

    #[test]
    fn failed_job_status_is_classified() {
        let provider = ScriptedProvider::new(
            snap(JobStatus::Pending),
            vec![snap(JobStatus::Failed(JobFailure {
                code: Some(429),
                message: "Resource exhausted".to_string(),
            }))],
        );
        let key = StaticCredential::new(Some("k-1"));
        let poller = JobPoller::new(&provider, &key, fast_policy());
        let err = poller.run(&video_request(), &CancelToken::new()).err();
        assert!(matches!(err, Some(ClassifiedError::QuotaExceeded(_))));
    }

    #[test]
    fn missing_credential_fails_before_submission() {
        let provider = ScriptedProvider::new(snap(JobStatus::Pending), Vec::new());
        let key = StaticCredential::new(None);
        let poller = JobPoller::new(&provider, &key, fast_policy());
        assert_eq!(
            poller.run(&video_request(), &CancelToken::new()),
            Err(ClassifiedError::MissingCredential)
        );
        assert!(provider.submit.lock().expect("submit lock").is_some());
    }

    #[test]
    fn lifecycle_events_are_written() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let events = EventWriter::new(temp.path().join("events.jsonl"), "session-1");
        let provider = ScriptedProvider::new(
            snap(JobStatus::Pending),
            vec![snap(JobStatus::Done(Some("https://files.test/v.mp4".to_string())))],
        );
        let key = StaticCredential::new(Some("k-1"));
        let poller = JobPoller::new(&provider, &key, fast_policy()).with_events(Some(&events));
        assert!(poller.run(&video_request(), &CancelToken::new()).is_ok());

        let raw = std::fs::read_to_string(events.path())?;
        let kinds: Vec<String> = raw
            .lines()
            .map(|line| serde_json::from_str::<serde_json::Value>(line))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|event| event["type"].as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(kinds, ["video_submitted", "video_polled", "video_completed"]);
        assert!(!raw.contains("k-1"));
        Ok(())
    }

    #[test]
    fn credential_replaces_existing_key_and_survives_unparseable_locators() {
        assert_eq!(
            append_credential("https://a.test/v?key=old&alt=media&key=older", "new"),
            "https://a.test/v?alt=media&key=new"
        );
        assert_eq!(append_credential("https://a.test/v", "k"), "https://a.test/v?key=k");
        assert_eq!(append_credential("relative/v.mp4", "k"), "relative/v.mp4?key=k");
        assert_eq!(append_credential("relative/v.mp4?x=1", "k"), "relative/v.mp4?x=1&key=k");
    }

    #[test]
    fn credential_leaves_other_query_segments_untouched() {
        assert_eq!(
            append_credential("https://f.test/v?sig=a~b", "K"),
            "https://f.test/v?sig=a~b&key=K"
        );
        assert_eq!(
            append_credential("https://f.test/v?p=a%20b", "K"),
            "https://f.test/v?p=a%20b&key=K"
        );
        assert_eq!(
            append_credential("https://f.test/v?x=a:b/c", "K"),
            "https://f.test/v?x=a:b/c&key=K"
        );
        assert_eq!(append_credential("https://f.test/v?flag", "K"), "https://f.test/v?flag&key=K");
        assert_eq!(
            append_credential("https://f.test/v?keys=1&key&key=old#t=5", "K"),
            "https://f.test/v?keys=1&key=K#t=5"
        );
    }

    #[test]
    fn credential_is_percent_encoded() {
        assert_eq!(
            append_credential("https://f.test/v", "a b&c=d"),
            "https://f.test/v?key=a%20b%26c%3Dd"
        );
        assert_eq!(append_credential("relative/v.mp4", "a/b"), "relative/v.mp4?key=a%2Fb");
    }
}
