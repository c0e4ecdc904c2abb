use std::fmt;

/// Opaque provider token for an in-flight video operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a job ended without a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub code: Option<u16>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    /// `None` when the provider finished without returning a locator.
    Done(Option<String>),
    Failed(JobFailure),
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Done(_) => "done",
            Self::Failed(_) => "failed",
        }
    }
}

/// Provider view of a job after submit or refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSnapshot {
    pub handle: JobHandle,
    pub status: JobStatus,
}

/// Enforces `Pending -> Done | Failed` and refuses to poll a finished job.
#[derive(Debug, Clone)]
pub struct JobTracker {
    handle: JobHandle,
    status: JobStatus,
    polls: u32,
}

impl JobTracker {
    pub fn new(snapshot: JobSnapshot) -> Self {
        Self {
            handle: snapshot.handle,
            status: snapshot.status,
            polls: 0,
        }
    }

    pub fn handle(&self) -> &JobHandle {
        &self.handle
    }

    pub fn status(&self) -> &JobStatus {
        &self.status
    }

    pub fn polls(&self) -> u32 {
        self.polls
    }

    /// Returns the handle to refresh, or an error once the job is terminal.
    pub fn next_poll(&mut self) -> anyhow::Result<&JobHandle> {
        if self.status.is_terminal() {
            anyhow::bail!(
                "job {} is already {}; refusing to poll again",
                self.handle,
                self.status.label()
            );
        }
        self.polls += 1;
        Ok(&self.handle)
    }

    pub fn observe(&mut self, snapshot: JobSnapshot) -> anyhow::Result<()> {
        if self.status.is_terminal() {
            anyhow::bail!(
                "job {} already {}; ignoring late {} status",
                self.handle,
                self.status.label(),
                snapshot.status.label()
            );
        }
        // Providers may return a refreshed operation name; keep following it.
        self.handle = snapshot.handle;
        self.status = snapshot.status;
        Ok(())
    }
}
