use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

/// JSONL activity log for one CLI session.
///
/// Every line holds the caller's fields plus `type`, `session_id`, `seq` and
/// `ts`. Those four are written last and cannot be replaced by a payload.
/// `seq` starts at 1 and is assigned under the file lock, so line order and
/// `seq` order agree across clones and threads.
#[derive(Debug, Clone)]
pub struct EventWriter {
    shared: Arc<SessionLog>,
}

#[derive(Debug)]
struct SessionLog {
    path: PathBuf,
    session_id: String,
    state: Mutex<LogState>,
}

#[derive(Debug, Default)]
struct LogState {
    file: Option<File>,
    seq: u64,
}

impl LogState {
    fn append(&mut self, path: &Path, line: &str) -> anyhow::Result<()> {
        if self.file.is_none() {
            self.file = Some(open_log(path)?);
        }
        if let Some(file) = self.file.as_mut() {
            writeln!(file, "{line}")
                .with_context(|| format!("failed to append to {}", path.display()))?;
        }
        Ok(())
    }
}

impl EventWriter {
    /// The file is opened on the first event, not here.
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(SessionLog {
                path: path.into(),
                session_id: session_id.into(),
                state: Mutex::new(LogState::default()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Appends one event and returns it as written. A payload that is not a
    /// JSON object is kept under `detail`.
    pub fn emit(&self, event_type: &str, payload: Value) -> anyhow::Result<Value> {
        let mut event = match payload {
            Value::Object(fields) => fields,
            Value::Null => Map::new(),
            other => Map::from_iter([("detail".to_string(), other)]),
        };

        let mut state = self
            .shared
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        state.seq += 1;
        event.insert("type".to_string(), Value::from(event_type));
        event.insert(
            "session_id".to_string(),
            Value::from(self.shared.session_id.as_str()),
        );
        event.insert("seq".to_string(), Value::from(state.seq));
        event.insert(
            "ts".to_string(),
            Value::from(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)),
        );

        let line = serde_json::to_string(&event)?;
        state.append(&self.shared.path, &line)?;
        Ok(Value::Object(event))
    }
}

fn open_log(path: &Path) -> anyhow::Result<File> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open event log {}", path.display()))
}
