use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde_json::{Map, Value};
use tempfile::NamedTempFile;

pub const API_KEY_SETTING: &str = "GEMINI_API_KEY";

/// Flat JSON object on disk holding locally persisted values (the stored API key).
///
/// Every read goes back to disk so a key saved by another process is picked up
/// on the next call. Writes merge into whatever is on disk and replace the file
/// atomically, owner-only on Unix. A file that is not a JSON object reads as
/// empty but is never overwritten.
#[derive(Debug, Clone)]
pub struct SettingsFile {
    path: PathBuf,
}

impl SettingsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.load()
            .ok()?
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }

    pub fn set_string(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut on_disk = self.load()?;
        let snapshot = Value::String(value.trim().to_string());
        if on_disk.get(key) == Some(&snapshot) {
            return Ok(());
        }
        on_disk.insert(key.to_string(), snapshot);
        self.store(&on_disk)
    }

    pub fn remove(&self, key: &str) -> anyhow::Result<bool> {
        let mut on_disk = self.load()?;
        if on_disk.remove(key).is_none() {
            return Ok(false);
        }
        self.store(&on_disk)?;
        Ok(true)
    }

    /// A missing file is empty; anything else that is not a JSON object is an error.
    fn load(&self) -> anyhow::Result<Map<String, Value>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Map::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", self.path.display()))
            }
        };
        match serde_json::from_str(&raw) {
            Ok(Value::Object(fields)) => Ok(fields),
            _ => bail!(
                "{} is not a JSON object; fix or delete it before saving settings",
                self.path.display()
            ),
        }
    }

    fn store(&self, payload: &Map<String, Value>) -> anyhow::Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }
        serde_json::to_writer_pretty(&mut tmp, payload)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|err| err.error)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }
}
