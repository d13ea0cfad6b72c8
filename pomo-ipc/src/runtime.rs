//! The runtime file advertising a running daemon

use crate::DisplayMode;
use chrono::{DateTime, Local};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const RUNTIME_FILE_NAME: &str = "pomo-runtime.json";

/// What a viewer needs to find and authenticate with the daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub port: u16,
    pub secret: String,
    pub pid: u32,
    #[serde(default)]
    pub display: DisplayMode,
    #[serde(default)]
    pub dot_interval: Option<u64>,
    pub started_at: DateTime<Local>,
}

pub struct RuntimeFile {
    path: PathBuf,
}

impl RuntimeFile {
    /// `<runtime dir>/pomo/pomo-runtime.json`, where the runtime dir is the
    /// XDG runtime directory when there is one and the temp dir otherwise.
    pub fn default_location() -> Self {
        let dir = ProjectDirs::from("com", "pomo", "pomo")
            .and_then(|dirs| dirs.runtime_dir().map(Path::to_path_buf))
            .unwrap_or_else(|| std::env::temp_dir().join("pomo"));
        Self::at(dir.join(RUNTIME_FILE_NAME))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding the runtime file (and the daemon log).
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    pub fn save(&self, info: &ConnectionInfo) -> std::io::Result<()> {
        fs::create_dir_all(self.dir())?;
        let json = serde_json::to_string_pretty(info)?;
        // Write-then-rename so a reader never sees a half-written file.
        let tmp = self.path.with_extension("json.tmp");
        write_private(&tmp, json.as_bytes())?;
        fs::rename(&tmp, &self.path)
    }

    /// `Ok(None)` when no daemon has advertised itself.
    pub fn load(&self) -> std::io::Result<Option<ConnectionInfo>> {
        let json = match fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let info = serde_json::from_str(&json)?;
        Ok(Some(info))
    }

    pub fn remove(&self) -> std::io::Result<()> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// Create or replace `path` readable by the owner only, since the runtime
/// file carries the session secret.
#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    // A leftover from a crashed save may carry looser permissions.
    match fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => return Err(e),
        _ => {}
    }
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    fs::write(path, contents)
}
