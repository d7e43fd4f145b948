//! Persisted bridge state (checkpoint + daily stats).

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{errors::Error, report::DailyStat, Result};

/// Everything that must survive a restart.
///
/// Keys match the legacy data file (`lastMessage`, `stat.*`).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeState {
    /// Day marker of the stats currently accumulating (days since CE).
    #[serde(default)]
    pub date: Option<i32>,

    /// Highest update id already dispatched.
    #[serde(rename = "lastMessage", default)]
    pub last_message: Option<i64>,

    #[serde(default)]
    pub stat: DailyStat,
}

#[derive(Clone, Debug)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing file means first start.
    pub fn load(&self) -> Result<BridgeState> {
        read_json_or_default(&self.path)
    }

    pub fn save(&self, state: &BridgeState) -> Result<()> {
        write_json_atomic(&self.path, state)
    }
}

/// Read a JSON document; a missing file yields `T::default()`.
pub fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(serde_json::from_str(&raw)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(Error::Io(e)),
    }
}

/// Write atomically: temp file in the same directory, then rename.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let json = serde_json::to_string_pretty(value)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(json.as_bytes())?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}
