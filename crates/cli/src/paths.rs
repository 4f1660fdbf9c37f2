//! Central path resolution for QBit data files.
//!
//! Resolved once at startup from: CLI `--data-dir` > `QBIT_DATA_DIR` env > `~/.qbit`.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use anyhow::Context;

static DATA_DIR: RwLock<Option<PathBuf>> = RwLock::new(None);

/// Initialize the global data directory. Returns the resolved path.
pub fn init_data_dir(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    let from_env = std::env::var("QBIT_DATA_DIR")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from);
    let dir = resolve_data_dir(explicit, from_env)?;

    let mut guard = DATA_DIR.write().unwrap_or_else(PoisonError::into_inner);
    *guard = Some(dir.clone());
    Ok(dir)
}

fn resolve_data_dir(explicit: Option<&Path>, from_env: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    if let Some(p) = explicit {
        return Ok(p.to_path_buf());
    }
    if let Some(p) = from_env {
        return Ok(p);
    }
    Ok(dirs::home_dir()
        .context("HOME directory not found; pass --data-dir")?
        .join(".qbit"))
}

/// Current data directory; `./.qbit` if `init_data_dir` was never called.
pub fn data_dir() -> PathBuf {
    DATA_DIR
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
        .unwrap_or_else(|| PathBuf::from(".qbit"))
}

pub fn config_path() -> PathBuf {
    data_dir().join("config.toml")
}

pub fn log_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Create all required subdirectories under the data dir.
pub fn ensure_dirs() -> io::Result<()> {
    std::fs::create_dir_all(log_dir())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_dir_beats_env() {
        let dir = resolve_data_dir(Some(Path::new("/tmp/a")), Some(PathBuf::from("/tmp/b"))).unwrap();
        assert_eq!(dir, PathBuf::from("/tmp/a"));
    }

    #[test]
    fn env_dir_beats_home() {
        let dir = resolve_data_dir(None, Some(PathBuf::from("/tmp/b"))).unwrap();
        assert_eq!(dir, PathBuf::from("/tmp/b"));
    }

    #[test]
    fn init_creates_log_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = init_data_dir(Some(tmp.path())).unwrap();
        ensure_dirs().unwrap();
        assert_eq!(config_path(), dir.join("config.toml"));
        assert!(log_dir().is_dir());
    }
}
