//! Persistent settings (TOML)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::protocol;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Largest chunk either side may announce; agreed out of band
    pub max_chunk_size: u32,
    /// Consecutive corrupt chunks tolerated before the session is abandoned
    pub max_chunk_retries: u32,
    pub max_name_len: u32,
    /// Chunk size the peer driver asks for
    pub peer_chunk_size: u32,
    /// Socket read/write timeout, 0 disables
    pub io_timeout_ms: u64,
    pub log_file: Option<PathBuf>,
    pub journal_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_chunk_size: protocol::MAX_CHUNK_SIZE,
            max_chunk_retries: protocol::MAX_CHUNK_RETRIES,
            max_name_len: protocol::MAX_NAME_LEN,
            peer_chunk_size: protocol::PEER_CHUNK_SIZE,
            io_timeout_ms: 0,
            log_file: None,
            journal_file: None,
        }
    }
}

impl Config {
    pub fn io_timeout(&self) -> Option<Duration> {
        (self.io_timeout_ms > 0).then(|| Duration::from_millis(self.io_timeout_ms))
    }

    /// Reject settings the protocol can't honor
    pub fn validate(&self) -> Result<()> {
        if self.max_chunk_size == 0 {
            anyhow::bail!("max_chunk_size must be greater than zero");
        }
        if self.peer_chunk_size == 0 || self.peer_chunk_size > self.max_chunk_size {
            anyhow::bail!(
                "peer_chunk_size must be between 1 and max_chunk_size ({})",
                self.max_chunk_size
            );
        }
        if self.max_name_len == 0 {
            anyhow::bail!("max_name_len must be greater than zero");
        }
        Ok(())
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(windows)]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("sphxfer");
        }
    }
    // Unix-like default
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".config").join("sphxfer");
    }
    PathBuf::from(".sphxfer")
}

pub fn default_config_path() -> PathBuf {
    config_dir().join("sphxfer.toml")
}

/// The explicit path when given, otherwise the default location
pub fn config_path(path: Option<&Path>) -> PathBuf {
    path.map(Path::to_path_buf).unwrap_or_else(default_config_path)
}

/// Load from `path`, or from the default location. A missing file yields defaults.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let p = config_path(path);
    let cfg = match std::fs::read_to_string(&p) {
        Ok(data) => toml::from_str::<Config>(&data)
            .with_context(|| format!("invalid config file {}", p.display()))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && path.is_none() => Config::default(),
        Err(e) => return Err(e).with_context(|| format!("failed to read {}", p.display())),
    };
    cfg.validate()?;
    Ok(cfg)
}

pub fn save_config(cfg: &Config, path: &Path) -> Result<()> {
    cfg.validate()?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;
    let data = toml::to_string(cfg)?;
    // atomic write
    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    use std::io::Write as _;
    tmp.write_all(data.as_bytes())?;
    tmp.flush()?;
    tmp.persist(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("sphxfer.toml");
        std::fs::write(&p, "max_chunk_retries = 2\nio_timeout_ms = 1500\n").unwrap();

        let cfg = load_config(Some(&p)).unwrap();
        assert_eq!(cfg.max_chunk_retries, 2);
        assert_eq!(cfg.io_timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(cfg.max_chunk_size, protocol::MAX_CHUNK_SIZE);
        assert!(cfg.log_file.is_none());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(&dir.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("nested/sphxfer.toml");
        let cfg = Config {
            peer_chunk_size: 4096,
            journal_file: Some(PathBuf::from("/tmp/journal.jsonl")),
            ..Config::default()
        };
        save_config(&cfg, &p).unwrap();
        assert_eq!(load_config(Some(&p)).unwrap(), cfg);
    }

    #[test]
    fn save_refuses_invalid_settings() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("sphxfer.toml");
        let cfg = Config {
            peer_chunk_size: 0,
            ..Config::default()
        };
        assert!(save_config(&cfg, &p).is_err());
        assert!(!p.exists());
    }

    #[test]
    fn explicit_path_wins() {
        let p = Path::new("/etc/sphxfer/custom.toml");
        assert_eq!(config_path(Some(p)), p.to_path_buf());
        assert!(config_path(None).ends_with("sphxfer.toml"));
    }

    #[test]
    fn rejects_oversized_peer_chunks() {
        let cfg = Config {
            max_chunk_size: 1024,
            peer_chunk_size: 2048,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
        assert!(Config::default().validate().is_ok());
    }
}
