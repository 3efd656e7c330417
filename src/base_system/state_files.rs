//! 镜像目录下的同步状态文件：
//! - `.last-revision`：已完整同步到的修订号（水位线）
//! - `.failed_downloads`：下载失败的 slug，每行一个

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

use crate::sync::ledger::WatermarkSink;

pub const LAST_REVISION_FILE: &str = ".last-revision";
pub const FAILED_DOWNLOADS_FILE: &str = ".failed_downloads";

#[derive(Debug, Error)]
pub enum StateError {
    #[error("io error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("corrupt watermark in {path}: {raw:?}")]
    Corrupt { path: PathBuf, raw: String },
}

impl From<std::convert::Infallible> for StateError {
    fn from(never: std::convert::Infallible) -> Self {
        match never {}
    }
}

#[derive(Debug, Clone)]
pub struct WatermarkStore {
    path: PathBuf,
}

impl WatermarkStore {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            path: dir.join(LAST_REVISION_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 文件不存在视为 0。
    pub fn load(&self) -> Result<u64, StateError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(source) => {
                return Err(StateError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(0);
        }
        trimmed.parse::<u64>().map_err(|_| StateError::Corrupt {
            path: self.path.clone(),
            raw,
        })
    }

    /// 先写同目录临时文件再 rename，读者只会看到旧值或新值。
    pub fn store(&self, revision: u64) -> Result<(), StateError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let io_err = |source| StateError::Io {
            path: self.path.clone(),
            source,
        };
        fs::create_dir_all(&dir).map_err(io_err)?;

        let mut tmp = NamedTempFile::new_in(&dir).map_err(io_err)?;
        writeln!(tmp, "{revision}").map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;

        debug!(target: "ledger", revision, path = %self.path.display(), "watermark persisted");
        Ok(())
    }
}

impl WatermarkSink for WatermarkStore {
    type Error = StateError;

    fn persist(&mut self, watermark: u64) -> Result<(), StateError> {
        self.store(watermark)
    }
}

#[derive(Debug, Clone)]
pub struct FailedLog {
    path: PathBuf,
}

impl FailedLog {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            path: dir.join(FAILED_DOWNLOADS_FILE),
        }
    }

    pub fn append(&self, slug: &str) -> Result<(), StateError> {
        let io_err = |source| StateError::Io {
            path: self.path.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;
        writeln!(file, "{slug}").map_err(io_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_watermark_reads_as_zero() {
        let dir = tempfile::tempdir().unwrap();
        let store = WatermarkStore::in_dir(dir.path());
        assert_eq!(store.load().unwrap(), 0);
    }

    #[test]
    fn store_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = WatermarkStore::in_dir(dir.path());
        store.store(3_141_592).unwrap();
        assert_eq!(store.load().unwrap(), 3_141_592);
        assert_eq!(
            fs::read_to_string(store.path()).unwrap(),
            "3141592\n".to_string()
        );

        store.store(3_141_600).unwrap();
        assert_eq!(store.load().unwrap(), 3_141_600);
        // no temp files left behind
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn corrupt_watermark_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(LAST_REVISION_FILE), "r12\n").unwrap();
        let err = WatermarkStore::in_dir(dir.path()).load().unwrap_err();
        assert!(matches!(err, StateError::Corrupt { .. }));
    }

    #[test]
    fn failed_log_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = FailedLog::in_dir(dir.path());
        log.append("akismet").unwrap();
        log.append("hello-dolly").unwrap();
        let raw = fs::read_to_string(dir.path().join(FAILED_DOWNLOADS_FILE)).unwrap();
        assert_eq!(raw, "akismet\nhello-dolly\n");
    }
}
