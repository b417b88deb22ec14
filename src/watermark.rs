use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::debug;

/// Save/load of per-source watermarks.
///
/// Persistence is an explicit collaborator: the fetch controller saves only
/// when a store is configured, and the driver decides whether to load at
/// startup. Nothing is persisted implicitly.
pub trait WatermarkStore: Send + Sync {
    /// Last persisted watermark for a source, if any.
    fn load(&self, source: &str) -> Result<Option<i64>>;

    /// Persists the watermark for a source.
    fn save(&self, source: &str, watermark: i64) -> Result<()>;
}

/// One `<source>.hist` file per source under a directory.
pub struct FileWatermarkStore {
    dir: PathBuf,
}

impl FileWatermarkStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Creates the directory if needed and returns a store over it.
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating watermark directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn path_for(&self, source: &str) -> PathBuf {
        self.dir.join(format!("{source}.hist"))
    }
}

impl WatermarkStore for FileWatermarkStore {
    fn load(&self, source: &str) -> Result<Option<i64>> {
        let path = self.path_for(source);

        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("reading watermark file {}", path.display()))
            }
        };

        let watermark = data
            .trim()
            .parse::<i64>()
            .with_context(|| format!("parsing watermark file {}", path.display()))?;

        Ok(Some(watermark))
    }

    fn save(&self, source: &str, watermark: i64) -> Result<()> {
        let path = self.path_for(source);

        fs::write(&path, watermark.to_string())
            .with_context(|| format!("writing watermark file {}", path.display()))?;

        debug!(source, watermark, "watermark persisted");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileWatermarkStore::new(dir.path());

        store.save("history", 1_700_000_123).expect("save");

        assert_eq!(store.load("history").expect("load"), Some(1_700_000_123));
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileWatermarkStore::new(dir.path());

        assert_eq!(store.load("history").expect("load"), None);
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("history.hist"), "not a number").expect("write");

        let store = FileWatermarkStore::new(dir.path());

        assert!(store.load("history").is_err());
    }

    #[test]
    fn test_save_overwrites() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileWatermarkStore::new(dir.path());

        store.save("history", 10).expect("save");
        store.save("history", 20).expect("save");

        assert_eq!(store.load("history").expect("load"), Some(20));
    }
}
