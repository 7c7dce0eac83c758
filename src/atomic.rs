use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::{Builder, NamedTempFile};
use tracing::debug;

use crate::dataset::PortalDataset;
use crate::error::PipelineError;
use crate::store::Store;

const TEMP_PREFIX: &str = ".jobmerge-";

/// Replaces files so that readers only ever see the old or the new content.
///
/// Content is written to a temporary file in the target's directory, flushed,
/// synced, and renamed over the target in one step. With a cache root the
/// artifact is first committed into the cache (where it stays as a mirror)
/// and then copied beside the target for the final rename.
#[derive(Debug, Clone, Default)]
pub struct AtomicWriter {
    mirror: Option<Store>,
}

impl AtomicWriter {
    pub fn direct() -> Self {
        Self::default()
    }

    pub fn for_store(store: &Store) -> Self {
        Self {
            mirror: store.cache_root().is_some().then(|| store.clone()),
        }
    }

    /// Writes `bytes` to a temporary file next to `path` without touching `path`.
    pub fn stage(&self, path: &Utf8Path, bytes: &[u8]) -> Result<StagedWrite, PipelineError> {
        let mut temp = temp_beside(path)?;
        temp.write_all(bytes)
            .and_then(|_| temp.flush())
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|err| partial(path, err))?;
        Ok(StagedWrite {
            temp,
            target: path.to_path_buf(),
        })
    }

    pub fn write_bytes(&self, path: &Utf8Path, bytes: &[u8]) -> Result<(), PipelineError> {
        let Some(cache_path) = self
            .mirror
            .as_ref()
            .and_then(|store| store.cache_path_for(path))
        else {
            return self.stage(path, bytes)?.commit();
        };

        self.stage(&cache_path, bytes)?.commit()?;
        debug!(cache = %cache_path, target = %path, "staged through cache");

        let temp = temp_beside(path)?;
        fs::copy(cache_path.as_std_path(), temp.path()).map_err(|err| partial(path, err))?;
        temp.as_file().sync_all().map_err(|err| partial(path, err))?;
        StagedWrite {
            temp,
            target: path.to_path_buf(),
        }
        .commit()
    }

    pub fn write_dataset(
        &self,
        path: &Utf8Path,
        dataset: &PortalDataset,
    ) -> Result<(), PipelineError> {
        let bytes = dataset.to_bytes(chrono::Utc::now())?;
        self.write_bytes(path, &bytes)
    }
}

/// A fully written temporary file waiting for its rename.
///
/// Dropping it without [`StagedWrite::commit`] removes the temporary file and
/// leaves the target as it was.
#[derive(Debug)]
pub struct StagedWrite {
    temp: NamedTempFile,
    target: Utf8PathBuf,
}

impl StagedWrite {
    pub fn temp_path(&self) -> &std::path::Path {
        self.temp.path()
    }

    pub fn commit(self) -> Result<(), PipelineError> {
        let target = self.target;
        self.temp
            .persist(target.as_std_path())
            .map_err(|err| partial(&target, err.error))?;
        sync_parent(&target);
        Ok(())
    }
}

fn temp_beside(path: &Utf8Path) -> Result<NamedTempFile, PipelineError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    fs::create_dir_all(parent.as_std_path()).map_err(|err| partial(path, err))?;
    Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(".tmp")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| partial(path, err))
}

// Makes the rename itself durable where the platform allows opening directories.
fn sync_parent(path: &Utf8Path) {
    #[cfg(unix)]
    if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
        if let Ok(dir) = fs::File::open(parent.as_std_path()) {
            let _ = dir.sync_all();
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}

fn partial(path: &Utf8Path, err: std::io::Error) -> PipelineError {
    PipelineError::PartialWrite {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_missing_parent_directories() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let target = root.join("nested").join("out.txt");
        AtomicWriter::direct().write_bytes(&target, b"hello").unwrap();
        assert_eq!(fs::read(target.as_std_path()).unwrap(), b"hello");
    }

    #[test]
    fn staged_file_lives_beside_target() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let target = root.join("out.txt");
        let staged = AtomicWriter::direct().stage(&target, b"x").unwrap();
        assert_eq!(staged.temp_path().parent(), Some(root.as_std_path()));
        assert!(!target.as_std_path().exists());
    }
}
