use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use pagespace_logging::ps_debug;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::{ByteStream, FetchError};

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("could not create directory {path:?}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("could not write {path:?}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("download for {path:?} failed mid-stream: {source}")]
    Stream { path: PathBuf, source: FetchError },
}

/// Writes files under the output root. Without a root (dry run) every write is
/// a successful no-op.
#[derive(Debug, Clone, Default)]
pub struct FileSink {
    root: Option<PathBuf>,
}

impl FileSink {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn is_dry_run(&self) -> bool {
        self.root.is_none()
    }

    /// Atomically write `content` to `{root}/{relative}` by writing a temp file
    /// next to the target and renaming it.
    pub fn write(&self, relative: &Path, content: &[u8]) -> Result<Option<PathBuf>, WriteError> {
        let Some(target) = self.target(relative) else {
            return Ok(None);
        };
        let dir = ensure_parent_dir(&target)?;
        ps_debug!("Writing file {:?}", target);

        let write_err = |source| WriteError::Write {
            path: target.clone(),
            source,
        };
        let mut tmp = NamedTempFile::new_in(&dir).map_err(write_err)?;
        tmp.write_all(content).map_err(write_err)?;
        tmp.flush().map_err(write_err)?;
        tmp.persist(&target).map_err(|e| write_err(e.error))?;
        Ok(Some(target))
    }

    /// Stream a body to `{root}/{relative}`, returning the number of bytes
    /// written. The body lands in a temp file that replaces the target only once
    /// complete, so a failed stream leaves any existing file untouched.
    pub async fn write_stream(
        &self,
        relative: &Path,
        mut body: ByteStream,
    ) -> Result<Option<u64>, WriteError> {
        let Some(target) = self.target(relative) else {
            return Ok(None);
        };
        let dir = ensure_parent_dir(&target)?;
        let write_err = |source| WriteError::Write {
            path: target.clone(),
            source,
        };

        let (file, tmp_path) = NamedTempFile::new_in(&dir)
            .map_err(write_err)?
            .into_parts();
        let mut file = tokio::fs::File::from_std(file);

        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            // Dropping `tmp_path` on an early return deletes the temp file.
            let chunk = chunk.map_err(|source| WriteError::Stream {
                path: target.clone(),
                source,
            })?;
            file.write_all(&chunk).await.map_err(write_err)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(write_err)?;
        drop(file);

        ps_debug!("Persisting {} bytes to {:?}", written, target);
        tmp_path
            .persist(&target)
            .map_err(|e| write_err(e.error))?;
        Ok(Some(written))
    }

    fn target(&self, relative: &Path) -> Option<PathBuf> {
        self.root.as_ref().map(|root| root.join(relative))
    }
}

fn ensure_parent_dir(target: &Path) -> Result<PathBuf, WriteError> {
    let dir = target
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    // create_dir_all tolerates directories created concurrently by siblings.
    fs::create_dir_all(&dir).map_err(|source| WriteError::CreateDir {
        path: dir.clone(),
        source,
    })?;
    Ok(dir)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanOutcome {
    Removed,
    /// Nothing to remove.
    Missing,
    /// The output dir is the source dir or one of its ancestors.
    Refused,
}

/// Recursively delete `output_dir` unless doing so would delete `source_dir`.
pub fn clean_output_dir(output_dir: &Path, source_dir: &Path) -> io::Result<CleanOutcome> {
    if !output_dir.exists() {
        return Ok(CleanOutcome::Missing);
    }
    let output = fs::canonicalize(output_dir)?;
    let source = fs::canonicalize(source_dir).unwrap_or_else(|_| source_dir.to_path_buf());
    if source.starts_with(&output) {
        return Ok(CleanOutcome::Refused);
    }
    fs::remove_dir_all(&output)?;
    Ok(CleanOutcome::Removed)
}
