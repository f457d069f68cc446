//! Atomic replacement of compiled files.
//!
//! Content is written to a hidden sibling, fsynced, and renamed over the live
//! path, so the proxy only ever sees a complete old or complete new file.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use crate::compiler::CompileError;

/// A fully written temp file waiting to be renamed into place.
#[derive(Debug)]
pub struct StagedFile {
    temp: PathBuf,
    target: PathBuf,
}

fn temp_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "compiled".to_string());
    target.with_file_name(format!(".{name}.tmp"))
}

fn write_error(path: &Path) -> impl FnOnce(std::io::Error) -> CompileError + '_ {
    move |source| CompileError::Write {
        path: path.to_path_buf(),
        source,
    }
}

/// Current content of a live file, or `None` if it cannot be read.
pub async fn read_current(path: &Path) -> Option<String> {
    tokio::fs::read_to_string(path).await.ok()
}

/// Write `content` next to `target` without touching `target` itself.
pub async fn stage(target: &Path, content: &str) -> Result<StagedFile, CompileError> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(write_error(parent))?;
    }

    let temp = temp_path(target);
    let result = async {
        let mut file = tokio::fs::File::create(&temp).await?;
        file.write_all(content.as_bytes()).await?;
        file.sync_all().await
    }
    .await;

    if let Err(source) = result {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(CompileError::Write {
            path: temp,
            source,
        });
    }

    Ok(StagedFile {
        temp,
        target: target.to_path_buf(),
    })
}

impl StagedFile {
    /// Rename over the live path.
    pub async fn commit(self) -> Result<(), CompileError> {
        if let Err(source) = tokio::fs::rename(&self.temp, &self.target).await {
            let _ = tokio::fs::remove_file(&self.temp).await;
            return Err(CompileError::Write {
                path: self.target,
                source,
            });
        }
        tracing::debug!(path = %self.target.display(), "Replaced compiled file");
        Ok(())
    }

    /// Remove the temp file, leaving the live path as it was.
    pub async fn discard(self) {
        let _ = tokio::fs::remove_file(&self.temp).await;
    }

    pub fn target(&self) -> &Path {
        &self.target
    }
}

/// Put back what `target` held before this pass. `None` means it did not exist.
pub async fn restore(target: &Path, previous: Option<&str>) -> Result<(), CompileError> {
    match previous {
        Some(content) => stage(target, content).await?.commit().await,
        None => match tokio::fs::remove_file(target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(write_error(target)(source)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stage_leaves_target_untouched_until_commit() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("conf").join("stream.conf");

        tokio::fs::create_dir_all(target.parent().unwrap()).await.unwrap();
        tokio::fs::write(&target, "old").await.unwrap();

        let staged = stage(&target, "new").await.unwrap();
        assert_eq!(read_current(&target).await.as_deref(), Some("old"));
        assert!(dir.path().join("conf").join(".stream.conf.tmp").exists());

        staged.commit().await.unwrap();
        assert_eq!(read_current(&target).await.as_deref(), Some("new"));
        assert!(!dir.path().join("conf").join(".stream.conf.tmp").exists());
    }

    #[tokio::test]
    async fn test_restore_previous_content_or_absence() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("stream.conf");
        let fresh = dir.path().join("http.conf");

        tokio::fs::write(&existing, "new").await.unwrap();
        tokio::fs::write(&fresh, "new").await.unwrap();

        restore(&existing, Some("old")).await.unwrap();
        restore(&fresh, None).await.unwrap();

        assert_eq!(read_current(&existing).await.as_deref(), Some("old"));
        assert!(!fresh.exists());
        assert!(!dir.path().join(".stream.conf.tmp").exists());
    }

    #[tokio::test]
    async fn test_discard_removes_temp() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("http.conf");

        let staged = stage(&target, "x").await.unwrap();
        staged.discard().await;
        assert!(!target.exists());
        assert!(!dir.path().join(".http.conf.tmp").exists());
    }
}
