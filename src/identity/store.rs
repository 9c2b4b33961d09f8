//! Directory-backed credential store.
//!
//! Writes go through a temp file in the same directory that is published with
//! a no-clobber rename/link, so a file either does not exist or holds its
//! complete content. Losing a publish race is reported as
//! [`WriteOutcome::AlreadyPresent`], not as an error.

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use tracing::debug;

use super::Artifact;
use crate::error::StoreError;

/// Result of [`CredentialStore::write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// This call created the file.
    Created,
    /// The file already existed; its content was left untouched.
    AlreadyPresent,
}

#[derive(Debug, Clone)]
pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, artifact: Artifact) -> PathBuf {
        self.dir.join(artifact.file_name())
    }

    /// Create the store directory (and parents). Succeeds if it already exists.
    pub fn ensure_directory(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(|source| StoreError::Directory {
            path: self.dir.clone(),
            source,
        })?;
        if !self.dir.is_dir() {
            return Err(StoreError::Directory {
                path: self.dir.clone(),
                source: io::Error::new(io::ErrorKind::NotADirectory, "not a directory"),
            });
        }
        Ok(())
    }

    pub fn exists(&self, artifact: Artifact) -> bool {
        self.path(artifact).is_file()
    }

    pub fn read(&self, artifact: Artifact) -> Result<Vec<u8>, StoreError> {
        fs::read(self.path(artifact)).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => StoreError::NotFound(artifact),
            _ => StoreError::Read { artifact, source },
        })
    }

    /// Read a text artifact, dropping trailing whitespace.
    pub fn read_string(&self, artifact: Artifact) -> Result<String, StoreError> {
        let bytes = self.read(artifact)?;
        let text = String::from_utf8(bytes).map_err(|_| StoreError::Encoding(artifact))?;
        Ok(text.trim_end().to_string())
    }

    /// Create `artifact` with `contents` unless it already exists.
    ///
    /// Callers decide whether to write by checking [`Self::exists`] first;
    /// the exclusive publish here only closes the race between that check
    /// and the write.
    pub fn write(&self, artifact: Artifact, contents: &[u8]) -> Result<WriteOutcome, StoreError> {
        let target = self.path(artifact);
        let write_err = |source| StoreError::Write { artifact, source };

        let mut tmp = tempfile::Builder::new()
            .prefix(&format!(".{}.", artifact.file_name()))
            .suffix(".tmp")
            .tempfile_in(&self.dir)
            .map_err(write_err)?;

        tmp.as_file_mut().write_all(contents).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        set_mode(tmp.path(), artifact).map_err(write_err)?;

        match tmp.persist_noclobber(&target) {
            Ok(_) => {
                debug!(artifact = %artifact, path = %target.display(), "artifact written");
                Ok(WriteOutcome::Created)
            }
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                debug!(artifact = %artifact, "artifact already present, keeping existing content");
                Ok(WriteOutcome::AlreadyPresent)
            }
            Err(e) => Err(write_err(e.error)),
        }
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, artifact: Artifact) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = if artifact.is_secret() { 0o600 } else { 0o644 };
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _artifact: Artifact) -> io::Result<()> {
    Ok(())
}
