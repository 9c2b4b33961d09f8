//! Error types.
//!
//! [`AppError`] covers the bootstrap path (config, logger). [`StoreError`] and
//! [`KeyGenerationError`] are produced inside identity provisioning and never
//! escape [`crate::identity::provision`]; they are logged and folded into an
//! [`crate::identity::ArtifactStatus`] instead.

use std::path::PathBuf;

use thiserror::Error;

use crate::identity::Artifact;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Credential store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot prepare device directory {}: {source}", .path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} not found")]
    NotFound(Artifact),

    #[error("cannot read {artifact}: {source}")]
    Read {
        artifact: Artifact,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write {artifact}: {source}")]
    Write {
        artifact: Artifact,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} is not valid UTF-8")]
    Encoding(Artifact),
}

/// The cryptographic primitive failed to produce or decode a keypair.
#[derive(Debug, Error)]
pub enum KeyGenerationError {
    #[error("rsa key generation failed: {0}")]
    Rsa(String),

    #[error("key encoding failed: {0}")]
    Encoding(String),

    #[error("stored private key is unreadable: {0}")]
    InvalidKey(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn config_error_display() {
        let e = AppError::Config("missing field".into());
        assert!(e.to_string().starts_with("config error"));
        assert!(e.to_string().contains("missing field"));
    }

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let e: AppError = io_err.into();
        assert!(e.to_string().contains("io error"));
        let _: &dyn Error = &e;
    }

    #[test]
    fn directory_error_keeps_source() {
        let e = StoreError::Directory {
            path: PathBuf::from("/ro/device"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(e.to_string().contains("/ro/device"));
        assert!(e.source().is_some());
    }

    #[test]
    fn not_found_names_the_file() {
        let e = StoreError::NotFound(Artifact::Uid);
        assert_eq!(e.to_string(), "uid not found");
    }

    #[test]
    fn key_generation_error_display() {
        let e = KeyGenerationError::Rsa("entropy unavailable".into());
        assert!(e.to_string().contains("entropy unavailable"));
    }
}
