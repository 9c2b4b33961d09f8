//! Device identity — tag, UID and RSA keypair provisioning.
//!
//! Layout under `data_dir`:
//! ```text
//! <data_dir>/
//! └── device/
//!     ├── tag       (MDS-YYYYMMDD-0-00-000-NNNN, mode 0644)
//!     ├── uid       (16 colon-separated digit pairs, mode 0644)
//!     ├── rsa       (PKCS#1 PEM private key, mode 0600)
//!     └── rsa.pub   (SPKI PEM public key, mode 0644)
//! ```
//!
//! Every artifact is written at most once. Files that already exist are
//! never rewritten, whatever their content.

use std::{fmt, path::PathBuf};

pub mod generator;
pub mod provision;
pub mod store;

pub use generator::{
    generate_keypair, generate_tag, generate_uid, DeviceKeyPair, DeviceTag, DeviceUid,
    KeyGenerator, RsaKeyGenerator, DEFAULT_KEY_BITS,
};
pub use provision::{provision, provision_from_config, Provisioner};
pub use store::{CredentialStore, WriteOutcome};

/// Name of the device directory under the configured data directory.
pub const DEVICE_DIR_NAME: &str = "device";

/// Appended to the private key file name to form the public key file name.
pub const PUBLIC_KEY_SUFFIX: &str = ".pub";

const PRIVATE_KEY_FILE: &str = "rsa";
const PUBLIC_KEY_FILE: &str = "rsa.pub";

/// One file in the credential store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Artifact {
    Tag,
    Uid,
    PrivateKey,
    PublicKey,
}

impl Artifact {
    pub const ALL: [Artifact; 4] = [
        Artifact::Tag,
        Artifact::Uid,
        Artifact::PrivateKey,
        Artifact::PublicKey,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            Artifact::Tag => "tag",
            Artifact::Uid => "uid",
            Artifact::PrivateKey => PRIVATE_KEY_FILE,
            Artifact::PublicKey => PUBLIC_KEY_FILE,
        }
    }

    /// Whether the file holds secret material (mode 0600 on unix).
    pub fn is_secret(self) -> bool {
        matches!(self, Artifact::PrivateKey)
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

/// Outcome of one provisioning run for a single artifact group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactStatus {
    /// Written by this run.
    Generated,
    /// Already present, or written concurrently by another process.
    Existing,
    /// Public key re-derived from an existing private key.
    Repaired,
    /// Generation or persistence failed; retried on the next run.
    Failed,
    /// The device directory was unusable, nothing was attempted.
    Skipped,
}

impl ArtifactStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactStatus::Generated => "generated",
            ArtifactStatus::Existing => "existing",
            ArtifactStatus::Repaired => "repaired",
            ArtifactStatus::Failed => "failed",
            ArtifactStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ArtifactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProvisionReport {
    pub tag: ArtifactStatus,
    pub uid: ArtifactStatus,
    pub keypair: ArtifactStatus,
}

impl ProvisionReport {
    fn skipped() -> Self {
        Self {
            tag: ArtifactStatus::Skipped,
            uid: ArtifactStatus::Skipped,
            keypair: ArtifactStatus::Skipped,
        }
    }

    /// `true` when this run wrote nothing and everything was already in place.
    pub fn all_existing(&self) -> bool {
        [self.tag, self.uid, self.keypair]
            .iter()
            .all(|s| *s == ArtifactStatus::Existing)
    }
}

/// Resolved device identity after a provisioning run.
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    /// The device credential directory (`<data_dir>/device`).
    pub device_dir: PathBuf,
    /// Stored tag, whether pre-existing or freshly generated.
    pub tag: Option<String>,
    /// Stored UID, whether pre-existing or freshly generated.
    pub uid: Option<String>,
    /// Both `rsa` and `rsa.pub` are present.
    pub has_keypair: bool,
    /// First 16 hex chars of `SHA256(public_key_der)`.
    pub key_fingerprint: Option<String>,
    pub report: ProvisionReport,
}

impl DeviceIdentity {
    fn unprovisioned(device_dir: PathBuf) -> Self {
        Self {
            device_dir,
            tag: None,
            uid: None,
            has_keypair: false,
            key_fingerprint: None,
            report: ProvisionReport::skipped(),
        }
    }

    /// Tag, UID and keypair are all available.
    pub fn is_complete(&self) -> bool {
        self.tag.is_some() && self.uid.is_some() && self.has_keypair
    }
}
