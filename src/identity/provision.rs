//! Generate-if-absent orchestration over the credential store.
//!
//! [`Provisioner::provision`] never fails: every error is logged and recorded
//! in the returned [`ProvisionReport`]. Tag, UID and keypair are handled
//! independently, so a failure in one never blocks the others.

use chrono::{Local, NaiveDate};
use rand::Rng;
use tracing::{debug, info, warn};

use super::{
    Artifact, ArtifactStatus, DeviceIdentity, ProvisionReport,
    generator::{self, DeviceKeyPair, DeviceTag, DeviceUid, KeyGenerator, RsaKeyGenerator},
    store::{CredentialStore, WriteOutcome},
};
use crate::config::Config;

pub struct Provisioner {
    store: CredentialStore,
    keys: Box<dyn KeyGenerator>,
}

impl Provisioner {
    pub fn new(store: CredentialStore, keys: Box<dyn KeyGenerator>) -> Self {
        Self { store, keys }
    }

    /// Provisioner for `config.device_dir()` with an RSA generator of `config.key_bits`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            CredentialStore::new(config.device_dir()),
            Box::new(RsaKeyGenerator::new(config.key_bits)),
        )
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Ensure tag, UID and keypair exist, generating whichever are missing.
    pub fn provision<R: Rng + ?Sized>(&self, today: NaiveDate, rng: &mut R) -> DeviceIdentity {
        let dir = self.store.dir().to_path_buf();

        if let Err(e) = self.store.ensure_directory() {
            warn!(error = %e, "device directory unavailable, skipping identity provisioning");
            return DeviceIdentity::unprovisioned(dir);
        }

        let (tag, tag_status) = self.provision_text(Artifact::Tag, DeviceTag::is_well_formed, || {
            generator::generate_tag(today, &mut *rng).into_string()
        });
        let (uid, uid_status) = self.provision_text(Artifact::Uid, DeviceUid::is_well_formed, || {
            generator::generate_uid(&mut *rng).into_string()
        });
        let (keypair, keypair_status) = self.provision_keypair();

        let has_keypair = keypair.is_some()
            && self.store.exists(Artifact::PrivateKey)
            && self.store.exists(Artifact::PublicKey);

        let identity = DeviceIdentity {
            device_dir: dir,
            tag,
            uid,
            has_keypair,
            key_fingerprint: keypair.map(|kp| kp.fingerprint().to_string()),
            report: ProvisionReport {
                tag: tag_status,
                uid: uid_status,
                keypair: keypair_status,
            },
        };

        info!(
            dir = %identity.device_dir.display(),
            tag = identity.tag.as_deref().unwrap_or("-"),
            tag_status = %identity.report.tag,
            uid_status = %identity.report.uid,
            keypair_status = %identity.report.keypair,
            "device identity provisioned"
        );

        identity
    }

    /// Tag and UID share one path: read if present, otherwise generate and
    /// publish, then read back whatever value won.
    fn provision_text(
        &self,
        artifact: Artifact,
        well_formed: fn(&str) -> bool,
        generate: impl FnOnce() -> String,
    ) -> (Option<String>, ArtifactStatus) {
        if self.store.exists(artifact) {
            let value = self.read_existing(artifact, well_formed);
            return (value, ArtifactStatus::Existing);
        }

        let fresh = generate();
        match self.store.write(artifact, fresh.as_bytes()) {
            Ok(WriteOutcome::Created) => {
                info!(artifact = %artifact, value = %fresh, "generated");
                (Some(fresh), ArtifactStatus::Generated)
            }
            Ok(WriteOutcome::AlreadyPresent) => {
                debug!(artifact = %artifact, "provisioned concurrently, using stored value");
                (self.read_existing(artifact, well_formed), ArtifactStatus::Existing)
            }
            Err(e) => {
                warn!(artifact = %artifact, error = %e, "cannot persist artifact");
                (None, ArtifactStatus::Failed)
            }
        }
    }

    fn read_existing(&self, artifact: Artifact, well_formed: fn(&str) -> bool) -> Option<String> {
        match self.store.read_string(artifact) {
            Ok(value) => {
                if !well_formed(&value) {
                    warn!(artifact = %artifact, value = %value, "stored value is malformed, keeping it");
                }
                Some(value)
            }
            Err(e) => {
                warn!(artifact = %artifact, error = %e, "cannot read stored artifact");
                None
            }
        }
    }

    fn provision_keypair(&self) -> (Option<DeviceKeyPair>, ArtifactStatus) {
        if self.store.exists(Artifact::PrivateKey) {
            return self.complete_existing_keypair(ArtifactStatus::Existing);
        }

        if self.store.exists(Artifact::PublicKey) {
            // `rsa` is always published before `rsa.pub`, so a concurrent
            // writer shows up here as a private key that now exists.
            if self.store.exists(Artifact::PrivateKey) {
                return self.complete_existing_keypair(ArtifactStatus::Existing);
            }
            warn!(
                path = %self.store.path(Artifact::PublicKey).display(),
                "public key present without private key, not generating a new keypair"
            );
            return (None, ArtifactStatus::Failed);
        }

        let keypair = match self.keys.generate() {
            Ok(kp) => kp,
            Err(e) => {
                warn!(error = %e, "key generation failed, continuing without a keypair");
                return (None, ArtifactStatus::Failed);
            }
        };

        match self.store.write(Artifact::PrivateKey, keypair.private_pem().as_bytes()) {
            Ok(WriteOutcome::Created) => {}
            Ok(WriteOutcome::AlreadyPresent) => {
                debug!("keypair provisioned concurrently, discarding ours");
                return self.complete_existing_keypair(ArtifactStatus::Existing);
            }
            Err(e) => {
                warn!(error = %e, "cannot persist private key");
                return (None, ArtifactStatus::Failed);
            }
        }

        match self.store.write(Artifact::PublicKey, keypair.public_pem().as_bytes()) {
            Ok(_) => {
                info!(fingerprint = keypair.fingerprint(), "generated keypair");
                (Some(keypair), ArtifactStatus::Generated)
            }
            Err(e) => {
                // The private key is in place; the next run derives the public half.
                warn!(error = %e, "cannot persist public key");
                (Some(keypair), ArtifactStatus::Failed)
            }
        }
    }

    /// Load the stored private key and write `rsa.pub` from it if missing.
    /// An unreadable `rsa` or an `rsa.pub` that doesn't belong to it is
    /// reported as `Failed`; neither file is touched.
    fn complete_existing_keypair(
        &self,
        status: ArtifactStatus,
    ) -> (Option<DeviceKeyPair>, ArtifactStatus) {
        let keypair = match self.load_private_key() {
            Ok(kp) => kp,
            Err(e) => {
                warn!(error = %e, "stored private key unusable, leaving keypair as is");
                return (None, ArtifactStatus::Failed);
            }
        };

        if self.store.exists(Artifact::PublicKey) {
            return match self.store.read_string(Artifact::PublicKey) {
                Ok(stored) if keypair.matches_public_pem(&stored) => (Some(keypair), status),
                Ok(_) => {
                    warn!(
                        fingerprint = keypair.fingerprint(),
                        "stored public key does not match private key, leaving keypair as is"
                    );
                    (None, ArtifactStatus::Failed)
                }
                Err(e) => {
                    warn!(error = %e, "cannot read stored public key");
                    (None, ArtifactStatus::Failed)
                }
            };
        }

        match self.store.write(Artifact::PublicKey, keypair.public_pem().as_bytes()) {
            Ok(WriteOutcome::Created) => {
                info!(fingerprint = keypair.fingerprint(), "public key re-derived from private key");
                (Some(keypair), ArtifactStatus::Repaired)
            }
            Ok(WriteOutcome::AlreadyPresent) => (Some(keypair), status),
            Err(e) => {
                warn!(error = %e, "cannot persist public key");
                (Some(keypair), ArtifactStatus::Failed)
            }
        }
    }

    fn load_private_key(&self) -> Result<DeviceKeyPair, Box<dyn std::error::Error + Send + Sync>> {
        let pem = self.store.read_string(Artifact::PrivateKey)?;
        Ok(DeviceKeyPair::from_private_pem(&pem)?)
    }
}

/// Provision `store` with the default 2048-bit RSA generator.
pub fn provision<R: Rng + ?Sized>(
    store: &CredentialStore,
    today: NaiveDate,
    rng: &mut R,
) -> DeviceIdentity {
    Provisioner::new(store.clone(), Box::new(RsaKeyGenerator::default())).provision(today, rng)
}

/// Provision the device directory named by `config`, using today's local date.
pub fn provision_from_config(config: &Config) -> DeviceIdentity {
    Provisioner::from_config(config).provision(Local::now().date_naive(), &mut rand::thread_rng())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KeyGenerationError;
    use rand::{SeedableRng, rngs::StdRng};
    use std::fs;
    use tempfile::TempDir;

    struct FailingKeys;

    impl KeyGenerator for FailingKeys {
        fn generate(&self) -> Result<DeviceKeyPair, KeyGenerationError> {
            Err(KeyGenerationError::Rsa("injected".into()))
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn provisioner(tmp: &TempDir) -> Provisioner {
        Provisioner::new(
            CredentialStore::new(tmp.path().join("device")),
            Box::new(RsaKeyGenerator::new(1024)),
        )
    }

    #[test]
    fn fresh_store_generates_everything() {
        let tmp = TempDir::new().unwrap();
        let p = provisioner(&tmp);
        let id = p.provision(today(), &mut StdRng::seed_from_u64(1));

        assert!(id.is_complete());
        assert_eq!(id.report.tag, ArtifactStatus::Generated);
        assert_eq!(id.report.uid, ArtifactStatus::Generated);
        assert_eq!(id.report.keypair, ArtifactStatus::Generated);
        assert!(id.tag.unwrap().starts_with("MDS-20240301-"));
        assert_eq!(id.key_fingerprint.map(|f| f.len()), Some(16));
    }

    #[test]
    fn second_run_reports_existing() {
        let tmp = TempDir::new().unwrap();
        let p = provisioner(&tmp);
        let first = p.provision(today(), &mut StdRng::seed_from_u64(1));
        let second = p.provision(today(), &mut StdRng::seed_from_u64(2));

        assert!(second.report.all_existing());
        assert_eq!(first.tag, second.tag);
        assert_eq!(first.uid, second.uid);
        assert_eq!(first.key_fingerprint, second.key_fingerprint);
    }

    #[test]
    fn key_failure_leaves_tag_and_uid_intact() {
        let tmp = TempDir::new().unwrap();
        let p = Provisioner::new(
            CredentialStore::new(tmp.path().join("device")),
            Box::new(FailingKeys),
        );
        let id = p.provision(today(), &mut StdRng::seed_from_u64(1));

        assert_eq!(id.report.keypair, ArtifactStatus::Failed);
        assert!(!id.has_keypair);
        assert!(id.tag.is_some() && id.uid.is_some());
        assert!(!p.store().exists(Artifact::PrivateKey));
        assert!(!p.store().exists(Artifact::PublicKey));
    }

    #[test]
    fn missing_public_key_is_rederived() {
        let tmp = TempDir::new().unwrap();
        let p = provisioner(&tmp);
        p.provision(today(), &mut StdRng::seed_from_u64(1));
        let private_before = fs::read(p.store().path(Artifact::PrivateKey)).unwrap();
        let public_before = fs::read(p.store().path(Artifact::PublicKey)).unwrap();
        fs::remove_file(p.store().path(Artifact::PublicKey)).unwrap();

        let id = p.provision(today(), &mut StdRng::seed_from_u64(1));
        assert_eq!(id.report.keypair, ArtifactStatus::Repaired);
        assert!(id.has_keypair);
        assert_eq!(fs::read(p.store().path(Artifact::PrivateKey)).unwrap(), private_before);
        assert_eq!(fs::read(p.store().path(Artifact::PublicKey)).unwrap(), public_before);
    }

    #[test]
    fn unreadable_private_key_is_reported_failed() {
        let tmp = TempDir::new().unwrap();
        let p = provisioner(&tmp);
        p.provision(today(), &mut StdRng::seed_from_u64(1));
        fs::write(p.store().path(Artifact::PrivateKey), b"garbage").unwrap();
        let public_before = fs::read(p.store().path(Artifact::PublicKey)).unwrap();

        let id = p.provision(today(), &mut StdRng::seed_from_u64(1));
        assert_eq!(id.report.keypair, ArtifactStatus::Failed);
        assert!(!id.has_keypair);
        assert!(id.key_fingerprint.is_none());
        assert!(!id.is_complete());
        assert_eq!(fs::read(p.store().path(Artifact::PrivateKey)).unwrap(), b"garbage");
        assert_eq!(fs::read(p.store().path(Artifact::PublicKey)).unwrap(), public_before);
    }

    #[test]
    fn mismatched_public_key_is_reported_failed() {
        let tmp = TempDir::new().unwrap();
        let p = provisioner(&tmp);
        p.provision(today(), &mut StdRng::seed_from_u64(1));

        let stranger = generator::generate_keypair(1024).unwrap();
        fs::remove_file(p.store().path(Artifact::PublicKey)).unwrap();
        fs::write(p.store().path(Artifact::PublicKey), stranger.public_pem()).unwrap();
        let private_before = fs::read(p.store().path(Artifact::PrivateKey)).unwrap();

        let id = p.provision(today(), &mut StdRng::seed_from_u64(1));
        assert_eq!(id.report.keypair, ArtifactStatus::Failed);
        assert!(!id.has_keypair);
        assert_eq!(fs::read(p.store().path(Artifact::PrivateKey)).unwrap(), private_before);
        assert_eq!(
            fs::read_to_string(p.store().path(Artifact::PublicKey)).unwrap(),
            stranger.public_pem()
        );
    }

    #[test]
    fn orphan_public_key_blocks_generation() {
        let tmp = TempDir::new().unwrap();
        let p = provisioner(&tmp);
        p.store().ensure_directory().unwrap();
        fs::write(p.store().path(Artifact::PublicKey), b"orphan").unwrap();

        let id = p.provision(today(), &mut StdRng::seed_from_u64(1));
        assert_eq!(id.report.keypair, ArtifactStatus::Failed);
        assert!(!p.store().exists(Artifact::PrivateKey));
        assert_eq!(fs::read(p.store().path(Artifact::PublicKey)).unwrap(), b"orphan");
    }

    #[test]
    fn malformed_existing_tag_is_kept() {
        let tmp = TempDir::new().unwrap();
        let p = Provisioner::new(
            CredentialStore::new(tmp.path().join("device")),
            Box::new(FailingKeys),
        );
        p.store().ensure_directory().unwrap();
        fs::write(p.store().path(Artifact::Tag), b"custom-label").unwrap();

        let id = p.provision(today(), &mut StdRng::seed_from_u64(1));
        assert_eq!(id.tag.as_deref(), Some("custom-label"));
        assert_eq!(id.report.tag, ArtifactStatus::Existing);
    }

    #[test]
    fn unusable_directory_skips_everything() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("device");
        fs::write(&blocker, b"file, not dir").unwrap();

        let p = provisioner(&tmp);
        let id = p.provision(today(), &mut StdRng::seed_from_u64(1));
        assert_eq!(id.report.tag, ArtifactStatus::Skipped);
        assert_eq!(id.report.uid, ArtifactStatus::Skipped);
        assert_eq!(id.report.keypair, ArtifactStatus::Skipped);
        assert!(id.tag.is_none() && id.uid.is_none() && !id.has_keypair);
        assert_eq!(fs::read(&blocker).unwrap(), b"file, not dir");
    }

    #[test]
    fn from_config_targets_device_subdir() {
        let tmp = TempDir::new().unwrap();
        let mut cfg = Config::new(tmp.path());
        cfg.key_bits = 1024;
        let p = Provisioner::from_config(&cfg);
        assert_eq!(p.store().dir(), tmp.path().join("device"));
    }
}
