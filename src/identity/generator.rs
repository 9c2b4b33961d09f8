//! Fresh values for each identity artifact. Nothing here touches the filesystem.
//!
//! Tag and UID are labels, not secrets, so they take an injected [`Rng`].
//! Keypairs always draw from the OS CSPRNG.

use std::fmt;

use chrono::NaiveDate;
use rand::Rng;
use rand_core::OsRng;
use rsa::{
    RsaPrivateKey, RsaPublicKey,
    pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey},
    pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePublicKey, LineEnding},
};
use sha2::{Digest, Sha256};

use crate::error::KeyGenerationError;

pub const TAG_PREFIX: &str = "MDS";
/// Fixed segment between the date and the random suffix.
const TAG_INFIX: &str = "0-00-000";
const TAG_SUFFIX_MIN: u16 = 9000;
const TAG_SUFFIX_MAX: u16 = 9999;

pub const UID_GROUPS: usize = 16;

pub const DEFAULT_KEY_BITS: usize = 2048;

// ── tag ──────────────────────────────────────────────────────────────────────

/// Human-facing device label: `MDS-<YYYYMMDD>-0-00-000-<NNNN>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTag(String);

impl DeviceTag {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Checks the layout and that the suffix lies in `9000..=9999`.
    /// The date segment is only checked for being 8 digits.
    pub fn is_well_formed(s: &str) -> bool {
        let mut parts = s.splitn(3, '-');
        let (Some(prefix), Some(date), Some(rest)) = (parts.next(), parts.next(), parts.next())
        else {
            return false;
        };
        let Some(suffix) = rest
            .strip_prefix(TAG_INFIX)
            .and_then(|r| r.strip_prefix('-'))
        else {
            return false;
        };
        prefix == TAG_PREFIX
            && date.len() == 8
            && date.bytes().all(|b| b.is_ascii_digit())
            && suffix.len() == 4
            && suffix
                .parse::<u16>()
                .is_ok_and(|n| (TAG_SUFFIX_MIN..=TAG_SUFFIX_MAX).contains(&n))
    }
}

impl fmt::Display for DeviceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn generate_tag<R: Rng + ?Sized>(date: NaiveDate, rng: &mut R) -> DeviceTag {
    let suffix = rng.gen_range(TAG_SUFFIX_MIN..=TAG_SUFFIX_MAX);
    DeviceTag(format!(
        "{TAG_PREFIX}-{}-{TAG_INFIX}-{suffix}",
        date.format("%Y%m%d")
    ))
}

// ── uid ──────────────────────────────────────────────────────────────────────

/// `DD:DD:...` with [`UID_GROUPS`] groups of two decimal digits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceUid(String);

impl DeviceUid {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn is_well_formed(s: &str) -> bool {
        let groups: Vec<&str> = s.split(':').collect();
        groups.len() == UID_GROUPS
            && groups
                .iter()
                .all(|g| g.len() == 2 && g.bytes().all(|b| b.is_ascii_digit()))
    }
}

impl fmt::Display for DeviceUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn generate_uid<R: Rng + ?Sized>(rng: &mut R) -> DeviceUid {
    let groups: Vec<String> = (0..UID_GROUPS)
        .map(|_| {
            let hi = rng.gen_range(0..=9u8);
            let lo = rng.gen_range(0..=9u8);
            format!("{hi}{lo}")
        })
        .collect();
    DeviceUid(groups.join(":"))
}

// ── keypair ──────────────────────────────────────────────────────────────────

/// PEM-encoded RSA keypair: PKCS#1 private half, SPKI public half.
#[derive(Clone)]
pub struct DeviceKeyPair {
    private_pem: String,
    public_pem: String,
    fingerprint: String,
}

impl DeviceKeyPair {
    fn from_private_key(key: &RsaPrivateKey) -> Result<Self, KeyGenerationError> {
        let private_pem = key
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| KeyGenerationError::Encoding(e.to_string()))?;
        let public = key.to_public_key();
        let public_pem = public
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| KeyGenerationError::Encoding(e.to_string()))?;
        let public_der = public
            .to_public_key_der()
            .map_err(|e| KeyGenerationError::Encoding(e.to_string()))?;

        Ok(Self {
            private_pem: private_pem.as_str().to_owned(),
            public_pem,
            fingerprint: compute_fingerprint(public_der.as_bytes()),
        })
    }

    /// Rebuild the pair from a stored private key (PKCS#1, or PKCS#8 as fallback).
    pub fn from_private_pem(pem: &str) -> Result<Self, KeyGenerationError> {
        let key = RsaPrivateKey::from_pkcs1_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
            .map_err(|e| KeyGenerationError::InvalidKey(e.to_string()))?;
        Self::from_private_key(&key)
    }

    /// Whether `pem` encodes this pair's public half (SPKI, or PKCS#1 as fallback).
    pub fn matches_public_pem(&self, pem: &str) -> bool {
        let Ok(ours) = RsaPublicKey::from_public_key_pem(&self.public_pem) else {
            return false;
        };
        RsaPublicKey::from_public_key_pem(pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
            .is_ok_and(|theirs| theirs == ours)
    }

    pub fn private_pem(&self) -> &str {
        &self.private_pem
    }

    pub fn public_pem(&self) -> &str {
        &self.public_pem
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

impl fmt::Debug for DeviceKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceKeyPair")
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

/// First 16 hex chars of `SHA256(public_key_der)`.
pub fn compute_fingerprint(public_key_der: &[u8]) -> String {
    let digest = Sha256::digest(public_key_der);
    hex::encode(digest)[..16].to_string()
}

/// Generate a fresh RSA keypair of `bits` from the OS CSPRNG.
pub fn generate_keypair(bits: usize) -> Result<DeviceKeyPair, KeyGenerationError> {
    let key = RsaPrivateKey::new(&mut OsRng, bits)
        .map_err(|e| KeyGenerationError::Rsa(e.to_string()))?;
    DeviceKeyPair::from_private_key(&key)
}

/// Source of new keypairs for the provisioner.
pub trait KeyGenerator: Send + Sync {
    fn generate(&self) -> Result<DeviceKeyPair, KeyGenerationError>;
}

#[derive(Debug, Clone, Copy)]
pub struct RsaKeyGenerator {
    pub bits: usize,
}

impl RsaKeyGenerator {
    pub fn new(bits: usize) -> Self {
        Self { bits }
    }
}

impl Default for RsaKeyGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_BITS)
    }
}

impl KeyGenerator for RsaKeyGenerator {
    fn generate(&self) -> Result<DeviceKeyPair, KeyGenerationError> {
        generate_keypair(self.bits)
    }
}

// ── tests ─────────────────────────────────────────────────────────────────────
