//! Device identity bootstrap.
//!
//! On first run a device tag, a device UID and an RSA keypair are generated
//! and written under `<data_dir>/device/`; later runs reuse whatever is
//! already there. See [`identity`] for the on-disk layout.

pub mod config;
pub mod error;
pub mod identity;
pub mod logger;

pub use identity::{DeviceIdentity, provision, provision_from_config};
