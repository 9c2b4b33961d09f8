//! One-shot device identity bootstrap.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Load config
//!   3. Init logger at configured level
//!   4. Provision device identity
//!   5. Print status and exit
//!
//! Provisioning is best-effort: only an invalid config or logger setup makes
//! this exit non-zero.

use mod_device_id::{config, error::AppError, logger, provision_from_config};
use tracing::info;

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), AppError> {
    // .env is optional.
    let _ = dotenvy::dotenv();

    let config = config::load()?;
    logger::init(&config.log_level, config.log_file.as_deref())?;

    info!(
        data_dir = %config.data_dir.display(),
        key_bits = config.key_bits,
        log_level = %config.log_level,
        "config loaded"
    );

    let identity = provision_from_config(&config);

    println!(
        "device: tag={} uid={} keypair={} ({})",
        identity.tag.as_deref().unwrap_or("-"),
        identity.uid.as_deref().unwrap_or("-"),
        if identity.has_keypair { "present" } else { "missing" },
        identity.device_dir.display(),
    );

    Ok(())
}
