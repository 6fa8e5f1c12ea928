//! Process-wide setup of the TLS crypto backend.
//!
//! rustls keeps no unsynchronized global state, so there is no lock table to
//! allocate. What remains is making sure exactly one process-default
//! [`CryptoProvider`] exists before the first context is built, no matter how
//! many threads race to build one. The provider is never torn down.

use std::sync::{Arc, OnceLock};

use rustls::crypto::CryptoProvider;

use crate::error::{Error, Result};

static PROVIDER: OnceLock<Arc<CryptoProvider>> = OnceLock::new();

/// Installs the process-default crypto provider if needed and returns it.
///
/// Idempotent and safe to call concurrently. A provider installed earlier by
/// another component is adopted rather than replaced.
pub fn ensure_initialized() -> Result<Arc<CryptoProvider>> {
    if let Some(provider) = PROVIDER.get() {
        return Ok(provider.clone());
    }

    let provider = match CryptoProvider::get_default() {
        Some(existing) => existing.clone(),
        None => {
            // Losing this race to another thread is fine; get_default picks
            // up whichever provider won.
            let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
            CryptoProvider::get_default()
                .cloned()
                .ok_or_else(|| Error::Init("no process-default crypto provider".to_string()))?
        }
    };

    let installed = PROVIDER.get_or_init(|| provider);
    tracing::debug!("crypto provider ready");
    Ok(installed.clone())
}

/// Whether [`ensure_initialized`] has completed in this process
pub fn is_initialized() -> bool {
    PROVIDER.get().is_some()
}
