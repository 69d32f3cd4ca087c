//! Global registration of the WGPU provider.

use anyhow::Result;
use log::warn;
use once_cell::sync::OnceCell;

use super::provider_impl::{WgpuProvider, WgpuProviderOptions};

static WGPU_PROVIDER: OnceCell<&'static WgpuProvider> = OnceCell::new();

/// Construct the WGPU provider (once per process) and install it as the
/// global provider. Later calls reuse the first instance.
pub fn register_wgpu_provider(opts: WgpuProviderOptions) -> Result<&'static WgpuProvider> {
    let provider: &'static WgpuProvider = *WGPU_PROVIDER.get_or_try_init(|| {
        let provider = WgpuProvider::new(opts)?;
        Ok::<_, anyhow::Error>(&*Box::leak(Box::new(provider)))
    })?;
    unsafe {
        lanewise_api::register_provider(provider);
    }
    Ok(provider)
}

/// Best-effort WGPU provider for tests and opportunistic acceleration:
/// `Ok(None)` when no usable adapter exists on this machine.
pub fn ensure_wgpu_provider() -> Result<Option<&'static WgpuProvider>> {
    if let Some(provider) = WGPU_PROVIDER.get() {
        return Ok(Some(*provider));
    }
    match register_wgpu_provider(WgpuProviderOptions::default()) {
        Ok(provider) => Ok(Some(provider)),
        Err(e) => {
            warn!("wgpu provider unavailable: {e}");
            Ok(None)
        }
    }
}
