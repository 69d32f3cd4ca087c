//! Lanewise: benchmarks and execution providers for lane-cohort collective
//! primitives (XOR-shuffle reduction, lane-0 broadcast, block-reversal
//! transpose) plus a fused bias+GELU activation kernel.
//!
//! Kernels run through whichever [`lanewise_api::CollectiveProvider`] is
//! registered: the WGPU backend when a subgroup-capable adapter exists, the
//! in-process simulator otherwise. Benchmark drivers live in `src/bin` and
//! verify every device result against the CPU oracle in [`oracle`].

use log::{info, warn};

pub mod backend;
pub mod cohort;
pub mod oracle;
pub mod sim_provider;
pub mod timing;
pub mod verify;

/// Which provider to install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderPreference {
    /// Try the GPU backend first, then fall back to the simulator.
    #[default]
    Auto,
    Wgpu,
    InProcess,
}

/// Adapter power class requested from the GPU backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerPreference {
    #[default]
    Auto,
    HighPerformance,
    LowPower,
}

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub provider: ProviderPreference,
    /// Whether `Wgpu` may fall back to the simulator when no adapter exists.
    pub allow_inprocess_fallback: bool,
    pub power_preference: PowerPreference,
    pub force_fallback_adapter: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            provider: ProviderPreference::Auto,
            allow_inprocess_fallback: true,
            power_preference: PowerPreference::Auto,
            force_fallback_adapter: false,
        }
    }
}

#[cfg(feature = "wgpu")]
fn try_register_wgpu(options: &InitOptions) -> anyhow::Result<()> {
    let power_preference = match options.power_preference {
        PowerPreference::Auto | PowerPreference::HighPerformance => {
            wgpu::PowerPreference::HighPerformance
        }
        PowerPreference::LowPower => wgpu::PowerPreference::LowPower,
    };
    let provider = backend::wgpu::register_wgpu_provider(backend::wgpu::WgpuProviderOptions {
        power_preference,
        force_fallback_adapter: options.force_fallback_adapter,
    })?;
    let dev = lanewise_api::CollectiveProvider::device_info(provider);
    info!(
        "registered wgpu provider: {} ({}, {})",
        dev.name,
        dev.vendor,
        dev.backend.as_deref().unwrap_or("unknown")
    );
    Ok(())
}

/// Install the execution provider described by `options`.
///
/// Idempotent: if a provider is already registered this returns immediately.
pub fn initialize_provider_with(options: &InitOptions) -> anyhow::Result<()> {
    if lanewise_api::provider().is_some() {
        return Ok(());
    }

    match options.provider {
        ProviderPreference::InProcess => {
            sim_provider::register_inprocess_provider();
            info!("registered in-process provider");
            return Ok(());
        }
        ProviderPreference::Auto | ProviderPreference::Wgpu => {
            #[cfg(feature = "wgpu")]
            match try_register_wgpu(options) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    if options.provider == ProviderPreference::Wgpu
                        && !options.allow_inprocess_fallback
                    {
                        return Err(e);
                    }
                    warn!("wgpu provider unavailable ({e}); falling back to in-process");
                }
            }
            #[cfg(not(feature = "wgpu"))]
            {
                if options.provider == ProviderPreference::Wgpu
                    && !options.allow_inprocess_fallback
                {
                    anyhow::bail!("built without the wgpu feature");
                }
                warn!("built without the wgpu feature; falling back to in-process");
            }
        }
    }

    sim_provider::register_inprocess_provider();
    info!("registered in-process provider");
    Ok(())
}

/// Install the default provider (GPU when available, simulator otherwise).
pub fn initialize_provider() -> anyhow::Result<()> {
    initialize_provider_with(&InitOptions::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_registers_some_provider() {
        initialize_provider().expect("initialize");
        let p = lanewise_api::provider().expect("a provider must be registered");
        assert!(!p.device_info().name.is_empty());
    }
}
