pub mod bindings;
pub mod dispatch;
pub mod provider;
pub mod provider_impl;
pub mod shaders;

#[cfg(test)]
mod tests;

pub use provider::{ensure_wgpu_provider, register_wgpu_provider};
pub use provider_impl::{WgpuProvider, WgpuProviderOptions};
