#[cfg(feature = "wgpu")]
pub mod wgpu;
