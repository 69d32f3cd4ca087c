//! Lanewise API: provider interface for lane-cohort collective primitives.
//!
//! Execution backends (the in-process simulator, the WGPU backend) implement
//! [`CollectiveProvider`] and install themselves in the global registry via
//! [`register_provider`]. Benchmark drivers and tests resolve the active
//! provider through [`provider`] and never name a concrete backend, so the
//! verification harness stays backend-agnostic.

use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;

/// Scalar element type of a device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    I32,
    F32,
}

impl ScalarType {
    pub fn size_bytes(self) -> usize {
        match self {
            ScalarType::I32 => std::mem::size_of::<i32>(),
            ScalarType::F32 => std::mem::size_of::<f32>(),
        }
    }
}

/// Handle to a device-resident flat buffer of scalars.
///
/// The buffer itself is owned by the provider that allocated it; the handle is
/// only valid with that provider and until [`CollectiveProvider::free`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceBufferHandle {
    pub len: usize,
    pub scalar: ScalarType,
    pub device_id: u32,
    pub buffer_id: u64,
}

/// Device descriptor reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiDeviceInfo {
    pub device_id: u32,
    pub name: String,
    pub vendor: String,
    pub backend: Option<String>,
}

/// Execution backend for lane-cohort collectives.
///
/// The `enqueue_*` operations queue one kernel launch each; launches on the
/// same provider execute in submission order. Output buffers are only safe to
/// read back (via `download_*`) after [`CollectiveProvider::wait`] has
/// returned. Cohort widths must be powers of two and must evenly divide the
/// length of every buffer a collective touches; violating that is a caller
/// error and providers reject it.
pub trait CollectiveProvider: Send + Sync {
    // Memory
    fn alloc_i32(&self, len: usize) -> anyhow::Result<DeviceBufferHandle>;
    fn alloc_f32(&self, len: usize) -> anyhow::Result<DeviceBufferHandle>;
    fn upload_f32(&self, data: &[f32]) -> anyhow::Result<DeviceBufferHandle>;
    fn download_i32(&self, h: &DeviceBufferHandle) -> anyhow::Result<Vec<i32>>;
    fn download_f32(&self, h: &DeviceBufferHandle) -> anyhow::Result<Vec<f32>>;
    fn free(&self, h: &DeviceBufferHandle) -> anyhow::Result<()>;

    // Collectives. Each call enqueues exactly one launch over the whole buffer.
    /// Butterfly XOR-shuffle sum of the lane-index pattern; every element of
    /// `out` receives its cohort's full sum.
    fn enqueue_xor_reduce(&self, width: u32, out: &DeviceBufferHandle) -> anyhow::Result<()>;
    /// Lane 0 of each cohort holds `sentinel`, all other lanes hold 0; every
    /// element of `out` receives lane 0's value.
    fn enqueue_broadcast(
        &self,
        width: u32,
        sentinel: i32,
        out: &DeviceBufferHandle,
    ) -> anyhow::Result<()>;
    /// Block-local reversal of `input` per `width`-sized contiguous chunk,
    /// one cross-lane exchange per element. `input` and `out` must not alias.
    fn enqueue_transpose(
        &self,
        width: u32,
        input: &DeviceBufferHandle,
        out: &DeviceBufferHandle,
    ) -> anyhow::Result<()>;
    /// In-place fused bias-add + tanh-approximation GELU over `data`, with
    /// `bias` broadcast along the trailing dimension of length `hidden`.
    fn enqueue_gelu_bias(
        &self,
        data: &DeviceBufferHandle,
        bias: &DeviceBufferHandle,
        hidden: usize,
    ) -> anyhow::Result<()>;

    /// Block until every launch enqueued so far has retired.
    fn wait(&self) -> anyhow::Result<()>;

    fn device_info(&self) -> ApiDeviceInfo;
    fn device_id(&self) -> u32 {
        0
    }
}

static GLOBAL_PROVIDER: Lazy<RwLock<Option<&'static dyn CollectiveProvider>>> =
    Lazy::new(|| RwLock::new(None));
static DEVICE_ID_COUNTER: AtomicU32 = AtomicU32::new(1);

/// Allocate a process-unique device id for a newly constructed provider.
pub fn next_device_id() -> u32 {
    DEVICE_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Install the global provider.
///
/// # Safety
/// The caller promises `p` stays valid for the life of the process (providers
/// are leaked into `'static` at registration time).
pub unsafe fn register_provider(p: &'static dyn CollectiveProvider) {
    if let Ok(mut guard) = GLOBAL_PROVIDER.write() {
        *guard = Some(p);
    }
}

/// The currently registered provider, if any.
pub fn provider() -> Option<&'static dyn CollectiveProvider> {
    GLOBAL_PROVIDER
        .read()
        .ok()
        .and_then(|guard| guard.as_ref().copied())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_sizes() {
        assert_eq!(ScalarType::I32.size_bytes(), 4);
        assert_eq!(ScalarType::F32.size_bytes(), 4);
    }

    #[test]
    fn device_ids_are_unique() {
        let a = next_device_id();
        let b = next_device_id();
        assert_ne!(a, b);
    }
}
