//! In-process execution provider: runs every kernel on the host through the
//! lane-cohort simulation in [`crate::cohort`]. Used when no GPU backend is
//! available, and by tests that need a deterministic provider.
//!
//! Launches execute at submission time, which trivially satisfies the ordering
//! contract: `wait` has nothing left to do, and results are complete before
//! any download.

use anyhow::{anyhow, bail, ensure, Result};
use lanewise_api::{ApiDeviceInfo, CollectiveProvider, DeviceBufferHandle, ScalarType};
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::cohort;

enum HostBuffer {
    I32(Vec<i32>),
    F32(Vec<f32>),
}

impl HostBuffer {
    fn len(&self) -> usize {
        match self {
            HostBuffer::I32(v) => v.len(),
            HostBuffer::F32(v) => v.len(),
        }
    }

    fn scalar(&self) -> ScalarType {
        match self {
            HostBuffer::I32(_) => ScalarType::I32,
            HostBuffer::F32(_) => ScalarType::F32,
        }
    }
}

pub struct InProcessProvider {
    buffers: Mutex<HashMap<u64, HostBuffer>>,
    next_id: AtomicU64,
    device_id: u32,
}

impl InProcessProvider {
    pub fn new() -> Self {
        Self {
            buffers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            device_id: lanewise_api::next_device_id(),
        }
    }

    fn insert(&self, data: HostBuffer) -> DeviceBufferHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = DeviceBufferHandle {
            len: data.len(),
            scalar: data.scalar(),
            device_id: self.device_id,
            buffer_id: id,
        };
        self.buffers
            .lock()
            .expect("sim buffer registry poisoned")
            .insert(id, data);
        handle
    }

    fn validate(&self, h: &DeviceBufferHandle, scalar: ScalarType) -> Result<()> {
        ensure!(
            h.device_id == self.device_id,
            "buffer {} belongs to device {}, not this provider (device {})",
            h.buffer_id,
            h.device_id,
            self.device_id
        );
        ensure!(
            h.scalar == scalar,
            "buffer {} holds {:?}, expected {:?}",
            h.buffer_id,
            h.scalar,
            scalar
        );
        Ok(())
    }
}

impl Default for InProcessProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_width(width: u32, len: usize) -> Result<()> {
    ensure!(
        width >= 1 && width.is_power_of_two(),
        "cohort width {width} must be a power of two"
    );
    ensure!(
        len % width as usize == 0,
        "buffer length {len} is not a multiple of cohort width {width}"
    );
    Ok(())
}

impl CollectiveProvider for InProcessProvider {
    fn alloc_i32(&self, len: usize) -> Result<DeviceBufferHandle> {
        Ok(self.insert(HostBuffer::I32(vec![0; len])))
    }

    fn alloc_f32(&self, len: usize) -> Result<DeviceBufferHandle> {
        Ok(self.insert(HostBuffer::F32(vec![0.0; len])))
    }

    fn upload_f32(&self, data: &[f32]) -> Result<DeviceBufferHandle> {
        Ok(self.insert(HostBuffer::F32(data.to_vec())))
    }

    fn download_i32(&self, h: &DeviceBufferHandle) -> Result<Vec<i32>> {
        self.validate(h, ScalarType::I32)?;
        let guard = self.buffers.lock().expect("sim buffer registry poisoned");
        match guard.get(&h.buffer_id) {
            Some(HostBuffer::I32(v)) => Ok(v.clone()),
            _ => Err(anyhow!("unknown i32 buffer {}", h.buffer_id)),
        }
    }

    fn download_f32(&self, h: &DeviceBufferHandle) -> Result<Vec<f32>> {
        self.validate(h, ScalarType::F32)?;
        let guard = self.buffers.lock().expect("sim buffer registry poisoned");
        match guard.get(&h.buffer_id) {
            Some(HostBuffer::F32(v)) => Ok(v.clone()),
            _ => Err(anyhow!("unknown f32 buffer {}", h.buffer_id)),
        }
    }

    fn free(&self, h: &DeviceBufferHandle) -> Result<()> {
        let mut guard = self.buffers.lock().expect("sim buffer registry poisoned");
        guard
            .remove(&h.buffer_id)
            .map(|_| ())
            .ok_or_else(|| anyhow!("double free of buffer {}", h.buffer_id))
    }

    fn enqueue_xor_reduce(&self, width: u32, out: &DeviceBufferHandle) -> Result<()> {
        self.validate(out, ScalarType::I32)?;
        validate_width(width, out.len)?;
        let width = width as usize;

        // Same registers in every cohort: reduce one simulated cohort, then
        // let each cohort's lanes store their (identical) results.
        let mut regs: Vec<i32> = (0..width).map(|l| cohort::lane_pattern(l, width)).collect();
        cohort::xor_shuffle_sum(&mut regs);

        let mut guard = self.buffers.lock().expect("sim buffer registry poisoned");
        match guard.get_mut(&out.buffer_id) {
            Some(HostBuffer::I32(v)) => {
                for chunk in v.chunks_exact_mut(width) {
                    chunk.copy_from_slice(&regs);
                }
                Ok(())
            }
            _ => Err(anyhow!("unknown i32 buffer {}", out.buffer_id)),
        }
    }

    fn enqueue_broadcast(
        &self,
        width: u32,
        sentinel: i32,
        out: &DeviceBufferHandle,
    ) -> Result<()> {
        self.validate(out, ScalarType::I32)?;
        validate_width(width, out.len)?;
        let width = width as usize;

        let mut regs = vec![0i32; width];
        regs[0] = sentinel;
        cohort::broadcast_lane0(&mut regs);

        let mut guard = self.buffers.lock().expect("sim buffer registry poisoned");
        match guard.get_mut(&out.buffer_id) {
            Some(HostBuffer::I32(v)) => {
                for chunk in v.chunks_exact_mut(width) {
                    chunk.copy_from_slice(&regs);
                }
                Ok(())
            }
            _ => Err(anyhow!("unknown i32 buffer {}", out.buffer_id)),
        }
    }

    fn enqueue_transpose(
        &self,
        width: u32,
        input: &DeviceBufferHandle,
        out: &DeviceBufferHandle,
    ) -> Result<()> {
        self.validate(input, ScalarType::F32)?;
        self.validate(out, ScalarType::F32)?;
        ensure!(
            input.buffer_id != out.buffer_id,
            "transpose input and output buffers must not alias"
        );
        ensure!(
            input.len == out.len,
            "transpose buffers differ in length ({} vs {})",
            input.len,
            out.len
        );
        validate_width(width, input.len)?;
        let width = width as usize;

        let mut guard = self.buffers.lock().expect("sim buffer registry poisoned");
        let mut dst = match guard.remove(&out.buffer_id) {
            Some(HostBuffer::F32(v)) => v,
            Some(other) => {
                guard.insert(out.buffer_id, other);
                bail!("unknown f32 buffer {}", out.buffer_id);
            }
            None => bail!("unknown f32 buffer {}", out.buffer_id),
        };
        let result = match guard.get(&input.buffer_id) {
            Some(HostBuffer::F32(src)) => {
                for (src_block, dst_block) in
                    src.chunks_exact(width).zip(dst.chunks_exact_mut(width))
                {
                    cohort::reverse_shuffle(src_block, dst_block);
                }
                Ok(())
            }
            _ => Err(anyhow!("unknown f32 buffer {}", input.buffer_id)),
        };
        guard.insert(out.buffer_id, HostBuffer::F32(dst));
        result
    }

    fn enqueue_gelu_bias(
        &self,
        data: &DeviceBufferHandle,
        bias: &DeviceBufferHandle,
        hidden: usize,
    ) -> Result<()> {
        self.validate(data, ScalarType::F32)?;
        self.validate(bias, ScalarType::F32)?;
        ensure!(hidden > 0, "hidden dimension must be positive");
        ensure!(
            bias.len == hidden,
            "bias length {} does not match hidden dimension {}",
            bias.len,
            hidden
        );
        ensure!(
            data.len % hidden == 0,
            "data length {} is not a multiple of hidden dimension {}",
            data.len,
            hidden
        );

        let mut guard = self.buffers.lock().expect("sim buffer registry poisoned");
        let bias_values = match guard.get(&bias.buffer_id) {
            Some(HostBuffer::F32(v)) => v.clone(),
            _ => bail!("unknown f32 buffer {}", bias.buffer_id),
        };
        match guard.get_mut(&data.buffer_id) {
            Some(HostBuffer::F32(v)) => {
                for chunk in v.chunks_exact_mut(hidden) {
                    for (value, &b) in chunk.iter_mut().zip(&bias_values) {
                        let x = *value + b;
                        *value =
                            0.5 * x * (1.0 + (0.79788456 * (x + 0.044715 * x * x * x)).tanh());
                    }
                }
                Ok(())
            }
            _ => Err(anyhow!("unknown f32 buffer {}", data.buffer_id)),
        }
    }

    fn wait(&self) -> Result<()> {
        // Launches ran at submission; nothing is in flight.
        Ok(())
    }

    fn device_info(&self) -> ApiDeviceInfo {
        ApiDeviceInfo {
            device_id: self.device_id,
            name: "Lanewise in-process simulator".to_string(),
            vendor: "lanewise".to_string(),
            backend: Some("cpu".to_string()),
        }
    }

    fn device_id(&self) -> u32 {
        self.device_id
    }
}

static INSTANCE: OnceCell<InProcessProvider> = OnceCell::new();

/// Register the in-process simulator as the global provider.
/// Safe to call multiple times; only the first call installs the provider.
pub fn register_inprocess_provider() {
    let provider: &'static InProcessProvider = INSTANCE.get_or_init(InProcessProvider::new);
    // Safety: we intentionally install a reference with 'static lifetime
    unsafe { lanewise_api::register_provider(provider) };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{oracle, verify};

    const MARKER: i32 = 0xDEADBEEFu32 as i32;

    #[test]
    fn xor_reduce_matches_closed_form_for_every_width() {
        let p = InProcessProvider::new();
        for width in [1u32, 8, 16, 32] {
            let out = p.alloc_i32(256).expect("alloc");
            p.enqueue_xor_reduce(width, &out).expect("enqueue");
            p.wait().expect("wait");
            let host = p.download_i32(&out).expect("download");
            let expected = oracle::expected_broadcast(width, 0);
            assert_eq!(
                verify::check_uniform_i32(&host, expected),
                None,
                "width {width}"
            );
            p.free(&out).expect("free");
        }
    }

    #[test]
    fn sentinel_broadcast_reaches_every_lane() {
        let p = InProcessProvider::new();
        let out = p.alloc_i32(256).expect("alloc");
        p.enqueue_broadcast(32, MARKER, &out).expect("enqueue");
        p.wait().expect("wait");
        let host = p.download_i32(&out).expect("download");
        assert!(host.iter().all(|&v| v == MARKER));
        p.free(&out).expect("free");
    }

    #[test]
    fn transpose_matches_oracle_and_round_trips() {
        let p = InProcessProvider::new();
        let width = 16u32;
        let total = 256usize;
        let matrix: Vec<f32> = (0..total).map(|i| i as f32 * 10.0).collect();

        let input = p.upload_f32(&matrix).expect("upload");
        let once = p.alloc_f32(total).expect("alloc");
        let twice = p.alloc_f32(total).expect("alloc");

        p.enqueue_transpose(width, &input, &once).expect("enqueue");
        p.wait().expect("wait");
        let got = p.download_f32(&once).expect("download");
        let expected = oracle::expected_transpose(&matrix, total / width as usize, width as usize);
        assert_eq!(
            verify::check_close_f32(&got, &expected, verify::FLOAT_TOLERANCE),
            None
        );

        // Block reversal is self-inverse.
        p.enqueue_transpose(width, &once, &twice).expect("enqueue");
        p.wait().expect("wait");
        let back = p.download_f32(&twice).expect("download");
        assert_eq!(back, matrix);

        for h in [&input, &once, &twice] {
            p.free(h).expect("free");
        }
    }

    #[test]
    fn transpose_rejects_aliasing_and_bad_widths() {
        let p = InProcessProvider::new();
        let buf = p.alloc_f32(64).expect("alloc");
        let other = p.alloc_f32(64).expect("alloc");
        assert!(p.enqueue_transpose(8, &buf, &buf).is_err());
        assert!(p.enqueue_transpose(12, &buf, &other).is_err());
        assert!(p.enqueue_transpose(0, &buf, &other).is_err());
    }

    #[test]
    fn length_must_divide_into_cohorts() {
        let p = InProcessProvider::new();
        let out = p.alloc_i32(100).expect("alloc");
        assert!(p.enqueue_xor_reduce(32, &out).is_err());
        assert!(p.enqueue_xor_reduce(4, &out).is_ok());
    }

    #[test]
    fn downloads_enforce_scalar_type() {
        let p = InProcessProvider::new();
        let ints = p.alloc_i32(8).expect("alloc");
        assert!(p.download_f32(&ints).is_err());
        assert!(p.download_i32(&ints).is_ok());
    }

    #[test]
    fn gelu_bias_matches_oracle() {
        let p = InProcessProvider::new();
        let hidden = 4usize;
        let src: Vec<f32> = (0..16).map(|i| (i as f32) * 0.25 - 2.0).collect();
        let bias: Vec<f32> = vec![0.5, -0.5, 1.0, -1.0];

        let data = p.upload_f32(&src).expect("upload");
        let bias_buf = p.upload_f32(&bias).expect("upload");
        p.enqueue_gelu_bias(&data, &bias_buf, hidden).expect("enqueue");
        p.wait().expect("wait");
        let got = p.download_f32(&data).expect("download");

        let mut expected = src.clone();
        oracle::gelu_bias(&mut expected, &bias);
        assert_eq!(
            verify::check_close_f32(&got, &expected, 1.0e-6),
            None
        );
    }

    #[test]
    fn free_is_single_shot() {
        let p = InProcessProvider::new();
        let buf = p.alloc_i32(8).expect("alloc");
        p.free(&buf).expect("first free");
        assert!(p.free(&buf).is_err());
    }
}
