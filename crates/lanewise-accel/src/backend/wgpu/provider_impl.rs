//! WGPU execution provider: native subgroup shuffles for the collective
//! primitives, one storage buffer per `DeviceBufferHandle`, and a pipeline
//! cache keyed by the baked-in kernel parameters.

use anyhow::{anyhow, ensure, Result};
use bytemuck::cast_slice;
use futures::channel::oneshot;
use log::{info, warn};
use pollster::block_on;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use wgpu::util::DeviceExt;

use lanewise_api::{ApiDeviceInfo, CollectiveProvider, DeviceBufferHandle, ScalarType};

use super::bindings::{storage_read_entry, storage_read_write_entry};
use super::dispatch::{self, Grid, WORKGROUP_SIZE};
use super::shaders;

#[derive(Clone, Debug)]
pub struct WgpuProviderOptions {
    pub power_preference: wgpu::PowerPreference,
    pub force_fallback_adapter: bool,
}

impl Default for WgpuProviderOptions {
    fn default() -> Self {
        Self {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum PipelineKey {
    XorReduce { width: u32, len: u32, groups_x: u32 },
    Broadcast { width: u32, sentinel: i32, len: u32, groups_x: u32 },
    Transpose { width: u32, len: u32, groups_x: u32 },
    GeluBias { hidden: u32, len: u32, groups_x: u32 },
}

struct PipelineBundle {
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
}

struct BufferEntry {
    buffer: Arc<wgpu::Buffer>,
    len: usize,
    scalar: ScalarType,
}

pub struct WgpuProvider {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    adapter_info: wgpu::AdapterInfo,
    max_subgroup_size: u32,
    buffers: Mutex<HashMap<u64, BufferEntry>>,
    next_id: AtomicU64,
    pipelines: Mutex<HashMap<PipelineKey, Arc<PipelineBundle>>>,
    device_id: u32,
}

fn install_device_error_handlers(device: &wgpu::Device) {
    device.on_uncaptured_error(Box::new(|err| {
        log::error!("wgpu uncaptured error: {err}");
    }));
}

fn canonical_vendor_name(info: &wgpu::AdapterInfo) -> String {
    match info.vendor {
        0x1002 => "amd".to_string(),
        0x10DE => "nvidia".to_string(),
        0x13B5 => "arm".to_string(),
        0x5143 => "qualcomm".to_string(),
        0x8086 => "intel".to_string(),
        other => format!("{other:#06x}"),
    }
}

impl WgpuProvider {
    pub async fn new_async(opts: WgpuProviderOptions) -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: opts.power_preference,
                force_fallback_adapter: opts.force_fallback_adapter,
                compatible_surface: None,
            })
            .await
            .ok_or_else(|| anyhow!("wgpu: no compatible adapter found"))?;

        let adapter_info = adapter.get_info();
        ensure!(
            adapter.features().contains(wgpu::Features::SUBGROUP),
            "wgpu adapter '{}' does not support subgroup operations",
            adapter_info.name
        );
        let limits = adapter.limits();

        let (device_raw, queue_raw) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Lanewise WGPU Device"),
                    required_features: wgpu::Features::SUBGROUP,
                    required_limits: limits.clone(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await?;
        let device = Arc::new(device_raw);
        install_device_error_handlers(&device);
        let queue = Arc::new(queue_raw);

        info!(
            "WGPU adapter '{}' ready: backend={:?} subgroup_size=[{}, {}] workgroup_size={}",
            adapter_info.name,
            adapter_info.backend,
            limits.min_subgroup_size,
            limits.max_subgroup_size,
            WORKGROUP_SIZE
        );

        Ok(Self {
            device,
            queue,
            adapter_info,
            max_subgroup_size: limits.max_subgroup_size,
            buffers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            pipelines: Mutex::new(HashMap::new()),
            device_id: lanewise_api::next_device_id(),
        })
    }

    pub fn new(opts: WgpuProviderOptions) -> Result<Self> {
        block_on(Self::new_async(opts))
    }

    fn register_buffer(
        &self,
        buffer: wgpu::Buffer,
        len: usize,
        scalar: ScalarType,
    ) -> DeviceBufferHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.buffers
            .lock()
            .expect("wgpu buffer table poisoned")
            .insert(
                id,
                BufferEntry {
                    buffer: Arc::new(buffer),
                    len,
                    scalar,
                },
            );
        DeviceBufferHandle {
            len,
            scalar,
            device_id: self.device_id,
            buffer_id: id,
        }
    }

    fn entry(
        &self,
        h: &DeviceBufferHandle,
        scalar: ScalarType,
    ) -> Result<(Arc<wgpu::Buffer>, usize)> {
        ensure!(
            h.device_id == self.device_id,
            "buffer {} belongs to device {}, not this provider (device {})",
            h.buffer_id,
            h.device_id,
            self.device_id
        );
        let guard = self.buffers.lock().expect("wgpu buffer table poisoned");
        let entry = guard
            .get(&h.buffer_id)
            .ok_or_else(|| anyhow!("unknown buffer {}", h.buffer_id))?;
        ensure!(
            entry.scalar == scalar,
            "buffer {} holds {:?}, expected {:?}",
            h.buffer_id,
            entry.scalar,
            scalar
        );
        Ok((entry.buffer.clone(), entry.len))
    }

    fn storage_buffer(&self, bytes: u64, label: &str) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: bytes,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    fn validate_width(&self, width: u32, len: usize) -> Result<()> {
        ensure!(
            width >= 1 && width.is_power_of_two(),
            "cohort width {width} must be a power of two"
        );
        ensure!(
            width <= WORKGROUP_SIZE,
            "cohort width {width} exceeds the workgroup size {WORKGROUP_SIZE}"
        );
        ensure!(
            len % width as usize == 0,
            "buffer length {len} is not a multiple of cohort width {width}"
        );
        if self.max_subgroup_size > 0 && width > self.max_subgroup_size {
            warn!(
                "cohort width {} exceeds the adapter's max subgroup size {}; results will not verify",
                width, self.max_subgroup_size
            );
        }
        Ok(())
    }

    fn pipeline_for(&self, key: PipelineKey) -> Arc<PipelineBundle> {
        let mut guard = self.pipelines.lock().expect("pipeline cache poisoned");
        if let Some(bundle) = guard.get(&key) {
            return bundle.clone();
        }
        let (label, source, entries) = match key {
            PipelineKey::XorReduce { width, len, groups_x } => (
                format!("lanewise-xor-reduce-sg{width}"),
                shaders::xor_reduce_shader(width, len, groups_x),
                vec![storage_read_write_entry(0)],
            ),
            PipelineKey::Broadcast { width, sentinel, len, groups_x } => (
                format!("lanewise-broadcast-sg{width}"),
                shaders::broadcast_shader(width, sentinel, len, groups_x),
                vec![storage_read_write_entry(0)],
            ),
            PipelineKey::Transpose { width, len, groups_x } => (
                format!("lanewise-transpose-sg{width}"),
                shaders::transpose_shader(width, len, groups_x),
                vec![storage_read_entry(0), storage_read_write_entry(1)],
            ),
            PipelineKey::GeluBias { hidden, len, groups_x } => (
                format!("lanewise-gelu-bias-h{hidden}"),
                shaders::gelu_bias_shader(hidden, len, groups_x),
                vec![storage_read_write_entry(0), storage_read_entry(1)],
            ),
        };
        let bundle = Arc::new(create_pipeline(&self.device, &label, &entries, &source));
        guard.insert(key, bundle.clone());
        bundle
    }

    fn launch(&self, bundle: &PipelineBundle, buffers: &[&wgpu::Buffer], grid: Grid) {
        let entries: Vec<wgpu::BindGroupEntry> = buffers
            .iter()
            .enumerate()
            .map(|(i, buffer)| wgpu::BindGroupEntry {
                binding: i as u32,
                resource: buffer.as_entire_binding(),
            })
            .collect();
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("lanewise-bind-group"),
            layout: &bundle.layout,
            entries: &entries,
        });
        dispatch::encode_launch(&self.device, &self.queue, &bundle.pipeline, &bind_group, grid);
    }

    async fn map_readback_bytes(&self, staging: wgpu::Buffer, size_bytes: u64) -> Result<Vec<u8>> {
        let size = usize::try_from(size_bytes).map_err(|_| anyhow!("readback size overflow"))?;
        let slice = staging.slice(..);
        let (tx, rx) = oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = tx.send(res);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        let map_result = rx
            .await
            .map_err(|_| anyhow!("readback map_async callback dropped"))?;
        map_result.map_err(|e: wgpu::BufferAsyncError| anyhow!(e))?;
        let data = slice.get_mapped_range();
        let mut out = vec![0u8; size];
        out.copy_from_slice(&data);
        drop(data);
        staging.unmap();
        Ok(out)
    }

    fn read_back(&self, buffer: &wgpu::Buffer, len: usize, scalar: ScalarType) -> Result<Vec<u8>> {
        let size = (len * scalar.size_bytes()) as u64;
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("lanewise-readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut enc = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("lanewise-readback-encoder"),
            });
        enc.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
        self.queue.submit(Some(enc.finish()));
        block_on(self.map_readback_bytes(staging, size))
    }
}

impl CollectiveProvider for WgpuProvider {
    fn alloc_i32(&self, len: usize) -> Result<DeviceBufferHandle> {
        let bytes = (len * ScalarType::I32.size_bytes()) as u64;
        let buffer = self.storage_buffer(bytes, "lanewise-i32-buffer");
        Ok(self.register_buffer(buffer, len, ScalarType::I32))
    }

    fn alloc_f32(&self, len: usize) -> Result<DeviceBufferHandle> {
        let bytes = (len * ScalarType::F32.size_bytes()) as u64;
        let buffer = self.storage_buffer(bytes, "lanewise-f32-buffer");
        Ok(self.register_buffer(buffer, len, ScalarType::F32))
    }

    fn upload_f32(&self, data: &[f32]) -> Result<DeviceBufferHandle> {
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("lanewise-f32-upload"),
                contents: cast_slice(data),
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::COPY_DST,
            });
        Ok(self.register_buffer(buffer, data.len(), ScalarType::F32))
    }

    fn download_i32(&self, h: &DeviceBufferHandle) -> Result<Vec<i32>> {
        let (buffer, len) = self.entry(h, ScalarType::I32)?;
        let bytes = self.read_back(&buffer, len, ScalarType::I32)?;
        Ok(cast_slice::<u8, i32>(&bytes).to_vec())
    }

    fn download_f32(&self, h: &DeviceBufferHandle) -> Result<Vec<f32>> {
        let (buffer, len) = self.entry(h, ScalarType::F32)?;
        let bytes = self.read_back(&buffer, len, ScalarType::F32)?;
        Ok(cast_slice::<u8, f32>(&bytes).to_vec())
    }

    fn free(&self, h: &DeviceBufferHandle) -> Result<()> {
        let mut guard = self.buffers.lock().expect("wgpu buffer table poisoned");
        guard
            .remove(&h.buffer_id)
            .map(|_| ())
            .ok_or_else(|| anyhow!("double free of buffer {}", h.buffer_id))
    }

    fn enqueue_xor_reduce(&self, width: u32, out: &DeviceBufferHandle) -> Result<()> {
        let (buffer, len) = self.entry(out, ScalarType::I32)?;
        self.validate_width(width, len)?;
        let grid = dispatch::grid_for(len);
        let bundle = self.pipeline_for(PipelineKey::XorReduce {
            width,
            len: len as u32,
            groups_x: grid.x,
        });
        self.launch(&bundle, &[&buffer], grid);
        Ok(())
    }

    fn enqueue_broadcast(
        &self,
        width: u32,
        sentinel: i32,
        out: &DeviceBufferHandle,
    ) -> Result<()> {
        let (buffer, len) = self.entry(out, ScalarType::I32)?;
        self.validate_width(width, len)?;
        let grid = dispatch::grid_for(len);
        let bundle = self.pipeline_for(PipelineKey::Broadcast {
            width,
            sentinel,
            len: len as u32,
            groups_x: grid.x,
        });
        self.launch(&bundle, &[&buffer], grid);
        Ok(())
    }

    fn enqueue_transpose(
        &self,
        width: u32,
        input: &DeviceBufferHandle,
        out: &DeviceBufferHandle,
    ) -> Result<()> {
        ensure!(
            input.buffer_id != out.buffer_id,
            "transpose input and output buffers must not alias"
        );
        let (src, src_len) = self.entry(input, ScalarType::F32)?;
        let (dst, dst_len) = self.entry(out, ScalarType::F32)?;
        ensure!(
            src_len == dst_len,
            "transpose buffers differ in length ({src_len} vs {dst_len})"
        );
        self.validate_width(width, src_len)?;
        let grid = dispatch::grid_for(src_len);
        let bundle = self.pipeline_for(PipelineKey::Transpose {
            width,
            len: src_len as u32,
            groups_x: grid.x,
        });
        self.launch(&bundle, &[&src, &dst], grid);
        Ok(())
    }

    fn enqueue_gelu_bias(
        &self,
        data: &DeviceBufferHandle,
        bias: &DeviceBufferHandle,
        hidden: usize,
    ) -> Result<()> {
        ensure!(hidden > 0, "hidden dimension must be positive");
        let (data_buf, data_len) = self.entry(data, ScalarType::F32)?;
        let (bias_buf, bias_len) = self.entry(bias, ScalarType::F32)?;
        ensure!(
            bias_len == hidden,
            "bias length {bias_len} does not match hidden dimension {hidden}"
        );
        ensure!(
            data_len % hidden == 0,
            "data length {data_len} is not a multiple of hidden dimension {hidden}"
        );
        let grid = dispatch::grid_for(data_len);
        let bundle = self.pipeline_for(PipelineKey::GeluBias {
            hidden: hidden as u32,
            len: data_len as u32,
            groups_x: grid.x,
        });
        self.launch(&bundle, &[&data_buf, &bias_buf], grid);
        Ok(())
    }

    fn wait(&self) -> Result<()> {
        let _ = self.device.poll(wgpu::Maintain::Wait);
        Ok(())
    }

    fn device_info(&self) -> ApiDeviceInfo {
        ApiDeviceInfo {
            device_id: self.device_id,
            name: self.adapter_info.name.clone(),
            vendor: canonical_vendor_name(&self.adapter_info),
            backend: Some(format!("{:?}", self.adapter_info.backend)),
        }
    }

    fn device_id(&self) -> u32 {
        self.device_id
    }
}

fn create_pipeline(
    device: &wgpu::Device,
    label: &str,
    entries: &[wgpu::BindGroupLayoutEntry],
    source: &str,
) -> PipelineBundle {
    let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries,
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[&layout],
        push_constant_ranges: &[],
    });
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(source)),
    });
    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        module: &module,
        entry_point: "main",
        compilation_options: wgpu::PipelineCompilationOptions::default(),
        cache: None,
    });
    PipelineBundle { pipeline, layout }
}
