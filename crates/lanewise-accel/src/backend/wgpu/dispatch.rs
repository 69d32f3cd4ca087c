//! Command-encoder helpers shared by every kernel launch.

pub use super::shaders::WORKGROUP_SIZE;

/// Workgroups per grid dimension stay well under wgpu's 65535 per-dimension
/// dispatch limit; larger launches spill into the y dimension.
pub const MAX_GROUPS_PER_DIM: u32 = 32768;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grid {
    pub x: u32,
    pub y: u32,
}

/// Grid covering `len` elements at one element per invocation.
pub fn grid_for(len: usize) -> Grid {
    let groups = (len as u32).div_ceil(WORKGROUP_SIZE).max(1);
    if groups <= MAX_GROUPS_PER_DIM {
        Grid { x: groups, y: 1 }
    } else {
        Grid {
            x: MAX_GROUPS_PER_DIM,
            y: groups.div_ceil(MAX_GROUPS_PER_DIM),
        }
    }
}

/// Encode one compute pass and submit it. Submission order is execution
/// order; the caller blocks later via the provider's `wait`.
pub fn encode_launch(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    pipeline: &wgpu::ComputePipeline,
    bind_group: &wgpu::BindGroup,
    grid: Grid,
) {
    let mut enc = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("lanewise-launch-encoder"),
    });
    {
        let mut pass = enc.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("lanewise-launch-pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, bind_group, &[]);
        pass.dispatch_workgroups(grid.x, grid.y, 1);
    }
    queue.submit(Some(enc.finish()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_grids_stay_one_dimensional() {
        assert_eq!(grid_for(256), Grid { x: 1, y: 1 });
        assert_eq!(grid_for(257), Grid { x: 2, y: 1 });
        assert_eq!(grid_for(1), Grid { x: 1, y: 1 });
    }

    #[test]
    fn large_grids_spill_into_y() {
        let grid = grid_for(1 << 27);
        assert_eq!(grid.x, MAX_GROUPS_PER_DIM);
        assert_eq!(grid.y, 16);
        assert!(u64::from(grid.x) * u64::from(grid.y) * u64::from(WORKGROUP_SIZE) >= 1 << 27);
    }
}
