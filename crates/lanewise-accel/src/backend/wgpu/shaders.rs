//! WGSL sources for the collective kernels, generated per cohort width.
//!
//! Cohort widths, buffer lengths, and grid shape are baked into the source and
//! the resulting pipelines are cached by the provider, so the kernels need no
//! uniform parameter block. All kernels run with a 256-lane workgroup and
//! derive the linear element index from a 2-D grid (`groups_x` columns), which
//! keeps dispatches under the per-dimension workgroup limit for large buffers.
//!
//! Cohorts are contiguous `width`-sized blocks of the global index space.
//! Because both the workgroup size and the hardware subgroup size are powers
//! of two no smaller than any supported width, every cohort lands inside one
//! subgroup and the exchanges map onto native subgroup shuffles:
//! the butterfly step is `subgroupShuffleXor(value, mask)`, the block-local
//! reversal is `subgroupShuffleXor(value, width - 1)` (lane `i` and lane
//! `width-1-i` differ exactly in the low bits), and the lane-0 broadcast is a
//! `subgroupShuffle` from the cohort's base lane.

pub const WORKGROUP_SIZE: u32 = 256;

/// Butterfly XOR-shuffle reduction of the lane-index pattern.
pub fn xor_reduce_shader(width: u32, len: u32, groups_x: u32) -> String {
    format!(
        r#"enable subgroups;

struct Buf {{
    data: array<i32>,
}};

@group(0) @binding(0) var<storage, read_write> Output: Buf;

@compute @workgroup_size({wg})
fn main(@builtin(workgroup_id) wid: vec3<u32>,
        @builtin(local_invocation_id) lid: vec3<u32>) {{
    let idx = (wid.y * {groups_x}u + wid.x) * {wg}u + lid.x;
    var value = i32(lid.x & {lane_mask}u);
    var mask = 1u;
    loop {{
        if (mask >= {mask_stop}u) {{
            break;
        }}
        value = value + subgroupShuffleXor(value, mask);
        mask = mask * 2u;
    }}
    if (idx < {len}u) {{
        Output.data[idx] = value;
    }}
}}
"#,
        wg = WORKGROUP_SIZE,
        groups_x = groups_x,
        lane_mask = width - 1,
        mask_stop = width - 1,
        len = len
    )
}

/// Broadcast of the sentinel held by lane 0 of each cohort.
pub fn broadcast_shader(width: u32, sentinel: i32, len: u32, groups_x: u32) -> String {
    format!(
        r#"enable subgroups;

struct Buf {{
    data: array<i32>,
}};

@group(0) @binding(0) var<storage, read_write> Output: Buf;

@compute @workgroup_size({wg})
fn main(@builtin(workgroup_id) wid: vec3<u32>,
        @builtin(local_invocation_id) lid: vec3<u32>,
        @builtin(subgroup_invocation_id) sgid: u32) {{
    let idx = (wid.y * {groups_x}u + wid.x) * {wg}u + lid.x;
    var value = 0;
    if ((lid.x & {lane_mask}u) == 0u) {{
        value = {sentinel};
    }}
    let src = (sgid / {width}u) * {width}u;
    let out = subgroupShuffle(value, src);
    if (idx < {len}u) {{
        Output.data[idx] = out;
    }}
}}
"#,
        wg = WORKGROUP_SIZE,
        groups_x = groups_x,
        lane_mask = width - 1,
        width = width,
        sentinel = sentinel,
        len = len
    )
}

/// Block-local reversal: one cross-lane exchange per element.
pub fn transpose_shader(width: u32, len: u32, groups_x: u32) -> String {
    format!(
        r#"enable subgroups;

struct Buf {{
    data: array<f32>,
}};

@group(0) @binding(0) var<storage, read> Input: Buf;
@group(0) @binding(1) var<storage, read_write> Output: Buf;

@compute @workgroup_size({wg})
fn main(@builtin(workgroup_id) wid: vec3<u32>,
        @builtin(local_invocation_id) lid: vec3<u32>) {{
    let idx = (wid.y * {groups_x}u + wid.x) * {wg}u + lid.x;
    let val = Input.data[min(idx, {last}u)];
    let swapped = subgroupShuffleXor(val, {xor_mask}u);
    if (idx < {len}u) {{
        Output.data[idx] = swapped;
    }}
}}
"#,
        wg = WORKGROUP_SIZE,
        groups_x = groups_x,
        last = len.saturating_sub(1),
        xor_mask = width - 1,
        len = len
    )
}

/// Fused in-place bias-add + tanh-approximation GELU.
pub fn gelu_bias_shader(hidden: u32, len: u32, groups_x: u32) -> String {
    format!(
        r#"struct Buf {{
    data: array<f32>,
}};

@group(0) @binding(0) var<storage, read_write> Data: Buf;
@group(0) @binding(1) var<storage, read> Bias: Buf;

@compute @workgroup_size({wg})
fn main(@builtin(workgroup_id) wid: vec3<u32>,
        @builtin(local_invocation_id) lid: vec3<u32>) {{
    let idx = (wid.y * {groups_x}u + wid.x) * {wg}u + lid.x;
    if (idx >= {len}u) {{
        return;
    }}
    let x = Data.data[idx] + Bias.data[idx % {hidden}u];
    Data.data[idx] = 0.5 * x * (1.0 + tanh(0.79788456 * (x + 0.044715 * x * x * x)));
}}
"#,
        wg = WORKGROUP_SIZE,
        groups_x = groups_x,
        hidden = hidden,
        len = len
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collective_shaders_enable_subgroups() {
        for src in [
            xor_reduce_shader(8, 256, 1),
            broadcast_shader(16, -559038737, 256, 1),
            transpose_shader(32, 1 << 20, 4096),
        ] {
            assert!(src.starts_with("enable subgroups;"), "{src}");
        }
        assert!(!gelu_bias_shader(1024, 1 << 20, 4096).contains("subgroup"));
    }

    #[test]
    fn width_constants_are_baked_in() {
        let src = xor_reduce_shader(16, 256, 1);
        assert!(src.contains("lid.x & 15u"));
        assert!(src.contains("mask >= 15u"));
        let src = transpose_shader(8, 256, 1);
        assert!(src.contains("subgroupShuffleXor(val, 7u)"));
    }
}
