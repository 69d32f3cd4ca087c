//! CPU reference oracle: scalar re-computation of every benchmarked kernel,
//! used as ground truth by the verification harness.

/// Expected per-lane result of the broadcast scenarios.
///
/// A sentinel of 0 means "no sentinel": the lanes held the lane-index pattern
/// and the XOR reduction leaves the closed-form sum `width*(width-1)/2` in
/// every lane. A nonzero sentinel is broadcast unchanged from lane 0.
pub fn expected_broadcast(width: u32, sentinel: i32) -> i32 {
    if sentinel != 0 {
        sentinel
    } else {
        (width * (width - 1) / 2) as i32
    }
}

/// Expected shuffle-transpose output: reversal per `width`-sized group.
///
/// `output[g*width + j] = input[g*width + width - 1 - j]` for each of the
/// `num_groups` groups. A pure permutation; no arithmetic is performed.
pub fn expected_transpose(input: &[f32], num_groups: usize, width: usize) -> Vec<f32> {
    let mut output = vec![0.0f32; num_groups * width];
    for g in 0..num_groups {
        let base = g * width;
        for j in 0..width {
            output[base + j] = input[base + width - 1 - j];
        }
    }
    output
}

/// Tanh-approximation GELU, as in the activation kernel.
pub fn gelu(x: f32) -> f32 {
    0.5 * x * (1.0 + (0.79788456 * (x + 0.044715 * x * x * x)).tanh())
}

/// One in-place application of the fused bias-add + GELU kernel: `bias` is
/// broadcast along the trailing dimension of length `bias.len()`.
pub fn gelu_bias(data: &mut [f32], bias: &[f32]) {
    if bias.is_empty() {
        return;
    }
    for chunk in data.chunks_mut(bias.len()) {
        for (value, &b) in chunk.iter_mut().zip(bias) {
            *value = gelu(*value + b);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_default_pattern_uses_closed_form_sum() {
        assert_eq!(expected_broadcast(8, 0), 28);
        assert_eq!(expected_broadcast(16, 0), 120);
        assert_eq!(expected_broadcast(32, 0), 496);
        assert_eq!(expected_broadcast(1, 0), 0);
    }

    #[test]
    fn broadcast_sentinel_passes_through() {
        let marker = 0xDEADBEEFu32 as i32;
        assert_eq!(expected_broadcast(8, marker), marker);
        assert_eq!(expected_broadcast(32, -1), -1);
    }

    #[test]
    fn transpose_reverses_each_group() {
        let input: Vec<f32> = (0..32).map(|i| i as f32 * 10.0).collect();
        let output = expected_transpose(&input, 2, 16);
        for g in 0..2 {
            for j in 0..16 {
                assert_eq!(output[g * 16 + j], input[g * 16 + 15 - j]);
            }
        }
    }

    #[test]
    fn gelu_fixed_points() {
        assert_eq!(gelu(0.0), 0.0);
        // Deep in the saturated tails GELU approaches the identity / zero.
        assert!((gelu(10.0) - 10.0).abs() < 1e-4);
        assert!(gelu(-10.0).abs() < 1e-4);
    }

    #[test]
    fn gelu_bias_broadcasts_along_hidden_dim() {
        let mut data = vec![0.0f32; 6];
        let bias = vec![1.0f32, -1.0, 0.5];
        gelu_bias(&mut data, &bias);
        assert_eq!(data[0], gelu(1.0));
        assert_eq!(data[1], gelu(-1.0));
        assert_eq!(data[2], gelu(0.5));
        assert_eq!(&data[0..3], &data[3..6]);
    }
}
