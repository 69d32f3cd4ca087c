//! Host-side simulation of the lane-cohort execution model.
//!
//! A cohort is a fixed-size group of lanes that progress in lockstep and can
//! read each other's registers directly. On hardware that is a subgroup/warp
//! exchanging values through shuffle instructions; on the host it is an array
//! of N scratch "registers" with the exchange expressed as plain indexing.
//! Every collective here is parametric in the cohort width, with the butterfly
//! mask sequence derived generically (mask doubling while `mask < width - 1`)
//! instead of duplicated per width.

/// Cohort widths exercised by the benchmarks.
pub const COHORT_WIDTHS: [u32; 3] = [8, 16, 32];

/// Lane-local input pattern: each lane holds its index within the cohort.
pub fn lane_pattern(lane: usize, width: usize) -> i32 {
    (lane & (width - 1)) as i32
}

/// Butterfly XOR-shuffle sum over one cohort, in place.
///
/// Each step exchanges with the lane whose index differs by `mask` and adds
/// the partner's value. All lanes read their partner's pre-step value, so a
/// snapshot stands in for the simultaneous register exchange. After the final
/// step every lane holds the full cohort sum.
pub fn xor_shuffle_sum(lanes: &mut [i32]) {
    let width = lanes.len();
    if width < 2 {
        return;
    }
    let mut snapshot = vec![0i32; width];
    let mut mask = 1usize;
    while mask < width - 1 {
        snapshot.copy_from_slice(lanes);
        for lane in 0..width {
            lanes[lane] = snapshot[lane].wrapping_add(snapshot[lane ^ mask]);
        }
        mask *= 2;
    }
}

/// Propagate lane 0's register to every lane of the cohort, in place.
pub fn broadcast_lane0(lanes: &mut [i32]) {
    if let Some(&value) = lanes.first() {
        lanes.fill(value);
    }
}

/// Cross-lane reversal exchange: destination lane `i` receives the register of
/// lane `width - 1 - i`. `src` and `dst` are the registers of one cohort and
/// must not alias.
pub fn reverse_shuffle(src: &[f32], dst: &mut [f32]) {
    let width = src.len();
    for (lane, out) in dst.iter_mut().enumerate().take(width) {
        *out = src[width - 1 - lane];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xor_shuffle_sum_reaches_every_lane() {
        for &width in &COHORT_WIDTHS {
            let width = width as usize;
            let mut lanes: Vec<i32> = (0..width).map(|l| lane_pattern(l, width)).collect();
            xor_shuffle_sum(&mut lanes);
            let expected = (width * (width - 1) / 2) as i32;
            assert!(
                lanes.iter().all(|&v| v == expected),
                "width {width}: expected {expected} in every lane, got {lanes:?}"
            );
        }
    }

    #[test]
    fn xor_shuffle_sum_width_one_is_identity() {
        let mut lanes = vec![0i32];
        xor_shuffle_sum(&mut lanes);
        assert_eq!(lanes, vec![0]);
    }

    #[test]
    fn lane_pattern_wraps_at_width() {
        assert_eq!(lane_pattern(0, 8), 0);
        assert_eq!(lane_pattern(7, 8), 7);
        assert_eq!(lane_pattern(8, 8), 0);
        assert_eq!(lane_pattern(13, 8), 5);
    }

    #[test]
    fn broadcast_lane0_covers_originating_lane() {
        let mut lanes = vec![42, 0, 0, 0, 0, 0, 0, 0];
        broadcast_lane0(&mut lanes);
        assert_eq!(lanes, vec![42; 8]);

        let mut single = vec![7];
        broadcast_lane0(&mut single);
        assert_eq!(single, vec![7]);
    }

    #[test]
    fn reverse_shuffle_is_self_inverse() {
        let src: Vec<f32> = (0..16).map(|i| i as f32 * 10.0).collect();
        let mut once = vec![0.0f32; 16];
        let mut twice = vec![0.0f32; 16];
        reverse_shuffle(&src, &mut once);
        reverse_shuffle(&once, &mut twice);
        assert_eq!(once[0], 150.0);
        assert_eq!(once[15], 0.0);
        assert_eq!(twice, src);
    }
}
