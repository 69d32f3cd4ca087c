//! Verification harness: element-wise comparison of device output against the
//! CPU reference oracle. Exact for integers, tolerance-based for floats; the
//! first mismatch short-circuits and is reported with its index and the
//! observed/expected pair. Verdicts are per scenario and never aggregated.

/// Absolute tolerance for float comparisons.
pub const FLOAT_TOLERANCE: f32 = 1.0e-6;

/// First offending element of a failed comparison.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mismatch<T> {
    pub index: usize,
    pub expected: T,
    pub observed: T,
}

/// Exact check that every element equals the single expected scalar.
/// Returns `None` on PASS, or the first mismatch.
pub fn check_uniform_i32(observed: &[i32], expected: i32) -> Option<Mismatch<i32>> {
    observed
        .iter()
        .enumerate()
        .find(|(_, &v)| v != expected)
        .map(|(index, &v)| Mismatch {
            index,
            expected,
            observed: v,
        })
}

/// Element-wise absolute-difference check against a reference sequence.
/// Returns `None` when every element is within `tolerance`.
pub fn check_close_f32(
    observed: &[f32],
    expected: &[f32],
    tolerance: f32,
) -> Option<Mismatch<f32>> {
    observed
        .iter()
        .zip(expected)
        .enumerate()
        .find(|(_, (&got, &want))| (got - want).abs() > tolerance)
        .map(|(index, (&got, &want))| Mismatch {
            index,
            expected: want,
            observed: got,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_check_passes_on_agreement() {
        assert_eq!(check_uniform_i32(&[28; 256], 28), None);
        assert_eq!(check_uniform_i32(&[], 5), None);
    }

    #[test]
    fn uniform_check_reports_first_mismatch() {
        let mut data = vec![496i32; 64];
        data[9] = 0;
        data[40] = 1;
        let m = check_uniform_i32(&data, 496).expect("mismatch");
        assert_eq!(m.index, 9);
        assert_eq!(m.expected, 496);
        assert_eq!(m.observed, 0);
    }

    #[test]
    fn close_check_honors_tolerance_boundary() {
        // Differences at exactly the tolerance are allowed, beyond it are not.
        assert_eq!(check_close_f32(&[1.0 + 1.0e-6], &[1.0], FLOAT_TOLERANCE), None);
        let m = check_close_f32(&[1.0 + 2.0e-5], &[1.0], FLOAT_TOLERANCE).expect("mismatch");
        assert_eq!(m.index, 0);
        assert_eq!(m.expected, 1.0);
    }

    #[test]
    fn close_check_reports_first_offender() {
        let expected = vec![0.0f32, 1.0, 2.0, 3.0];
        let observed = vec![0.0f32, 1.0, 2.5, 9.0];
        let m = check_close_f32(&observed, &expected, FLOAT_TOLERANCE).expect("mismatch");
        assert_eq!(m.index, 2);
        assert_eq!(m.observed, 2.5);
    }
}
