//! Device tests. Each test resolves the shared WGPU provider and silently
//! passes on machines without a subgroup-capable adapter.

use lanewise_api::CollectiveProvider;

use crate::cohort::{self, COHORT_WIDTHS};
use crate::oracle;
use crate::verify;

use super::provider::ensure_wgpu_provider;
use super::provider_impl::WgpuProvider;

fn device() -> Option<&'static WgpuProvider> {
    match ensure_wgpu_provider() {
        Ok(found) => found,
        Err(_) => None,
    }
}

#[test]
fn xor_reduce_matches_simulated_cohorts() {
    let Some(p) = device() else { return };
    for &width in COHORT_WIDTHS.iter() {
        let len = 4096usize;
        let out = p.alloc_i32(len).unwrap();
        p.enqueue_xor_reduce(width, &out).unwrap();
        p.wait().unwrap();
        let got = p.download_i32(&out).unwrap();
        p.free(&out).unwrap();

        let w = width as usize;
        let mut regs: Vec<i32> = (0..w).map(|l| cohort::lane_pattern(l, w)).collect();
        cohort::xor_shuffle_sum(&mut regs);
        for (i, chunk) in got.chunks(w).enumerate() {
            assert_eq!(chunk, &regs[..], "width {width}, cohort {i}");
        }
    }
}

#[test]
fn broadcast_fills_every_lane_with_the_sentinel() {
    let Some(p) = device() else { return };
    let sentinel = 0xDEADBEEFu32 as i32;
    for &width in COHORT_WIDTHS.iter() {
        let out = p.alloc_i32(4096).unwrap();
        p.enqueue_broadcast(width, sentinel, &out).unwrap();
        p.wait().unwrap();
        let got = p.download_i32(&out).unwrap();
        p.free(&out).unwrap();

        let expected = oracle::expected_broadcast(width, sentinel);
        assert!(
            verify::check_uniform_i32(&got, expected).is_none(),
            "width {width}"
        );
    }
}

#[test]
fn transpose_reverses_each_block() {
    let Some(p) = device() else { return };
    for &width in COHORT_WIDTHS.iter() {
        let len = 4096usize;
        let input: Vec<f32> = (0..len).map(|i| i as f32 * 10.0).collect();
        let src = p.upload_f32(&input).unwrap();
        let dst = p.alloc_f32(len).unwrap();
        p.enqueue_transpose(width, &src, &dst).unwrap();
        p.wait().unwrap();
        let got = p.download_f32(&dst).unwrap();
        p.free(&src).unwrap();
        p.free(&dst).unwrap();

        let w = width as usize;
        let expected = oracle::expected_transpose(&input, len / w, w);
        assert!(
            verify::check_close_f32(&got, &expected, verify::FLOAT_TOLERANCE).is_none(),
            "width {width}"
        );
    }
}

#[test]
fn transpose_rejects_aliased_buffers() {
    let Some(p) = device() else { return };
    let buf = p.alloc_f32(256).unwrap();
    assert!(p.enqueue_transpose(8, &buf, &buf).is_err());
    p.free(&buf).unwrap();
}

#[test]
fn gelu_bias_matches_the_host_oracle() {
    let Some(p) = device() else { return };
    let hidden = 64usize;
    let rows = 32usize;
    let mut host: Vec<f32> = (0..rows * hidden)
        .map(|i| (i as f32 * 0.37).sin())
        .collect();
    let bias: Vec<f32> = (0..hidden).map(|i| (i as f32 % 13.0) - 6.0).collect();

    let data = p.upload_f32(&host).unwrap();
    let bias_buf = p.upload_f32(&bias).unwrap();
    p.enqueue_gelu_bias(&data, &bias_buf, hidden).unwrap();
    p.wait().unwrap();
    let got = p.download_f32(&data).unwrap();
    p.free(&data).unwrap();
    p.free(&bias_buf).unwrap();

    oracle::gelu_bias(&mut host, &bias);
    assert!(verify::check_close_f32(&got, &host, 1.0e-4).is_none());
}
