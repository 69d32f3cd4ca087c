//! Lane-cohort collective benchmark.
//!
//! Runs three scenarios at cohort widths 8, 16, and 32: the XOR-shuffle
//! butterfly reduction, the lane-0 sentinel broadcast, and the shuffle-based
//! block transpose. Each width is timed over a batch of launches (after an
//! untimed warmup batch), read back, and verified against the CPU oracle.

use anyhow::{Context, Result};
use lanewise_accel::cohort::COHORT_WIDTHS;
use lanewise_accel::{oracle, timing, verify};
use lanewise_api::CollectiveProvider;
use log::info;
use std::process;

const BUF_SIZE: usize = 256;
const PATTERN: i32 = 0xDEADBEEFu32 as i32;
const TRANSPOSE_TOTAL: usize = 1 << 27;

fn report_uniform(host: &[i32], expected: i32, width: u32) {
    match verify::check_uniform_i32(host, expected) {
        None => println!("PASS"),
        Some(m) => {
            println!("(sg{width}) ERROR @ {}:  {}", m.index, m.observed);
            println!("FAIL");
        }
    }
}

/// XOR-shuffle butterfly reduction over the lane-index pattern.
fn xor_reduce_scenario(p: &'static dyn CollectiveProvider, repeat: u32) -> Result<()> {
    println!("Broadcast using the shuffle xor function (subgroup sizes 8, 16, and 32) ");
    let out = p.alloc_i32(BUF_SIZE)?;
    for &width in COHORT_WIDTHS.iter() {
        timing::measure_batch(repeat, || p.enqueue_xor_reduce(width, &out), || p.wait())?;
        let timing =
            timing::measure_batch(repeat, || p.enqueue_xor_reduce(width, &out), || p.wait())?;
        println!(
            "Average kernel time (subgroup size = {}): {:.3}(us)",
            width,
            timing.average_micros()
        );
        let host = p.download_i32(&out)?;
        report_uniform(&host, oracle::expected_broadcast(width, 0), width);
    }
    p.free(&out)?;
    Ok(())
}

/// Sentinel broadcast from lane 0 of each cohort.
fn sentinel_broadcast_scenario(p: &'static dyn CollectiveProvider, repeat: u32) -> Result<()> {
    println!("Broadcast using the shuffle function (subgroup sizes 8, 16, and 32) ");
    let out = p.alloc_i32(BUF_SIZE)?;
    for &width in COHORT_WIDTHS.iter() {
        timing::measure_batch(
            repeat,
            || p.enqueue_broadcast(width, PATTERN, &out),
            || p.wait(),
        )?;
        let timing = timing::measure_batch(
            repeat,
            || p.enqueue_broadcast(width, PATTERN, &out),
            || p.wait(),
        )?;
        println!(
            "Average kernel time (subgroup size = {}): {:.3}(us)",
            width,
            timing.average_micros()
        );
        let host = p.download_i32(&out)?;
        report_uniform(&host, oracle::expected_broadcast(width, PATTERN), width);
    }
    p.free(&out)?;
    Ok(())
}

/// Block-local reversal of a large matrix, one shuffle per element.
fn transpose_scenario(p: &'static dyn CollectiveProvider, repeat: u32) -> Result<()> {
    println!("matrix transpose using the shuffle function (subgroup sizes are 8, 16, and 32)");
    let matrix: Vec<f32> = (0..TRANSPOSE_TOTAL).map(|i| i as f32 * 10.0).collect();
    let input = p.upload_f32(&matrix)?;
    let output = p.alloc_f32(TRANSPOSE_TOTAL)?;
    for &width in COHORT_WIDTHS.iter() {
        // One untimed launch absorbs pipeline creation for this width.
        timing::measure_batch(1, || p.enqueue_transpose(width, &input, &output), || p.wait())?;
        let timing = timing::measure_batch(
            repeat,
            || p.enqueue_transpose(width, &input, &output),
            || p.wait(),
        )?;
        println!(
            "Average kernel time (subgroup size = {}): {:.3}(us)",
            width,
            timing.average_micros()
        );
        let host = p.download_f32(&output)?;
        let w = width as usize;
        let expected = oracle::expected_transpose(&matrix, TRANSPOSE_TOTAL / w, w);
        match verify::check_close_f32(&host, &expected, verify::FLOAT_TOLERANCE) {
            None => println!("PASS"),
            Some(m) => {
                println!(
                    "(sg{width}) ITEM: {} cpu: {} gpu: {}",
                    m.index, m.expected, m.observed
                );
                println!("FAIL");
            }
        }
    }
    p.free(&input)?;
    p.free(&output)?;
    Ok(())
}

fn run(repeat: u32, repeat2: u32) -> Result<()> {
    lanewise_accel::initialize_provider()?;
    let p = lanewise_api::provider().context("no execution provider registered")?;
    let dev = p.device_info();
    info!(
        "running on {} ({})",
        dev.name,
        dev.backend.as_deref().unwrap_or("unknown")
    );

    xor_reduce_scenario(p, repeat)?;
    sentinel_broadcast_scenario(p, repeat)?;
    transpose_scenario(p, repeat2)?;
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 3 {
        eprintln!("Usage: {} <repeat> <repeat for matrix transpose>", args[0]);
        process::exit(1);
    }
    let parsed = args[1]
        .parse::<u32>()
        .with_context(|| format!("invalid repeat count '{}'", args[1]))
        .and_then(|repeat| {
            let repeat2 = args[2]
                .parse::<u32>()
                .with_context(|| format!("invalid transpose repeat count '{}'", args[2]))?;
            Ok((repeat, repeat2))
        });
    let (repeat, repeat2) = match parsed {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("{e:#}");
            process::exit(1);
        }
    };

    if let Err(e) = run(repeat, repeat2) {
        eprintln!("benchmark failed: {e:#}");
        process::exit(1);
    }
}
