//! Fused bias + GELU activation benchmark.
//!
//! Applies the in-place tanh-approximation GELU (with a bias broadcast along
//! the hidden dimension) `repeat` times over a `batch x seq_len x hidden`
//! tensor, reports the average launch time and a checksum, and verifies the
//! final tensor against the CPU oracle. Inputs come from a fixed-seed
//! generator so runs are reproducible across providers.

use anyhow::{Context, Result};
use lanewise_accel::{oracle, timing, verify};
use lanewise_api::CollectiveProvider;
use log::info;
use std::process;

/// Repeated applications compound, so the float tolerance is looser than the
/// single-kernel one.
const GELU_TOLERANCE: f32 = 1.0e-3;

/// Splitmix-style seed into a 64-bit LCG; uniform doubles in [0, 1).
struct Lcg {
    state: u64,
}

impl Lcg {
    fn new() -> Self {
        Self {
            state: 0x9e37_79b9_7f4a_7c15,
        }
    }

    fn next_uniform(&mut self) -> f64 {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1);
        (self.state >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }
}

fn run(batch: usize, seq_len: usize, hidden: usize, repeat: u32) -> Result<()> {
    let total = batch
        .checked_mul(seq_len)
        .and_then(|n| n.checked_mul(hidden))
        .context("tensor dimensions overflow")?;

    let mut rng = Lcg::new();
    let src: Vec<f32> = (0..total).map(|_| rng.next_uniform() as f32).collect();
    // Integer-valued bias in [-6, 6).
    let bias: Vec<f32> = (0..hidden)
        .map(|_| (rng.next_uniform() * 12.0) as i32 as f32 - 6.0)
        .collect();

    lanewise_accel::initialize_provider()?;
    let p = lanewise_api::provider().context("no execution provider registered")?;
    let dev = p.device_info();
    info!(
        "running on {} ({})",
        dev.name,
        dev.backend.as_deref().unwrap_or("unknown")
    );

    let data = p.upload_f32(&src)?;
    let bias_buf = p.upload_f32(&bias)?;

    let timing = timing::measure_batch(
        repeat,
        || p.enqueue_gelu_bias(&data, &bias_buf, hidden),
        || p.wait(),
    )?;
    println!(
        "Average kernel execution time {:.6} (ms)",
        timing.average_millis()
    );

    let output = p.download_f32(&data)?;
    p.free(&data)?;
    p.free(&bias_buf)?;

    let checksum: f64 = output.iter().map(|&v| f64::from(v)).sum();
    println!("Checksum = {:.6}", checksum / total as f64);

    // The kernel runs in place, so the oracle applies the same number of
    // rounds to the host copy.
    let mut expected = src;
    for _ in 0..repeat {
        oracle::gelu_bias(&mut expected, &bias);
    }
    match verify::check_close_f32(&output, &expected, GELU_TOLERANCE) {
        None => println!("PASS"),
        Some(m) => {
            println!("ITEM: {} cpu: {} gpu: {}", m.index, m.expected, m.observed);
            println!("FAIL");
        }
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 5 {
        eprintln!(
            "Usage: {} <batch> <sequence length> <hidden dimension> <repeat>",
            args[0]
        );
        process::exit(1);
    }

    fn parse<T: std::str::FromStr>(value: &str, what: &str) -> Result<T> {
        value
            .parse::<T>()
            .ok()
            .with_context(|| format!("invalid {what} '{value}'"))
    }

    let parsed = (|| -> Result<(usize, usize, usize, u32)> {
        Ok((
            parse(&args[1], "batch size")?,
            parse(&args[2], "sequence length")?,
            parse(&args[3], "hidden dimension")?,
            parse(&args[4], "repeat count")?,
        ))
    })();
    let (batch, seq_len, hidden, repeat) = match parsed {
        Ok(dims) => dims,
        Err(e) => {
            eprintln!("{e:#}");
            process::exit(1);
        }
    };

    if let Err(e) = run(batch, seq_len, hidden, repeat) {
        eprintln!("benchmark failed: {e:#}");
        process::exit(1);
    }
}
