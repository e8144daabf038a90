use crate::dataset::Frame;
use crate::parallel_processor::WorkerPool;
use anyhow::{Result, bail};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct BenchConfig {
    pub rows: usize,
    pub workers: usize,
    pub column: String,
    pub target: String,
    pub input: Option<PathBuf>,
    pub progress: bool,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            rows: 30_000,
            workers: num_cpus::get(),
            column: "a".to_string(),
            target: "add_col".to_string(),
            input: None,
            progress: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BenchReport {
    pub rows: usize,
    pub workers: usize,
    pub sequential: Duration,
    pub parallel: Duration,
}

/// The per-element transform being benchmarked
pub fn add_one(x: i64) -> i64 {
    x.wrapping_add(1)
}

pub fn sequential_apply<T, U, F>(f: F, column: &[T]) -> Vec<U>
where
    T: Copy,
    F: Fn(T) -> U,
{
    column.iter().copied().map(f).collect()
}

/// Load the frame described by `config`
pub fn load_frame(config: &BenchConfig) -> Result<Frame> {
    match &config.input {
        Some(path) => Frame::from_csv(path, std::slice::from_ref(&config.column)),
        None => Frame::from_range(config.rows),
    }
}

/// Write `add_one(source)` into `target`, once sequentially and once on `pool`,
/// timing both. Fails if the two runs disagree.
pub fn run_benchmark(
    frame: &mut Frame,
    source: &str,
    target: &str,
    pool: &WorkerPool,
) -> Result<BenchReport> {
    let start = Instant::now();
    let sequential_values = sequential_apply(add_one, frame.column(source)?);
    frame.with_column(target, sequential_values.clone())?;
    let sequential = start.elapsed();
    debug!(rows = frame.height(), elapsed = ?sequential, "Sequential apply done");

    let start = Instant::now();
    let parallel_values = pool.map(add_one, frame.column(source)?.to_vec())?;
    frame.with_column(target, parallel_values)?;
    let parallel = start.elapsed();
    debug!(rows = frame.height(), workers = pool.workers(), elapsed = ?parallel, "Parallel apply done");

    if frame.column(target)? != sequential_values.as_slice() {
        bail!("Sequential and parallel results differ for column {}", source);
    }

    Ok(BenchReport {
        rows: frame.height(),
        workers: pool.workers(),
        sequential,
        parallel,
    })
}

/// Run the whole benchmark and print the two timing lines
pub fn run(config: &BenchConfig) -> Result<BenchReport> {
    let mut frame = load_frame(config)?;
    info!(
        rows = frame.height(),
        columns = ?frame.column_names(),
        workers = config.workers,
        "Dataset loaded"
    );

    let pool = WorkerPool::new(config.workers).with_progress(config.progress);
    let report = run_benchmark(&mut frame, &config.column, &config.target, &pool)?;

    println!("sequential apply cost time: {:.6}s", report.sequential.as_secs_f64());
    println!("parallel apply cost time: {:.6}s", report.parallel.as_secs_f64());

    Ok(report)
}
