use duckdb::Connection;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::activation::log_softmax::argmax;
use crate::error::{RelunetError, Result};
use crate::eval::driver::{run_occluded, Evaluator};
use crate::query::suite::QuerySuite;

/// Occlusion saliency of one sample: how far the predicted output moves
/// when each input position is replaced by 0.
#[derive(Debug, Clone, PartialEq)]
pub struct SaliencyMap {
    /// Output index predicted for the unmodified sample.
    pub guess: usize,
    /// Largest output value of the unmodified sample.
    pub baseline: f64,
    /// `|occluded[guess] - baseline|` per input position, in input order.
    pub values: Vec<f64>,
}

impl SaliencyMap {
    /// The values laid out in rows of `width`.
    pub fn rows(&self, width: usize) -> Vec<&[f64]> {
        self.values.chunks(width.max(1)).collect()
    }
}

/// Computes the saliency map of `sample` against a single-model database.
///
/// The sample is loaded once through `conn`; the occluded forward passes
/// then fan out over `workers` connections cloned from `conn` on the calling
/// thread. Workers only read.
pub fn saliency_map(conn: &Connection, suite: &QuerySuite, sample: &[f64], workers: usize) -> Result<SaliencyMap> {
    if sample.is_empty() {
        return Err(RelunetError::precondition("saliency needs a non-empty sample"));
    }
    Evaluator::new(conn, suite).evaluate(sample)?;

    let baseline_values: Vec<f64> = run_occluded(conn, suite, None)?.into_iter().map(|r| r.output_value).collect();
    let guess = argmax(&baseline_values)
        .ok_or_else(|| RelunetError::Query("forward pass returned no outputs".into()))?;
    let baseline = baseline_values[guess];

    let positions: Vec<usize> = (1..=sample.len()).collect();
    let workers = workers.clamp(1, positions.len());
    let chunk_size = positions.len().div_ceil(workers);
    let connections = (0..workers).map(|_| conn.try_clone()).collect::<duckdb::Result<Vec<Connection>>>()?;
    info!(workers, positions = positions.len(), guess, "occlusion fan-out");

    let per_worker = connections
        .into_par_iter()
        .zip(positions.par_chunks(chunk_size))
        .map(|(worker_conn, chunk)| {
            chunk
                .iter()
                .map(|&position| {
                    let rows = run_occluded(&worker_conn, suite, Some(position))?;
                    let occluded = rows
                        .get(guess)
                        .ok_or_else(|| RelunetError::Query(format!("no output {guess} for position {position}")))?;
                    Ok((occluded.output_value - baseline).abs())
                })
                .collect::<Result<Vec<f64>>>()
        })
        .collect::<Result<Vec<Vec<f64>>>>()?;

    let values: Vec<f64> = per_worker.into_iter().flatten().collect();
    debug!(max = values.iter().copied().fold(0.0, f64::max), "saliency computed");
    Ok(SaliencyMap { guess, baseline, values })
}
