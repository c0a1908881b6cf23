//! Acquisition-activity boundary detection
//!
//! This module clusters file modification times to find the "relatively"
//! large gaps that separate discrete acquisition activities. What counts as a
//! large gap depends on the session: burst acquisitions make sub-second gaps
//! significant, while slow mapping runs tolerate minutes between files. The
//! detector therefore fits a Gaussian kernel density estimate to the
//! timestamps, selecting its bandwidth by leave-one-out cross-validation over
//! the observed gap range, and reports the density's local minima as
//! activity boundaries.

use crate::error::CatalogError;
use rayon::prelude::*;
use std::path::PathBuf;
use std::time::SystemTime;
use tracing::{debug, info};

/// Number of candidate bandwidths scored during the grid search
const BANDWIDTH_GRID_SIZE: usize = 35;

/// Density evaluation points per distinct timestamp
const GRID_DENSITY: usize = 10;

/// ln(sqrt(2 * pi)), the Gaussian kernel normalization term
const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_7;

/// Cluster the modification times of a list of files into activity
/// boundaries.
///
/// Each file is stat'ed for its mtime (unix seconds); the timestamps are then
/// passed to [`cluster_mtimes`]. A missing file fails the whole call with
/// [`CatalogError::FileNotFound`].
pub fn cluster_filelist_mtimes(filelist: &[PathBuf]) -> Result<Vec<f64>, CatalogError> {
    let mut mtimes = Vec::with_capacity(filelist.len());
    for path in filelist {
        let stat = std::fs::metadata(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CatalogError::FileNotFound(path.clone())
            } else {
                CatalogError::Io(e)
            }
        })?;
        let modified = stat.modified()?;
        // mtimes before the unix epoch clamp to zero
        let secs = modified
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        mtimes.push(secs);
    }
    Ok(cluster_mtimes(&mtimes))
}

/// Find the timestamps that mark transitions between acquisition activities.
///
/// Returns the locations of the local minima of a cross-validated Gaussian
/// KDE fit to the (sorted, deduplicated) timestamps. A single distinct
/// timestamp is returned as the sole boundary. An empty result means the
/// spacing was too uniform to contain any idle gap, and the whole file set
/// belongs to one activity.
pub fn cluster_mtimes(mtimes: &[f64]) -> Vec<f64> {
    info!(files = mtimes.len(), "starting clustering of file mtimes");
    let mut times = mtimes.to_vec();
    times.sort_by(f64::total_cmp);
    // duplicate mtimes would produce degenerate density estimates
    times.dedup();

    if times.len() <= 1 {
        return times;
    }

    let gaps: Vec<f64> = times.windows(2).map(|w| w[1] - w[0]).collect();
    let bandwidth = select_bandwidth(&times, &gaps);
    info!(bandwidth, "bandwidth selected for kernel density estimate");

    let lo = times[0];
    let hi = times[times.len() - 1];
    let n_grid = times.len() * GRID_DENSITY;
    let step = (hi - lo) / (n_grid - 1) as f64;
    let log_density: Vec<f64> = (0..n_grid)
        .map(|i| kde_log_density(&times, bandwidth, lo + i as f64 * step))
        .collect();

    let boundaries: Vec<f64> = local_minima(&log_density)
        .into_iter()
        .map(|i| lo + i as f64 * step)
        .collect();
    info!(
        activities = boundaries.len() + 1,
        "activity boundaries detected"
    );
    boundaries
}

/// Grid-search the KDE bandwidth over the observed gap range.
///
/// Candidates are log-spaced between the smallest and largest sequential gap
/// and scored by total leave-one-out log-likelihood. Scoring is fanned out
/// over rayon; the argmax keeps the first of any tied candidates, so the
/// selection is identical to a sequential evaluation.
fn select_bandwidth(times: &[f64], gaps: &[f64]) -> f64 {
    let min_gap = gaps.iter().copied().fold(f64::INFINITY, f64::min);
    let max_gap = gaps.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let candidates = log_space(min_gap, max_gap, BANDWIDTH_GRID_SIZE);

    let scores: Vec<f64> = candidates
        .par_iter()
        .map(|&bw| loo_log_likelihood(times, bw))
        .collect();

    let mut best = 0;
    for (i, &score) in scores.iter().enumerate().skip(1) {
        if score > scores[best] {
            best = i;
        }
    }
    debug!(
        bandwidth = candidates[best],
        score = scores[best],
        "grid search winner"
    );
    candidates[best]
}

/// `count` points spaced evenly in natural-log space over `[lo, hi]`
fn log_space(lo: f64, hi: f64, count: usize) -> Vec<f64> {
    let ln_lo = lo.ln();
    let step = (hi.ln() - ln_lo) / (count - 1) as f64;
    (0..count).map(|i| (ln_lo + i as f64 * step).exp()).collect()
}

/// Total leave-one-out log-likelihood of a Gaussian KDE with bandwidth `bw`
fn loo_log_likelihood(times: &[f64], bw: f64) -> f64 {
    let n = times.len() as f64;
    let norm = -((n - 1.0).ln() + bw.ln() + LN_SQRT_2PI);
    times
        .iter()
        .enumerate()
        .map(|(i, &x)| {
            let kernels = times
                .iter()
                .enumerate()
                .filter(|&(j, _)| j != i)
                .map(|(_, &y)| gauss_exponent(x, y, bw));
            log_sum_exp(kernels) + norm
        })
        .sum()
}

/// Log-density of the KDE at `x`
fn kde_log_density(times: &[f64], bw: f64, x: f64) -> f64 {
    let n = times.len() as f64;
    let norm = -(n.ln() + bw.ln() + LN_SQRT_2PI);
    log_sum_exp(times.iter().map(|&y| gauss_exponent(x, y, bw))) + norm
}

fn gauss_exponent(x: f64, y: f64, bw: f64) -> f64 {
    let z = (x - y) / bw;
    -0.5 * z * z
}

/// Numerically stable `ln(sum(exp(values)))`
fn log_sum_exp(values: impl Iterator<Item = f64>) -> f64 {
    let values: Vec<f64> = values.collect();
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    let sum: f64 = values.iter().map(|v| (v - max).exp()).sum();
    max + sum.ln()
}

/// Indices of points strictly lower than both neighbors
fn local_minima(curve: &[f64]) -> Vec<usize> {
    (1..curve.len().saturating_sub(1))
        .filter(|&i| curve[i] < curve[i - 1] && curve[i] < curve[i + 1])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;

    #[test]
    fn single_distinct_mtime_is_sole_boundary() {
        let boundaries = cluster_mtimes(&[1_600_000_000.0; 12]);
        assert_eq!(boundaries, vec![1_600_000_000.0]);
    }

    #[test]
    fn two_clusters_yield_one_boundary_in_the_gap() {
        let mtimes = [0.0, 1.0, 2.0, 100.0, 101.0, 102.0];
        let boundaries = cluster_mtimes(&mtimes);
        assert_eq!(boundaries.len(), 1);
        assert!(boundaries[0] > 2.0 && boundaries[0] < 100.0);
    }

    #[test]
    fn duplicate_mtimes_are_deduplicated_before_estimation() {
        let mtimes = [
            0.0, 0.0, 1.0, 1.0, 2.0, 2.0, 100.0, 100.0, 101.0, 101.0, 102.0, 102.0,
        ];
        let boundaries = cluster_mtimes(&mtimes);
        assert_eq!(boundaries.len(), 1);
        assert!(boundaries[0].is_finite());
        assert!(boundaries[0] > 2.0 && boundaries[0] < 100.0);
    }

    #[test]
    fn three_clusters_yield_two_boundaries() {
        let mtimes = [
            0.0, 1.0, 2.0, 500.0, 501.0, 502.0, 1000.0, 1001.0, 1002.0,
        ];
        let boundaries = cluster_mtimes(&mtimes);
        assert_eq!(boundaries.len(), 2);
        assert!(boundaries[0] > 2.0 && boundaries[0] < 500.0);
        assert!(boundaries[1] > 502.0 && boundaries[1] < 1000.0);
    }

    #[test]
    fn uniformly_spaced_pair_has_no_boundary() {
        let boundaries = cluster_mtimes(&[0.0, 60.0]);
        assert!(boundaries.is_empty());
    }

    #[test]
    fn filelist_mtimes_of_a_single_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.dm3");
        File::create(&path).unwrap();

        let boundaries = cluster_filelist_mtimes(&[path]).unwrap();
        assert_eq!(boundaries.len(), 1);
    }

    #[test]
    fn filelist_mtimes_missing_file_errors() {
        let result = cluster_filelist_mtimes(&[PathBuf::from("/no/such/file.dm3")]);
        assert!(matches!(result, Err(CatalogError::FileNotFound(_))));
    }
}
