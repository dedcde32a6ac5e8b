//! # Row-wise LLR to probability conversion
//!
//! Each row of the calibration matrix `d` holds the LLRs of one anchor gene A
//! against every candidate partner. The row's values are an empirical sample
//! from a mixture of null pairs (no causal link) and real pairs, so its density
//! is `f(x) = π0·f0(x) + (1 - π0)·f1(x)` with `f0` the analytical null density.
//! The probability that a pair with LLR `x` is real is one minus the local
//! false discovery rate, `p(x) = 1 - π0·f0(x) / f(x)`.
//!
//! Per row:
//!
//! 1. The calibration values are binned on the null histogram's own bins
//!    (equal null mass per bin), giving the empirical density `f`.
//! 2. `π0` is estimated from the low-LLR bins, where real pairs are rare: the
//!    observed share of values there divided by the null mass there, capped at
//!    one.
//! 3. `p` is computed per non-empty bin and made non-decreasing in LLR with a
//!    count-weighted pool-adjacent-violators fit.
//! 4. The fitted values are placed at the mean LLR of each bin and linearly
//!    interpolated, constant beyond the outermost bins.
//!
//! Rows are independent and are converted in parallel. Every row is computed
//! into its own buffer and nothing reaches the output until all rows succeeded.

use ndarray::parallel::prelude::*;
use ndarray::{Array2, ArrayView1, ArrayView2, ArrayViewMut2, Axis};
use thiserror::Error;

use crate::config::{ConfigError, ConvertOptions};
use crate::histogram::Histogram;
use crate::null_dist::NullModelError;
use crate::null_hist::{build_null_histogram_family_with, build_null_histogram_with};

/// `dmax` sits this far (relatively) above the largest calibration LLR so that
/// the maximum falls inside `[0, dmax)`.
const DMAX_RELATIVE_MARGIN: f64 = 1e-6;

/// Slack when accumulating null mass against `null_mass_cutoff`, so that bins
/// of exactly equal mass are not dropped by rounding.
const NULL_MASS_TOLERANCE: f64 = 1e-9;

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("Matrix '{matrix}' has shape {found:?}, but {expected:?} was expected.")]
    ShapeMismatch {
        matrix: &'static str,
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("Matrix '{matrix}' holds a non-finite value ({value}) at row {row}, column {col}.")]
    NonFiniteValue {
        matrix: &'static str,
        row: usize,
        col: usize,
        value: f64,
    },

    #[error("Row {row} has no calibration values left after excluding the diagonal.")]
    DegenerateRow { row: usize },

    #[error("The probability fit of row {row} is not finite.")]
    NonFiniteFit { row: usize },

    #[error("No calibration LLR is positive, so there is no range to compare with the null.")]
    NoPositiveLlr,

    #[error("Genotype value {value} at row {row}, column {col} is outside [0, {nv}).")]
    InvalidGenotypeValue {
        row: usize,
        col: usize,
        value: u8,
        nv: usize,
    },

    #[error("The genotype of row {row} takes a single value, so its LLRs carry no information.")]
    MonomorphicGenotype { row: usize },

    #[error("Null model construction failed: {0}")]
    NullModel(#[from] NullModelError),

    #[error("Invalid conversion options: {0}")]
    Options(#[from] ConfigError),
}

/// The LLR to probability mapping fitted on one row.
#[derive(Debug, Clone, PartialEq)]
pub struct RowRule {
    knots: Vec<f64>,
    probabilities: Vec<f64>,
    null_fraction: f64,
}

impl RowRule {
    /// Fits the mapping of one row against a null density histogram.
    ///
    /// Returns `None` when `calibration` is empty or no bin holds a usable
    /// density.
    pub fn fit(calibration: &[f64], null: &Histogram, null_mass_cutoff: f64) -> Option<Self> {
        if calibration.is_empty() {
            return None;
        }
        let n = calibration.len() as f64;

        let mut counts = null.cleared();
        // Running means scaled by 1/n so that sums of huge LLRs stay finite.
        let mut scaled_sums = null.cleared();
        for &x in calibration {
            counts.accumulate_clamped(x, 1.0);
            scaled_sums.accumulate_clamped(x, x / n);
        }
        let mut density = counts.clone();
        density.normalize_to_density().ok()?;

        let null_fraction = estimate_null_fraction(counts.values(), n, null, null_mass_cutoff);

        let mut knots = Vec::with_capacity(counts.len());
        let mut raw = Vec::with_capacity(counts.len());
        let mut weights = Vec::with_capacity(counts.len());
        for bin in 0..counts.len() {
            let count = counts.values()[bin];
            let observed = density.values()[bin];
            // A bin whose density underflows carries no usable evidence.
            if count <= 0.0 || !(observed > 0.0 && observed.is_finite()) {
                continue;
            }
            let lfdr = null_fraction * null.values()[bin] / observed;
            if !lfdr.is_finite() {
                continue;
            }
            knots.push(scaled_sums.values()[bin] / (count / n));
            raw.push((1.0 - lfdr).clamp(0.0, 1.0));
            weights.push(count);
        }
        if knots.is_empty() {
            return None;
        }
        let probabilities = pool_adjacent_violators(&raw, &weights);

        Some(Self {
            knots,
            probabilities,
            null_fraction,
        })
    }

    /// Probability that a pair with LLR `x` is a real association.
    pub fn probability(&self, x: f64) -> f64 {
        let last = self.knots.len() - 1;
        let upper = self.knots.partition_point(|&k| k <= x);
        let p = if upper == 0 {
            self.probabilities[0]
        } else if upper > last {
            self.probabilities[last]
        } else {
            let (x0, x1) = (self.knots[upper - 1], self.knots[upper]);
            let (p0, p1) = (self.probabilities[upper - 1], self.probabilities[upper]);
            if x1 > x0 {
                p0 + (x - x0) / (x1 - x0) * (p1 - p0)
            } else {
                p1
            }
        };
        p.clamp(0.0, 1.0)
    }

    /// Whether every knot, fitted probability and the null fraction are finite.
    pub fn is_finite(&self) -> bool {
        self.null_fraction.is_finite()
            && self
                .knots
                .iter()
                .chain(&self.probabilities)
                .all(|v| v.is_finite())
    }

    /// Estimated fraction of null pairs in the row.
    pub fn null_fraction(&self) -> f64 {
        self.null_fraction
    }

    /// Mean LLR of each non-empty calibration bin.
    pub fn knots(&self) -> &[f64] {
        &self.knots
    }

    /// Fitted, non-decreasing probabilities at [`RowRule::knots`].
    pub fn probabilities(&self) -> &[f64] {
        &self.probabilities
    }
}

/// Storey-style estimate of the null fraction from the low-LLR bins.
fn estimate_null_fraction(counts: &[f64], n: f64, null: &Histogram, cutoff: f64) -> f64 {
    let mut low_mass = 0.0;
    let mut low_count = 0.0;
    for (bin, (density, width)) in null.values().iter().zip(null.widths()).enumerate() {
        let mass = density * width;
        if bin > 0 && low_mass + mass > cutoff + NULL_MASS_TOLERANCE {
            break;
        }
        low_mass += mass;
        low_count += counts[bin];
    }
    if low_mass > 0.0 {
        (low_count / (n * low_mass)).min(1.0)
    } else {
        1.0
    }
}

/// Weighted least-squares non-decreasing fit.
fn pool_adjacent_violators(values: &[f64], weights: &[f64]) -> Vec<f64> {
    // (mean, weight, number of pooled entries)
    let mut blocks: Vec<(f64, f64, usize)> = Vec::with_capacity(values.len());
    for (&value, &weight) in values.iter().zip(weights) {
        let mut block = (value, weight, 1usize);
        while let Some(&(mean, pooled_weight, len)) = blocks.last() {
            if mean <= block.0 {
                break;
            }
            blocks.pop();
            let total = pooled_weight + block.1;
            block = (
                (mean * pooled_weight + block.0 * block.1) / total,
                total,
                len + block.2,
            );
        }
        blocks.push(block);
    }
    blocks
        .into_iter()
        .flat_map(|(mean, _, len)| std::iter::repeat_n(mean, len))
        .collect()
}

/// Number of distinct values in one genotype row.
pub fn genotype_cardinality(genotypes: ArrayView1<u8>) -> usize {
    let mut seen = [false; 256];
    let mut distinct = 0;
    for &g in genotypes.iter() {
        if !seen[g as usize] {
            seen[g as usize] = true;
            distinct += 1;
        }
    }
    distinct
}

/// Converts LLRs to probabilities per row with one null model `(n1, n2)` for
/// every row, using default options.
///
/// `d` (`[nrow, nx]`) calibrates the conversion, `dconv` (`[nrow, nd]`) is
/// converted; they may be the same matrix. With `exclude_diagonal`, `d[r, r]`
/// is left out of row `r`'s calibration.
pub fn convert_single(
    d: ArrayView2<f64>,
    dconv: ArrayView2<f64>,
    n1: usize,
    n2: usize,
    exclude_diagonal: bool,
) -> Result<Array2<f64>, ConvertError> {
    convert_single_with(&ConvertOptions::default(), d, dconv, n1, n2, exclude_diagonal)
}

pub fn convert_single_with(
    options: &ConvertOptions,
    d: ArrayView2<f64>,
    dconv: ArrayView2<f64>,
    n1: usize,
    n2: usize,
    exclude_diagonal: bool,
) -> Result<Array2<f64>, ConvertError> {
    options.validate()?;
    if n1 < 1 || n2 < 1 {
        return Err(NullModelError::InvalidDegreesOfFreedom {
            n1: n1 as i64,
            n2: n2 as i64,
        }
        .into());
    }
    check_rows("dconv", d.nrows(), dconv.dim())?;
    if d.nrows() == 0 {
        return Ok(Array2::zeros(dconv.dim()));
    }
    check_finite("dconv", &dconv)?;

    let scan = scan_calibration(&d, exclude_diagonal)?;
    let null = build_null_histogram_with(&options.null_histogram, scan.dmax, scan.nd, n1, n2)?;
    log::info!(
        "Converting {} x {} LLRs with null (n1, n2) = ({n1}, {n2}): {} bins on [0, {:.6}), calibration size {}",
        dconv.nrows(),
        dconv.ncols(),
        null.len(),
        scan.dmax,
        scan.nd
    );

    convert_rows(
        &d,
        &dconv,
        &NullSelection::Shared(&null),
        options.null_mass_cutoff,
        exclude_diagonal,
    )
}

/// Like [`convert_single_with`], writing into `ans` (same shape as `dconv`).
/// `ans` is only written when the whole conversion succeeds.
pub fn convert_single_into(
    options: &ConvertOptions,
    d: ArrayView2<f64>,
    dconv: ArrayView2<f64>,
    mut ans: ArrayViewMut2<f64>,
    n1: usize,
    n2: usize,
    exclude_diagonal: bool,
) -> Result<(), ConvertError> {
    if ans.dim() != dconv.dim() {
        return Err(ConvertError::ShapeMismatch {
            matrix: "ans",
            expected: dconv.dim(),
            found: ans.dim(),
        });
    }
    let converted = convert_single_with(options, d, dconv, n1, n2, exclude_diagonal)?;
    ans.assign(&converted);
    Ok(())
}

/// Converts LLRs to probabilities per row, choosing each row's null model from
/// the cardinality of its anchor genotype, using default options.
///
/// `genotypes` is `[nrow, ns]` with values in `[0, nv)`. A row whose genotype
/// takes `kv` distinct values is compared with the null
/// `(kv + n1d, ns - kv + n2d)`.
pub fn convert_by_genotype(
    d: ArrayView2<f64>,
    dconv: ArrayView2<f64>,
    genotypes: ArrayView2<u8>,
    nv: usize,
    n1d: i64,
    n2d: i64,
    exclude_diagonal: bool,
) -> Result<Array2<f64>, ConvertError> {
    convert_by_genotype_with(
        &ConvertOptions::default(),
        d,
        dconv,
        genotypes,
        nv,
        n1d,
        n2d,
        exclude_diagonal,
    )
}

#[allow(clippy::too_many_arguments)]
pub fn convert_by_genotype_with(
    options: &ConvertOptions,
    d: ArrayView2<f64>,
    dconv: ArrayView2<f64>,
    genotypes: ArrayView2<u8>,
    nv: usize,
    n1d: i64,
    n2d: i64,
    exclude_diagonal: bool,
) -> Result<Array2<f64>, ConvertError> {
    options.validate()?;
    if nv < 2 {
        return Err(NullModelError::InvalidGenotypeCount(nv).into());
    }
    check_rows("dconv", d.nrows(), dconv.dim())?;
    check_rows("genotypes", d.nrows(), genotypes.dim())?;
    let cardinalities = row_cardinalities(&genotypes, nv)?;
    if d.nrows() == 0 {
        return Ok(Array2::zeros(dconv.dim()));
    }
    check_finite("dconv", &dconv)?;

    let scan = scan_calibration(&d, exclude_diagonal)?;
    let ns = genotypes.ncols();
    let family = build_null_histogram_family_with(
        &options.null_histogram,
        scan.dmax,
        nv,
        ns,
        scan.nd,
        n1d,
        n2d,
    )?;
    log::info!(
        "Converting {} x {} LLRs with {} genotype-specific null models (ns = {ns}) on [0, {:.6}), calibration size {}",
        dconv.nrows(),
        dconv.ncols(),
        family.len(),
        scan.dmax,
        scan.nd
    );

    let index = cardinalities.into_iter().map(|kv| kv - 2).collect();
    convert_rows(
        &d,
        &dconv,
        &NullSelection::PerRow {
            family: &family,
            index,
        },
        options.null_mass_cutoff,
        exclude_diagonal,
    )
}

/// Which null histogram each row is compared with.
enum NullSelection<'a> {
    Shared(&'a Histogram),
    PerRow {
        family: &'a [Histogram],
        index: Vec<usize>,
    },
}

impl NullSelection<'_> {
    fn for_row(&self, row: usize) -> &Histogram {
        match self {
            NullSelection::Shared(null) => null,
            NullSelection::PerRow { family, index } => &family[index[row]],
        }
    }
}

struct CalibrationScan {
    dmax: f64,
    /// Smallest number of calibration values in any row.
    nd: usize,
}

/// Validates `d` and derives the histogram bound and the calibration size.
fn scan_calibration(
    d: &ArrayView2<f64>,
    exclude_diagonal: bool,
) -> Result<CalibrationScan, ConvertError> {
    let mut max_value = f64::NEG_INFINITY;
    let mut nd = usize::MAX;
    for (row, values) in d.axis_iter(Axis(0)).enumerate() {
        let mut count = 0usize;
        for (col, &value) in values.iter().enumerate() {
            if exclude_diagonal && col == row {
                continue;
            }
            if !value.is_finite() {
                return Err(ConvertError::NonFiniteValue {
                    matrix: "d",
                    row,
                    col,
                    value,
                });
            }
            max_value = max_value.max(value);
            count += 1;
        }
        if count == 0 {
            return Err(ConvertError::DegenerateRow { row });
        }
        nd = nd.min(count);
    }
    if !(max_value > 0.0) {
        return Err(ConvertError::NoPositiveLlr);
    }
    Ok(CalibrationScan {
        dmax: max_value * (1.0 + DMAX_RELATIVE_MARGIN),
        nd,
    })
}

fn calibration_row(d: &ArrayView2<f64>, row: usize, exclude_diagonal: bool) -> Vec<f64> {
    d.row(row)
        .iter()
        .enumerate()
        .filter(|&(col, _)| !(exclude_diagonal && col == row))
        .map(|(_, &value)| value)
        .collect()
}

fn convert_rows(
    d: &ArrayView2<f64>,
    dconv: &ArrayView2<f64>,
    nulls: &NullSelection<'_>,
    null_mass_cutoff: f64,
    exclude_diagonal: bool,
) -> Result<Array2<f64>, ConvertError> {
    let rows: Vec<Vec<f64>> = dconv
        .axis_iter(Axis(0))
        .into_par_iter()
        .enumerate()
        .map(|(row, targets)| -> Result<Vec<f64>, ConvertError> {
            let calibration = calibration_row(d, row, exclude_diagonal);
            let rule = RowRule::fit(&calibration, nulls.for_row(row), null_mass_cutoff)
                .ok_or(ConvertError::DegenerateRow { row })?;
            if !rule.is_finite() {
                return Err(ConvertError::NonFiniteFit { row });
            }
            log::trace!(
                "Row {row}: null fraction {:.4}, {} knots",
                rule.null_fraction(),
                rule.knots().len()
            );
            Ok(targets.iter().map(|&x| rule.probability(x)).collect())
        })
        .collect::<Result<_, ConvertError>>()?;

    let mut ans = Array2::zeros(dconv.dim());
    for (row, values) in rows.iter().enumerate() {
        ans.row_mut(row).assign(&ArrayView1::from(values.as_slice()));
    }
    Ok(ans)
}

fn check_rows(
    matrix: &'static str,
    nrow: usize,
    found: (usize, usize),
) -> Result<(), ConvertError> {
    if found.0 != nrow {
        return Err(ConvertError::ShapeMismatch {
            matrix,
            expected: (nrow, found.1),
            found,
        });
    }
    Ok(())
}

fn check_finite(matrix: &'static str, values: &ArrayView2<f64>) -> Result<(), ConvertError> {
    for ((row, col), &value) in values.indexed_iter() {
        if !value.is_finite() {
            return Err(ConvertError::NonFiniteValue {
                matrix,
                row,
                col,
                value,
            });
        }
    }
    Ok(())
}

/// Validates genotype values and returns each row's cardinality.
fn row_cardinalities(
    genotypes: &ArrayView2<u8>,
    nv: usize,
) -> Result<Vec<usize>, ConvertError> {
    genotypes
        .axis_iter(Axis(0))
        .enumerate()
        .map(|(row, values)| {
            if let Some((col, &value)) = values
                .iter()
                .enumerate()
                .find(|&(_, &g)| g as usize >= nv)
            {
                return Err(ConvertError::InvalidGenotypeValue {
                    row,
                    col,
                    value,
                    nv,
                });
            }
            let kv = genotype_cardinality(values);
            if kv < 2 {
                return Err(ConvertError::MonomorphicGenotype { row });
            }
            Ok(kv)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{Array1, array};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::{ChiSquared, Distribution};

    fn null_llrs(rng: &mut StdRng, n: usize, n1: usize, n2: usize) -> Vec<f64> {
        let chi1 = ChiSquared::new(n1 as f64).unwrap();
        let chi2 = ChiSquared::new(n2 as f64).unwrap();
        (0..n)
            .map(|_| {
                let z1: f64 = chi1.sample(rng);
                let z2: f64 = chi2.sample(rng);
                0.5 * (1.0 + z1 / z2).ln()
            })
            .collect()
    }

    #[test]
    fn pava_pools_violations() {
        let fitted = pool_adjacent_violators(&[0.1, 0.5, 0.3, 0.9], &[1.0, 1.0, 1.0, 2.0]);
        assert_eq!(fitted.len(), 4);
        assert_relative_eq!(fitted[0], 0.1);
        assert_relative_eq!(fitted[1], 0.4);
        assert_relative_eq!(fitted[2], 0.4);
        assert_relative_eq!(fitted[3], 0.9);

        // Weights pull the pooled mean.
        let fitted = pool_adjacent_violators(&[0.8, 0.2], &[3.0, 1.0]);
        assert_relative_eq!(fitted[0], 0.65, epsilon = 1e-12);
        assert_relative_eq!(fitted[1], 0.65, epsilon = 1e-12);

        let sorted = [0.0, 0.2, 0.2, 0.7];
        assert_eq!(pool_adjacent_violators(&sorted, &[1.0; 4]), sorted.to_vec());
    }

    #[test]
    fn row_rule_interpolates_between_knots() {
        let rule = RowRule {
            knots: vec![1.0, 2.0, 4.0],
            probabilities: vec![0.0, 0.5, 0.9],
            null_fraction: 0.8,
        };
        assert_eq!(rule.probability(-3.0), 0.0);
        assert_eq!(rule.probability(1.0), 0.0);
        assert_relative_eq!(rule.probability(1.5), 0.25);
        assert_relative_eq!(rule.probability(3.0), 0.7);
        assert_eq!(rule.probability(4.0), 0.9);
        assert_eq!(rule.probability(100.0), 0.9);
    }

    #[test]
    fn row_rule_on_null_data_stays_low() {
        let mut rng = StdRng::seed_from_u64(7);
        let values = null_llrs(&mut rng, 2000, 2, 60);
        let dmax = values.iter().cloned().fold(0.0, f64::max) * 1.001;
        let null = crate::null_hist::build_null_histogram(dmax, values.len(), 2, 60).unwrap();
        let rule = RowRule::fit(&values, &null, 0.5).unwrap();

        assert!(rule.null_fraction() > 0.85, "pi0 = {}", rule.null_fraction());
        let mean_p: f64 = values.iter().map(|&x| rule.probability(x)).sum::<f64>() / 2000.0;
        assert!(mean_p < 0.2, "mean probability on pure null data: {mean_p}");
        for w in rule.probabilities().windows(2) {
            assert!(w[1] >= w[0]);
        }
    }

    #[test]
    fn extreme_llrs_stay_in_range() {
        let d = array![[1e308, 1.0, 2.0], [0.5, 1.7e308, 0.1]];
        let p = convert_single(d.view(), d.view(), 1, 10, false).unwrap();
        assert!(
            p.iter().all(|v| (0.0..=1.0).contains(v)),
            "probabilities out of range: {p:?}"
        );

        let null = crate::null_hist::build_null_histogram(1.7e308, 3, 1, 10).unwrap();
        let rule = RowRule::fit(&[1e308, 1.0, 2.0], &null, 0.5).unwrap();
        assert!(rule.is_finite());
        assert!(rule.knots().iter().all(|k| k.is_finite()));
    }

    #[test]
    fn non_finite_rules_are_detected() {
        let rule = RowRule {
            knots: vec![0.5, 1.0],
            probabilities: vec![0.2, f64::NAN],
            null_fraction: 0.9,
        };
        assert!(!rule.is_finite());
    }

    #[test]
    fn row_rule_requires_data() {
        let null = crate::null_hist::build_null_histogram(1.0, 10, 1, 10).unwrap();
        assert!(RowRule::fit(&[], &null, 0.5).is_none());
    }

    #[test]
    fn separates_signal_from_null() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut row = null_llrs(&mut rng, 300, 1, 50);
        let signals: Vec<f64> = (0..100).map(|_| rng.gen_range(0.3..0.6)).collect();
        row.extend_from_slice(&signals);
        let d = Array2::from_shape_vec((1, row.len()), row).unwrap();

        let ans = convert_single(d.view(), d.view(), 1, 50, false).unwrap();
        let p = ans.row(0);
        let null_mean = p.iter().take(300).sum::<f64>() / 300.0;
        let signal_mean = p.iter().skip(300).sum::<f64>() / 100.0;
        assert!(null_mean < 0.3, "null mean {null_mean}");
        assert!(signal_mean > 0.6, "signal mean {signal_mean}");
    }

    #[test]
    fn uniform_row_gives_uniform_output() {
        let d = Array2::from_elem((1, 25), 0.8);
        let ans = convert_single(d.view(), d.view(), 1, 30, false).unwrap();
        let first = ans[[0, 0]];
        assert!((0.0..=1.0).contains(&first));
        assert!(ans.iter().all(|&p| p == first));
    }

    #[test]
    fn diagonal_does_not_affect_its_row() {
        let mut rng = StdRng::seed_from_u64(3);
        let n = 40;
        let d = Array2::from_shape_fn((n, n), |_| rng.gen_range(0.0..1.5));
        let dconv = d.clone();
        let base = convert_single(d.view(), dconv.view(), 2, 30, true).unwrap();

        let mut changed = d.clone();
        changed[[5, 5]] = 1000.0;
        changed[[9, 9]] = 0.0;
        let again = convert_single(changed.view(), dconv.view(), 2, 30, true).unwrap();
        assert_eq!(base, again);

        // Without the exclusion the large diagonal value moves dmax and the
        // bins, so the output is expected to change.
        let kept = convert_single(changed.view(), dconv.view(), 2, 30, false).unwrap();
        assert_ne!(base, kept);
    }

    #[test]
    fn conversion_is_deterministic() {
        let mut rng = StdRng::seed_from_u64(11);
        let d = Array2::from_shape_fn((30, 200), |_| rng.gen_range(0.0..2.0));
        let first = convert_single(d.view(), d.view(), 1, 20, false).unwrap();
        let second = convert_single(d.view(), d.view(), 1, 20, false).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn converts_a_separate_matrix_with_the_row_rule() {
        let mut rng = StdRng::seed_from_u64(5);
        let d = Array2::from_shape_fn((4, 100), |_| rng.gen_range(0.0..1.0));
        let dconv = array![
            [0.0, 0.5, 2.0],
            [-1.0, 0.2, 0.9],
            [0.1, 0.1, 0.1],
            [5.0, 4.0, 3.0]
        ];
        let ans = convert_single(d.view(), dconv.view(), 1, 40, false).unwrap();
        assert_eq!(ans.dim(), (4, 3));
        assert!(ans.iter().all(|p| (0.0..=1.0).contains(p)));
        assert!(ans[[0, 0]] <= ans[[0, 1]] && ans[[0, 1]] <= ans[[0, 2]]);
        assert!(ans[[1, 0]] <= ans[[1, 1]] && ans[[1, 1]] <= ans[[1, 2]]);
        assert_eq!(ans[[2, 0]], ans[[2, 1]]);
        assert!(ans[[3, 2]] <= ans[[3, 0]]);
    }

    #[test]
    fn into_writes_only_on_success() {
        let d = array![[0.1, 0.4, 0.9], [0.3, 0.2, 0.6]];
        let mut ans = Array2::from_elem((2, 3), -1.0);
        convert_single_into(
            &ConvertOptions::default(),
            d.view(),
            d.view(),
            ans.view_mut(),
            1,
            10,
            false,
        )
        .unwrap();
        assert!(ans.iter().all(|p| (0.0..=1.0).contains(p)));

        let mut untouched = Array2::from_elem((2, 3), -1.0);
        let bad = array![[0.1, f64::NAN, 0.9], [0.3, 0.2, 0.6]];
        let err = convert_single_into(
            &ConvertOptions::default(),
            d.view(),
            bad.view(),
            untouched.view_mut(),
            1,
            10,
            false,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConvertError::NonFiniteValue {
                matrix: "dconv",
                row: 0,
                col: 1,
                ..
            }
        ));
        assert!(untouched.iter().all(|&p| p == -1.0));

        let mut wrong = Array2::zeros((2, 2));
        assert!(matches!(
            convert_single_into(
                &ConvertOptions::default(),
                d.view(),
                d.view(),
                wrong.view_mut(),
                1,
                10,
                false
            ),
            Err(ConvertError::ShapeMismatch { matrix: "ans", .. })
        ));
    }

    #[test]
    fn rejects_invalid_inputs() {
        let d = array![[0.1, 0.4], [0.3, 0.2]];
        let short = array![[0.1, 0.4]];
        assert!(matches!(
            convert_single(d.view(), short.view(), 1, 10, false),
            Err(ConvertError::ShapeMismatch { matrix: "dconv", expected: (2, 2), found: (1, 2) })
        ));
        assert!(matches!(
            convert_single(d.view(), d.view(), 0, 10, false),
            Err(ConvertError::NullModel(NullModelError::InvalidDegreesOfFreedom { .. }))
        ));

        let zeros = Array2::<f64>::zeros((2, 3));
        assert!(matches!(
            convert_single(zeros.view(), zeros.view(), 1, 10, false),
            Err(ConvertError::NoPositiveLlr)
        ));

        let inf = array![[0.1, f64::INFINITY], [0.3, 0.2]];
        assert!(matches!(
            convert_single(inf.view(), d.view(), 1, 10, false),
            Err(ConvertError::NonFiniteValue { matrix: "d", row: 0, col: 1, .. })
        ));
        // The same non-finite value on the excluded diagonal is ignored.
        let diag_inf = array![[f64::INFINITY, 0.4], [0.3, 0.2]];
        convert_single(diag_inf.view(), d.view(), 1, 10, true).unwrap();

        let mut options = ConvertOptions::default();
        options.null_mass_cutoff = 1.5;
        assert!(matches!(
            convert_single_with(&options, d.view(), d.view(), 1, 10, false),
            Err(ConvertError::Options(_))
        ));
    }

    #[test]
    fn single_column_without_diagonal_is_degenerate() {
        let d = array![[0.5], [0.7]];
        assert!(matches!(
            convert_single(d.view(), d.view(), 1, 10, true),
            Err(ConvertError::DegenerateRow { row: 0 })
        ));
        // Row 1 lies outside the column range and keeps its value, but row 0
        // is left empty. Without the exclusion both rows are usable.
        let ok = convert_single(d.view(), d.view(), 1, 10, false).unwrap();
        assert_eq!(ok.dim(), (2, 1));
    }

    #[test]
    fn empty_input_converts_to_empty_output() {
        let d = Array2::<f64>::zeros((0, 4));
        let ans = convert_single(d.view(), d.view(), 1, 10, true).unwrap();
        assert_eq!(ans.dim(), (0, 4));
    }

    #[test]
    fn counts_distinct_genotype_values() {
        assert_eq!(genotype_cardinality(Array1::from(vec![0u8, 1, 1, 2, 0]).view()), 3);
        assert_eq!(genotype_cardinality(Array1::from(vec![2u8, 2, 2]).view()), 1);
        assert_eq!(genotype_cardinality(Array1::<u8>::zeros(0).view()), 0);
    }

    #[test]
    fn genotype_rows_use_their_own_null() {
        let mut rng = StdRng::seed_from_u64(19);
        let ns = 30;
        let nrow = 6;
        let d = Array2::from_shape_fn((nrow, 150), |_| rng.gen_range(0.0..0.8));
        // Rows alternate between 2 and 3 distinct genotype values.
        let genotypes = Array2::from_shape_fn((nrow, ns), |(r, s)| {
            if r % 2 == 0 { (s % 2) as u8 } else { (s % 3) as u8 }
        });

        let ans =
            convert_by_genotype(d.view(), d.view(), genotypes.view(), 3, -1, 0, false).unwrap();
        assert!(ans.iter().all(|p| (0.0..=1.0).contains(p)));

        // A row with cardinality 2 must match the single conversion with
        // (n1, n2) = (1, ns - 2).
        let single = convert_single(d.view(), d.view(), 1, ns - 2, false).unwrap();
        assert_eq!(ans.row(0), single.row(0));
        let single3 = convert_single(d.view(), d.view(), 2, ns - 3, false).unwrap();
        assert_eq!(ans.row(1), single3.row(1));
    }

    #[test]
    fn genotype_conversion_rejects_bad_genotypes() {
        let d = array![[0.1, 0.4, 0.8], [0.3, 0.2, 0.9]];
        let out_of_range = array![[0u8, 1, 3], [0, 1, 1]];
        assert!(matches!(
            convert_by_genotype(d.view(), d.view(), out_of_range.view(), 3, -1, 0, false),
            Err(ConvertError::InvalidGenotypeValue { row: 0, col: 2, value: 3, nv: 3 })
        ));
        let monomorphic = array![[0u8, 1, 0], [1, 1, 1]];
        assert!(matches!(
            convert_by_genotype(d.view(), d.view(), monomorphic.view(), 2, -1, 0, false),
            Err(ConvertError::MonomorphicGenotype { row: 1 })
        ));
        let short = array![[0u8, 1, 0]];
        assert!(matches!(
            convert_by_genotype(d.view(), d.view(), short.view(), 2, -1, 0, false),
            Err(ConvertError::ShapeMismatch { matrix: "genotypes", .. })
        ));
        let ok = array![[0u8, 1, 0], [1, 0, 1]];
        assert!(matches!(
            convert_by_genotype(d.view(), d.view(), ok.view(), 1, -1, 0, false),
            Err(ConvertError::NullModel(NullModelError::InvalidGenotypeCount(1)))
        ));
        // ns = 3, kv = 2, n2d = -2 gives n2 = -1.
        assert!(matches!(
            convert_by_genotype(d.view(), d.view(), ok.view(), 2, -1, -2, false),
            Err(ConvertError::NullModel(NullModelError::InvalidDerivedDegreesOfFreedom { .. }))
        ));
    }
}
