//! # Null distribution of the LLR statistic
//!
//! Under the null hypothesis the statistic is
//!
//! `x = -0.5 * ln(1 - z1 / (z1 + z2))`, with `z1 ~ χ²(n1)` and `z2 ~ χ²(n2)`.
//!
//! The ratio `b = z1 / (z1 + z2)` follows `Beta(n1 / 2, n2 / 2)`, so the CDF
//! and density of `x` come straight from the Beta distribution through the
//! change of variables `b = 1 - exp(-2x)`:
//!
//! - `F(x) = I_b(n1 / 2, n2 / 2)`
//! - `f(x) = 2 exp(-2x) · beta_pdf(b)`
//!
//! This module also owns the rule that turns a data count into a bin count and
//! the construction of unequal bin edges from the null CDF.

use serde::{Deserialize, Serialize};
use statrs::distribution::{Beta, Continuous, ContinuousCDF};
use thiserror::Error;

use crate::histogram::HistogramError;

/// Bisection steps when inverting the CDF. Enough to halve a bracket as wide
/// as `f64::MAX` down to a single ulp; the loop stops early once the midpoint
/// no longer moves.
const QUANTILE_MAX_ITER: usize = 2200;

/// Upper limit on the number of bins of any null histogram.
pub const MAX_HISTOGRAM_BINS: usize = 1_000_000;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NullModelError {
    #[error("Histogram upper bound must be finite and positive, but was {0}.")]
    InvalidBound(f64),

    #[error("Null degrees of freedom must both be at least 1, but were n1={n1}, n2={n2}.")]
    InvalidDegreesOfFreedom { n1: i64, n2: i64 },

    #[error("Genotypes must be able to take at least 2 values, but nv={0}.")]
    InvalidGenotypeCount(usize),

    #[error(
        "Genotype cardinality {kv} yields non-positive null degrees of freedom (n1={n1}, n2={n2}); check ns and the n1d/n2d offsets."
    )]
    InvalidDerivedDegreesOfFreedom { kv: usize, n1: i64, n2: i64 },

    #[error("The null distribution has no probability mass below dmax={dmax}.")]
    EmptyNullSupport { dmax: f64 },

    #[error("{nbin} histogram bins were requested, but at most {limit} are supported.")]
    TooManyBins { nbin: usize, limit: usize },

    #[error("The null density could not be evaluated on the histogram bins: {0}")]
    DegenerateDensity(String),

    #[error("Failed to construct the underlying Beta distribution: {0}")]
    Distribution(String),

    #[error("Invalid histogram layout: {0}")]
    Histogram(#[from] HistogramError),
}

/// Null distribution of the transformed chi-squared ratio for fixed `(n1, n2)`.
#[derive(Debug, Clone)]
pub struct NullLlrDistribution {
    n1: usize,
    n2: usize,
    beta: Beta,
}

impl NullLlrDistribution {
    pub fn new(n1: usize, n2: usize) -> Result<Self, NullModelError> {
        if n1 < 1 || n2 < 1 {
            return Err(NullModelError::InvalidDegreesOfFreedom {
                n1: n1 as i64,
                n2: n2 as i64,
            });
        }
        let beta = Beta::new(0.5 * n1 as f64, 0.5 * n2 as f64)
            .map_err(|e| NullModelError::Distribution(e.to_string()))?;
        Ok(Self { n1, n2, beta })
    }

    pub fn degrees_of_freedom(&self) -> (usize, usize) {
        (self.n1, self.n2)
    }

    /// `P(X <= x)`.
    pub fn cdf(&self, x: f64) -> f64 {
        if x <= 0.0 {
            return 0.0;
        }
        self.beta.cdf(beta_argument(x))
    }

    /// Density of `X` at `x`; zero for negative `x`.
    pub fn pdf(&self, x: f64) -> f64 {
        if x < 0.0 {
            return 0.0;
        }
        2.0 * (-2.0 * x).exp() * self.beta.pdf(beta_argument(x))
    }

    /// Smallest `x` in `[0, upper]` with `F(x) >= p`, found by bisection.
    ///
    /// Targets at or above `F(upper)` return `upper`.
    pub fn quantile_within(&self, p: f64, upper: f64) -> f64 {
        if p <= 0.0 {
            return 0.0;
        }
        let (mut lo, mut hi) = (0.0_f64, upper);
        for _ in 0..QUANTILE_MAX_ITER {
            let mid = 0.5 * (lo + hi);
            if mid <= lo || mid >= hi {
                break;
            }
            if self.cdf(mid) < p {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        hi
    }
}

/// `1 - exp(-2x)` without cancellation for small `x`.
#[inline]
fn beta_argument(x: f64) -> f64 {
    -(-2.0 * x).exp_m1()
}

/// Chooses how many histogram bins a data set of a given size supports.
///
/// `nbin = ceil(factor · nd^(1/3))`, clamped to `[min_bins, max_bins]`. The
/// cube-root growth is the usual bias/variance balance for density
/// histograms; with the default factor of 2 this is the Rice rule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinningRule {
    pub factor: f64,
    pub min_bins: usize,
    pub max_bins: usize,
}

impl Default for BinningRule {
    fn default() -> Self {
        Self {
            factor: 2.0,
            min_bins: 4,
            max_bins: 1000,
        }
    }
}

impl BinningRule {
    pub fn bin_count(&self, nd: usize) -> usize {
        let raw = (self.factor * (nd as f64).cbrt()).ceil();
        let raw = if raw.is_finite() && raw > 0.0 {
            raw as usize
        } else {
            0
        };
        raw.clamp(self.min_bins, self.max_bins.max(self.min_bins))
    }
}

/// Builds histogram edges over `[0, dmax)` so that every bin carries the same
/// null probability.
///
/// Edge `k` is the `k / nbin · F(dmax)` quantile of the null distribution.
/// Bins therefore shrink where the null density is high and grow as the CDF
/// flattens. Interior edges that coincide in floating point are merged, so the
/// result may have fewer than `nbin` bins but is always strictly increasing.
pub fn unequal_bins_from_null_cdf(
    dmax: f64,
    nbin: usize,
    null: &NullLlrDistribution,
) -> Result<Vec<f64>, NullModelError> {
    if !(dmax.is_finite() && dmax > 0.0) {
        return Err(NullModelError::InvalidBound(dmax));
    }
    let total = null.cdf(dmax);
    if !(total > 0.0) {
        return Err(NullModelError::EmptyNullSupport { dmax });
    }
    if nbin > MAX_HISTOGRAM_BINS {
        return Err(NullModelError::TooManyBins {
            nbin,
            limit: MAX_HISTOGRAM_BINS,
        });
    }
    let nbin = nbin.max(1);

    let mut edges = Vec::with_capacity(nbin + 1);
    edges.push(0.0);
    for k in 1..nbin {
        let target = total * k as f64 / nbin as f64;
        let edge = null.quantile_within(target, dmax);
        let previous = edges[edges.len() - 1];
        if edge > previous && edge < dmax {
            edges.push(edge);
        }
    }
    edges.push(dmax);

    log::debug!(
        "Null CDF bins for (n1, n2) = {:?}: requested {}, built {} over [0, {})",
        null.degrees_of_freedom(),
        nbin,
        edges.len() - 1,
        dmax
    );
    Ok(edges)
}
