//! Null-hypothesis density histograms.
//!
//! One histogram per `(n1, n2)` pair, or one per genotype cardinality when
//! rows of the data carry genotypes with different numbers of distinct values.
//! Histograms are built once and then only read.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::histogram::Histogram;
use crate::null_dist::{
    BinningRule, NullLlrDistribution, NullModelError, unequal_bins_from_null_cdf,
};

/// How bin values of a null histogram are obtained from the distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NullDensityMethod {
    /// Exact bin mass from CDF differences, divided by the bin width.
    #[default]
    Exact,
    /// Density evaluated at each bin centre, then renormalized.
    Midpoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NullHistogramOptions {
    pub density: NullDensityMethod,
    pub binning: BinningRule,
}

/// Builds the null density histogram over `[0, dmax)` with default options.
///
/// `nd` is the number of real data points that will later be compared against
/// this histogram. It only decides the bin count.
pub fn build_null_histogram(
    dmax: f64,
    nd: usize,
    n1: usize,
    n2: usize,
) -> Result<Histogram, NullModelError> {
    build_null_histogram_with(&NullHistogramOptions::default(), dmax, nd, n1, n2)
}

pub fn build_null_histogram_with(
    options: &NullHistogramOptions,
    dmax: f64,
    nd: usize,
    n1: usize,
    n2: usize,
) -> Result<Histogram, NullModelError> {
    if !(dmax.is_finite() && dmax > 0.0) {
        return Err(NullModelError::InvalidBound(dmax));
    }
    let null = NullLlrDistribution::new(n1, n2)?;
    let nbin = options.binning.bin_count(nd);
    let grid = Histogram::from_ranges(unequal_bins_from_null_cdf(dmax, nbin, &null)?)?;

    let values = match options.density {
        NullDensityMethod::Exact => exact_densities(&grid, &null),
        NullDensityMethod::Midpoint => midpoint_densities(&grid, &null)?,
    };
    let histogram = Histogram::with_values(grid.ranges().to_vec(), values)?;

    log::debug!(
        "Built null histogram for (n1, n2) = ({n1}, {n2}): {} bins on [0, {dmax}), nd = {nd}",
        histogram.len()
    );
    Ok(histogram)
}

fn exact_densities(grid: &Histogram, null: &NullLlrDistribution) -> Vec<f64> {
    let total = null.cdf(grid.upper());
    let mut lower_cdf = null.cdf(grid.lower());
    (0..grid.len())
        .map(|bin| {
            let upper_cdf = null.cdf(grid.ranges()[bin + 1]);
            let mass = (upper_cdf - lower_cdf).max(0.0) / total;
            lower_cdf = upper_cdf;
            mass / grid.bin_width(bin)
        })
        .collect()
}

fn midpoint_densities(
    grid: &Histogram,
    null: &NullLlrDistribution,
) -> Result<Vec<f64>, NullModelError> {
    let raw: Vec<f64> = (0..grid.len())
        .map(|bin| null.pdf(grid.bin_center(bin)))
        .collect();
    if let Some(bad) = raw.iter().position(|v| !v.is_finite()) {
        return Err(NullModelError::DegenerateDensity(format!(
            "non-finite density at the centre of bin {bad}"
        )));
    }
    let mass: f64 = raw.iter().zip(grid.widths()).map(|(v, w)| v * w).sum();
    if !(mass > 0.0) {
        return Err(NullModelError::DegenerateDensity(
            "density vanishes on every bin centre".to_string(),
        ));
    }
    Ok(raw.into_iter().map(|v| v / mass).collect())
}

/// Builds the null histograms for genotype cardinalities `kv = 2..=nv`.
///
/// Cardinality `kv` uses `n1 = kv + n1d` and `n2 = ns - kv + n2d` and is
/// stored at index `kv - 2`. If any cardinality yields a non-positive degree of
/// freedom the whole family is rejected before anything is built.
pub fn build_null_histogram_family(
    dmax: f64,
    nv: usize,
    ns: usize,
    nd: usize,
    n1d: i64,
    n2d: i64,
) -> Result<Vec<Histogram>, NullModelError> {
    build_null_histogram_family_with(
        &NullHistogramOptions::default(),
        dmax,
        nv,
        ns,
        nd,
        n1d,
        n2d,
    )
}

pub fn build_null_histogram_family_with(
    options: &NullHistogramOptions,
    dmax: f64,
    nv: usize,
    ns: usize,
    nd: usize,
    n1d: i64,
    n2d: i64,
) -> Result<Vec<Histogram>, NullModelError> {
    if nv < 2 {
        return Err(NullModelError::InvalidGenotypeCount(nv));
    }
    if !(dmax.is_finite() && dmax > 0.0) {
        return Err(NullModelError::InvalidBound(dmax));
    }

    let params = (2..=nv)
        .map(|kv| family_degrees_of_freedom(kv, ns, n1d, n2d))
        .collect::<Result<Vec<_>, _>>()?;

    let family = params
        .into_par_iter()
        .map(|(n1, n2)| build_null_histogram_with(options, dmax, nd, n1, n2))
        .collect::<Result<Vec<_>, _>>()?;

    log::debug!(
        "Built null histogram family for nv = {nv}, ns = {ns} (n1d = {n1d}, n2d = {n2d})"
    );
    Ok(family)
}

/// Degrees of freedom `(kv + n1d, ns - kv + n2d)` for one genotype cardinality.
pub fn family_degrees_of_freedom(
    kv: usize,
    ns: usize,
    n1d: i64,
    n2d: i64,
) -> Result<(usize, usize), NullModelError> {
    let n1 = kv as i64 + n1d;
    let n2 = ns as i64 - kv as i64 + n2d;
    if n1 < 1 || n2 < 1 {
        return Err(NullModelError::InvalidDerivedDegreesOfFreedom { kv, n1, n2 });
    }
    Ok((n1 as usize, n2 as usize))
}
