//! Piecewise-constant histograms with unequal bin widths.
//!
//! A `Histogram` owns `nbin + 1` strictly increasing edges and `nbin` values.
//! Bin `i` covers the half-open interval `[ranges[i], ranges[i + 1])`. The
//! values are whatever the caller puts there: raw counts while a histogram is
//! being filled, densities (mass divided by width) once it is normalized.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HistogramError {
    #[error("A histogram needs at least 2 bin edges, but {0} were given.")]
    TooFewEdges(usize),

    #[error("Bin edge {index} is not finite ({value}).")]
    NonFiniteEdge { index: usize, value: f64 },

    #[error("Bin edges must be strictly increasing, but edge {index} ({value}) does not exceed its predecessor ({previous}).")]
    NonIncreasingEdges {
        index: usize,
        previous: f64,
        value: f64,
    },

    #[error("Histogram with {expected} bins cannot take {found} values.")]
    ValueCountMismatch { expected: usize, found: usize },

    #[error("Histogram has zero total weight and cannot be normalized to a density.")]
    EmptyHistogram,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    ranges: Vec<f64>,
    values: Vec<f64>,
}

impl Histogram {
    /// Creates a histogram over the given edges with every bin set to zero.
    pub fn from_ranges(ranges: Vec<f64>) -> Result<Self, HistogramError> {
        validate_ranges(&ranges)?;
        let nbin = ranges.len() - 1;
        Ok(Self {
            ranges,
            values: vec![0.0; nbin],
        })
    }

    pub fn with_values(ranges: Vec<f64>, values: Vec<f64>) -> Result<Self, HistogramError> {
        validate_ranges(&ranges)?;
        if values.len() + 1 != ranges.len() {
            return Err(HistogramError::ValueCountMismatch {
                expected: ranges.len() - 1,
                found: values.len(),
            });
        }
        Ok(Self { ranges, values })
    }

    /// Same bins, every value reset to zero.
    pub fn cleared(&self) -> Self {
        Self {
            ranges: self.ranges.clone(),
            values: vec![0.0; self.values.len()],
        }
    }

    /// Number of bins.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn ranges(&self) -> &[f64] {
        &self.ranges
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn lower(&self) -> f64 {
        self.ranges[0]
    }

    pub fn upper(&self) -> f64 {
        self.ranges[self.ranges.len() - 1]
    }

    pub fn bin_width(&self, bin: usize) -> f64 {
        self.ranges[bin + 1] - self.ranges[bin]
    }

    pub fn bin_center(&self, bin: usize) -> f64 {
        0.5 * (self.ranges[bin] + self.ranges[bin + 1])
    }

    pub fn widths(&self) -> impl Iterator<Item = f64> + '_ {
        self.ranges.windows(2).map(|w| w[1] - w[0])
    }

    /// Index of the bin containing `x`, or `None` when `x` lies outside
    /// `[lower, upper)`.
    pub fn find(&self, x: f64) -> Option<usize> {
        if !(x >= self.lower() && x < self.upper()) {
            return None;
        }
        // First edge strictly greater than x, minus one.
        Some(self.ranges.partition_point(|&edge| edge <= x) - 1)
    }

    /// Like [`Histogram::find`], but values below the range map to the first
    /// bin and values at or above it map to the last.
    pub fn find_clamped(&self, x: f64) -> usize {
        match self.find(x) {
            Some(bin) => bin,
            None if x < self.lower() => 0,
            None => self.len() - 1,
        }
    }

    /// Bin value at `x`; zero outside the histogram range.
    pub fn density_at(&self, x: f64) -> f64 {
        self.find(x).map_or(0.0, |bin| self.values[bin])
    }

    /// Adds `weight` to the bin holding `x`, clamping out-of-range values into
    /// the first or last bin.
    pub fn accumulate_clamped(&mut self, x: f64, weight: f64) {
        let bin = self.find_clamped(x);
        self.values[bin] += weight;
    }

    /// Integral of the piecewise-constant function, `Σ value · width`.
    pub fn total_mass(&self) -> f64 {
        self.values
            .iter()
            .zip(self.widths())
            .map(|(v, w)| v * w)
            .sum()
    }

    /// Turns accumulated weights into a density that integrates to one.
    pub fn normalize_to_density(&mut self) -> Result<(), HistogramError> {
        let total: f64 = self.values.iter().sum();
        if !(total > 0.0) {
            return Err(HistogramError::EmptyHistogram);
        }
        // Divide in two steps: `total * width` overflows for extreme ranges.
        for bin in 0..self.values.len() {
            let width = self.bin_width(bin);
            self.values[bin] = self.values[bin] / total / width;
        }
        Ok(())
    }
}

fn validate_ranges(ranges: &[f64]) -> Result<(), HistogramError> {
    if ranges.len() < 2 {
        return Err(HistogramError::TooFewEdges(ranges.len()));
    }
    for (index, &value) in ranges.iter().enumerate() {
        if !value.is_finite() {
            return Err(HistogramError::NonFiniteEdge { index, value });
        }
        if index > 0 && value <= ranges[index - 1] {
            return Err(HistogramError::NonIncreasingEdges {
                index,
                previous: ranges[index - 1],
                value,
            });
        }
    }
    Ok(())
}
