#![deny(dead_code)]
#![deny(unused_imports)]
//! Conversion of gene-pair log-likelihood ratios into probabilities of a
//! causal link, calibrated against the analytical null distribution of the
//! LLR statistic one anchor gene at a time.

pub mod config;
pub mod convert;
pub mod histogram;
pub mod matrix_io;
pub mod null_dist;
pub mod null_hist;

pub use config::{ConfigError, ConvertOptions};
pub use convert::{
    ConvertError, RowRule, convert_by_genotype, convert_by_genotype_with, convert_single,
    convert_single_into, convert_single_with, genotype_cardinality,
};
pub use histogram::{Histogram, HistogramError};
pub use null_dist::{
    BinningRule, MAX_HISTOGRAM_BINS, NullLlrDistribution, NullModelError,
    unequal_bins_from_null_cdf,
};
pub use null_hist::{
    NullDensityMethod, NullHistogramOptions, build_null_histogram, build_null_histogram_family,
    build_null_histogram_family_with, build_null_histogram_with, family_degrees_of_freedom,
};
