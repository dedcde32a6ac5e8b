#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Instant;

use llrpij::config::ConvertOptions;
use llrpij::convert::{convert_by_genotype_with, convert_single_with};
use llrpij::histogram::Histogram;
use llrpij::matrix_io::{read_genotypes, read_matrix, write_matrix};
use llrpij::null_hist::{build_null_histogram_family_with, build_null_histogram_with};

#[derive(Parser)]
#[command(
    name = "llrpij",
    version,
    about = "Convert gene-pair log-likelihood ratios into causal-link probabilities",
    long_about = "Calibrates each anchor gene's LLRs against the analytical null distribution \
                  x = -0.5 ln(1 - z1/(z1+z2)), z1 ~ chi2(n1), z2 ~ chi2(n2), and converts them \
                  into probabilities of a real association."
)]
struct Cli {
    /// TOML file with conversion options (see `llrpij default-config`)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct MatrixArgs {
    /// Tab-separated LLR matrix used to calibrate each row (one anchor gene per row)
    #[arg(value_name = "CALIBRATION")]
    calibration: PathBuf,

    /// LLR matrix to convert; defaults to the calibration matrix
    #[arg(long, value_name = "FILE")]
    convert: Option<PathBuf>,

    /// Leave the diagonal element of each row out of its calibration
    #[arg(long)]
    no_diagonal: bool,

    /// Output path for the probability matrix
    #[arg(long, short, value_name = "FILE")]
    output: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert with one null model shared by every row
    #[command(about = "Convert LLRs with a single null model (outputs: probability matrix)")]
    Convert {
        #[command(flatten)]
        matrices: MatrixArgs,

        /// First degrees-of-freedom parameter of the null distribution
        #[arg(long)]
        n1: usize,

        /// Second degrees-of-freedom parameter of the null distribution
        #[arg(long)]
        n2: usize,
    },

    /// Convert with a null model chosen per row from the anchor genotype
    #[command(about = "Convert LLRs with genotype-specific null models (outputs: probability matrix)")]
    ConvertGenotype {
        #[command(flatten)]
        matrices: MatrixArgs,

        /// Tab-separated genotype matrix, one row per anchor gene, values in [0, nv)
        #[arg(long, value_name = "FILE")]
        genotypes: PathBuf,

        /// Number of values a genotype can take
        #[arg(long, default_value = "3")]
        nv: usize,

        /// Offset of the first degrees of freedom: n1 = kv + n1d
        #[arg(long, default_value = "-1", allow_hyphen_values = true)]
        n1d: i64,

        /// Offset of the second degrees of freedom: n2 = ns - kv + n2d
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        n2d: i64,
    },

    /// Print one null density histogram as `lower upper density` lines
    NullHist {
        /// Upper bound of the histogram range [0, dmax)
        #[arg(long)]
        dmax: f64,

        /// Number of real data points the histogram will be compared with
        #[arg(long)]
        nd: usize,

        #[arg(long)]
        n1: usize,

        #[arg(long)]
        n2: usize,
    },

    /// Print the null density histograms for genotype cardinalities 2..=nv
    NullFamily {
        #[arg(long)]
        dmax: f64,

        #[arg(long)]
        nv: usize,

        /// Number of samples
        #[arg(long)]
        ns: usize,

        #[arg(long)]
        nd: usize,

        #[arg(long, default_value = "-1", allow_hyphen_values = true)]
        n1d: i64,

        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        n2d: i64,
    },

    /// Print the default conversion options as TOML
    DefaultConfig,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Cli { config, command } = Cli::parse();

    let result = load_options(config.as_deref()).and_then(|options| match command {
        Commands::Convert { matrices, n1, n2 } => run_convert(&options, &matrices, n1, n2),
        Commands::ConvertGenotype {
            matrices,
            genotypes,
            nv,
            n1d,
            n2d,
        } => run_convert_genotype(&options, &matrices, &genotypes, nv, n1d, n2d),
        Commands::NullHist { dmax, nd, n1, n2 } => {
            let histogram = build_null_histogram_with(&options.null_histogram, dmax, nd, n1, n2)?;
            print_histogram(&histogram);
            Ok(())
        }
        Commands::NullFamily {
            dmax,
            nv,
            ns,
            nd,
            n1d,
            n2d,
        } => {
            let family = build_null_histogram_family_with(
                &options.null_histogram,
                dmax,
                nv,
                ns,
                nd,
                n1d,
                n2d,
            )?;
            for (index, histogram) in family.iter().enumerate() {
                println!("# kv = {}", index + 2);
                print_histogram(histogram);
            }
            Ok(())
        }
        Commands::DefaultConfig => {
            print!("{}", options.to_toml_string()?);
            Ok(())
        }
    });

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn load_options(path: Option<&Path>) -> Result<ConvertOptions, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            log::info!("Loading conversion options from {}", path.display());
            Ok(ConvertOptions::load(path)?)
        }
        None => Ok(ConvertOptions::default()),
    }
}

fn run_convert(
    options: &ConvertOptions,
    matrices: &MatrixArgs,
    n1: usize,
    n2: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let start = Instant::now();
    let d = read_matrix(&matrices.calibration)?;
    let ans = match &matrices.convert {
        Some(path) => {
            let dconv = read_matrix(path)?;
            convert_single_with(options, d.view(), dconv.view(), n1, n2, matrices.no_diagonal)?
        }
        None => convert_single_with(options, d.view(), d.view(), n1, n2, matrices.no_diagonal)?,
    };
    write_matrix(&matrices.output, ans.view())?;
    log::info!(
        "Wrote {} x {} probabilities to {} in {:.2?}",
        ans.nrows(),
        ans.ncols(),
        matrices.output.display(),
        start.elapsed()
    );
    Ok(())
}

fn run_convert_genotype(
    options: &ConvertOptions,
    matrices: &MatrixArgs,
    genotypes: &Path,
    nv: usize,
    n1d: i64,
    n2d: i64,
) -> Result<(), Box<dyn std::error::Error>> {
    let start = Instant::now();
    let d = read_matrix(&matrices.calibration)?;
    let g = read_genotypes(genotypes)?;
    let dconv = match &matrices.convert {
        Some(path) => read_matrix(path)?,
        None => d.clone(),
    };
    let ans = convert_by_genotype_with(
        options,
        d.view(),
        dconv.view(),
        g.view(),
        nv,
        n1d,
        n2d,
        matrices.no_diagonal,
    )?;
    write_matrix(&matrices.output, ans.view())?;
    log::info!(
        "Wrote {} x {} probabilities to {} in {:.2?}",
        ans.nrows(),
        ans.ncols(),
        matrices.output.display(),
        start.elapsed()
    );
    Ok(())
}

fn print_histogram(histogram: &Histogram) {
    for (bin, density) in histogram.values().iter().enumerate() {
        println!(
            "{}\t{}\t{}",
            histogram.ranges()[bin],
            histogram.ranges()[bin + 1],
            density
        );
    }
}
