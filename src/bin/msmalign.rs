//! msmalign CLI: fit, apply and evaluate surface alignments with the MSM registration tool.

use clap::{Args, Parser, Subcommand};
use flexi_logger::Logger;
use log::info;

use std::fs;
use std::path::PathBuf;

use msmalign::packager::{contrast_array, read_contrast_maps};
use msmalign::{
    Alignment, GiftiImage, Iterations, LambdaSweep, MsmModel, RegistrationConfig, SmoothnessSweep, ToolEnvironment,
};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "msmalign")]
#[command(about = "Align cortical surface contrast maps between subjects with MSM")]
#[command(version)]
struct Cli {
    /// Log debug messages.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit an alignment and save the transformed mesh.
    Fit {
        #[command(flatten)]
        pair: PairArgs,

        #[command(flatten)]
        reg: RegistrationArgs,

        /// Path to write the transformed mesh (GIFTI).
        #[arg(long)]
        model: PathBuf,

        /// Run only the first resolution level of the tool.
        #[arg(long)]
        debug: bool,
    },

    /// Apply a saved alignment to a contrast map.
    Transform {
        /// Transformed mesh written by `fit`.
        #[arg(long)]
        model: PathBuf,

        /// Mesh the alignment was fitted on.
        #[arg(long)]
        mesh: PathBuf,

        /// Contrast map (GIFTI) of the source subject.
        #[arg(long)]
        input: PathBuf,

        /// Path to write the transformed contrast map (GIFTI).
        #[arg(long)]
        out: PathBuf,
    },

    /// Score a saved alignment: mean row-wise Pearson correlation, higher is better.
    Score {
        /// Transformed mesh written by `fit`.
        #[arg(long)]
        model: PathBuf,

        #[command(flatten)]
        pair: PairArgs,
    },

    /// Fit and score one alignment per regularization strength.
    SweepLambda {
        #[command(flatten)]
        sweep: SweepArgs,
    },

    /// Fit and score one alignment per input smoothing.
    SweepSmoothness {
        #[command(flatten)]
        sweep: SweepArgs,
    },

    /// Print the effective registration configuration.
    Config {
        #[command(flatten)]
        reg: RegistrationArgs,
    },
}

#[derive(Debug, Clone, Args)]
struct PairArgs {
    /// Mesh (GIFTI) both subjects' contrast maps live on.
    #[arg(long)]
    mesh: PathBuf,

    /// Contrast map files (GIFTI) of the source subject.
    #[arg(long, num_args = 1.., required = true)]
    source: Vec<PathBuf>,

    /// Contrast map files (GIFTI) of the target subject, in the same order as the source files.
    #[arg(long, num_args = 1.., required = true)]
    target: Vec<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct RegistrationArgs {
    /// Configuration file to start from. Defaults to the built-in configuration.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Start from the default configuration shipped with the tool.
    #[arg(long, conflicts_with = "config")]
    installed_config: bool,

    /// Regularization strength (lambda) for every stage.
    #[arg(long)]
    epsilon: Option<f64>,

    /// Iterations, either one number for every stage or a per-stage list such as "5,2,3,4".
    #[arg(long)]
    iterations: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct SweepArgs {
    #[command(flatten)]
    pair: PairArgs,

    #[command(flatten)]
    reg: RegistrationArgs,

    /// Parameter values to try.
    #[arg(long, num_args = 1.., required = true, value_delimiter = ',')]
    values: Vec<f64>,

    /// Fraction of the contrast maps held out for scoring.
    #[arg(long, default_value = "0.2")]
    test_fraction: f64,

    #[arg(long, default_value = "0")]
    seed: u64,

    /// Directory for the train/test split and one fitted model per value. Reused on later runs.
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Path to write the results (JSON). Printed to stdout if omitted.
    #[arg(long)]
    out: Option<PathBuf>,
}

fn registration_config(args: &RegistrationArgs) -> CliResult<RegistrationConfig> {
    let mut config = match (&args.config, args.installed_config) {
        (Some(path), _) => RegistrationConfig::from_file(path)?,
        (None, true) => ToolEnvironment::discover()?.load_default_config()?,
        (None, false) => RegistrationConfig::default(),
    };
    if let Some(epsilon) = args.epsilon {
        config = config.with_epsilon(epsilon);
    }
    if let Some(it) = &args.iterations {
        let iterations = match it.parse::<u32>() {
            Ok(n) => Iterations::Uniform(n),
            Err(_) => Iterations::PerStage(it.clone()),
        };
        config = config.with_iterations(&iterations)?;
    }
    Ok(config)
}

fn write_results(json: &str, out: &Option<PathBuf>) -> CliResult<()> {
    match out {
        Some(path) => {
            fs::write(path, json)?;
            info!("Wrote results to {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn run(cli: Cli) -> CliResult<()> {
    let verbose = cli.verbose;
    if let Commands::Config { reg } = &cli.command {
        println!("{}", registration_config(reg)?.render());
        return Ok(());
    }
    let tool_env = ToolEnvironment::discover()?;

    match cli.command {
        Commands::Fit {
            pair,
            reg,
            model,
            debug,
        } => {
            let config = registration_config(&reg)?;
            let mut msm = MsmModel::new(tool_env).with_config(config).verbose(verbose).debug(debug);
            msm.fit_files(&pair.source, &pair.target, &pair.mesh)?;
            msm.save_model(&model)?;
        }
        Commands::Transform { model, mesh, input, out } => {
            let mut msm = MsmModel::new(tool_env);
            msm.load_model(&model, &mesh)?;
            let values = msm.transform_file(&input)?;
            let coordsys = msm.fitted().map(|f| f.coordsys.clone()).unwrap_or_default();

            let mut img = GiftiImage::new();
            img.add_data_array(contrast_array(values.to_vec(), &coordsys));
            img.to_file(&out)?;
            info!("Wrote transformed contrast map to {}", out.display());
        }
        Commands::Score { model, pair } => {
            let mut msm = MsmModel::new(tool_env);
            msm.load_model(&model, &pair.mesh)?;
            let source = read_contrast_maps(&pair.source)?;
            let target = read_contrast_maps(&pair.target)?;
            println!("{}", msm.score(source.view(), target.view())?);
        }
        Commands::SweepLambda { sweep } => {
            let config = registration_config(&sweep.reg)?;
            let source = read_contrast_maps(&sweep.pair.source)?;
            let target = read_contrast_maps(&sweep.pair.target)?;
            let lambda = LambdaSweep {
                config,
                epsilons: sweep.values.clone(),
                test_fraction: sweep.test_fraction,
                seed: sweep.seed,
                model_dir: sweep.model_dir.clone(),
            };
            let points = lambda.run(source.view(), target.view(), &sweep.pair.mesh, |config| {
                MsmModel::new(tool_env.clone()).with_config(config).verbose(verbose)
            })?;
            write_results(&msmalign::sweep::to_json(&points)?, &sweep.out)?;
        }
        Commands::SweepSmoothness { sweep } => {
            let config = registration_config(&sweep.reg)?;
            let source = read_contrast_maps(&sweep.pair.source)?;
            let target = read_contrast_maps(&sweep.pair.target)?;
            let smoothness = SmoothnessSweep {
                config,
                sigmas: sweep.values.clone(),
                test_fraction: sweep.test_fraction,
                seed: sweep.seed,
                model_dir: sweep.model_dir.clone(),
            };
            let points = smoothness.run(source.view(), target.view(), &sweep.pair.mesh, |config| {
                MsmModel::new(tool_env.clone()).with_config(config).verbose(verbose)
            })?;
            write_results(&msmalign::sweep::to_json(&points)?, &sweep.out)?;
        }
        Commands::Config { .. } => {}
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "info" };
    let _logger = match Logger::try_with_str(level).and_then(|logger| logger.start()) {
        Ok(handle) => Some(handle),
        Err(e) => {
            eprintln!("Logger initialization failed with {}", e);
            None
        }
    };

    if let Err(e) = run(cli) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
