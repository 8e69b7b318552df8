use std::path::PathBuf;

use anyhow::{Context, Result};
use burn::{data::dataset::Dataset, tensor::TensorData};
use clap::{Args, Parser, Subcommand};
use rand::{Rng, SeedableRng, rngs::StdRng};
use saits_data::{SaitsDatasetConfig, TimeSeriesData, write_safetensors};

#[derive(Parser, Debug)]
#[command(
    name = "saits-data",
    version,
    about = "Build and inspect masked-imputation time-series datasets."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a synthetic dataset with missing values to a safetensors file
    Synth(SynthArgs),
    /// Read a dataset lazily and report how samples get masked
    Inspect(InspectArgs),
}

#[derive(Args, Debug)]
struct SynthArgs {
    #[arg(long)]
    output: PathBuf,
    #[arg(long, default_value_t = 128)]
    samples: usize,
    #[arg(long, default_value_t = 48)]
    steps: usize,
    #[arg(long, default_value_t = 4)]
    features: usize,
    /// Share of values stored as missing
    #[arg(long, default_value_t = 0.1)]
    missing_rate: f64,
    /// Number of label classes, 0 writes no labels
    #[arg(long, default_value_t = 0)]
    classes: i64,
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

#[derive(Args, Debug)]
struct InspectArgs {
    #[arg(long)]
    input: PathBuf,
    #[arg(long, default_value_t = 0.2)]
    rate: f64,
    #[arg(long)]
    no_labels: bool,
    #[arg(long, default_value_t = 10)]
    limit: usize,
    #[arg(long)]
    seed: Option<u64>,
}

fn synth(args: SynthArgs) -> Result<()> {
    anyhow::ensure!(
        (0.0..=1.0).contains(&args.missing_rate),
        "--missing-rate must lie in [0, 1], got {}",
        args.missing_rate
    );

    let mut rng = StdRng::seed_from_u64(args.seed);

    let mut values = Vec::with_capacity(args.samples * args.steps * args.features);
    for _ in 0..args.samples {
        let phase = rng.random::<f32>() * std::f32::consts::TAU;
        for t in 0..args.steps {
            for f in 0..args.features {
                let value = if rng.random_bool(args.missing_rate) {
                    f32::NAN
                } else {
                    (t as f32 * 0.2 + phase + f as f32).sin() + rng.random::<f32>() * 0.1
                };
                values.push(value);
            }
        }
    }

    let x = TensorData::new(values, [args.samples, args.steps, args.features]);
    let y = (args.classes > 0).then(|| {
        let labels = (0..args.samples)
            .map(|_| rng.random_range(0..args.classes))
            .collect::<Vec<i64>>();
        TensorData::new(labels, [args.samples])
    });

    write_safetensors(&args.output, &TimeSeriesData::new(x, y))
        .with_context(|| format!("Cannot write dataset to '{}'", args.output.display()))?;

    tracing::info!(
        output = %args.output.display(),
        samples = args.samples,
        steps = args.steps,
        features = args.features,
        "wrote synthetic dataset"
    );

    Ok(())
}

fn inspect(args: InspectArgs) -> Result<()> {
    let config = SaitsDatasetConfig::new()
        .with_rate(args.rate)
        .with_return_labels(!args.no_labels)
        .with_seed(args.seed);

    let dataset = config
        .init(args.input.as_path())
        .with_context(|| format!("Cannot open dataset '{}'", args.input.display()))?;

    let [steps, features] = dataset.series_shape();
    println!(
        "samples: {}, steps: {steps}, features: {features}, labels: {}",
        dataset.len(),
        dataset.returns_labels()
    );

    let mut observed_total = 0;
    let mut artificial_total = 0;

    for index in 0..dataset.len().min(args.limit) {
        let sample = dataset
            .fetch(index)
            .with_context(|| format!("Cannot fetch sample {index}"))?;

        let observed = count_ones(&sample.observed_mask)?;
        let artificial = count_ones(&sample.artificial_mask)?;
        observed_total += observed;
        artificial_total += artificial;

        let label = sample
            .label
            .map(|label| label.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "#{index}: observed {observed}, artificial {artificial}, label {label}, fields {}",
            sample.num_fields()
        );
    }

    let originally_observed = observed_total + artificial_total;
    if originally_observed > 0 {
        println!(
            "artificial / originally observed: {:.4} (rate {})",
            artificial_total as f64 / originally_observed as f64,
            dataset.rate()
        );
    }

    Ok(())
}

fn count_ones(mask: &TensorData) -> Result<usize> {
    let values = mask
        .to_vec::<f32>()
        .map_err(|e| anyhow::anyhow!("Cannot read mask: {e:?}"))?;

    Ok(values.iter().filter(|&&v| v == 1.0).count())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("saits_data=info".parse()?),
        )
        .init();

    match Cli::parse().command {
        Command::Synth(args) => synth(args),
        Command::Inspect(args) => inspect(args),
    }
}
