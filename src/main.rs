//! GAN-CLS text-to-image synthesis
//!
//! Main entry point providing CLI interface for:
//! - Training the conditional GAN
//! - Rendering sample grids from held-out captions
//! - Inspecting checkpoints

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use rust_gancls_text2image::{
    data::DatasetProvider,
    model::GanCls,
    training::{SampleGrid, Trainer},
    utils::{Config, PngGridWriter, SampleWriter},
    TextImageDataset,
};

/// Text-to-image synthesis with a matching-aware conditional GAN
#[derive(Parser)]
#[command(name = "gancls")]
#[command(version = "0.1.0")]
#[command(about = "Train and sample a GAN-CLS text-to-image model")]
struct Cli {
    /// Path to configuration file (.json or .toml)
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Verbosity level
    #[arg(short, long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train the model, resuming from the latest checkpoint
    Train {
        /// Dataset manifest (overrides data.manifest_path)
        #[arg(short, long)]
        manifest: Option<PathBuf>,

        /// Train on N random examples instead of a manifest
        #[arg(long)]
        synthetic: Option<usize>,

        /// Number of epochs (overrides training.epoch)
        #[arg(short, long)]
        epochs: Option<usize>,
    },

    /// Render a sample grid from held-out captions
    Generate {
        /// Output PNG path
        #[arg(short, long)]
        output: PathBuf,

        /// Number of samples (defaults to training.sample_num)
        #[arg(short, long)]
        num: Option<usize>,

        /// First held-out example to use
        #[arg(long, default_value = "0")]
        offset: usize,

        /// Dataset manifest (overrides data.manifest_path)
        #[arg(short, long)]
        manifest: Option<PathBuf>,

        /// Use N random held-out examples instead of a manifest
        #[arg(long)]
        synthetic: Option<usize>,
    },

    /// List checkpoints of the configured model
    Checkpoints,

    /// Initialize default configuration file
    Init {
        /// Output configuration file path
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = match cli.verbosity.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Train {
            manifest,
            synthetic,
            epochs,
        } => {
            train_model(&cli.config, manifest, synthetic, epochs)?;
        }
        Commands::Generate {
            output,
            num,
            offset,
            manifest,
            synthetic,
        } => {
            generate_samples(&cli.config, &output, num, offset, manifest, synthetic)?;
        }
        Commands::Checkpoints => {
            list_checkpoints(&cli.config)?;
        }
        Commands::Init { output } => {
            init_config(&output)?;
        }
    }

    Ok(())
}

/// Load the configuration file, falling back to defaults when absent
fn load_config(path: &Path) -> Result<Config> {
    let config = if path.exists() {
        Config::load(path)?
    } else {
        info!("Config file not found, using defaults");
        Config::default()
    };
    config.validate()?;
    Ok(config)
}

/// Dataset from `--synthetic`, `--manifest` or the configured manifest
fn load_dataset(
    config: &Config,
    manifest: Option<PathBuf>,
    synthetic: Option<usize>,
) -> Result<TextImageDataset> {
    let size = config.model.output_size as usize;
    let c_dim = config.model.c_dim as usize;

    if let Some(n) = synthetic {
        info!("Generating {} random training examples", n);
        return Ok(TextImageDataset::synthetic(
            config.data.dataset_name.clone(),
            n,
            config.training.sample_num,
            [size, size, c_dim],
            5,
            config.model.embed_dim as usize,
            config.data.seed,
        )?);
    }

    let Some(path) = manifest.or_else(|| config.data.manifest_path.clone()) else {
        bail!("No dataset given: pass --manifest, --synthetic or set data.manifest_path");
    };
    Ok(TextImageDataset::from_manifest(
        path,
        size as u32,
        c_dim,
        config.data.seed,
    )?)
}

/// Train the GAN-CLS model
fn train_model(
    config_path: &Path,
    manifest: Option<PathBuf>,
    synthetic: Option<usize>,
    epochs: Option<usize>,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(epochs) = epochs {
        config.training.epoch = epochs;
    }

    let ctx = config.context();
    info!("Using device: {:?}", ctx.device());

    let mut dataset = load_dataset(&config, manifest, synthetic)?;
    info!(
        "Dataset {}: {} training, {} held-out examples",
        dataset.name(),
        dataset.num_train_examples(),
        dataset.num_test_examples()
    );

    let mut model = GanCls::new(&ctx, config.generator_config(), config.discriminator_config());
    let mut trainer = Trainer::new(
        config.training_config(),
        ctx,
        config.checkpoint_manager_for(dataset.name()),
        PngGridWriter,
    );

    trainer.train(&mut model, &mut dataset)?;

    let metrics = trainer.metrics();
    info!(
        "Training complete at step {}. Final G_loss: {:.4}, D_loss: {:.4}",
        trainer.step(),
        metrics.latest_gen_loss().unwrap_or(0.0),
        metrics.latest_disc_loss().unwrap_or(0.0)
    );

    Ok(())
}

/// Render samples from the latest checkpoint
fn generate_samples(
    config_path: &Path,
    output: &Path,
    num: Option<usize>,
    offset: usize,
    manifest: Option<PathBuf>,
    synthetic: Option<usize>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let ctx = config.context();

    let mut dataset = load_dataset(&config, manifest, synthetic)?;
    let mut model = GanCls::new(&ctx, config.generator_config(), config.discriminator_config());

    let checkpoints = config.checkpoint_manager_for(dataset.name());
    let (found, step) = checkpoints.load(&mut model)?;
    if !found {
        bail!("No checkpoint found in {}", checkpoints.model_dir().display());
    }

    let num = num.unwrap_or(config.training.sample_num);
    let grid = SampleGrid::from_dataset(&ctx, &mut dataset, num, offset, model.z_dim())?;
    grid.log_captions();

    let images = grid.render(&model)?;
    PngGridWriter.write(&images, output)?;

    info!(
        "Saved {} samples from step {} to {}",
        grid.len(),
        step,
        output.display()
    );
    Ok(())
}

/// Print every checkpoint of the configured model
fn list_checkpoints(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let checkpoints = config.checkpoint_manager();
    let entries = checkpoints.list()?;

    if entries.is_empty() {
        info!("No checkpoints in {}", checkpoints.model_dir().display());
        return Ok(());
    }

    for (step, prefix, meta) in entries {
        match meta {
            Some(meta) => info!(
                "step {:>7}  {}  d_loss: {:.4}  g_loss: {:.4}  ({})",
                step,
                meta.timestamp,
                meta.d_loss,
                meta.g_loss,
                prefix.display()
            ),
            None => info!("step {:>7}  ({})", step, prefix.display()),
        }
    }
    Ok(())
}

/// Initialize default configuration file
fn init_config(output_path: &Path) -> Result<()> {
    let config = Config::default();
    config.save(output_path)?;

    info!("Created default configuration at {}", output_path.display());
    Ok(())
}
