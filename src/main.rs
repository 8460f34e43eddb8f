//! Convnet Ensemble CLI
//!
//! Trains the eight member classifiers and the averaging ensemble on a
//! cats-vs-dogs image folder, and inspects architectures and data.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use convnet_ensemble::backend::{backend_name, default_device, TrainingBackend};
use convnet_ensemble::dataset::{self, CursorPolicy, ImageFolder};
use convnet_ensemble::model::ensemble::tail_summary;
use convnet_ensemble::model::spec::{print_summary, FeatureShape};
use convnet_ensemble::model::{classifier_specs, model_zoo};
use convnet_ensemble::report::write_diagrams;
use convnet_ensemble::training::{run_pipeline, RunConfig};
use convnet_ensemble::utils::logging::{init_logging, LogConfig};
use convnet_ensemble::utils::{format_duration, format_number};
use convnet_ensemble::IMAGE_SIZE;

/// Cats vs. dogs convnet ensemble
///
/// Trains eight convolutional classifiers, averages them into one ensemble
/// with a trainable dense tail, and trains that ensemble too.
#[derive(Parser, Debug)]
#[command(name = "convnet_ensemble")]
#[command(version)]
#[command(about = "Cats vs. dogs convnet ensemble training with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train the eight classifiers and the ensemble
    Train {
        /// Base directory holding train/ and validation/
        #[arg(short, long, default_value = "data/cats_and_dogs_filtered")]
        data_dir: PathBuf,

        /// Training split (defaults to <data-dir>/train)
        #[arg(long)]
        train_dir: Option<PathBuf>,

        /// Validation split (defaults to <data-dir>/validation)
        #[arg(long)]
        validation_dir: Option<PathBuf>,

        /// Output directory (defaults to output/ensemble_<timestamp>)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Run configuration JSON; command-line flags override it
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Epochs per run
        #[arg(short, long)]
        epochs: Option<usize>,

        /// Training batches per epoch
        #[arg(long)]
        steps_per_epoch: Option<usize>,

        /// Validation batches per epoch
        #[arg(long)]
        validation_steps: Option<usize>,

        /// Images per batch
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Random seed for shuffling
        #[arg(long)]
        seed: Option<u64>,

        /// Let each run continue from the previous run's stream position
        #[arg(long, default_value = "false")]
        carry_cursor: bool,

        /// Keep member parameters fixed while training the ensemble
        #[arg(long, default_value = "false")]
        freeze_members: bool,

        /// Decode all images into memory before training
        #[arg(long, default_value = "false")]
        preload: bool,
    },

    /// Print the layer table of every architecture and of the ensemble tail
    Summary,

    /// Show image counts per split and class
    Stats {
        /// Base directory holding train/ and validation/
        #[arg(short, long, default_value = "data/cats_and_dogs_filtered")]
        data_dir: PathBuf,
    },

    /// Write the ensemble architecture diagrams
    Diagram {
        /// Output directory for the SVG files
        #[arg(short, long, default_value = "output")]
        output_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };

    let _ = init_logging(&log_config);

    print_banner();

    match cli.command {
        Commands::Train {
            data_dir,
            train_dir,
            validation_dir,
            output_dir,
            config,
            epochs,
            steps_per_epoch,
            validation_steps,
            batch_size,
            seed,
            carry_cursor,
            freeze_members,
            preload,
        } => {
            let mut run = match &config {
                Some(path) => RunConfig::load(path)
                    .with_context(|| format!("Failed to read run config {:?}", path))?,
                None => RunConfig {
                    output_dir: PathBuf::from("output")
                        .join(format!("ensemble_{}", Local::now().format("%Y%m%d_%H%M%S"))),
                    ..RunConfig::from_base_dir(&data_dir)
                },
            };

            if let Some(dir) = train_dir {
                run.train_dir = dir;
            }
            if let Some(dir) = validation_dir {
                run.validation_dir = dir;
            }
            if let Some(dir) = output_dir {
                run.output_dir = dir;
            }
            if let Some(epochs) = epochs {
                run.epochs = epochs;
            }
            if let Some(steps) = steps_per_epoch {
                run.steps_per_epoch = steps;
            }
            if let Some(steps) = validation_steps {
                run.validation_steps = steps;
            }
            if let Some(batch_size) = batch_size {
                run.batch_size = batch_size;
            }
            if let Some(seed) = seed {
                run.seed = seed;
            }
            if carry_cursor {
                run.cursor_policy = CursorPolicy::Carry;
            }
            run.freeze_members |= freeze_members;
            run.preload |= preload;

            cmd_train(&run)?;
        }

        Commands::Summary => cmd_summary()?,

        Commands::Stats { data_dir } => cmd_stats(&data_dir)?,

        Commands::Diagram { output_dir } => {
            let paths = write_diagrams(&classifier_specs(), &output_dir)?;
            println!("{}", "Diagrams written:".green().bold());
            for path in [paths.full, paths.titled, paths.partial] {
                println!("  {}", path.display());
            }
        }
    }

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 ╔════════════════════════════════════════════════════════════╗
 ║   Convnet Ensemble                                         ║
 ║   Cats vs. Dogs with Burn + Rust                           ║
 ╚════════════════════════════════════════════════════════════╝
  "#
        .green()
    );
}

fn cmd_train(run: &RunConfig) -> Result<()> {
    println!("{}", "Training Configuration:".cyan().bold());
    println!("  Train dir:          {}", run.train_dir.display());
    println!("  Validation dir:     {}", run.validation_dir.display());
    println!("  Output dir:         {}", run.output_dir.display());
    println!("  Epochs:             {}", run.epochs);
    println!("  Steps per epoch:    {}", run.steps_per_epoch);
    println!("  Validation steps:   {}", run.validation_steps);
    println!("  Batch size:         {}", run.batch_size);
    println!("  Seed:               {}", run.seed);
    println!("  Cursor policy:      {:?}", run.cursor_policy);
    println!("  Freeze members:     {}", run.freeze_members);
    println!("  Ensemble optimizer: {}", run.ensemble_optimizer);
    println!("  Backend:            {}", backend_name());
    println!();

    let device = default_device();
    info!("Starting pipeline on {:?}", device);

    let summary = run_pipeline::<TrainingBackend>(run, &device)?;

    println!();
    println!("{}", "Results:".green().bold());
    println!(
        "  {:<20} {:>10} {:>10} {:>12}",
        "model", "val_loss", "val_acc", "best_val_acc"
    );
    for history in &summary.histories {
        if let Some(last) = history.last() {
            println!(
                "  {:<20} {:>10.4} {:>9.2}% {:>11.2}%",
                history.name,
                last.val_loss,
                last.val_accuracy * 100.0,
                history.best_val_accuracy() * 100.0
            );
        }
    }
    println!();
    println!("  Finished in {}", format_duration(summary.elapsed_secs));
    for path in &summary.artifacts {
        println!("  Saved {}", path.display());
    }

    Ok(())
}

fn cmd_summary() -> Result<()> {
    for entry in model_zoo() {
        let rows = entry.spec.summary()?;
        println!(
            "{} {}",
            entry.spec.name.cyan().bold(),
            format!("[{}]", entry.optimizer).yellow()
        );
        print_summary(&entry.spec.name, entry.spec.input.into(), &rows);
    }

    let tail = tail_summary()?;
    println!("{}", "ensemble tail".cyan().bold());
    print_summary("ensemble_tail", FeatureShape::Flat(1), &tail);

    let total: usize = model_zoo()
        .iter()
        .map(|entry| entry.spec.param_count())
        .sum::<convnet_ensemble::Result<usize>>()?;
    let tail_params: usize = tail.iter().map(|row| row.params).sum();
    println!(
        "Ensemble total params: {}",
        format_number(total + tail_params)
    );

    Ok(())
}

fn cmd_stats(data_dir: &Path) -> Result<()> {
    println!("{}", "Dataset Statistics:".cyan().bold());
    for split in [dataset::train_dir(data_dir), dataset::validation_dir(data_dir)] {
        let folder = ImageFolder::open(&split, IMAGE_SIZE)
            .with_context(|| format!("Failed to open {:?}", split))?;
        folder.stats().print();
    }
    Ok(())
}
