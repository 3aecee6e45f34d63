// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Entry point for all user interaction, parsed with `clap`.
// All business logic is delegated to Layer 2 (application).
//
// Two commands are supported:
//   1. `train`   — learns trigger vectors for a template
//   2. `predict` — decodes a dataset with a trained checkpoint
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, PredictArgs, TrainArgs};

#[derive(Parser, Debug)]
#[command(
    name = "continuous-trigger-mlm",
    version = "0.1.0",
    about = "Tune continuous prompt triggers for a masked language model."
)]
pub struct Cli {
    /// Verbose logging (debug level)
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Match on the subcommand and dispatch to the correct use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args)   => run_train(args),
            Commands::Predict(args) => run_predict(args),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::TrainUseCase;

    tracing::info!("Training triggers for template: {}", args.template);
    let summary = TrainUseCase::new(args.into()).execute()?;

    match summary.best_dev_accuracy {
        Some(dev) => println!("Best dev accuracy: {:.4}", dev),
        None      => println!("No epoch was run; nothing was checkpointed."),
    }
    println!("Test accuracy: {:.4}", summary.test_accuracy);
    Ok(())
}

fn run_predict(args: PredictArgs) -> Result<()> {
    use crate::application::predict_use_case::PredictUseCase;

    let report = PredictUseCase::new(args.into()).execute()?;
    for span in &report.spans {
        let mark = if span.exact { "✓" } else { "✗" };
        println!("{mark} predicted='{}' gold='{}'", span.predicted, span.gold);
    }
    println!(
        "\nExact match ({}): {}/{} = {:.4}",
        report.strategy,
        report.correct(),
        report.spans.len(),
        report.accuracy()
    );
    Ok(())
}
