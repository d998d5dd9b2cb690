// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Entry point for all user interaction. Parses arguments with
// clap and delegates to Layer 2 (application).
//
// Three commands are supported:
//   1. `buffer`      — trains experts and writes trajectory buffers
//   2. `linear-eval` — linear probe accuracy of a saved backbone
//   3. `inspect`     — prints a summary of a buffer file
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{BufferArgs, Commands, InspectArgs, LinearEvalArgs};

#[derive(Parser, Debug)]
#[command(
    name = "trajectory-buffers",
    version = "0.1.0",
    about = "Record expert training trajectories and linear-probe trained backbones."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Dispatch to the matching use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Buffer(args)     => run_buffer(args),
            Commands::LinearEval(args) => run_linear_eval(args),
            Commands::Inspect(args)    => run_inspect(args),
        }
    }
}

fn run_buffer(args: BufferArgs) -> Result<()> {
    use crate::application::buffer_use_case::BufferUseCase;

    tracing::info!("Generating buffers for {} / {}", args.dataset, args.model);
    let summary = BufferUseCase::new(args.into()).execute()?;

    println!(
        "Trained {} experts. {} buffer file(s) written to {}",
        summary.experts,
        summary.buffer_files.len(),
        summary.save_dir.display()
    );
    Ok(())
}

fn run_linear_eval(args: LinearEvalArgs) -> Result<()> {
    use crate::application::linear_eval_use_case::LinearEvalUseCase;

    let outcome = LinearEvalUseCase::new(args.into()).execute()?;

    println!("\nLinear evaluation accuracy: {:.3}%", outcome.report.accuracy);
    println!("Test loss: {:.4}", outcome.report.mean_loss);
    for (k, acc) in &outcome.top_k {
        println!("Top-{} accuracy: {:.3}%", k, acc);
    }
    Ok(())
}

fn run_inspect(args: InspectArgs) -> Result<()> {
    use crate::application::inspect_use_case::InspectUseCase;

    let report = InspectUseCase::new(args.buffer).execute()?;

    println!("Experts:          {}", report.experts);
    println!("Snapshots/expert: {:?}", report.snapshots);
    println!("Parameters:       {}", report.param_count);
    println!("Mean |θ_T - θ_0|: {:.4}", report.mean_distance);
    for (i, shape) in report.param_shapes.iter().enumerate() {
        println!("  param {:>2}: {:?}", i, shape);
    }
    Ok(())
}
