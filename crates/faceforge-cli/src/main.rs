use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use faceforge_core::report::FailureResult;
use faceforge_core::{FacePipeline, JsonLinesSink, OrtAdapterFactory, PipelineConfig};
use serde_json::Value;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser, Debug)]
#[command(
    name = "faceforge",
    version,
    about = "Train face identity models and swap them into images and videos",
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    subcommand: Option<Commands>,

    /// Command to run, for hosts that pass it as a flag
    #[arg(long = "command", value_enum)]
    command: Option<CommandName>,

    #[command(flatten)]
    args: JobArgs,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "snake_case")]
enum Commands {
    /// Count faces in every sample image of a dataset
    DetectFaces(JobArgs),
    /// Build an identity model from a dataset of photos
    Train(JobArgs),
    /// Swap an identity into one image
    Swap(JobArgs),
    /// Swap an identity into every image of a folder
    BatchSwap(JobArgs),
    /// Swap an identity into every frame of a video
    VideoSwap(JobArgs),
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
#[value(rename_all = "snake_case")]
enum CommandName {
    DetectFaces,
    Train,
    Swap,
    BatchSwap,
    VideoSwap,
}

#[derive(Args, Debug, Clone, Default)]
struct JobArgs {
    /// Sample folder, batch input folder, or input video
    #[arg(long = "dataset_path")]
    dataset_path: Option<PathBuf>,
    /// Model file, output image, output folder, or output video
    #[arg(long = "output_path")]
    output_path: Option<PathBuf>,
    #[arg(long = "model_name")]
    model_name: Option<String>,
    /// Trained identity model (.fsem)
    #[arg(long = "model_path")]
    model_path: Option<PathBuf>,
    #[arg(long = "target_image")]
    target_image: Option<PathBuf>,
    /// Restore faces after swapping
    #[arg(long)]
    enhance: bool,
    /// Upscale factor for enhancement; values below 1 mean 1
    #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
    upscale: i64,
}

impl JobArgs {
    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig::new(self.enhance, self.upscale.clamp(1, u32::MAX as i64) as u32)
    }
}

impl Cli {
    fn into_job(self) -> Result<(CommandName, JobArgs)> {
        match (self.subcommand, self.command) {
            (Some(Commands::DetectFaces(args)), _) => Ok((CommandName::DetectFaces, args)),
            (Some(Commands::Train(args)), _) => Ok((CommandName::Train, args)),
            (Some(Commands::Swap(args)), _) => Ok((CommandName::Swap, args)),
            (Some(Commands::BatchSwap(args)), _) => Ok((CommandName::BatchSwap, args)),
            (Some(Commands::VideoSwap(args)), _) => Ok((CommandName::VideoSwap, args)),
            (None, Some(name)) => Ok((name, self.args)),
            (None, None) => Err(anyhow!("Unknown command")),
        }
    }
}

fn required<'a, T>(value: &'a Option<T>, flag: &str) -> Result<&'a T> {
    value
        .as_ref()
        .ok_or_else(|| anyhow!("missing required argument --{flag}"))
}

fn run(command: CommandName, args: JobArgs) -> Result<Value> {
    let config = Config::load()?;
    tracing::info!(?command, model_dir = %config.model_dir.display(), "faceforge starting");

    let factory = OrtAdapterFactory::new(config.model_paths(), config.intra_threads);
    let mut pipeline = FacePipeline::new(factory, config.pipeline_options());
    let mut progress = JsonLinesSink::new(std::io::stdout());

    let value = match command {
        CommandName::DetectFaces => {
            let report = pipeline.detect_faces(required(&args.dataset_path, "dataset_path")?)?;
            serde_json::to_value(report)?
        }
        CommandName::Train => {
            let result = pipeline.train(
                required(&args.dataset_path, "dataset_path")?,
                required(&args.output_path, "output_path")?,
                required(&args.model_name, "model_name")?,
            )?;
            serde_json::to_value(result)?
        }
        CommandName::Swap => {
            let result = pipeline.swap_image(
                required(&args.model_path, "model_path")?,
                required(&args.target_image, "target_image")?,
                required(&args.output_path, "output_path")?,
                args.pipeline_config(),
            )?;
            serde_json::to_value(result)?
        }
        CommandName::BatchSwap => {
            let summary = pipeline.batch_swap(
                required(&args.model_path, "model_path")?,
                required(&args.dataset_path, "dataset_path")?,
                required(&args.output_path, "output_path")?,
                args.pipeline_config(),
                &mut progress,
            )?;
            serde_json::to_value(summary)?
        }
        CommandName::VideoSwap => {
            let summary = pipeline.video_swap(
                required(&args.model_path, "model_path")?,
                required(&args.dataset_path, "dataset_path")?,
                required(&args.output_path, "output_path")?,
                args.pipeline_config(),
                &mut progress,
            )?;
            serde_json::to_value(summary)?
        }
    };
    Ok(value)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unexpected internal error".to_string()
    }
}

/// Write the single terminal line and map it to the exit status.
fn finish(outcome: std::result::Result<Value, String>) -> ExitCode {
    let (line, code) = match outcome {
        Ok(value) => (value, ExitCode::SUCCESS),
        Err(error) => match serde_json::to_value(FailureResult::new(error)) {
            Ok(value) => (value, ExitCode::FAILURE),
            Err(_) => (Value::Null, ExitCode::FAILURE),
        },
    };

    let mut stdout = std::io::stdout().lock();
    if writeln!(stdout, "{line}").and_then(|_| stdout.flush()).is_err() {
        return ExitCode::FAILURE;
    }
    code
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => {
            let message = e.to_string();
            tracing::error!("{message}");
            let first = message.lines().next().unwrap_or_default();
            return finish(Err(first.trim_start_matches("error: ").to_string()));
        }
    };

    let (command, args) = match cli.into_job() {
        Ok(job) => job,
        Err(e) => return finish(Err(e.to_string())),
    };

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| run(command, args)));
    match outcome {
        Ok(Ok(value)) => finish(Ok(value)),
        Ok(Err(e)) => {
            tracing::error!("{e:#}");
            finish(Err(e.to_string()))
        }
        Err(payload) => finish(Err(panic_message(payload.as_ref()))),
    }
}
