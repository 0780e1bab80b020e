//! `evergreen` command-line driver.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use evergreen::events::LoggingEventSink;
use evergreen::gate::PreprocessingGate;
use evergreen::invoker::ChatCompletionsInvoker;
use evergreen::metering::LoggingMeter;
use evergreen::observability::init_tracing;
use evergreen::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "evergreen")]
#[command(about = "Turn a transcript into articles, social posts and an email campaign")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline over a transcript
    Run {
        /// Transcript text file
        #[arg(short, long)]
        transcript: PathBuf,

        /// Settings JSON file (defaults apply when omitted)
        #[arg(short, long)]
        settings: Option<PathBuf>,

        /// Write the run report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Log as JSON lines
        #[arg(long)]
        json_logs: bool,
    },

    /// Show whether a transcript would be compressed
    Gate {
        /// Transcript text file
        #[arg(short, long)]
        transcript: PathBuf,

        /// Settings JSON file
        #[arg(short, long)]
        settings: Option<PathBuf>,
    },

    /// List the stage graph
    Stages {
        /// Settings JSON file
        #[arg(short, long)]
        settings: Option<PathBuf>,
    },
}

fn load_settings(path: Option<&Path>) -> Result<EvergreenSettings> {
    let settings = match path {
        Some(path) => EvergreenSettings::from_file(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => EvergreenSettings::default(),
    };
    settings.validate()?;
    Ok(settings)
}

fn read_transcript(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("failed to read transcript {}", path.display()))
}

async fn run(transcript: &Path, settings: Option<&Path>, output: Option<&Path>) -> Result<()> {
    let settings = load_settings(settings)?;
    let transcript = read_transcript(transcript)?;

    let anthropic =
        ChatCompletionsInvoker::from_env(Provider::Anthropic, &settings.providers.anthropic)?;
    let openai = ChatCompletionsInvoker::from_env(Provider::OpenAi, &settings.providers.openai)?;
    let pipeline = Pipeline::builder()
        .with_settings(settings)
        .with_invoker(Provider::Anthropic, Arc::new(anthropic))
        .with_invoker(Provider::OpenAi, Arc::new(openai))
        .with_meter(Arc::new(LoggingMeter))
        .with_event_sink(Arc::new(LoggingEventSink::default()))
        .build()?;

    let report = match pipeline.run(transcript).await {
        Ok(report) => report,
        Err(failure) => {
            eprintln!("{}", serde_json::to_string_pretty(&failure.to_dict())?);
            anyhow::bail!("{failure}");
        }
    };

    let json = serde_json::to_string_pretty(&report)?;
    match output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(path = %path.display(), "Run report written");
        }
        None => println!("{json}"),
    }
    for issue in report.validation_issues() {
        eprintln!("warning: {issue}");
    }
    eprintln!(
        "run {}: {} input / {} output tokens, ${:.4}",
        report.run_id,
        report.total_usage.input_tokens,
        report.total_usage.output_tokens,
        report.total_usage.cost_usd
    );
    Ok(())
}

fn gate(transcript: &Path, settings: Option<&Path>) -> Result<()> {
    let settings = load_settings(settings)?;
    let transcript = read_transcript(transcript)?;
    let decision = PreprocessingGate::from_settings(&settings.pipeline).evaluate(&transcript);
    println!("{}", serde_json::to_string_pretty(&decision)?);
    Ok(())
}

fn stages(settings: Option<&Path>) -> Result<()> {
    let settings = load_settings(settings)?;
    let registry = StageRegistry::standard(&settings)?;
    for descriptor in registry.iter() {
        println!(
            "{:>2}  {:<20} {:<10} {:<10} {}",
            descriptor.id.number(),
            descriptor.id.slug(),
            descriptor.phase,
            descriptor.provider,
            descriptor.model
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            transcript,
            settings,
            output,
            json_logs,
        } => {
            init_tracing(json_logs, "evergreen=info");
            run(&transcript, settings.as_deref(), output.as_deref()).await
        }
        Commands::Gate { transcript, settings } => {
            init_tracing(false, "warn");
            gate(&transcript, settings.as_deref())
        }
        Commands::Stages { settings } => {
            init_tracing(false, "warn");
            stages(settings.as_deref())
        }
    }
}
