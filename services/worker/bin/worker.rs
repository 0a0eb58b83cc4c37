//! Main Entrypoint for the Interview Worker
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing logging.
//! 3. Choosing the language model (OpenAI-compatible or scripted).
//! 4. Starting the worker and dispatching the console job to it.
//! 5. Stopping cleanly on Ctrl+C or when the session ends.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use clap::{Parser, Subcommand};
use interviewer_core::llm_client::{LanguageModel, OpenAICompatibleClient, ScriptedLanguageModel};
use interviewer_worker::{
    config::Config,
    console::{ConsoleRoom, ConsoleSessionFactory},
    worker::{JobRequest, Worker, WorkerOptions},
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Voice interview assistant worker
#[derive(Parser, Debug)]
#[command(name = "worker")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one interview in the terminal
    Console {
        /// Room name reported in logs
        #[arg(long, default_value = "console")]
        room: String,

        /// Room metadata as a JSON object
        #[arg(long)]
        metadata: Option<String>,

        /// Identity of the local participant
        #[arg(long, default_value = "candidate")]
        participant: String,

        /// Use a scripted model instead of calling the LLM API
        #[arg(long)]
        scripted: bool,
    },
}

/// Listens for the `Ctrl+C` signal to gracefully shut down the worker.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();
    info!("Configuration loaded. Initializing worker...");

    let Commands::Console {
        room,
        metadata,
        participant,
        scripted,
    } = cli.command;

    // --- 3. Choose the Language Model ---
    let llm: Arc<dyn LanguageModel> = if scripted {
        info!("Using scripted model.");
        Arc::new(ScriptedLanguageModel::interview())
    } else {
        let openai_config = OpenAIConfig::new()
            .with_api_key(config.require_openai_key()?)
            .with_api_base(&config.openai_base_url);
        info!(model = %config.llm_model, base_url = %config.openai_base_url, "Using OpenAI-compatible model.");
        Arc::new(OpenAICompatibleClient::new(
            openai_config,
            config.llm_model.clone(),
        ))
    };

    // --- 4. Start the Worker ---
    let worker = Worker::new(WorkerOptions::interview(
        config.orchestrator_config(),
        config.vad_options(),
    ));
    let (jobs, rx) = mpsc::channel(1);
    jobs.send(JobRequest {
        room: Arc::new(ConsoleRoom::new(room, participant).with_metadata(metadata)),
        sessions: Arc::new(ConsoleSessionFactory::new(llm)),
    })
    .await
    .context("Failed to dispatch console job")?;
    drop(jobs);

    // --- 5. Run Until the Session Ends ---
    let report = worker.run(rx, shutdown_signal()).await?;
    if let Some(usage) = report.usage.first() {
        info!(
            llm_prompt_tokens = usage.llm_prompt_tokens,
            llm_completion_tokens = usage.llm_completion_tokens,
            tts_characters_count = usage.tts_characters_count,
            "Interview finished"
        );
    }
    anyhow::ensure!(report.failed == 0, "Interview session failed to start");
    Ok(())
}
