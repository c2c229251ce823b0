//! CLI binary for mentora.

use clap::{Parser, Subcommand};
use mentora::MentorConfig;
use mentora::app::App;
use mentora::audio::{CpalCapture, PlaybackSink};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Mentora: voice-based AI tutoring companion.
#[derive(Parser)]
#[command(name = "mentora", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Start an interactive tutoring session.
    Chat,

    /// List available audio devices.
    Devices,

    /// Write the default configuration file.
    InitConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Tracing goes to stderr; stdout is reserved for the conversation.
    // Override with RUST_LOG=debug to see everything.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mentora=info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match cli.config {
        Some(ref path) => MentorConfig::from_file(path)?,
        None => {
            let default_path = MentorConfig::default_config_path();
            if default_path.exists() {
                MentorConfig::from_file(&default_path)?
            } else {
                MentorConfig::default()
            }
        }
    };

    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => run_chat(config).await,
        Command::Devices => list_devices(),
        Command::InitConfig => init_config(&config),
    }
}

async fn run_chat(config: MentorConfig) -> anyhow::Result<()> {
    println!("Mentora v{}", env!("CARGO_PKG_VERSION"));

    let mut app = App::new(config)?;
    app.run().await?;
    Ok(())
}

fn list_devices() -> anyhow::Result<()> {
    println!("Input devices:");
    for name in CpalCapture::list_input_devices()? {
        println!("  - {name}");
    }

    println!("\nOutput devices:");
    for name in PlaybackSink::list_output_devices()? {
        println!("  - {name}");
    }

    Ok(())
}

fn init_config(config: &MentorConfig) -> anyhow::Result<()> {
    let path = MentorConfig::default_config_path();
    config.save_to_file(&path)?;
    println!("wrote {}", path.display());
    Ok(())
}
