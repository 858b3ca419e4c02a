//! OpenRouter pipe CLI.
//!
//! Stands in for the host chat application: lists the selectable models and
//! runs one-shot or streamed chats through the pipe.

use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use orpipe::{ChatMessage, ChatRequest, Pipe, PipeConfig, PipeOutput};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "orpipe", version, about = "OpenRouter model-routing pipe")]
struct Cli {
    /// Optional TOML config file; env values override it.
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the selectable models (id and display name).
    Models,
    /// Send one chat request to a model.
    Chat {
        prompt: String,
        /// Model id, with or without the display prefix.
        #[arg(long)]
        model: String,
        /// Print the response as it streams instead of waiting for the full text.
        #[arg(long)]
        stream: bool,
        /// System prompt placed before the user message.
        #[arg(long)]
        system: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    tracing::debug!(base_url = %config.base_url, free_only = config.free_only, "configuration loaded");
    let pipe = Pipe::new(config)?;

    match cli.command {
        Command::Models => {
            for model in pipe.models().await {
                println!("{}\t{}", model.id, model.name);
            }
            Ok(())
        }
        Command::Chat {
            prompt,
            model,
            stream,
            system,
        } => {
            let mut messages = Vec::new();
            if let Some(system) = system {
                messages.push(ChatMessage::text("system", &system));
            }
            messages.push(ChatMessage::text("user", &prompt));

            let request = ChatRequest {
                model,
                messages,
                stream,
                include_reasoning: None,
                options: serde_json::Map::new(),
            };

            match pipe.chat(request).await? {
                PipeOutput::Complete(text) => println!("{text}"),
                PipeOutput::Stream(mut chunks) => {
                    let mut stdout = std::io::stdout();
                    while let Some(chunk) = chunks.next().await {
                        stdout.write_all(chunk?.as_bytes())?;
                        stdout.flush()?;
                    }
                    stdout.write_all(b"\n")?;
                }
            }
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<PipeConfig> {
    match path {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| anyhow::anyhow!("read config {}: {e}", path.display()))?;
            let mut config: PipeConfig = toml::from_str(&contents)
                .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?;
            config.apply_env_overrides();
            Ok(config)
        }
        None => Ok(PipeConfig::from_env()),
    }
}

fn init_tracing() {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(v) => v,
        Err(_) => EnvFilter::new("info,orpipe=debug,orpipe_cli=debug"),
    };
    // Logs go to stderr so streamed chunks on stdout stay clean.
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
