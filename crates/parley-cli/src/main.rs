mod chat;
mod logging;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use parley_agents::OllamaProvider;
use parley_agents::providers::{build_providers, health_check_all};
use parley_config::{AppConfig, ConfigLoader};

#[derive(Parser)]
#[command(name = "parley", version, about = "Chat with GigaChat, OpenRouter or a local Ollama")]
struct Cli {
    /// Config file (YAML or TOML). Defaults to ~/.parley/config.yml
    #[arg(long, short, global = true, env = "PARLEY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive chat with one provider
    Chat(chat::ChatArgs),
    /// Check which configured providers answer
    Health,
    /// List models pulled on the local Ollama daemon
    Models,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let loader = match &cli.config {
        Some(path) => ConfigLoader::with_path(path),
        None => ConfigLoader::new(),
    };
    let config = loader.load().context("failed to load configuration")?;
    logging::init(&config.logging);

    match cli.command {
        Command::Chat(args) => chat::run(config, args).await,
        Command::Health => health(&config).await,
        Command::Models => models(&config).await,
    }
}

async fn health(config: &AppConfig) -> anyhow::Result<()> {
    let providers = build_providers(&config.providers)?;
    if providers.is_empty() {
        println!("no providers configured");
        return Ok(());
    }

    for (id, healthy) in health_check_all(&providers).await {
        println!("{id:<12} {}", if healthy { "ok" } else { "unreachable" });
    }
    Ok(())
}

async fn models(config: &AppConfig) -> anyhow::Result<()> {
    let ollama = OllamaProvider::from_config(&config.providers.ollama.clone().unwrap_or_default());
    let models = ollama
        .list_models()
        .await
        .with_context(|| format!("could not list models at {}", ollama.base_url()))?;

    if models.is_empty() {
        println!("no models pulled yet");
    }
    for name in models {
        println!("{name}");
    }
    Ok(())
}
