use std::io::Write;
use std::sync::Arc;

use anyhow::bail;
use clap::Args;
use parley_agents::mcp::McpToolHost;
use parley_agents::providers::build_providers;
use parley_agents::{LlmProvider, SessionRegistry, ToolHost, TurnOptions};
use parley_common::{ProviderId, SessionId, TimedResult};
use parley_config::AppConfig;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

#[derive(Args)]
pub struct ChatArgs {
    /// Provider id: gigachat, openrouter or ollama
    #[arg(long, short)]
    provider: Option<String>,

    /// Resume a named session instead of starting a fresh one
    #[arg(long)]
    session: Option<String>,

    /// Use this model instead of the provider default
    #[arg(long, short)]
    model: Option<String>,

    #[arg(long, default_value = "")]
    system: String,

    #[arg(long, short, default_value_t = 0.7)]
    temperature: f64,

    #[arg(long)]
    max_tokens: Option<u32>,

    /// Offer the configured tool host to providers that support tools
    #[arg(long)]
    tools: bool,
}

pub async fn run(config: AppConfig, args: ChatArgs) -> anyhow::Result<()> {
    let providers = build_providers(&config.providers)?;
    let Some(first) = providers.first() else {
        bail!(
            "no providers configured: add a providers section to the config, \
             or set OPENROUTER_API_KEY, GIGACHAT_ACCESS_TOKEN or OLLAMA_BASE_URL"
        );
    };

    let provider_id = args
        .provider
        .clone()
        .or_else(|| config.providers.default.clone())
        .unwrap_or_else(|| first.provider_id().to_string());
    if !providers.iter().any(|p| p.provider_id() == provider_id) {
        let known: Vec<&str> = providers.iter().map(|p| p.provider_id()).collect();
        bail!(
            "provider '{provider_id}' is not configured (available: {})",
            known.join(", ")
        );
    }

    let tools_enabled = args.tools && config.tools.enabled;
    let mcp_host = if tools_enabled {
        connect_tool_host(&config).await
    } else {
        None
    };
    let tool_host = mcp_host.clone().map(|h| h as Arc<dyn ToolHost>);

    let registry = SessionRegistry::from_providers(
        providers,
        config.history.clone(),
        config.tools.clone(),
        tool_host,
        None,
    );

    let session = args.session.map(SessionId::from).unwrap_or_default();
    let provider = ProviderId::from(provider_id);
    let options = TurnOptions {
        system_prompt: args.system,
        temperature: args.temperature,
        max_tokens: args.max_tokens,
        model_override: args.model,
        tools_enabled,
    };

    println!("parley: talking to {provider} (session {session})");
    println!("commands: /clear, /history, /quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        match input {
            "" => continue,
            "/quit" | "/exit" => break,
            "/clear" => {
                registry.clear_history(&session, &provider).await;
                println!("history cleared");
                continue;
            }
            "/history" => {
                if let Some(handler) = registry.handler(&session, &provider) {
                    let handler = handler.lock().await;
                    println!(
                        "{} messages stored ({} user/assistant){}",
                        handler.history_size(),
                        handler.message_count(),
                        if handler.has_summary() { ", summarized" } else { "" }
                    );
                }
                continue;
            }
            _ => {}
        }

        let result = registry
            .process_message(&session, &provider, input, &options)
            .await?;
        print_result(&result);
    }

    drop(registry);
    if let Some(host) = mcp_host {
        match Arc::try_unwrap(host) {
            Ok(host) => host.disconnect().await,
            Err(_) => warn!("tool host still in use at exit"),
        }
    }
    Ok(())
}

async fn connect_tool_host(config: &AppConfig) -> Option<Arc<McpToolHost>> {
    let Some(mcp) = &config.mcp else {
        warn!("--tools given but no mcp section is configured");
        return None;
    };
    match McpToolHost::from_config(mcp).await {
        Ok(host) => Some(Arc::new(host)),
        Err(e) => {
            warn!(error = %e, "continuing without tools");
            None
        }
    }
}

fn print_result(result: &TimedResult) {
    if result.is_error() {
        eprintln!("error: {}", result.text);
        return;
    }

    println!("{}", result.text);
    let tokens = result
        .usage
        .and_then(|u| u.total_tokens)
        .map(|t| format!(", {t} tokens"))
        .unwrap_or_default();
    println!(
        "[{}, {} ms{}]",
        result.model_name, result.response_time_ms, tokens
    );
}
