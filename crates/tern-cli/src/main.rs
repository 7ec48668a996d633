mod session;

use anyhow::{Context, Result};
use clap::Parser;
use std::env;

use session::Session;
use tern::agent::Agent;
use tern::providers::configs::OpenAiProviderConfig;
use tern::providers::openai::OpenAiProvider;
use tern::tools::WebToolkit;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// API key (can also be set via OPENAI_API_KEY environment variable)
    #[arg(long)]
    api_key: Option<String>,

    /// Chat-completions host (can also be set via TERN_HOST environment variable)
    #[arg(long)]
    host: Option<String>,

    /// Model to use
    #[arg(short, long, default_value = "gpt-4o")]
    model: String,

    /// Override the system prompt
    #[arg(short, long)]
    system: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let api_key = cli
        .api_key
        .clone()
        .or_else(|| env::var("OPENAI_API_KEY").ok())
        .context("API key must be provided via --api-key or OPENAI_API_KEY environment variable")?;

    let host = cli
        .host
        .clone()
        .or_else(|| env::var("TERN_HOST").ok())
        .unwrap_or_else(|| "https://api.openai.com".to_string());

    let provider = OpenAiProvider::new(OpenAiProviderConfig::new(host, api_key, cli.model))?;

    let mut agent = Agent::new(Box::new(provider));
    if let Some(system) = cli.system {
        agent = agent.with_system_prompt(system);
    }
    agent.add_toolkit(Box::new(WebToolkit::new()));

    let mut session = Session::new(agent);
    session.start().await
}
