use anyhow::Result;
use clap::Parser;
use confab_core::{Settings, TurnOptions};
use std::path::PathBuf;

mod app;
mod commands;
mod view;

#[derive(Parser)]
#[command(name = "confab")]
#[command(about = "Confab - streaming chat across local and hosted models")]
#[command(version)]
struct Cli {
    /// Run a single prompt and exit
    #[arg(short, long)]
    prompt: Option<String>,

    /// Provider id (llama3, gemini-flash, claude-sonnet or one from the config)
    #[arg(long)]
    provider: Option<String>,

    /// Config file to use instead of the default location
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Never add retrieved context to requests
    #[arg(long)]
    no_context: bool,

    /// Page hint passed to the context provider
    #[arg(long)]
    page: Option<String>,

    /// Keep threads in memory only
    #[arg(long)]
    ephemeral: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load(),
    };
    if cli.ephemeral {
        settings.storage.persist = false;
    }

    let controller = settings.build_controller()?;
    if let Some(ref provider) = cli.provider {
        controller.set_provider(provider)?;
    }

    let options = TurnOptions {
        provider: None,
        page_hint: cli.page,
        augment: cli.no_context.then_some(false),
    };

    if let Some(prompt) = cli.prompt {
        app::run_single_prompt(&controller, &prompt, options).await?;
    } else {
        app::run_repl(controller, options).await?;
    }

    Ok(())
}
