mod app;
mod cli;

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use wingman::{Config, SessionController};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();

    let config_path = Config::default_path()?;
    let cfg = Config::load_optional(&config_path)?;
    tracing::debug!(?config_path, ?cfg, "resolved config");

    let settings = app::resolve_settings(cfg.as_ref(), args.endpoint.as_deref())?;

    if let Some(cli::Command::Config) = args.cmd {
        return app::cmd_config(&settings);
    }

    let http = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;

    let provider_name = args
        .provider
        .clone()
        .or_else(|| cfg.as_ref().and_then(|c| c.provider.clone()))
        .unwrap_or_else(|| "http".to_string());
    let provider = app::build_provider(&http, &provider_name)?;

    let sink = Arc::new(app::TerminalSink::default());
    let controller = Arc::new(SessionController::new(provider, sink, settings));

    if let Some(cli::Command::Repl) = args.cmd {
        return app::cmd_repl(controller).await;
    }

    let prompt = args.prompt.join(" ");
    let prompt = (!prompt.trim().is_empty()).then_some(prompt);

    app::cmd_once(&controller, args.op, prompt, args.selection.as_deref()).await
}
