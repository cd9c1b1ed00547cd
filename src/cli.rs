use clap::{Parser, Subcommand};
use std::path::PathBuf;
use wingman::Operation;

/// Wingman: ask a text-generation endpoint about your code
#[derive(Debug, Parser)]
#[command(name = "wingman")]
#[command(version)]
#[command(
    about = "Stream code explanations, refactorings and reviews from a generation endpoint",
    long_about = None
)]
pub struct Args {
    /// Operation: explain, refactor, optimize, findProblems, documentation, chat
    #[arg(short = 'o', long = "op", default_value = "chat")]
    pub op: Operation,

    /// File holding the selected code ("-" reads stdin)
    #[arg(short = 's', long = "selection", value_name = "FILE")]
    pub selection: Option<PathBuf>,

    /// Provider (default: config/provider or "http")
    #[arg(long = "provider")]
    pub provider: Option<String>,

    /// Override every configured endpoint
    #[arg(long = "endpoint", env = "WINGMAN_ENDPOINT")]
    pub endpoint: Option<String>,

    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// Prompt text (positional); defaults to the operation's prompt prefix
    #[arg(value_name = "PROMPT")]
    pub prompt: Vec<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Read prompts from stdin, one per line; each new line supersedes the last
    Repl,

    /// Print the resolved settings as JSON
    Config,
}
