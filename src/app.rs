use anyhow::Context;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use wingman::provider::echo::EchoProvider;
use wingman::provider::http::HttpProvider;
use wingman::{
    Config, Operation, OutputSink, Provider, SessionController, Settings, Update, UpdateKind,
};

/// Settings from the config file, then the environment, then flags.
pub fn resolve_settings(cfg: Option<&Config>, endpoint: Option<&str>) -> anyhow::Result<Settings> {
    let mut settings = Settings::from_config(cfg).context("invalid config")?;

    if let Ok(key) = std::env::var("WINGMAN_API_KEY") {
        settings = settings.with_auth_token(Some(key));
    }
    if let Some(url) = endpoint {
        settings = settings.with_all_endpoints(url);
    }
    Ok(settings)
}

pub fn build_provider(
    http: &reqwest::Client,
    provider_name: &str,
) -> anyhow::Result<Arc<dyn Provider + Send + Sync>> {
    match provider_name {
        "http" => Ok(Arc::new(HttpProvider::new(http.clone()))),
        "echo" => Ok(Arc::new(EchoProvider::default())),
        other => anyhow::bail!("unknown provider: {other}"),
    }
}

/// Terminal stand-in for the editor panel.
///
/// Partial updates carry the whole response so far; only the part not yet
/// printed is written.
#[derive(Debug, Default)]
pub struct TerminalSink {
    printed: Mutex<(u64, usize)>,
}

impl OutputSink for TerminalSink {
    fn post_update(&self, update: Update) {
        let mut printed = self.printed.lock().unwrap_or_else(|e| e.into_inner());
        if printed.0 != update.session {
            *printed = (update.session, 0);
        }

        let mut out = std::io::stdout().lock();
        match update.kind {
            UpdateKind::Prompt => {
                if !update.text.is_empty() {
                    eprintln!("> {}", update.text);
                }
            }
            UpdateKind::Placeholder => {
                eprintln!("{}", update.text);
            }
            UpdateKind::Partial | UpdateKind::Final => {
                let text = update.text.as_str();
                if text.len() < printed.1 || !text.is_char_boundary(printed.1) {
                    // Not a continuation of what is on screen; start over.
                    writeln!(out).ok();
                    printed.1 = 0;
                }
                write!(out, "{}", &text[printed.1..]).ok();
                printed.1 = text.len();
                if update.kind == UpdateKind::Final {
                    writeln!(out).ok();
                }
            }
            UpdateKind::Error => {
                let text = update.text.as_str();
                writeln!(out).ok();
                eprintln!("{}", text.get(printed.1..).unwrap_or(text).trim_start());
            }
        }
        out.flush().ok();
    }
}

async fn read_selection(path: &Path) -> anyhow::Result<String> {
    if path == Path::new("-") {
        let mut buf = String::new();
        tokio::io::stdin()
            .read_to_string(&mut buf)
            .await
            .context("failed to read selection from stdin")?;
        return Ok(buf);
    }
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read selection: {}", path.display()))
}

pub async fn cmd_once(
    controller: &SessionController,
    op: Operation,
    prompt: Option<String>,
    selection: Option<&Path>,
) -> anyhow::Result<()> {
    let selection = match selection {
        Some(p) => Some(read_selection(p).await?),
        None => None,
    };

    if op == Operation::FreeformChat && prompt.is_none() && selection.is_none() {
        anyhow::bail!(
            "No prompt provided. Try: wingman \"Hello\" or wingman --op explain -s main.rs"
        );
    }

    let session = controller.search(op, prompt, selection).await;
    if session.failed {
        anyhow::bail!("session {} failed", session.sequence);
    }
    Ok(())
}

pub async fn cmd_repl(controller: Arc<SessionController>) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut last = None;

    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }

        let controller = controller.clone();
        last = Some(tokio::spawn(async move { controller.chat(line).await }));
    }

    // Let the latest session finish; older ones are already silenced.
    if let Some(task) = last {
        task.await.context("session task panicked")?;
    }
    Ok(())
}

pub fn cmd_config(settings: &Settings) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(settings).context("failed to serialize settings")?;
    println!("{json}");
    Ok(())
}
