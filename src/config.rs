use crate::error::ConfigurationError;
use crate::provider::{Backend, GenerationParameters, Operation, Request};
use anyhow::Context;
use reqwest::header::HeaderValue;
use reqwest::Url;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Endpoint used for any operation the config file does not mention.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:8100/code/explain";

/// On-disk `config.toml`. Every field is optional.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Provider identifier ("http" or "echo").
    pub provider: Option<String>,

    pub backend: Option<Backend>,

    /// Opaque bearer token.
    pub api_key: Option<String>,

    pub max_new_tokens: Option<u32>,
    pub stop_sequences: Option<Vec<String>>,
    pub temperature: Option<f64>,
    pub top_k: Option<u32>,
    pub top_p: Option<f64>,

    pub timeout_secs: Option<u64>,

    /// Close the connection of a superseded session instead of draining it.
    pub abort_superseded: Option<bool>,

    /// Endpoint per operation. An empty string means "not configured".
    #[serde(default)]
    pub api_url: BTreeMap<String, String>,

    #[serde(default)]
    pub prompt_prefix: BTreeMap<String, String>,
}

/// `$WINGMAN_HOME/config/config.toml`, else `$XDG_CONFIG_HOME/wingman/config.toml`,
/// else `~/.config/wingman/config.toml`.
fn config_path_from(var: impl Fn(&str) -> Option<OsString>) -> anyhow::Result<PathBuf> {
    let dir = if let Some(base) = var("WINGMAN_HOME") {
        PathBuf::from(base).join("config")
    } else if let Some(xdg) = var("XDG_CONFIG_HOME") {
        PathBuf::from(xdg).join("wingman")
    } else {
        let home = var("HOME").context("HOME is not set")?;
        PathBuf::from(home).join(".config").join("wingman")
    };
    Ok(dir.join("config.toml"))
}

impl Config {
    /// Where the config file is looked up. Nothing is created.
    pub fn default_path() -> anyhow::Result<PathBuf> {
        config_path_from(|name| std::env::var_os(name))
    }

    /// Load config if the file exists, otherwise return Ok(None).
    pub fn load_optional(path: impl AsRef<Path>) -> anyhow::Result<Option<Self>> {
        let path = path.as_ref();
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(anyhow::Error::new(e))
                    .with_context(|| format!("failed to read config: {}", path.display()))
            }
        };

        let s = String::from_utf8(bytes).context("config is not valid UTF-8")?;
        let cfg: Config = toml::from_str(&s)
            .with_context(|| format!("failed to parse TOML: {}", path.display()))?;
        Ok(Some(cfg))
    }
}

/// Resolved settings. Treated as an immutable snapshot: the `with_*`
/// methods return a new value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settings {
    pub endpoints: BTreeMap<Operation, String>,
    #[serde(serialize_with = "redact")]
    pub auth_token: Option<String>,
    pub backend: Backend,
    pub parameters: GenerationParameters,
    pub prompt_prefixes: BTreeMap<Operation, String>,
    pub timeout: Option<Duration>,
    pub abort_superseded: bool,
}

fn redact<S: Serializer>(tok: &Option<String>, s: S) -> Result<S::Ok, S::Error> {
    match tok {
        Some(_) => s.serialize_some("<redacted>"),
        None => s.serialize_none(),
    }
}

fn default_prefix(op: Operation) -> Option<&'static str> {
    match op {
        Operation::Explain => Some("Explain what the following code does"),
        Operation::Refactor => Some("Refactor the following code"),
        Operation::Optimize => Some("Optimize the following code"),
        Operation::FindProblems => Some("Find problems with the following code"),
        Operation::Document => Some("Write documentation for the following code"),
        Operation::FreeformChat => None,
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoints: Operation::ALL
                .into_iter()
                .map(|op| (op, DEFAULT_ENDPOINT.to_string()))
                .collect(),
            auth_token: None,
            backend: Backend::default(),
            parameters: GenerationParameters::default(),
            prompt_prefixes: Operation::ALL
                .into_iter()
                .filter_map(|op| default_prefix(op).map(|p| (op, p.to_string())))
                .collect(),
            timeout: None,
            abort_superseded: false,
        }
    }
}

fn parse_op_keys(
    table: &BTreeMap<String, String>,
    what: &str,
) -> anyhow::Result<BTreeMap<Operation, String>> {
    table
        .iter()
        .map(|(k, v)| {
            let op = k
                .parse::<Operation>()
                .map_err(anyhow::Error::msg)
                .with_context(|| format!("invalid key in [{what}]"))?;
            Ok((op, v.clone()))
        })
        .collect()
}

impl Settings {
    pub fn from_config(cfg: Option<&Config>) -> anyhow::Result<Self> {
        let mut s = Settings::default();
        let Some(cfg) = cfg else {
            return Ok(s);
        };

        s.endpoints.extend(parse_op_keys(&cfg.api_url, "api_url")?);
        s.prompt_prefixes.extend(parse_op_keys(&cfg.prompt_prefix, "prompt_prefix")?);

        s.auth_token = cfg.api_key.clone();
        if let Some(b) = cfg.backend {
            s.backend = b;
        }

        let p = &mut s.parameters;
        if let Some(n) = cfg.max_new_tokens {
            p.max_new_tokens = n;
        }
        if let Some(stop) = &cfg.stop_sequences {
            p.stop_sequences = stop.clone();
        }
        p.temperature = cfg.temperature.or(p.temperature);
        p.top_k = cfg.top_k.or(p.top_k);
        p.top_p = cfg.top_p.or(p.top_p);

        s.timeout = cfg.timeout_secs.map(Duration::from_secs);
        s.abort_superseded = cfg.abort_superseded.unwrap_or(false);
        Ok(s)
    }

    pub fn with_endpoint(mut self, op: Operation, url: impl Into<String>) -> Self {
        self.endpoints.insert(op, url.into());
        self
    }

    /// Point every operation at the same endpoint.
    pub fn with_all_endpoints(mut self, url: &str) -> Self {
        for op in Operation::ALL {
            self.endpoints.insert(op, url.to_string());
        }
        self
    }

    pub fn with_auth_token(mut self, tok: Option<String>) -> Self {
        self.auth_token = tok;
        self
    }

    pub fn with_abort_superseded(mut self, abort: bool) -> Self {
        self.abort_superseded = abort;
        self
    }

    pub fn prompt_prefix(&self, op: Operation) -> Option<&str> {
        self.prompt_prefixes.get(&op).map(String::as_str)
    }

    pub fn endpoint_for(&self, op: Operation) -> Result<Url, ConfigurationError> {
        let raw = self
            .endpoints
            .get(&op)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or(ConfigurationError::MissingEndpoint(op))?;

        Url::parse(raw).map_err(|source| ConfigurationError::InvalidEndpoint {
            op,
            url: raw.to_string(),
            source,
        })
    }

    fn credential(&self) -> Result<Option<String>, ConfigurationError> {
        match &self.auth_token {
            None => Ok(None),
            Some(tok) => {
                let tok = tok.trim();
                if tok.is_empty() || HeaderValue::from_str(&format!("Bearer {tok}")).is_err() {
                    return Err(ConfigurationError::InvalidCredential);
                }
                Ok(Some(tok.to_string()))
            }
        }
    }

    /// Freeze this snapshot into a request for `op`.
    pub fn request_for(
        &self,
        op: Operation,
        prompt: String,
    ) -> Result<Request, ConfigurationError> {
        Ok(Request {
            prompt,
            endpoint: self.endpoint_for(op)?,
            operation: op,
            auth_token: self.credential()?,
            backend: self.backend,
            parameters: self.parameters.clone(),
            timeout: self.timeout,
        })
    }
}
