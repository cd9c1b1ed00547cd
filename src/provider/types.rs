use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// What the user asked the model to do with the selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Operation {
    #[serde(rename = "explain")]
    Explain,
    #[serde(rename = "refactor")]
    Refactor,
    #[serde(rename = "optimize")]
    Optimize,
    #[serde(rename = "findProblems")]
    FindProblems,
    #[serde(rename = "documentation")]
    Document,
    #[serde(rename = "chat")]
    FreeformChat,
}

impl Operation {
    pub const ALL: [Operation; 6] = [
        Operation::Explain,
        Operation::Refactor,
        Operation::Optimize,
        Operation::FindProblems,
        Operation::Document,
        Operation::FreeformChat,
    ];

    /// Name used in config tables and the `prompt_type` payload field.
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Explain => "explain",
            Operation::Refactor => "refactor",
            Operation::Optimize => "optimize",
            Operation::FindProblems => "findProblems",
            Operation::Document => "documentation",
            Operation::FreeformChat => "chat",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                let names: Vec<&str> = Operation::ALL.iter().map(|op| op.as_str()).collect();
                format!("unknown operation `{s}` (expected one of: {})", names.join(", "))
            })
    }
}

/// Request body layout expected by the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    /// `{"code": prompt}`
    #[default]
    Code,
    /// `{"inputs": prompt, "parameters": {..}, "prompt_type": op}`
    TextGeneration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParameters {
    pub max_new_tokens: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
}

impl Default for GenerationParameters {
    fn default() -> Self {
        Self {
            max_new_tokens: 1024,
            stop_sequences: vec!["<|end|>".to_string()],
            temperature: Some(0.2),
            top_k: Some(50),
            top_p: Some(0.95),
        }
    }
}

/// One generation request. Built from a single settings snapshot and never
/// changed afterwards.
#[derive(Debug, Clone)]
pub struct Request {
    pub prompt: String,
    pub endpoint: Url,
    pub operation: Operation,
    pub auth_token: Option<String>,
    pub backend: Backend,
    pub parameters: GenerationParameters,
    pub timeout: Option<Duration>,
}

/// One decoded line of generated text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamUnit {
    pub text: String,
}

impl StreamUnit {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(crate) enum Payload<'a> {
    Code {
        code: &'a str,
    },
    TextGeneration {
        inputs: &'a str,
        parameters: &'a GenerationParameters,
        prompt_type: Operation,
    },
}

impl<'a> Payload<'a> {
    pub(crate) fn for_request(req: &'a Request) -> Self {
        match req.backend {
            Backend::Code => Payload::Code { code: &req.prompt },
            Backend::TextGeneration => Payload::TextGeneration {
                inputs: &req.prompt,
                parameters: &req.parameters,
                prompt_type: req.operation,
            },
        }
    }
}
