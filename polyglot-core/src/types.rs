//! Domain types shared across the polyglot workspace.
//!
//! Everything here is serializable via serde + serde_yaml so it can live in
//! `~/.polyglot/config.yaml`.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Stable identifier of one backend in the coordinator pool (`openai-1`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(pub String);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for InstanceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for InstanceId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Kind of backend behind an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Anthropic,
    Zhipu,
    DeepSeek,
    Ollama,
    LlamaCpp,
    Ssh,
}

impl Provider {
    pub fn all() -> &'static [Provider] {
        &[
            Provider::OpenAi,
            Provider::Anthropic,
            Provider::Zhipu,
            Provider::DeepSeek,
            Provider::Ollama,
            Provider::LlamaCpp,
            Provider::Ssh,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Zhipu => "zhipu",
            Provider::DeepSeek => "deepseek",
            Provider::Ollama => "ollama",
            Provider::LlamaCpp => "llamacpp",
            Provider::Ssh => "ssh",
        }
    }

    /// Hosted HTTP APIs that need a credential.
    pub fn is_hosted_api(&self) -> bool {
        matches!(
            self,
            Provider::OpenAi | Provider::Anthropic | Provider::Zhipu | Provider::DeepSeek
        )
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Provider::all()
            .iter()
            .copied()
            .find(|p| p.as_str() == lower)
            .ok_or_else(|| {
                format!(
                    "unknown provider '{s}'; expected: openai, anthropic, zhipu, deepseek, ollama, llamacpp, ssh"
                )
            })
    }
}

// ---------------------------------------------------------------------------
// Provider table
// ---------------------------------------------------------------------------

/// One row of the discovery table: how to find and configure a provider.
///
/// The coordinator only ever sees the table, so a new provider row never
/// touches coordinator code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSpec {
    pub provider: Provider,
    /// Variable whose non-empty value enables the provider and is passed to
    /// it as its credential (API key, model path, or SSH host).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_env: Option<String>,
    /// Variable that must equal `true` to enable a credential-less provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_env: Option<String>,
    pub default_model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl ProviderSpec {
    fn keyed(provider: Provider, key: &str, model_env: &str, model: &str, url: &str) -> Self {
        Self {
            provider,
            credential_env: Some(key.to_string()),
            enable_env: None,
            model_env: Some(model_env.to_string()),
            default_model: model.to_string(),
            base_url: Some(url.to_string()),
        }
    }

    /// Built-in table used when the config file does not override it.
    pub fn default_table() -> Vec<ProviderSpec> {
        vec![
            Self::keyed(
                Provider::OpenAi,
                "OPENAI_API_KEY",
                "OPENAI_MODEL",
                "gpt-4",
                "https://api.openai.com/v1",
            ),
            Self::keyed(
                Provider::Anthropic,
                "ANTHROPIC_API_KEY",
                "ANTHROPIC_MODEL",
                "claude-3-sonnet-20240229",
                "https://api.anthropic.com/v1",
            ),
            Self::keyed(
                Provider::Zhipu,
                "ZHIPU_API_KEY",
                "ZHIPU_MODEL",
                "glm-4",
                "https://open.bigmodel.cn/api/paas/v4",
            ),
            Self::keyed(
                Provider::DeepSeek,
                "DEEPSEEK_API_KEY",
                "DEEPSEEK_MODEL",
                "deepseek-chat",
                "https://api.deepseek.com/v1",
            ),
            ProviderSpec {
                provider: Provider::Ollama,
                credential_env: None,
                enable_env: Some("OLLAMA_ENABLED".to_string()),
                model_env: Some("OLLAMA_MODEL".to_string()),
                default_model: "llama3:8b".to_string(),
                base_url: Some("http://localhost:11434".to_string()),
            },
            ProviderSpec {
                provider: Provider::LlamaCpp,
                credential_env: Some("LLAMACPP_MODEL_PATH".to_string()),
                enable_env: None,
                model_env: None,
                default_model: "local".to_string(),
                base_url: None,
            },
            ProviderSpec {
                provider: Provider::Ssh,
                credential_env: Some("SSH_WORKER_HOST".to_string()),
                enable_env: None,
                model_env: None,
                default_model: "remote".to_string(),
                base_url: None,
            },
        ]
    }
}

// ---------------------------------------------------------------------------
// Coordinator settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorSettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Doubles as the cooldown before a failed instance is re-enabled.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_instances_per_provider")]
    pub instances_per_provider: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl CoordinatorSettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            instances_per_provider: default_instances_per_provider(),
            session_id: None,
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    2_000
}

fn default_instances_per_provider() -> u32 {
    2
}

// ---------------------------------------------------------------------------
// Hash spec
// ---------------------------------------------------------------------------

/// Which part of a source tree the codebase digest covers.
///
/// Both sides of a parity check must use the same spec; the remote digest
/// script is generated from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashSpec {
    /// Directories walked recursively, in this order.
    pub roots: Vec<String>,
    /// Suffixes a file name must end with (`.rs`, `Makefile`).
    pub extensions: Vec<String>,
    /// Any path containing one of these substrings is skipped.
    pub excludes: Vec<String>,
}

impl Default for HashSpec {
    fn default() -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            roots: strings(&["crates", "src", "scripts", "docs"]),
            extensions: strings(&[
                ".rs",
                ".toml",
                ".json",
                ".yaml",
                ".yml",
                ".md",
                ".sh",
                ".txt",
                "Dockerfile",
                "Makefile",
            ]),
            excludes: strings(&[
                ".git",
                "target",
                "node_modules",
                "__pycache__",
                ".DS_Store",
                ".log",
                ".tmp",
                ".pid",
                "vendor",
                ".env",
                "._",
            ]),
        }
    }
}

impl HashSpec {
    pub fn is_excluded(&self, path: &str) -> bool {
        self.excludes.iter().any(|pattern| path.contains(pattern.as_str()))
    }

    pub fn has_included_suffix(&self, path: &str) -> bool {
        self.extensions.iter().any(|ext| path.ends_with(ext.as_str()))
    }

    /// Exclusion wins over inclusion.
    pub fn should_include(&self, path: &str) -> bool {
        !self.is_excluded(path) && self.has_included_suffix(path)
    }

    pub fn is_root(&self, name: &str) -> bool {
        self.roots.iter().any(|root| root == name)
    }
}

// ---------------------------------------------------------------------------
// Remote worker
// ---------------------------------------------------------------------------

/// Connection and job settings for one SSH-attached worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub id: String,
    pub host: String,
    /// Kept wider than `u16` so out-of-range values reach validation
    /// instead of failing deserialization with an opaque message.
    #[serde(default = "default_ssh_port")]
    pub port: u32,
    pub username: String,
    /// Never written back to disk.
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_path: Option<PathBuf>,
    #[serde(default = "default_remote_dir")]
    pub remote_dir: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_timeout_ms: Option<u64>,
    #[serde(default = "default_build_command")]
    pub build_command: String,
    /// Run inside `remote_dir`; `{input}`, `{output}` and `{hint}` are
    /// replaced with shell-quoted values.
    #[serde(default = "default_translate_command")]
    pub translate_command: String,
}

impl RemoteConfig {
    pub fn new(id: impl Into<String>, host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port: default_ssh_port(),
            username: username.into(),
            password: None,
            private_key_path: None,
            remote_dir: default_remote_dir(),
            connect_timeout_ms: default_connect_timeout_ms(),
            command_timeout_ms: None,
            build_command: default_build_command(),
            translate_command: default_translate_command(),
        }
    }

    /// Port narrowed to `u16`, rejecting 0 and anything above 65535.
    pub fn validated_port(&self) -> Result<u16, ConfigError> {
        match u16::try_from(self.port) {
            Ok(port) if port >= 1 => Ok(port),
            _ => Err(ConfigError::Invalid(format!(
                "invalid port number: {} (must be between 1 and 65535)",
                self.port
            ))),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_ms.map(Duration::from_millis)
    }
}

fn default_ssh_port() -> u32 {
    22
}

fn default_remote_dir() -> String {
    "/tmp/polyglot-worker".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    30_000
}

fn default_build_command() -> String {
    "cargo build --release".to_string()
}

fn default_translate_command() -> String {
    "./target/release/polyglot translate --file {input} --hint {hint} > {output}".to_string()
}
