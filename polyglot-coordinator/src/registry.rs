//! Backend discovery from environment credentials and configured remotes.
//!
//! Discovery reads the environment through a lookup function so it stays a
//! pure function of its inputs; nothing is contacted or mutated here.

use std::path::PathBuf;
use std::sync::Arc;

use polyglot_core::{
    CoordinatorSettings, EventSink, Provider, ProviderSpec, RemoteConfig, Translate,
};
use polyglot_remote::{MonitoredShell, RemoteShell, SshWorker};

use crate::instance::Instance;
use crate::providers::{
    llamacpp, AnthropicClient, ChatCompletionsClient, LlamaCppRunner, OllamaClient, SshTranslator,
};

pub const SKIP_LLAMACPP_PROBE: &str = "POLYGLOT_SKIP_LLAMACPP_PROBE";
pub const LLAMACPP_BINARY: &str = "LLAMACPP_BINARY";

/// Environment lookup, `std::env::var(..).ok()` in production.
pub type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// A provider that passed discovery, before instances are built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredProvider {
    pub provider: Provider,
    pub model: String,
    pub credential: Option<String>,
    pub base_url: Option<String>,
    pub binary: Option<PathBuf>,
}

fn non_empty(env: EnvLookup<'_>, key: &str) -> Option<String> {
    env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Which providers from `table` are usable in this environment.
///
/// SSH rows are handled by [`ssh_remotes`] because they carry a whole
/// connection description rather than a single credential.
pub fn discover_providers(table: &[ProviderSpec], env: EnvLookup<'_>) -> Vec<DiscoveredProvider> {
    let mut found = Vec::new();
    for spec in table {
        if spec.provider == Provider::Ssh {
            continue;
        }
        let credential = spec.credential_env.as_deref().and_then(|k| non_empty(env, k));
        let enabled = match (&spec.credential_env, &spec.enable_env) {
            (Some(_), _) => credential.is_some(),
            (None, Some(flag)) => non_empty(env, flag).is_some_and(|v| is_truthy(&v)),
            (None, None) => false,
        };
        if !enabled {
            continue;
        }

        let binary = if spec.provider == Provider::LlamaCpp {
            match llamacpp_binary(env) {
                Some(binary) => Some(binary),
                None => {
                    tracing::warn!("llama.cpp model configured but no binary found");
                    continue;
                }
            }
        } else {
            None
        };

        let model = spec
            .model_env
            .as_deref()
            .and_then(|k| non_empty(env, k))
            .unwrap_or_else(|| spec.default_model.clone());

        found.push(DiscoveredProvider {
            provider: spec.provider,
            model,
            credential,
            base_url: spec.base_url.clone(),
            binary,
        });
    }
    found
}

fn llamacpp_binary(env: EnvLookup<'_>) -> Option<PathBuf> {
    if let Some(explicit) = non_empty(env, LLAMACPP_BINARY) {
        return Some(PathBuf::from(explicit));
    }
    if non_empty(env, SKIP_LLAMACPP_PROBE).is_some_and(|v| is_truthy(&v)) {
        return None;
    }
    non_empty(env, "PATH").and_then(|path| llamacpp::find_on_path(&path))
}

/// Configured remotes plus the one described by `SSH_WORKER_*`, if any.
pub fn ssh_remotes(table: &[ProviderSpec], configured: &[RemoteConfig], env: EnvLookup<'_>) -> Vec<RemoteConfig> {
    let mut remotes = configured.to_vec();
    let ssh_row = table.iter().find(|s| s.provider == Provider::Ssh);
    let host_env = ssh_row
        .and_then(|s| s.credential_env.as_deref())
        .unwrap_or("SSH_WORKER_HOST");

    if let Some(host) = non_empty(env, host_env) {
        let user = non_empty(env, "SSH_WORKER_USER").unwrap_or_else(|| "root".to_string());
        let mut remote = RemoteConfig::new("env", host, user);
        remote.password = non_empty(env, "SSH_WORKER_PASSWORD");
        remote.private_key_path = non_empty(env, "SSH_PRIVATE_KEY_PATH").map(PathBuf::from);
        if let Some(port) = non_empty(env, "SSH_WORKER_PORT") {
            match port.parse() {
                Ok(port) => remote.port = port,
                Err(_) => tracing::warn!(value = %port, "ignoring unparseable SSH_WORKER_PORT"),
            }
        }
        if let Some(dir) = non_empty(env, "SSH_WORKER_REMOTE_DIR") {
            remote.remote_dir = dir;
        }
        if !remotes.iter().any(|r| r.id == remote.id) {
            remotes.push(remote);
        }
    }
    remotes
}

/// Build the instance pool.
///
/// Each discovered provider yields `instances_per_provider` instances with
/// ids numbered sequentially across the pool (`openai-1`, `openai-2`,
/// `anthropic-3`, ...). Each remote yields one instance `ssh-<remote id>`
/// that starts uncertified; with `events` set, its translation commands
/// are reported there under `settings.session_id`.
pub fn build_instances(
    discovered: &[DiscoveredProvider],
    remotes: &[RemoteConfig],
    settings: &CoordinatorSettings,
    events: Option<&Arc<dyn EventSink>>,
) -> Vec<Instance> {
    let mut instances = Vec::new();
    let mut next_id = 1;
    for found in discovered {
        for _ in 0..settings.instances_per_provider.max(1) {
            let Some(backend) = backend_for(found) else {
                continue;
            };
            let id = format!("{}-{next_id}", found.provider);
            next_id += 1;
            instances.push(Instance::new(id, found.provider, found.model.clone(), backend));
        }
    }

    for remote in remotes {
        let worker = Arc::new(SshWorker::new(remote.clone()));
        let shell: Arc<dyn RemoteShell> = match events {
            Some(sink) => Arc::new(MonitoredShell::new(
                worker.clone(),
                sink.clone(),
                settings.session_id.clone(),
            )),
            None => worker.clone(),
        };
        let backend = Arc::new(SshTranslator::new(shell, remote));
        instances.push(Instance::remote(
            format!("ssh-{}", remote.id),
            "remote",
            backend,
            worker,
        ));
    }
    instances
}

fn backend_for(found: &DiscoveredProvider) -> Option<Arc<dyn Translate>> {
    let base_url = found.base_url.clone().unwrap_or_default();
    let key = found.credential.clone().unwrap_or_default();
    let backend: Arc<dyn Translate> = match found.provider {
        Provider::OpenAi | Provider::Zhipu | Provider::DeepSeek => Arc::new(
            ChatCompletionsClient::new(found.provider, base_url, key, found.model.clone()),
        ),
        Provider::Anthropic => Arc::new(AnthropicClient::new(base_url, key, found.model.clone())),
        Provider::Ollama => Arc::new(OllamaClient::new(base_url, found.model.clone())),
        Provider::LlamaCpp => {
            let binary = found.binary.clone()?;
            Arc::new(LlamaCppRunner::new(binary, key))
        }
        Provider::Ssh => return None,
    };
    Some(backend)
}

/// Discovery against the real environment.
pub fn discover_from_env(
    table: &[ProviderSpec],
    remotes: &[RemoteConfig],
    settings: &CoordinatorSettings,
    events: Option<&Arc<dyn EventSink>>,
) -> Vec<Instance> {
    let env = process_env;
    let discovered = discover_providers(table, &env);
    let remotes = ssh_remotes(table, remotes, &env);
    build_instances(&discovered, &remotes, settings, events)
}
