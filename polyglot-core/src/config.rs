//! YAML configuration at `~/.polyglot/config.yaml`.
//!
//! # API pattern
//!
//! Every function has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Credentials never live here; discovery reads them from the environment.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{io_err, ConfigError};
use crate::types::{CoordinatorSettings, HashSpec, ProviderSpec, RemoteConfig};

pub const CONFIG_FILE: &str = "config.yaml";

/// On-disk configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolyglotConfig {
    #[serde(default)]
    pub coordinator: CoordinatorSettings,
    #[serde(default)]
    pub hash: HashSpec,
    #[serde(default)]
    pub remotes: Vec<RemoteConfig>,
    /// Replaces the built-in provider table when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub providers: Option<Vec<ProviderSpec>>,
}

impl PolyglotConfig {
    pub fn provider_table(&self) -> Vec<ProviderSpec> {
        self.providers
            .clone()
            .unwrap_or_else(ProviderSpec::default_table)
    }

    pub fn remote(&self, id: &str) -> Option<&RemoteConfig> {
        self.remotes.iter().find(|r| r.id == id)
    }

    /// Range checks that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for remote in &self.remotes {
            remote.validated_port()?;
            if remote.remote_dir.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "remote '{}' has an empty remote_dir",
                    remote.id
                )));
            }
        }
        let mut ids: Vec<&str> = self.remotes.iter().map(|r| r.id.as_str()).collect();
        ids.sort_unstable();
        if let Some(pair) = ids.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(ConfigError::Invalid(format!(
                "duplicate remote id '{}'",
                pair[0]
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// `<home>/.polyglot/`
pub fn polyglot_root(home: &Path) -> PathBuf {
    home.join(".polyglot")
}

/// `<home>/.polyglot/config.yaml`: pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    polyglot_root(home).join(CONFIG_FILE)
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// Load and validate the config under `home`.
///
/// Returns [`PolyglotConfig::default`] if the file does not yet exist.
pub fn load_at(home: &Path) -> Result<PolyglotConfig, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(PolyglotConfig::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    let config: PolyglotConfig =
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })?;
    config.validate()?;
    Ok(config)
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<PolyglotConfig, ConfigError> {
    load_at(&home()?)
}

/// Atomically save the config: `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, config: &PolyglotConfig) -> Result<(), ConfigError> {
    config.validate()?;
    let dir = polyglot_root(home);
    std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;

    let path = config_path_at(home);
    let tmp = path.with_extension("yaml.tmp");
    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
    set_file_permissions(&tmp)?;
    if let Err(e) = std::fs::rename(&tmp, &path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(&path, e));
    }
    Ok(())
}

/// `save_at` convenience wrapper.
pub fn save(config: &PolyglotConfig) -> Result<(), ConfigError> {
    save_at(&home()?, config)
}

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}
