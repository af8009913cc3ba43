//! Layered configuration loading with provenance.
//!
//! The priority chain (later overrides earlier):
//! 1. Built-in defaults ([`TallyConfig::default()`])
//! 2. User-level: `~/.tally/config.toml`
//! 3. Workspace-level: `./.tally/config.toml`
//! 4. `TALLY_*` environment variables (`__` separates nested sections)
//!
//! Each key in the final [`EffectiveConfig`] is annotated with the
//! [`ConfigSource`] that determined its value.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::config::{TallyConfig, CONFIG_FILENAME};
use crate::TallyError;

/// Maximum config file size in bytes.
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

/// Where a configuration value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    BuiltinDefault,
    UserFile(PathBuf),
    WorkspaceFile(PathBuf),
    EnvVar(String),
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::BuiltinDefault => write!(f, "built-in default"),
            ConfigSource::UserFile(p) => write!(f, "user file: {}", p.display()),
            ConfigSource::WorkspaceFile(p) => write!(f, "workspace file: {}", p.display()),
            ConfigSource::EnvVar(name) => write!(f, "env var: {name}"),
        }
    }
}

/// The merged config plus provenance for each dotted key path.
#[derive(Debug, Clone)]
pub struct EffectiveConfig {
    pub config: TallyConfig,
    /// Dotted key path (e.g. `rate_limit.capacity`) -> source.
    pub sources: HashMap<String, ConfigSource>,
    /// Config files that were found and loaded, in priority order.
    pub source_files: Vec<PathBuf>,
}

/// How an environment variable's text is converted to TOML.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvKind {
    Integer,
    Text,
}

/// A supported environment variable override.
pub struct EnvMapping {
    pub env_var: &'static str,
    pub toml_path: &'static [&'static str],
    pub kind: EnvKind,
}

/// All supported `TALLY_*` environment variables.
pub const ENV_MAPPINGS: &[EnvMapping] = &[
    EnvMapping {
        env_var: "TALLY_RATE_LIMIT__WINDOW_SECS",
        toml_path: &["rate_limit", "window_secs"],
        kind: EnvKind::Integer,
    },
    EnvMapping {
        env_var: "TALLY_RATE_LIMIT__CAPACITY",
        toml_path: &["rate_limit", "capacity"],
        kind: EnvKind::Integer,
    },
    EnvMapping {
        env_var: "TALLY_RATE_LIMIT__REDIS_URL",
        toml_path: &["rate_limit", "redis_url"],
        kind: EnvKind::Text,
    },
    EnvMapping {
        env_var: "TALLY_CACHE__LOCAL_CAPACITY",
        toml_path: &["cache", "local_capacity"],
        kind: EnvKind::Integer,
    },
    EnvMapping {
        env_var: "TALLY_CACHE__DEFAULT_TTL_SECS",
        toml_path: &["cache", "default_ttl_secs"],
        kind: EnvKind::Integer,
    },
    EnvMapping {
        env_var: "TALLY_CACHE__REDIS_URL",
        toml_path: &["cache", "redis_url"],
        kind: EnvKind::Text,
    },
    EnvMapping {
        env_var: "TALLY_CACHE__KEY_PREFIX",
        toml_path: &["cache", "key_prefix"],
        kind: EnvKind::Text,
    },
    EnvMapping {
        env_var: "TALLY_AUDIT__DB_PATH",
        toml_path: &["audit", "db_path"],
        kind: EnvKind::Text,
    },
    EnvMapping {
        env_var: "TALLY_AUDIT__CHANNEL_CAPACITY",
        toml_path: &["audit", "channel_capacity"],
        kind: EnvKind::Integer,
    },
    EnvMapping {
        env_var: "TALLY_AUDIT__BATCH_SIZE",
        toml_path: &["audit", "batch_size"],
        kind: EnvKind::Integer,
    },
    EnvMapping {
        env_var: "TALLY_TASKS__QUEUE_CAPACITY",
        toml_path: &["tasks", "queue_capacity"],
        kind: EnvKind::Integer,
    },
];

/// Layered configuration loader.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    user_config_path: Option<PathBuf>,
    workspace_config_path: Option<PathBuf>,
    /// Replaces the process environment when set (tests).
    env: Option<HashMap<String, String>>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_user_path(mut self, path: PathBuf) -> Self {
        self.user_config_path = Some(path);
        self
    }

    #[must_use]
    pub fn with_workspace_path(mut self, path: PathBuf) -> Self {
        self.workspace_config_path = Some(path);
        self
    }

    /// Read overrides from `vars` instead of the process environment.
    #[must_use]
    pub fn with_env(mut self, vars: HashMap<String, String>) -> Self {
        self.env = Some(vars);
        self
    }

    fn user_path(&self) -> PathBuf {
        self.user_config_path.clone().unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
            PathBuf::from(home).join(".tally").join(CONFIG_FILENAME)
        })
    }

    fn workspace_path(&self) -> PathBuf {
        self.workspace_config_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(".tally").join(CONFIG_FILENAME))
    }

    fn env_var(&self, name: &str) -> Option<String> {
        match &self.env {
            Some(vars) => vars.get(name).cloned(),
            None => std::env::var(name).ok(),
        }
    }

    /// Load and merge configuration from all sources.
    pub fn load(&self) -> Result<EffectiveConfig, TallyError> {
        let mut sources = HashMap::new();
        let mut source_files = Vec::new();

        let mut merged = toml::Value::try_from(TallyConfig::default())
            .map_err(|e| TallyError::ConfigError(format!("failed to serialize defaults: {e}")))?;
        record_sources(&merged, &mut sources, ConfigSource::BuiltinDefault);

        let user_path = self.user_path();
        if user_path.exists() {
            let layer = read_layer(&user_path)?;
            deep_merge(&mut merged, &layer);
            record_sources(&layer, &mut sources, ConfigSource::UserFile(user_path.clone()));
            source_files.push(user_path);
        }

        let workspace_path = self.workspace_path();
        if workspace_path.exists() {
            let layer = read_layer(&workspace_path)?;
            deep_merge(&mut merged, &layer);
            record_sources(
                &layer,
                &mut sources,
                ConfigSource::WorkspaceFile(workspace_path.clone()),
            );
            source_files.push(workspace_path);
        }

        for mapping in ENV_MAPPINGS {
            let Some(raw) = self.env_var(mapping.env_var) else {
                continue;
            };
            let value = env_value_to_toml(mapping, &raw)?;
            set_nested_value(&mut merged, mapping.toml_path, value);
            sources.insert(
                mapping.toml_path.join("."),
                ConfigSource::EnvVar(mapping.env_var.to_string()),
            );
        }

        let config: TallyConfig = merged
            .try_into()
            .map_err(|e| TallyError::ConfigError(format!("failed to parse merged config: {e}")))?;
        config.validate()?;

        Ok(EffectiveConfig {
            config,
            sources,
            source_files,
        })
    }
}

/// Read a config file with size and content checks, then parse it as TOML.
fn read_layer(path: &Path) -> Result<toml::Value, TallyError> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        TallyError::ConfigError(format!("cannot read config file {}: {e}", path.display()))
    })?;
    if metadata.len() > MAX_CONFIG_FILE_SIZE {
        return Err(TallyError::ConfigError(format!(
            "config file {} exceeds maximum size of {MAX_CONFIG_FILE_SIZE} bytes",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(path).map_err(|e| {
        TallyError::ConfigError(format!("cannot read config file {}: {e}", path.display()))
    })?;
    if content.contains('\0') {
        return Err(TallyError::ConfigError(format!(
            "config file {} contains null bytes",
            path.display()
        )));
    }

    toml::from_str(&content)
        .map_err(|e| TallyError::ConfigError(format!("invalid config {}: {e}", path.display())))
}

/// Deep-merge `overlay` into `base`. Tables merge key by key; anything else
/// is replaced wholesale.
fn deep_merge(base: &mut toml::Value, overlay: &toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                match base_table.get_mut(key) {
                    Some(base_val) => deep_merge(base_val, overlay_val),
                    None => {
                        base_table.insert(key.clone(), overlay_val.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

/// Record `source` for every (nested) key present in `layer`.
fn record_sources(
    layer: &toml::Value,
    sources: &mut HashMap<String, ConfigSource>,
    source: ConfigSource,
) {
    fn walk(
        value: &toml::Value,
        prefix: Option<&str>,
        sources: &mut HashMap<String, ConfigSource>,
        source: &ConfigSource,
    ) {
        if let toml::Value::Table(table) = value {
            for (key, val) in table {
                let path = match prefix {
                    Some(p) => format!("{p}.{key}"),
                    None => key.clone(),
                };
                sources.insert(path.clone(), source.clone());
                walk(val, Some(&path), sources, source);
            }
        }
    }
    walk(layer, None, sources, &source);
}

fn env_value_to_toml(mapping: &EnvMapping, raw: &str) -> Result<toml::Value, TallyError> {
    if raw.chars().any(|c| c.is_control()) {
        return Err(TallyError::ConfigError(format!(
            "environment variable {} contains control characters",
            mapping.env_var
        )));
    }
    match mapping.kind {
        EnvKind::Text => Ok(toml::Value::String(raw.to_string())),
        EnvKind::Integer => raw
            .trim()
            .parse::<i64>()
            .map(toml::Value::Integer)
            .map_err(|_| {
                TallyError::ConfigError(format!(
                    "environment variable {} must be an integer, got {raw:?}",
                    mapping.env_var
                ))
            }),
    }
}

fn set_nested_value(root: &mut toml::Value, path: &[&str], value: toml::Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut current = root;
    for segment in parents {
        let toml::Value::Table(table) = current else {
            return;
        };
        current = table
            .entry(segment.to_string())
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
    }
    if let toml::Value::Table(table) = current {
        table.insert(last.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn isolated_loader(dir: &TempDir) -> ConfigLoader {
        ConfigLoader::new()
            .with_user_path(dir.path().join("user.toml"))
            .with_workspace_path(dir.path().join("workspace.toml"))
            .with_env(HashMap::new())
    }

    #[test]
    fn defaults_when_nothing_present() {
        let dir = TempDir::new().unwrap();
        let effective = isolated_loader(&dir).load().unwrap();
        assert_eq!(effective.config, TallyConfig::default());
        assert!(effective.source_files.is_empty());
        assert_eq!(
            effective.sources.get("rate_limit.capacity"),
            Some(&ConfigSource::BuiltinDefault)
        );
    }

    #[test]
    fn workspace_overrides_user() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("user.toml"),
            "[rate_limit]\ncapacity = 5\nwindow_secs = 60\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("workspace.toml"), "[rate_limit]\ncapacity = 7\n").unwrap();

        let effective = isolated_loader(&dir).load().unwrap();
        assert_eq!(effective.config.rate_limit.capacity, 7);
        assert_eq!(effective.config.rate_limit.window_secs, 60);
        assert_eq!(effective.source_files.len(), 2);
        assert!(matches!(
            effective.sources.get("rate_limit.capacity"),
            Some(ConfigSource::WorkspaceFile(_))
        ));
        assert!(matches!(
            effective.sources.get("rate_limit.window_secs"),
            Some(ConfigSource::UserFile(_))
        ));
    }

    #[test]
    fn env_overrides_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("workspace.toml"),
            "[cache]\nlocal_capacity = 50\n",
        )
        .unwrap();
        let env = HashMap::from([
            ("TALLY_CACHE__LOCAL_CAPACITY".to_string(), "99".to_string()),
            (
                "TALLY_CACHE__REDIS_URL".to_string(),
                "redis://cache:6379/".to_string(),
            ),
        ]);

        let effective = isolated_loader(&dir).with_env(env).load().unwrap();
        assert_eq!(effective.config.cache.local_capacity, 99);
        assert_eq!(
            effective.config.cache.redis_url.as_deref(),
            Some("redis://cache:6379/")
        );
        assert_eq!(
            effective.sources.get("cache.local_capacity"),
            Some(&ConfigSource::EnvVar("TALLY_CACHE__LOCAL_CAPACITY".into()))
        );
    }

    #[test]
    fn non_numeric_env_rejected() {
        let dir = TempDir::new().unwrap();
        let env = HashMap::from([(
            "TALLY_RATE_LIMIT__CAPACITY".to_string(),
            "lots".to_string(),
        )]);
        let err = isolated_loader(&dir).with_env(env).load().unwrap_err();
        assert!(err.to_string().contains("must be an integer"), "got: {err}");
    }

    #[test]
    fn null_bytes_rejected() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("user.toml"), "[cache]\0").unwrap();
        let err = isolated_loader(&dir).load().unwrap_err();
        assert!(err.to_string().contains("null bytes"), "got: {err}");
    }

    #[test]
    fn invalid_merged_values_fail_validation() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("workspace.toml"), "[tasks]\nqueue_capacity = 0\n").unwrap();
        assert!(isolated_loader(&dir).load().is_err());
    }
}
