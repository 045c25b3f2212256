//! Layered configuration loading.
//!
//! Layers, lowest precedence first:
//! 1. `~/.lazyorm/config.toml`
//! 2. `<workspace>/.lazyorm/config.toml`
//! 3. [`ConfigOverrides`] from the command line
//!
//! File layers are merged as TOML tables before deserializing, so any key
//! a later file sets wins, including one that restates a default.

use crate::error::{ConfigError, FileOp};
use crate::{ConfigOverrides, OrmConfig};
use std::path::{Path, PathBuf};
use toml::{Table, Value};
use tracing::{debug, trace};

const CONFIG_DIR: &str = ".lazyorm";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Directory holding the per-user config, `~/.lazyorm` unless overridden
    global_dir: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            global_dir: dirs::home_dir().map(|home| home.join(CONFIG_DIR)),
        }
    }

    /// Use `dir` instead of `~/.lazyorm` for the per-user layer
    pub fn with_global_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            global_dir: Some(dir.into()),
        }
    }

    pub fn global_config_path(&self) -> Option<PathBuf> {
        self.global_dir.as_ref().map(|dir| dir.join(CONFIG_FILE))
    }

    pub fn local_config_path(&self, workspace_root: &Path) -> PathBuf {
        workspace_root.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Merge every layer for `workspace_root`, apply `overrides` and
    /// validate the result. Missing files are skipped.
    pub fn load(
        &self,
        workspace_root: &Path,
        overrides: Option<&ConfigOverrides>,
    ) -> Result<OrmConfig, ConfigError> {
        let layers = self
            .global_config_path()
            .into_iter()
            .chain(std::iter::once(self.local_config_path(workspace_root)));

        let mut merged = Table::new();
        for path in layers {
            match read_layer(&path)? {
                Some(layer) => {
                    debug!("Applying config layer {}", path.display());
                    merge_tables(&mut merged, layer);
                }
                None => trace!("No config at {}", path.display()),
            }
        }

        let mut config: OrmConfig = Value::Table(merged)
            .try_into()
            .map_err(ConfigError::Merge)?;
        if let Some(overrides) = overrides {
            config.apply_overrides(overrides);
        }
        config.validate()?;
        Ok(config)
    }

    /// Write `config` as the workspace's local layer, creating
    /// `.lazyorm/` if needed.
    pub fn save_local(&self, workspace_root: &Path, config: &OrmConfig) -> Result<(), ConfigError> {
        let path = self.local_config_path(workspace_root);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| ConfigError::io(FileOp::CreateDir, dir, e))?;
        }

        let content = toml::to_string_pretty(config)?;
        std::fs::write(&path, content).map_err(|e| ConfigError::io(FileOp::Write, &path, e))?;
        debug!("Saved config to {}", path.display());
        Ok(())
    }
}

/// Parse one layer. Each layer is type-checked on its own first so that a
/// bad value is reported against the file it came from.
fn read_layer(path: &Path) -> Result<Option<Table>, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ConfigError::io(FileOp::Read, path, e)),
    };

    toml::from_str::<OrmConfig>(&content).map_err(|e| ConfigError::parse(path, e))?;
    let table = content
        .parse::<Table>()
        .map_err(|e| ConfigError::parse(path, e))?;
    Ok(Some(table))
}

/// Recursively overlay `overlay` onto `base`; overlay keys win.
fn merge_tables(base: &mut Table, overlay: Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(Value::Table(existing)), Value::Table(nested)) => merge_tables(existing, nested),
            (Some(slot), value) => *slot = value,
            (None, value) => {
                base.insert(key, value);
            }
        }
    }
}
