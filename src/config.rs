//! YAML configuration: which effects to run, in which order, and an optional
//! extra WGSL library.

use crate::effect::{default_effects, Effect, EffectDescriptor};
use crate::error::LibraryError;
use crate::shader::ProgramLibrary;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error(transparent)]
    Library(#[from] LibraryError),
}

/// A built-in effect, optionally renamed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuiltinEntry {
    pub effect: Effect,
    #[serde(default)]
    pub name: Option<String>,
}

/// Any kernel of the loaded library under a display name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KernelEntry {
    pub kernel: String,
    pub name: String,
}

/// One configured effect. An entry mixing both forms is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum EffectEntry {
    Builtin(BuiltinEntry),
    Kernel(KernelEntry),
}

impl EffectEntry {
    pub fn descriptor(&self) -> EffectDescriptor {
        match self {
            EffectEntry::Builtin(BuiltinEntry { effect, name: Some(name) }) => effect.named(name.clone()),
            EffectEntry::Builtin(BuiltinEntry { effect, name: None }) => effect.descriptor(),
            EffectEntry::Kernel(KernelEntry { kernel, name }) => EffectDescriptor::new(kernel.clone(), name.clone()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Config {
    /// Extra WGSL library, relative to the config file.
    #[serde(default)]
    pub library: Option<PathBuf>,
    /// Effects in display order. Empty means the built-in defaults.
    #[serde(default)]
    pub effects: Vec<EffectEntry>,
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::from_yaml(&content)?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn descriptors(&self) -> Vec<EffectDescriptor> {
        if self.effects.is_empty() {
            return default_effects();
        }
        self.effects.iter().map(EffectEntry::descriptor).collect()
    }

    /// Built-in kernels plus the configured library, which shadows them.
    pub fn load_library(&self) -> Result<ProgramLibrary, ConfigError> {
        let mut library = ProgramLibrary::builtin()?;
        if let Some(extra) = &self.library {
            let path = match &self.base_dir {
                Some(base) if extra.is_relative() => base.join(extra),
                _ => extra.clone(),
            };
            library.add_file(&path)?;
        }
        Ok(library)
    }
}
