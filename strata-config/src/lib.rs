//! Shared configuration loader for the strata toolchain.
//!
//! `defaults/strata.default.toml` is embedded into every binary so that
//! docs and runtime behavior stay in sync. Applications layer user-specific
//! files on top of those defaults via [`Loader`] before deserializing into
//! [`StrataConfig`].

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat, ValueKind};
use serde::Deserialize;
use std::path::Path;

use strata_engine::{BuildOptions, ValidationOptions};

const DEFAULT_TOML: &str = include_str!("../defaults/strata.default.toml");

/// Top-level configuration consumed by strata applications.
#[derive(Debug, Clone, Deserialize)]
pub struct StrataConfig {
    pub build: BuildConfig,
    pub workspace: WorkspaceConfig,
}

/// Mirrors the engine's build options in configuration-file form.
#[derive(Debug, Clone, Deserialize)]
pub struct BuildConfig {
    pub validate: bool,
    /// Empty means every category the validator registers.
    pub categories: Vec<String>,
    pub stop_after_linking_errors: bool,
    pub eager_linking: bool,
}

/// Controls directory scanning in batch front ends.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkspaceConfig {
    pub extension: String,
    pub follow_symlinks: bool,
}

impl StrataConfig {
    /// The engine options this configuration asks for.
    pub fn build_options(&self) -> BuildOptions {
        let validation = if self.build.validate {
            Some(ValidationOptions {
                categories: if self.build.categories.is_empty() {
                    None
                } else {
                    Some(self.build.categories.iter().cloned().collect())
                },
                stop_after_linking_errors: self.build.stop_after_linking_errors,
            })
        } else {
            None
        };
        BuildOptions {
            validation,
            eager_linking: self.build.eager_linking,
        }
    }
}

/// Helper for layering user overrides over the built-in defaults.
#[derive(Debug, Clone)]
pub struct Loader {
    builder: ConfigBuilder<DefaultState>,
}

impl Loader {
    /// Start a loader seeded with the embedded defaults.
    pub fn new() -> Self {
        let builder = Config::builder().add_source(File::from_str(DEFAULT_TOML, FileFormat::Toml));
        Self { builder }
    }

    /// Layer a configuration file. Missing files trigger an error.
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        let source = File::from(path.as_ref())
            .format(FileFormat::Toml)
            .required(true);
        self.builder = self.builder.add_source(source);
        self
    }

    /// Layer an optional configuration file (ignored if the file is absent).
    pub fn with_optional_file(mut self, path: impl AsRef<Path>) -> Self {
        let source = File::from(path.as_ref())
            .format(FileFormat::Toml)
            .required(false);
        self.builder = self.builder.add_source(source);
        self
    }

    /// Apply a single key/value override (useful for CLI settings).
    pub fn set_override<I>(mut self, key: &str, value: I) -> Result<Self, ConfigError>
    where
        I: Into<ValueKind>,
    {
        self.builder = self.builder.set_override(key, value)?;
        Ok(self)
    }

    /// Finalize the builder and deserialize the resulting configuration.
    pub fn build(self) -> Result<StrataConfig, ConfigError> {
        self.builder.build()?.try_deserialize()
    }
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience helper for callers that only need the defaults.
pub fn load_defaults() -> Result<StrataConfig, ConfigError> {
    Loader::new().build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_default_config() {
        let config = load_defaults().expect("defaults to deserialize");
        assert!(config.build.validate);
        assert!(config.build.categories.is_empty());
        assert_eq!(config.workspace.extension, "ntn");
    }

    #[test]
    fn default_build_options_validate_everything() {
        let config = load_defaults().expect("defaults to deserialize");
        let options = config.build_options();
        let validation = options.validation.expect("validation enabled");
        assert_eq!(validation.categories, None);
        assert!(options.eager_linking);
    }

    #[test]
    fn supports_overrides() {
        let config = Loader::new()
            .set_override("build.validate", false)
            .expect("override to apply")
            .build()
            .expect("config to build");
        assert!(!config.build.validate);
        assert!(config.build_options().validation.is_none());
    }

    #[test]
    fn explicit_categories_become_an_explicit_set() {
        let config = Loader::new()
            .set_override("build.categories", vec!["references"])
            .expect("override to apply")
            .build()
            .expect("config to build");
        let validation = config.build_options().validation.expect("validation on");
        let categories = validation.categories.expect("explicit categories");
        assert!(categories.contains("references"));
        assert_eq!(categories.len(), 1);
    }
}
