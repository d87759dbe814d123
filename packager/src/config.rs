//! Packager configuration.
//!
//! [`PackagerConfig`] is built once at start-up and passed by reference to
//! every component. Its defaults describe the `psycounvdb` package; an
//! optional `abipack.toml` in the project directory, or a file named with
//! `--config`, overrides any field.

use crate::abi::AbiDescriptor;
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// File name looked up in the project directory when no `--config` is given.
pub const CONFIG_FILE_NAME: &str = "abipack.toml";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration {path}: {source}")]
    Read {
        /// Path of the configuration file.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for this schema.
    #[error("invalid configuration {path}: {source}")]
    Parse {
        /// Path of the configuration file.
        path: Utf8PathBuf,
        /// The underlying parse error.
        #[source]
        source: toml::de::Error,
    },

    /// A field holds a value the packager cannot use.
    #[error("invalid configuration value for {field}: {reason}")]
    Invalid {
        /// Dotted path of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

/// The complete, immutable packager configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PackagerConfig {
    /// What is being packaged.
    pub package: PackageSettings,
    /// Where inputs and outputs live, relative to the project directory.
    pub paths: PathSettings,
    /// The upstream distribution that supplies the shared libraries.
    pub upstream: UpstreamSettings,
    /// Bounded waits for subprocesses.
    pub timeouts: Timeouts,
    /// Verifier settings.
    pub verify: VerifySettings,
}

/// Identity and layout of the produced package.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PackageSettings {
    /// Importable package name and package directory.
    pub name: String,
    /// Package version embedded in the archive name.
    pub version: String,
    /// Stem of the compiled extension module, e.g. `_psycounvdb`.
    pub native_module: String,
    /// Platform label embedded in the archive name.
    pub platform: String,
    /// ABIs to collect, oldest first.
    pub abis: Vec<AbiDescriptor>,
    /// Name of the private shared-library directory inside the archive.
    pub private_lib_dir: String,
    /// Glob selecting per-platform subdirectories of the build output.
    pub build_subdir_pattern: String,
}

impl Default for PackageSettings {
    fn default() -> Self {
        Self {
            name: "psycounvdb".to_owned(),
            version: "2.9.11".to_owned(),
            native_module: "_psycounvdb".to_owned(),
            platform: "linux-x86_64".to_owned(),
            abis: (8..=14).map(|minor| AbiDescriptor::new(3, minor)).collect(),
            private_lib_dir: "psycounvdb_binary.libs".to_owned(),
            build_subdir_pattern: "lib.linux-*".to_owned(),
        }
    }
}

/// Project-relative input and output locations.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathSettings {
    /// Root of the compiled build output.
    pub build_dir: Utf8PathBuf,
    /// Directory holding the plain `*.py` source modules.
    pub source_dir: Utf8PathBuf,
    /// Directory receiving the finished archive.
    pub dist_dir: Utf8PathBuf,
    /// Parent of the temporary build workspace; the system temporary
    /// directory when unset.
    pub staging_dir: Option<Utf8PathBuf>,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            build_dir: Utf8PathBuf::from("build"),
            source_dir: Utf8PathBuf::from("lib"),
            dist_dir: Utf8PathBuf::from("dist"),
            staging_dir: None,
        }
    }
}

impl PathSettings {
    /// Resolve the build output root against `project_dir`.
    #[must_use]
    pub fn build_root(&self, project_dir: &Utf8Path) -> Utf8PathBuf {
        project_dir.join(&self.build_dir)
    }

    /// Resolve the source module directory against `project_dir`.
    #[must_use]
    pub fn source_root(&self, project_dir: &Utf8Path) -> Utf8PathBuf {
        project_dir.join(&self.source_dir)
    }

    /// Resolve the archive output directory against `project_dir`.
    #[must_use]
    pub fn dist_root(&self, project_dir: &Utf8Path) -> Utf8PathBuf {
        project_dir.join(&self.dist_dir)
    }

    /// Resolve the staging parent against `project_dir`, if one is set.
    #[must_use]
    pub fn staging_root(&self, project_dir: &Utf8Path) -> Option<Utf8PathBuf> {
        self.staging_dir.as_ref().map(|dir| project_dir.join(dir))
    }
}

/// The upstream binary distribution.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpstreamSettings {
    /// Distribution name on the package index.
    pub name: String,
    /// Distribution version to fetch.
    pub version: String,
    /// The single ABI whose archive supplies the shared libraries.
    pub reference_abi: AbiDescriptor,
    /// Platform tag passed to the downloader.
    pub platform_tag: String,
    /// Archive path prefixes that mark bundled shared libraries.
    pub lib_markers: Vec<String>,
    /// A local archive to use instead of fetching one.
    pub archive: Option<Utf8PathBuf>,
    /// Interpreter used to run the downloader.
    pub python: Utf8PathBuf,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            name: "psycopg2-binary".to_owned(),
            version: "2.9.10".to_owned(),
            reference_abi: AbiDescriptor::new(3, 8),
            platform_tag: "manylinux_2_17_x86_64".to_owned(),
            lib_markers: vec![
                "psycopg2_binary.libs/".to_owned(),
                "psycopg2.libs/".to_owned(),
            ],
            archive: None,
            python: Utf8PathBuf::from("python3"),
        }
    }
}

impl UpstreamSettings {
    /// The file name prefix of a downloaded archive for the reference ABI,
    /// e.g. `psycopg2_binary-2.9.10-cp38`.
    #[must_use]
    pub fn archive_prefix(&self) -> String {
        format!(
            "{}-{}-{}",
            self.name.replace('-', "_"),
            self.version,
            self.reference_abi
        )
    }
}

/// Subprocess time limits, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Timeouts {
    /// Upstream archive download.
    pub download_secs: u64,
    /// Isolated environment creation.
    pub provision_secs: u64,
    /// Each interpreter probe.
    pub probe_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            download_secs: 300,
            provision_secs: 120,
            probe_secs: 60,
        }
    }
}

impl Timeouts {
    /// Upstream download limit.
    #[must_use]
    pub fn download(&self) -> Duration {
        Duration::from_secs(self.download_secs)
    }

    /// Environment provisioning limit.
    #[must_use]
    pub fn provision(&self) -> Duration {
        Duration::from_secs(self.provision_secs)
    }

    /// Interpreter probe limit.
    #[must_use]
    pub fn probe(&self) -> Duration {
        Duration::from_secs(self.probe_secs)
    }
}

/// Runtime discovery and backend settings for the verifier.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VerifySettings {
    /// The fixed system interpreter, always verified.
    pub system_interpreter: Utf8PathBuf,
    /// Root of the managed interpreter installations. Defaults to
    /// `$PYENV_ROOT`, then `~/.pyenv`.
    pub runtimes_root: Option<Utf8PathBuf>,
    /// The live backend used by the connectivity probe.
    pub database: DatabaseSettings,
}

impl Default for VerifySettings {
    fn default() -> Self {
        Self {
            system_interpreter: Utf8PathBuf::from("/usr/local/python3.8/bin/python3"),
            runtimes_root: None,
            database: DatabaseSettings::default(),
        }
    }
}

impl VerifySettings {
    /// The managed-runtime root, falling back to `$PYENV_ROOT` or
    /// `~/.pyenv` when not configured.
    #[must_use]
    pub fn resolved_runtimes_root(&self) -> Option<Utf8PathBuf> {
        if let Some(root) = &self.runtimes_root {
            return Some(root.clone());
        }
        if let Some(root) = std::env::var_os("PYENV_ROOT")
            .and_then(|value| Utf8PathBuf::from_path_buf(value.into()).ok())
        {
            return Some(root);
        }
        directories_next::BaseDirs::new()
            .and_then(|dirs| Utf8PathBuf::from_path_buf(dirs.home_dir().join(".pyenv")).ok())
    }
}

/// Connection parameters for the connectivity probe.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseSettings {
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Database name.
    pub database: String,
    /// Login role.
    pub user: String,
    /// Login password.
    pub password: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: 5432,
            database: "postgres".to_owned(),
            user: "postgres".to_owned(),
            password: String::new(),
        }
    }
}

impl PackagerConfig {
    /// Load configuration for `project_dir`.
    ///
    /// An explicit `config_path` must exist. Otherwise `abipack.toml` in the
    /// project directory is used when present, and the defaults when not.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read or parsed, or
    /// when validation fails.
    pub fn load(project_dir: &Utf8Path, config_path: Option<&Utf8Path>) -> Result<Self, ConfigError> {
        let path = match config_path {
            Some(path) => Some(path.to_owned()),
            None => Some(project_dir.join(CONFIG_FILE_NAME)).filter(|p| p.is_file()),
        };
        let config = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(&path).map_err(|source| {
                    ConfigError::Read {
                        path: path.clone(),
                        source,
                    }
                })?;
                log::debug!("loaded configuration from {path}");
                Self::from_toml(&contents).map_err(|source| ConfigError::Parse { path, source })?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text without validating it.
    ///
    /// # Errors
    ///
    /// Returns the TOML error for malformed input or unknown fields.
    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason: &str| ConfigError::Invalid {
            field,
            reason: reason.to_owned(),
        };
        let package = &self.package;
        if package.name.is_empty() || package.name.contains(['/', '\\']) {
            return Err(invalid("package.name", "must be a plain directory name"));
        }
        if package.version.is_empty() {
            return Err(invalid("package.version", "must not be empty"));
        }
        if package.native_module.is_empty() {
            return Err(invalid("package.native_module", "must not be empty"));
        }
        if package.abis.is_empty() {
            return Err(invalid("package.abis", "must list at least one ABI"));
        }
        if package.private_lib_dir.is_empty() || package.private_lib_dir.contains(['/', '\\']) {
            return Err(invalid(
                "package.private_lib_dir",
                "must be a plain directory name",
            ));
        }
        if package.private_lib_dir == package.name {
            return Err(invalid(
                "package.private_lib_dir",
                "must differ from the package directory",
            ));
        }
        if self.upstream.lib_markers.is_empty() {
            return Err(invalid("upstream.lib_markers", "must list at least one marker"));
        }
        for marker in &self.upstream.lib_markers {
            if !marker.ends_with('/') || marker.len() < 2 {
                return Err(invalid(
                    "upstream.lib_markers",
                    "markers must be directory prefixes ending in '/'",
                ));
            }
            if marker.trim_end_matches('/') == package.private_lib_dir {
                return Err(invalid(
                    "package.private_lib_dir",
                    "must not collide with an upstream library directory",
                ));
            }
        }
        let timeouts = &self.timeouts;
        if timeouts.download_secs == 0 || timeouts.provision_secs == 0 || timeouts.probe_secs == 0 {
            return Err(invalid("timeouts", "must be greater than zero"));
        }
        Ok(())
    }

    /// The runpath every extension module is patched to.
    #[must_use]
    pub fn module_runpath(&self) -> String {
        format!("$ORIGIN/../{}", self.package.private_lib_dir)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
