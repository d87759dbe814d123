//! Error types for the packager.
//!
//! Precondition failures stop the build and carry the remediation an
//! operator needs. Degraded conditions (missing upstream libraries, modules
//! that could not be patched) are reported through the build report instead
//! and never surface here.

use crate::config::ConfigError;
use crate::extractor::ExtractionError;
use camino::Utf8PathBuf;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that stop a build or verification run.
#[derive(Debug, Error)]
pub enum PackagerError {
    /// The build output root does not exist.
    #[error("build directory {path} does not exist; compile every ABI first:\n{remediation}")]
    BuildOutputMissing {
        /// The expected build output root.
        path: Utf8PathBuf,
        /// One build command per declared ABI.
        remediation: String,
    },

    /// No compiled extension module matched any declared ABI.
    #[error("no compiled extension modules found under {build_root}; compile every ABI first:\n{remediation}")]
    NoExtensionModules {
        /// The searched build output root.
        build_root: Utf8PathBuf,
        /// One build command per declared ABI.
        remediation: String,
    },

    /// Every collected module failed its runpath rewrite.
    #[error("no extension module could be patched:\n{details}")]
    NoPatchableModules {
        /// One line per excluded module.
        details: String,
    },

    /// The archive handed to the verifier does not exist.
    #[error("package archive {path} not found")]
    ArchiveMissing {
        /// The archive path that was checked.
        path: Utf8PathBuf,
    },

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A package archive could not be read or written.
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// The upstream archive could not be unpacked.
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    /// Walking the staging tree failed.
    #[error("failed to walk staging tree: {0}")]
    Walk(#[from] walkdir::Error),

    /// A glob pattern built from configuration is invalid.
    #[error("invalid file pattern {pattern:?}: {reason}")]
    Pattern {
        /// The rejected pattern.
        pattern: String,
        /// The parser's explanation.
        reason: String,
    },

    /// A path on disk is not valid UTF-8.
    #[error("path is not valid UTF-8: {}", path.display())]
    NonUtf8Path {
        /// The offending path.
        path: PathBuf,
    },

    /// Verification results could not be serialised.
    #[error("failed to serialise verification results: {0}")]
    Json(#[from] serde_json::Error),

    /// Failed to persist the finished archive.
    #[error("failed to persist archive to {path}: {source}")]
    Persist {
        /// The destination path.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PackagerError {
    /// Wrap a glob parse failure for `pattern`.
    #[must_use]
    pub fn pattern(pattern: &str, err: &glob::PatternError) -> Self {
        Self::Pattern {
            pattern: pattern.to_owned(),
            reason: err.msg.to_owned(),
        }
    }

    /// Build-command hints for every declared ABI, one per line.
    #[must_use]
    pub fn build_remediation<'a>(
        abis: impl IntoIterator<Item = &'a crate::abi::AbiDescriptor>,
    ) -> String {
        abis.into_iter()
            .map(|abi| format!("  {} setup.py build_ext --inplace", abi.interpreter_name()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Result type alias using [`PackagerError`].
pub type Result<T> = std::result::Result<T, PackagerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::AbiDescriptor;

    #[test]
    fn remediation_lists_one_command_per_abi() {
        let abis = [AbiDescriptor::new(3, 8), AbiDescriptor::new(3, 11)];
        let hint = PackagerError::build_remediation(&abis);
        assert_eq!(
            hint,
            "  python3.8 setup.py build_ext --inplace\n  python3.11 setup.py build_ext --inplace"
        );
    }

    #[test]
    fn missing_build_output_includes_remediation() {
        let err = PackagerError::BuildOutputMissing {
            path: Utf8PathBuf::from("/work/build"),
            remediation: "  python3.8 setup.py build_ext --inplace".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("/work/build"));
        assert!(msg.contains("python3.8 setup.py build_ext --inplace"));
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: PackagerError = io.into();
        assert!(matches!(err, PackagerError::Io(_)));
    }
}
