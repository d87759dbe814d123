//! Build pipeline orchestration.
//!
//! Runs the collector, extractor, patcher and assembler in order inside a
//! scoped staging workspace. Precondition failures abort the run; degraded
//! conditions are logged and recorded in the [`BuildReport`].

use crate::abi::{AbiDescriptor, AbiRange};
use crate::assembler::{ArchiveName, PackageArchive, assemble};
use crate::collector::{CollectionReport, DropReason, collect_extension_modules, copy_source_modules};
use crate::config::PackagerConfig;
use crate::entry_point::{EntryPointTemplate, write_entry_point};
use crate::error::{PackagerError, Result};
use crate::extractor::{ExtractionReport, extract_dependency_libs};
use crate::fetch::UpstreamFetcher;
use crate::layout::StagingWorkspace;
use crate::output::{archive_summary, write_stderr_line};
use crate::patcher::{PatchReport, patch_extension_modules};
use crate::rename::LibDirRename;
use camino::{Utf8Path, Utf8PathBuf};
use log::warn;
use std::fmt;
use std::io::Write;

const STEPS: usize = 5;

/// Inputs of a build run.
#[derive(Debug, Clone, Copy)]
pub struct BuildContext<'a> {
    /// Project directory that relative configured paths resolve against.
    pub project_dir: &'a Utf8Path,
    /// The immutable configuration.
    pub config: &'a PackagerConfig,
    /// Suppress progress output.
    pub quiet: bool,
}

/// A condition that weakened the package without stopping the build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildWarning {
    /// A declared ABI has no usable compiled module.
    AbiDropped {
        /// The dropped ABI.
        abi: AbiDescriptor,
        /// Why it was dropped.
        reason: String,
    },
    /// The upstream archive could not be obtained.
    UpstreamUnavailable(String),
    /// The upstream archive had no bundled libraries.
    NoDependencyLibraries,
    /// A module was excluded because its runpath could not be rewritten.
    ModuleExcluded {
        /// The excluded module's ABI.
        abi: AbiDescriptor,
        /// The rewrite error.
        reason: String,
    },
}

impl fmt::Display for BuildWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AbiDropped { abi, reason } => write!(f, "{abi} dropped: {reason}"),
            Self::UpstreamUnavailable(reason) => {
                write!(f, "upstream archive unavailable: {reason}")
            }
            Self::NoDependencyLibraries => {
                f.write_str("no bundled shared libraries; the package relies on system libraries")
            }
            Self::ModuleExcluded { abi, reason } => write!(f, "{abi} excluded: {reason}"),
        }
    }
}

/// Everything a build produced.
#[derive(Debug)]
pub struct BuildReport {
    /// The persisted archive.
    pub archive: PackageArchive,
    /// Plain source modules copied into the package.
    pub source_modules: Vec<Utf8PathBuf>,
    /// Extension module collection.
    pub collection: CollectionReport,
    /// Library extraction, when an upstream archive was available.
    pub extraction: Option<ExtractionReport>,
    /// Runpath rewrites.
    pub patch: PatchReport,
    /// Degraded conditions, in the order they occurred.
    pub warnings: Vec<BuildWarning>,
}

impl BuildReport {
    /// Whether any degraded condition occurred.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// ABIs shipped in the archive, oldest first.
    #[must_use]
    pub fn shipped_abis(&self) -> Vec<AbiDescriptor> {
        let mut abis: Vec<AbiDescriptor> = self.patch.shipped_abis().cloned().collect();
        abis.sort();
        abis
    }
}

/// Run the full build: collect, extract, patch, assemble.
///
/// The staging workspace is removed before this function returns, whether
/// or not the build succeeds.
///
/// # Errors
///
/// Returns [`PackagerError::BuildOutputMissing`] or
/// [`PackagerError::NoExtensionModules`] when there is nothing to package,
/// [`PackagerError::NoPatchableModules`] when every module failed its
/// rewrite, and I/O or archive errors from the individual stages.
pub fn run_build(
    context: &BuildContext<'_>,
    fetcher: &dyn UpstreamFetcher,
    stderr: &mut dyn Write,
) -> Result<BuildReport> {
    let config = context.config;
    let mut progress = |step: usize, message: &str| {
        if !context.quiet {
            write_stderr_line(stderr, format!("[{step}/{STEPS}] {message}"));
        }
    };
    let mut warnings = Vec::new();

    let staging_root = config.paths.staging_root(context.project_dir);
    let workspace = StagingWorkspace::create(config, staging_root.as_deref())?;
    let layout = workspace.layout();

    progress(1, "Copying source modules");
    let source_root = config.paths.source_root(context.project_dir);
    let source_modules = copy_source_modules(&source_root, layout)?;

    progress(2, "Collecting extension modules");
    let build_root = config.paths.build_root(context.project_dir);
    let collection = collect_extension_modules(&build_root, config, layout)?;
    for dropped in &collection.dropped {
        let reason = match &dropped.reason {
            DropReason::Missing => dropped.reason.to_string(),
            DropReason::Ambiguous(paths) => format!("{}: {paths:?}", dropped.reason),
        };
        warnings.push(BuildWarning::AbiDropped {
            abi: dropped.abi.clone(),
            reason,
        });
    }

    progress(3, "Fetching upstream archive");
    let upstream = match fetcher.fetch(workspace.upstream_dir()) {
        Ok(path) => Some(path),
        Err(err) => {
            warn!("cannot obtain upstream archive: {err}; the package will ship without bundled libraries");
            warnings.push(BuildWarning::UpstreamUnavailable(err.to_string()));
            None
        }
    };

    progress(4, "Extracting bundled libraries");
    let rename = LibDirRename::from_config(config);
    let extraction = match &upstream {
        Some(archive) => {
            let report = extract_dependency_libs(archive, &rename, layout)?;
            if report.is_degraded() {
                warnings.push(BuildWarning::NoDependencyLibraries);
            }
            Some(report)
        }
        None => None,
    };

    progress(5, "Rewriting runpaths");
    let patch = patch_extension_modules(layout, &collection.modules, &config.module_runpath());
    for failure in &patch.failed {
        warnings.push(BuildWarning::ModuleExcluded {
            abi: failure.abi.clone(),
            reason: failure.error.to_string(),
        });
    }

    let range = AbiRange::spanning(patch.shipped_abis()).ok_or_else(|| {
        PackagerError::NoPatchableModules {
            details: patch
                .failed
                .iter()
                .map(|failure| format!("  {}: {}", failure.path, failure.error))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    })?;

    write_entry_point(layout, &EntryPointTemplate::from_config(config))?;
    let name = ArchiveName::from_config(config, range);
    let archive = assemble(layout, name, &config.paths.dist_root(context.project_dir))?;

    if !context.quiet {
        write_stderr_line(stderr, "");
        for line in archive_summary(&archive) {
            write_stderr_line(stderr, line);
        }
        if !warnings.is_empty() {
            write_stderr_line(stderr, "");
            write_stderr_line(stderr, format!("Completed with {} warning(s):", warnings.len()));
            for warning in &warnings {
                write_stderr_line(stderr, format!("  - {warning}"));
            }
        }
    }

    Ok(BuildReport {
        archive,
        source_modules,
        collection,
        extraction,
        patch,
        warnings,
    })
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
