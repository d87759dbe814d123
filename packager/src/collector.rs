//! Artifact collection from the build output tree.
//!
//! Copies the plain source modules and exactly one compiled extension
//! module per declared ABI into the staging package directory. Collection
//! never compiles or modifies anything in the project.

use crate::abi::AbiDescriptor;
use crate::config::PackagerConfig;
use crate::error::{PackagerError, Result};
use crate::layout::StagingLayout;
use camino::{Utf8Path, Utf8PathBuf};
use glob::Pattern;
use log::{debug, info, warn};
use std::fmt;

/// One extension module staged for an ABI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedModule {
    /// The ABI the module was built for.
    pub abi: AbiDescriptor,
    /// Where the module was found in the build tree.
    pub source: Utf8PathBuf,
    /// Where the module was copied in the staging layout.
    pub staged: Utf8PathBuf,
}

/// Why a declared ABI was left out of the package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// No compiled module matched the ABI.
    Missing,
    /// More than one compiled module matched the ABI.
    Ambiguous(Vec<Utf8PathBuf>),
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => f.write_str("no compiled module found"),
            Self::Ambiguous(paths) => {
                write!(f, "{} compiled modules match", paths.len())
            }
        }
    }
}

/// A declared ABI that was dropped from the package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedAbi {
    /// The dropped ABI.
    pub abi: AbiDescriptor,
    /// Why it was dropped.
    pub reason: DropReason,
}

/// Outcome of [`collect_extension_modules`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionReport {
    /// Modules staged, in declared ABI order.
    pub modules: Vec<CollectedModule>,
    /// Declared ABIs without a usable module.
    pub dropped: Vec<DroppedAbi>,
}

impl CollectionReport {
    /// The ABIs actually present in the package.
    pub fn present_abis(&self) -> impl Iterator<Item = &AbiDescriptor> {
        self.modules.iter().map(|module| &module.abi)
    }
}

/// Copy every `*.py` file from `source_root` into the package directory.
///
/// A missing source directory is logged and yields no modules.
///
/// # Errors
///
/// Returns an error when a file cannot be copied.
pub fn copy_source_modules(source_root: &Utf8Path, layout: &StagingLayout) -> Result<Vec<Utf8PathBuf>> {
    if !source_root.is_dir() {
        warn!("source module directory {source_root} not found; no plain modules copied");
        return Ok(Vec::new());
    }
    let pattern = format!("{}/*.py", Pattern::escape(source_root.as_str()));
    let mut copied = Vec::new();
    for source in glob_files(&pattern)? {
        let Some(name) = source.file_name() else {
            continue;
        };
        let staged = layout.package_dir().join(name);
        std::fs::copy(&source, &staged)?;
        debug!("copied {source} -> {staged}");
        copied.push(staged);
    }
    info!("copied {} source modules", copied.len());
    Ok(copied)
}

/// Stage exactly one compiled extension module per declared ABI.
///
/// Build-output subdirectories are selected with
/// `package.build_subdir_pattern`; inside each, modules are looked up as
/// `<package>/<native_module>.<cpython-XY>*.so`. ABIs with no match or
/// several matches are dropped with a warning.
///
/// # Errors
///
/// Returns [`PackagerError::BuildOutputMissing`] when `build_root` does not
/// exist and [`PackagerError::NoExtensionModules`] when no ABI yields a
/// module. Both carry build instructions for every declared ABI.
pub fn collect_extension_modules(
    build_root: &Utf8Path,
    config: &PackagerConfig,
    layout: &StagingLayout,
) -> Result<CollectionReport> {
    let abis = &config.package.abis;
    if !build_root.is_dir() {
        return Err(PackagerError::BuildOutputMissing {
            path: build_root.to_owned(),
            remediation: PackagerError::build_remediation(abis),
        });
    }

    let subdirs_pattern = format!(
        "{}/{}",
        Pattern::escape(build_root.as_str()),
        config.package.build_subdir_pattern
    );
    let subdirs: Vec<Utf8PathBuf> = glob_paths(&subdirs_pattern)?
        .into_iter()
        .filter(|path| path.is_dir())
        .collect();
    debug!("build subdirectories: {subdirs:?}");

    let mut report = CollectionReport::default();
    for abi in abis {
        let mut matches = Vec::new();
        for subdir in &subdirs {
            matches.extend(find_modules(subdir, config, abi)?);
        }
        match matches.len() {
            1 => {
                let source = matches.remove(0);
                let staged = stage_module(&source, layout)?;
                info!("collected {abi}: {source}");
                report.modules.push(CollectedModule {
                    abi: abi.clone(),
                    source,
                    staged,
                });
            }
            0 => {
                warn!("no compiled module for {abi} under {build_root}; dropping {abi}");
                report.dropped.push(DroppedAbi {
                    abi: abi.clone(),
                    reason: DropReason::Missing,
                });
            }
            count => {
                warn!("{count} compiled modules match {abi}; dropping {abi}: {matches:?}");
                report.dropped.push(DroppedAbi {
                    abi: abi.clone(),
                    reason: DropReason::Ambiguous(matches),
                });
            }
        }
    }

    if report.modules.is_empty() {
        return Err(PackagerError::NoExtensionModules {
            build_root: build_root.to_owned(),
            remediation: PackagerError::build_remediation(abis),
        });
    }
    Ok(report)
}

/// Modules in one build subdirectory compiled for `abi`.
fn find_modules(
    subdir: &Utf8Path,
    config: &PackagerConfig,
    abi: &AbiDescriptor,
) -> Result<Vec<Utf8PathBuf>> {
    let stem = format!("{}.{}", config.package.native_module, abi.filename_fragment());
    let pattern = format!(
        "{}/{}/{}*.so",
        Pattern::escape(subdir.as_str()),
        Pattern::escape(&config.package.name),
        Pattern::escape(&stem)
    );
    // `cpython-31*` must not pick up `cpython-311`.
    Ok(glob_files(&pattern)?
        .into_iter()
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.strip_prefix(stem.as_str()))
                .is_some_and(|rest| rest.starts_with(['-', '.']))
        })
        .collect())
}

fn stage_module(source: &Utf8Path, layout: &StagingLayout) -> Result<Utf8PathBuf> {
    let name = source.file_name().ok_or_else(|| PackagerError::NonUtf8Path {
        path: source.as_std_path().to_path_buf(),
    })?;
    let staged = layout.package_dir().join(name);
    std::fs::copy(source, &staged)?;
    Ok(staged)
}

fn glob_paths(pattern: &str) -> Result<Vec<Utf8PathBuf>> {
    let mut paths = Vec::new();
    for entry in glob::glob(pattern).map_err(|err| PackagerError::pattern(pattern, &err))? {
        let path = entry.map_err(glob::GlobError::into_error)?;
        let path =
            Utf8PathBuf::from_path_buf(path).map_err(|path| PackagerError::NonUtf8Path { path })?;
        paths.push(path);
    }
    paths.sort();
    Ok(paths)
}

fn glob_files(pattern: &str) -> Result<Vec<Utf8PathBuf>> {
    Ok(glob_paths(pattern)?
        .into_iter()
        .filter(|path| path.is_file())
        .collect())
}

#[cfg(test)]
#[path = "collector_tests.rs"]
mod tests;
