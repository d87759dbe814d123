//! Extraction of bundled shared libraries from an upstream archive.
//!
//! Entries under an upstream library directory are written into the
//! staging root with their directory prefix renamed by [`LibDirRename`].
//! Every other entry is ignored. Entry paths are validated before anything
//! is written so an archive cannot escape the staging root.

use crate::layout::StagingLayout;
use crate::rename::LibDirRename;
use camino::{Utf8Path, Utf8PathBuf};
use log::{debug, info, warn};
use std::collections::HashSet;
use std::fs::File;
use std::path::{Component, Path};
use thiserror::Error;
use zip::ZipArchive;

/// Errors arising from upstream archive extraction.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// I/O error during extraction.
    #[error("extraction I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The archive is not a readable zip file.
    #[error("failed to read upstream archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// A path in the archive attempts to traverse outside the destination.
    #[error("path traversal detected: {path}")]
    PathTraversal {
        /// The offending path from the archive entry.
        path: String,
    },
}

/// A shared library copied out of the upstream archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyLibrary {
    /// Entry name inside the upstream archive.
    pub original: String,
    /// Renamed path relative to the staging root.
    pub renamed: String,
    /// Where the content was written.
    pub destination: Utf8PathBuf,
    /// Number of bytes written.
    pub size: u64,
}

/// Outcome of [`extract_dependency_libs`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionReport {
    /// Library files written, in archive order.
    pub libraries: Vec<DependencyLibrary>,
    /// Directory entries recreated as empty directories.
    pub directories: Vec<Utf8PathBuf>,
    /// Entries skipped because an earlier entry claimed the same destination.
    pub duplicates: Vec<String>,
}

impl ExtractionReport {
    /// Whether no library was found, leaving the package without its
    /// private library directory.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.libraries.is_empty()
    }
}

/// Copy every library entry of `archive` into the staging root, renamed.
///
/// An archive without library entries is not an error; the report is
/// degraded and a warning is logged.
///
/// # Errors
///
/// Returns [`ExtractionError::PathTraversal`] for entries that would land
/// outside the staging root, [`ExtractionError::Zip`] for unreadable
/// archives and [`ExtractionError::Io`] when writing fails.
pub fn extract_dependency_libs(
    archive: &Utf8Path,
    rename: &LibDirRename,
    layout: &StagingLayout,
) -> Result<ExtractionReport, ExtractionError> {
    let mut zip = ZipArchive::new(File::open(archive)?)?;
    let mut report = ExtractionReport::default();
    let mut claimed = HashSet::new();

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index)?;
        let name = entry.name().to_owned();
        let Some(renamed) = rename.rename(&name) else {
            continue;
        };
        validate_entry_path(&renamed)?;
        let destination = layout.root().join(&renamed);

        if entry.is_dir() {
            std::fs::create_dir_all(&destination)?;
            report.directories.push(destination);
            continue;
        }
        if !claimed.insert(renamed.clone()) {
            warn!("{name} maps to {renamed}, which is already extracted; skipping");
            report.duplicates.push(name);
            continue;
        }

        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&destination)?;
        let size = std::io::copy(&mut entry, &mut out)?;
        debug!("extracted {name} -> {renamed} ({size} bytes)");
        report.libraries.push(DependencyLibrary {
            original: name,
            renamed,
            destination,
            size,
        });
    }

    if report.is_degraded() {
        warn!(
            "{archive} contains no entries under {:?}; the package will ship without {}",
            rename.markers(),
            rename.target()
        );
    } else {
        info!(
            "extracted {} shared libraries into {}",
            report.libraries.len(),
            rename.target()
        );
    }
    Ok(report)
}

/// Validate that an entry path does not escape the destination directory
/// via `..` components or absolute paths.
pub(crate) fn validate_entry_path(entry: &str) -> Result<(), ExtractionError> {
    let path = Path::new(entry);
    let escapes = path.is_absolute()
        || entry.starts_with('/')
        || path
            .components()
            .any(|component| matches!(component, Component::ParentDir | Component::Prefix(_)));
    if escapes {
        return Err(ExtractionError::PathTraversal {
            path: entry.to_owned(),
        });
    }
    Ok(())
}
