//! Serialization of the staging layout into the distributable archive.
//!
//! The archive is written to a temporary file inside the output directory
//! and renamed into place once complete, so readers never observe a
//! partial archive. Its name records the ABI range actually present:
//! `<name>-<version>-<platform>-python<min>~<max>.zip`.

use crate::abi::AbiRange;
use crate::config::PackagerConfig;
use crate::error::{PackagerError, Result};
use crate::layout::StagingLayout;
use camino::{Utf8Path, Utf8PathBuf};
use log::{debug, info};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, Write};
use tempfile::NamedTempFile;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// The file name of a package archive.
///
/// # Examples
///
/// ```
/// use abipack_packager::abi::{AbiDescriptor, AbiRange};
/// use abipack_packager::assembler::ArchiveName;
///
/// let range = AbiRange::spanning(&[AbiDescriptor::new(3, 8), AbiDescriptor::new(3, 11)])
///     .expect("non-empty");
/// let name = ArchiveName::new("psycounvdb", "2.9.11", "linux-x86_64", range);
/// assert_eq!(name.to_string(), "psycounvdb-2.9.11-linux-x86_64-python3.8~3.11.zip");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveName {
    name: String,
    version: String,
    platform: String,
    range: AbiRange,
}

impl ArchiveName {
    /// Compose an archive name.
    #[must_use]
    pub fn new(name: &str, version: &str, platform: &str, range: AbiRange) -> Self {
        Self {
            name: name.to_owned(),
            version: version.to_owned(),
            platform: platform.to_owned(),
            range,
        }
    }

    /// Name the configured package for the ABIs in `range`.
    #[must_use]
    pub fn from_config(config: &PackagerConfig, range: AbiRange) -> Self {
        Self::new(
            &config.package.name,
            &config.package.version,
            &config.package.platform,
            range,
        )
    }

    /// The ABI range encoded in the name.
    #[must_use]
    pub fn range(&self) -> &AbiRange {
        &self.range
    }

    /// The package version encoded in the name.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The platform label encoded in the name.
    #[must_use]
    pub fn platform(&self) -> &str {
        &self.platform
    }
}

impl fmt::Display for ArchiveName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-python{}.zip",
            self.name, self.version, self.platform, self.range
        )
    }
}

/// A finished archive in the output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageArchive {
    /// Final location of the archive.
    pub path: Utf8PathBuf,
    /// The archive's name and the metadata it encodes.
    pub name: ArchiveName,
    /// Entry names, sorted.
    pub manifest: Vec<String>,
    /// Lowercase hex SHA-256 of the archive.
    pub sha256: String,
}

/// Write every file under `root` into a deflate zip on `writer`.
///
/// Entries are named relative to `root` with `/` separators and written in
/// sorted order. Returns the entry names.
///
/// # Errors
///
/// Returns [`PackagerError::Walk`] when the tree cannot be walked,
/// [`PackagerError::Archive`] when the zip cannot be written and
/// [`PackagerError::Io`] when a file cannot be read.
pub fn write_archive<W: Write + Seek>(root: &Utf8Path, writer: W) -> Result<Vec<String>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = Utf8PathBuf::from_path_buf(entry.into_path())
            .map_err(|path| PackagerError::NonUtf8Path { path })?;
        let name = path
            .strip_prefix(root)
            .map(|relative| relative.components().map(|c| c.as_str()).collect::<Vec<_>>().join("/"))
            .map_err(|_| PackagerError::NonUtf8Path {
                path: path.as_std_path().to_path_buf(),
            })?;
        files.push((name, path));
    }
    files.sort();

    let mut zip = ZipWriter::new(writer);
    for (name, path) in &files {
        let options = entry_options(path)?;
        zip.start_file(name.as_str(), options)?;
        let mut source = File::open(path)?;
        std::io::copy(&mut source, &mut zip)?;
        debug!("added {name}");
    }
    zip.finish()?;
    Ok(files.into_iter().map(|(name, _)| name).collect())
}

fn entry_options(path: &Utf8Path) -> Result<SimpleFileOptions> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(path)?.permissions().mode();
        Ok(options.unix_permissions(mode & 0o777))
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(options)
    }
}

/// Serialize the staging layout into `dist_dir` under `name`.
///
/// The output directory is created when missing. An existing archive of
/// the same name is replaced atomically.
///
/// # Errors
///
/// Returns the errors of [`write_archive`], and [`PackagerError::Persist`]
/// when the finished archive cannot be moved into place.
pub fn assemble(layout: &StagingLayout, name: ArchiveName, dist_dir: &Utf8Path) -> Result<PackageArchive> {
    std::fs::create_dir_all(dist_dir)?;
    let path = dist_dir.join(name.to_string());

    let mut partial = NamedTempFile::new_in(dist_dir)?;
    let manifest = write_archive(layout.root(), partial.as_file_mut())?;
    partial.as_file().sync_all()?;
    partial.persist(&path).map_err(|err| PackagerError::Persist {
        path: path.clone(),
        source: err.error,
    })?;

    let sha256 = compute_sha256(&path)?;
    info!("wrote {path} ({} entries)", manifest.len());
    Ok(PackageArchive {
        path,
        name,
        manifest,
        sha256,
    })
}

/// Entry names of an existing archive, sorted.
///
/// # Errors
///
/// Returns [`PackagerError::Io`] when the file cannot be opened and
/// [`PackagerError::Archive`] when it is not a zip.
pub fn read_manifest(path: &Utf8Path) -> Result<Vec<String>> {
    let archive = ZipArchive::new(File::open(path)?)?;
    let mut names: Vec<String> = archive.file_names().map(str::to_owned).collect();
    names.sort();
    Ok(names)
}

/// Compute the SHA-256 digest of a file as lowercase hex.
///
/// # Errors
///
/// Returns [`PackagerError::Io`] if the file cannot be read.
pub fn compute_sha256(path: &Utf8Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
#[path = "assembler_tests.rs"]
mod tests;
