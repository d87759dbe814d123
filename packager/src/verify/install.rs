//! Installation of a package archive into an environment.
//!
//! Only the package directory and the private library directory are
//! unpacked; anything else in the archive is ignored.

use crate::config::PackagerConfig;
use crate::extractor::{ExtractionError, validate_entry_path};
use camino::Utf8Path;
use std::fs::File;
use zip::ZipArchive;

/// Unpack the package into `site_packages`, returning the number of files
/// written.
///
/// # Errors
///
/// Returns [`ExtractionError`] when the archive cannot be read, an entry
/// would escape `site_packages`, or a file cannot be written.
pub fn install_archive(
    archive: &Utf8Path,
    site_packages: &Utf8Path,
    config: &PackagerConfig,
) -> Result<usize, ExtractionError> {
    let package_prefix = format!("{}/", config.package.name);
    let lib_prefix = format!("{}/", config.package.private_lib_dir);
    let mut zip = ZipArchive::new(File::open(archive)?)?;
    let mut written = 0;

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index)?;
        let name = entry.name().to_owned();
        if !(name.starts_with(&package_prefix) || name.starts_with(&lib_prefix)) {
            log::trace!("not installing {name}");
            continue;
        }
        validate_entry_path(&name)?;
        let destination = site_packages.join(&name);
        if entry.is_dir() {
            std::fs::create_dir_all(&destination)?;
            continue;
        }
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&destination)?;
        std::io::copy(&mut entry, &mut out)?;
        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&destination, std::fs::Permissions::from_mode(mode & 0o777))?;
        }
        written += 1;
    }
    log::debug!("installed {written} files into {site_packages}");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn archive_with(dir: &Utf8Path, entries: &[&str]) -> Utf8PathBuf {
        let path = dir.join("package.zip");
        let mut writer = zip::ZipWriter::new(File::create(&path).expect("create"));
        for name in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .expect("start");
            writer.write_all(name.as_bytes()).expect("write");
        }
        writer.finish().expect("finish");
        path
    }

    fn temp() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8");
        (dir, path)
    }

    #[test]
    fn installs_package_and_library_directories_only() {
        let (_guard, dir) = temp();
        let archive = archive_with(
            &dir,
            &[
                "psycounvdb/__init__.py",
                "psycounvdb_binary.libs/libpq.so.5",
                "README.txt",
            ],
        );
        let site = dir.join("site-packages");
        std::fs::create_dir_all(&site).expect("site");

        let written = install_archive(&archive, &site, &PackagerConfig::default()).expect("install");

        assert_eq!(written, 2);
        assert!(site.join("psycounvdb/__init__.py").is_file());
        assert!(site.join("psycounvdb_binary.libs/libpq.so.5").is_file());
        assert!(!site.join("README.txt").exists());
    }

    #[test]
    fn traversal_is_rejected() {
        let (_guard, dir) = temp();
        let archive = archive_with(&dir, &["psycounvdb/../../escape.py"]);
        let site = dir.join("site-packages");
        std::fs::create_dir_all(&site).expect("site");

        let err = install_archive(&archive, &site, &PackagerConfig::default()).expect_err("rejected");

        assert!(matches!(err, ExtractionError::PathTraversal { .. }));
    }
}
