//! Multi-runtime verification of a finished package archive.
//!
//! Each discovered interpreter gets its own isolated environment, the
//! archive is unpacked into it, and the package must import and complete a
//! round-trip against a live backend. Runtimes are independent: one failing
//! never stops the others.

pub mod discovery;
pub mod environment;
pub mod install;
pub mod probes;
pub mod results;
pub mod verifier;

pub use discovery::{Runtime, discover_runtimes};
pub use results::{Stage, SummaryTable, VerificationResult, VerificationStatus};
pub use verifier::Verifier;

use crate::config::PackagerConfig;
use camino::{Utf8Path, Utf8PathBuf};
use glob::Pattern;
use std::time::SystemTime;

/// Find the newest archive for the configured package in `dist_dir`.
///
/// Several ranges may have been assembled for the same version and
/// platform; the most recently modified one wins, ties broken by name.
#[must_use]
pub fn locate_archive(dist_dir: &Utf8Path, config: &PackagerConfig) -> Option<Utf8PathBuf> {
    let package = &config.package;
    let pattern = format!(
        "{}/{}-python*.zip",
        Pattern::escape(dist_dir.as_str()),
        Pattern::escape(&format!(
            "{}-{}-{}",
            package.name, package.version, package.platform
        ))
    );
    let found: Vec<(SystemTime, Utf8PathBuf)> = glob::glob(&pattern)
        .ok()?
        .filter_map(Result::ok)
        .filter_map(|path| Utf8PathBuf::from_path_buf(path).ok())
        .filter_map(|path| {
            let meta = std::fs::metadata(&path).ok().filter(std::fs::Metadata::is_file)?;
            Some((meta.modified().unwrap_or(SystemTime::UNIX_EPOCH), path))
        })
        .collect();
    log::debug!("{} archives match {pattern}", found.len());
    found.into_iter().max().map(|(_, path)| path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_other_packages_and_versions() {
        let dir = tempfile::tempdir().expect("temp dir");
        let dist = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8");
        for name in [
            "psycounvdb-2.9.11-linux-x86_64-python3.8~3.11.zip",
            "psycounvdb-2.9.10-linux-x86_64-python3.8~3.14.zip",
            "other-2.9.11-linux-x86_64-python3.8~3.14.zip",
        ] {
            std::fs::write(dist.join(name), b"zip").expect("write");
        }

        let found = locate_archive(&dist, &PackagerConfig::default()).expect("found");

        assert_eq!(
            found.file_name(),
            Some("psycounvdb-2.9.11-linux-x86_64-python3.8~3.11.zip")
        );
    }

    #[test]
    fn empty_directory_yields_nothing() {
        let dir = tempfile::tempdir().expect("temp dir");
        let dist = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8");
        assert!(locate_archive(&dist, &PackagerConfig::default()).is_none());
    }
}
