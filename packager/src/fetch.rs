//! Retrieval of the upstream binary distribution.
//!
//! The pipeline only consumes a local archive. [`UpstreamFetcher`] hides how
//! that file is obtained: [`LocalArchive`] points at a file the operator
//! already has, [`PipFetcher`] asks `pip download` for the reference-ABI
//! build and reuses an earlier download when one is present.

use crate::config::UpstreamSettings;
use crate::process::{CommandRunner, CommandSpec, RunError};
use camino::{Utf8Path, Utf8PathBuf};
use glob::Pattern;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while obtaining the upstream archive.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The configured local archive does not exist.
    #[error("upstream archive {path} not found")]
    Missing {
        /// The configured path.
        path: Utf8PathBuf,
    },

    /// The downloader could not be run.
    #[error(transparent)]
    Run(#[from] RunError),

    /// The downloader ran but reported failure.
    #[error("{command} failed: {summary}")]
    DownloadFailed {
        /// The command that was run.
        command: String,
        /// Last line of its diagnostic output.
        summary: String,
    },

    /// The downloader succeeded without producing a matching archive.
    #[error("no archive matching {prefix}*.whl appeared in {dir}")]
    NotProduced {
        /// The expected file name prefix.
        prefix: String,
        /// The download directory.
        dir: Utf8PathBuf,
    },

    /// The download directory could not be searched.
    #[error("failed to search {dir} for archives: {reason}")]
    Search {
        /// The download directory.
        dir: Utf8PathBuf,
        /// Why the search failed.
        reason: String,
    },
}

/// Obtains the upstream archive as a local file.
#[cfg_attr(test, mockall::automock)]
pub trait UpstreamFetcher {
    /// Return the path of the upstream archive, using `work_dir` for any
    /// download.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] when no archive can be produced. The pipeline
    /// treats this as a degraded build rather than a fatal error.
    fn fetch(&self, work_dir: &Utf8Path) -> Result<Utf8PathBuf, FetchError>;
}

/// An archive already present on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalArchive {
    path: Utf8PathBuf,
}

impl LocalArchive {
    /// Use the archive at `path`.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl UpstreamFetcher for LocalArchive {
    fn fetch(&self, _work_dir: &Utf8Path) -> Result<Utf8PathBuf, FetchError> {
        if self.path.is_file() {
            Ok(self.path.clone())
        } else {
            Err(FetchError::Missing {
                path: self.path.clone(),
            })
        }
    }
}

/// Downloads the reference-ABI archive with `pip download`.
#[derive(Debug)]
pub struct PipFetcher<'a, R: CommandRunner> {
    runner: &'a R,
    upstream: &'a UpstreamSettings,
    timeout: Duration,
}

impl<'a, R: CommandRunner> PipFetcher<'a, R> {
    /// Create a fetcher running the downloader through `runner`.
    #[must_use]
    pub fn new(runner: &'a R, upstream: &'a UpstreamSettings, timeout: Duration) -> Self {
        Self {
            runner,
            upstream,
            timeout,
        }
    }

    /// The download command for `work_dir`.
    #[must_use]
    pub fn download_command(&self, work_dir: &Utf8Path) -> CommandSpec {
        let upstream = self.upstream;
        CommandSpec::new(upstream.python.clone(), self.timeout).args([
            "-m".to_owned(),
            "pip".to_owned(),
            "download".to_owned(),
            format!("{}=={}", upstream.name, upstream.version),
            "--python-version".to_owned(),
            upstream.reference_abi.compact(),
            "--platform".to_owned(),
            upstream.platform_tag.clone(),
            "--only-binary=:all:".to_owned(),
            "-d".to_owned(),
            work_dir.to_string(),
            "--no-deps".to_owned(),
        ])
    }

    fn existing(&self, work_dir: &Utf8Path) -> Result<Option<Utf8PathBuf>, FetchError> {
        let prefix = self.upstream.archive_prefix();
        let pattern = format!(
            "{}/{}*.whl",
            Pattern::escape(work_dir.as_str()),
            Pattern::escape(&prefix)
        );
        let search_failed = |reason: String| FetchError::Search {
            dir: work_dir.to_owned(),
            reason,
        };
        let mut found = Vec::new();
        for entry in glob::glob(&pattern).map_err(|err| search_failed(err.msg.to_owned()))? {
            let path = entry.map_err(|err| search_failed(err.to_string()))?;
            if let Ok(path) = Utf8PathBuf::from_path_buf(path) {
                found.push(path);
            }
        }
        found.sort();
        Ok(found.into_iter().next())
    }
}

impl<R: CommandRunner> UpstreamFetcher for PipFetcher<'_, R> {
    fn fetch(&self, work_dir: &Utf8Path) -> Result<Utf8PathBuf, FetchError> {
        if let Some(path) = self.existing(work_dir)? {
            log::info!("reusing upstream archive {path}");
            return Ok(path);
        }

        let spec = self.download_command(work_dir);
        log::info!(
            "downloading {} {} for {}",
            self.upstream.name,
            self.upstream.version,
            self.upstream.reference_abi
        );
        let output = self.runner.run(&spec)?;
        if !output.succeeded() {
            return Err(FetchError::DownloadFailed {
                command: spec.to_string(),
                summary: output.failure_summary(),
            });
        }

        self.existing(work_dir)?.ok_or_else(|| FetchError::NotProduced {
            prefix: self.upstream.archive_prefix(),
            dir: work_dir.to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{CommandOutput, MockCommandRunner};

    fn work_dir() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8");
        (dir, path)
    }

    const WHEEL: &str = "psycopg2_binary-2.9.10-cp38-cp38-manylinux_2_17_x86_64.whl";

    #[test]
    fn reuses_an_existing_download() {
        let (_guard, dir) = work_dir();
        std::fs::write(dir.join(WHEEL), b"zip").expect("write");
        let upstream = UpstreamSettings::default();
        let mut runner = MockCommandRunner::new();
        runner.expect_run().never();

        let fetcher = PipFetcher::new(&runner, &upstream, Duration::from_secs(5));
        let path = fetcher.fetch(&dir).expect("fetch");

        assert_eq!(path, dir.join(WHEEL));
    }

    #[test]
    fn downloads_the_reference_abi() {
        let (_guard, dir) = work_dir();
        let upstream = UpstreamSettings::default();
        let target = dir.clone();
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|spec| {
                spec.args.contains(&"psycopg2-binary==2.9.10".to_owned())
                    && spec.args.windows(2).any(|w| w == ["--python-version", "38"])
                    && spec.args.contains(&"--no-deps".to_owned())
            })
            .times(1)
            .returning(move |_| {
                std::fs::write(target.join(WHEEL), b"zip").expect("write");
                Ok(CommandOutput::success(""))
            });

        let fetcher = PipFetcher::new(&runner, &upstream, Duration::from_secs(5));
        assert_eq!(fetcher.fetch(&dir).expect("fetch"), dir.join(WHEEL));
    }

    #[test]
    fn failed_download_reports_the_last_diagnostic_line() {
        let (_guard, dir) = work_dir();
        let upstream = UpstreamSettings::default();
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .returning(|_| Ok(CommandOutput::failure(1, "ERROR: No matching distribution found")));

        let fetcher = PipFetcher::new(&runner, &upstream, Duration::from_secs(5));
        let err = fetcher.fetch(&dir).expect_err("fails");

        assert!(matches!(err, FetchError::DownloadFailed { .. }));
        assert!(err.to_string().contains("No matching distribution found"));
    }

    #[test]
    fn successful_download_without_archive_is_reported() {
        let (_guard, dir) = work_dir();
        let upstream = UpstreamSettings::default();
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|_| Ok(CommandOutput::success("")));

        let fetcher = PipFetcher::new(&runner, &upstream, Duration::from_secs(5));
        let err = fetcher.fetch(&dir).expect_err("nothing produced");

        assert!(matches!(err, FetchError::NotProduced { .. }));
    }

    #[test]
    fn local_archive_must_exist() {
        let (_guard, dir) = work_dir();
        let missing = LocalArchive::new(dir.join("absent.whl"));
        assert!(matches!(missing.fetch(&dir), Err(FetchError::Missing { .. })));

        std::fs::write(dir.join(WHEEL), b"zip").expect("write");
        let present = LocalArchive::new(dir.join(WHEEL));
        assert_eq!(present.fetch(&dir).expect("present"), dir.join(WHEEL));
    }
}
