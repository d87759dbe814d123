//! Scoped isolated environments for one runtime.

use crate::config::Timeouts;
use crate::process::{CommandOutput, CommandRunner, CommandSpec, RunError};
use crate::verify::probes::{site_packages_probe, venv_command};
use camino::{Utf8Path, Utf8PathBuf};
use tempfile::TempDir;
use thiserror::Error;

/// Why an environment could not be provisioned.
#[derive(Debug, Error)]
pub enum EnvironmentError {
    /// The temporary directory could not be created.
    #[error("failed to create environment directory: {0}")]
    Workspace(#[source] std::io::Error),

    /// The temporary directory path is not UTF-8.
    #[error("environment directory path is not valid UTF-8")]
    NonUtf8Path,

    /// A command could not be run or timed out.
    #[error(transparent)]
    Run(#[from] RunError),

    /// A command exited unsuccessfully.
    #[error("{command} failed: {summary}")]
    Failed {
        /// The command that failed.
        command: String,
        /// Last line of its diagnostics.
        summary: String,
    },

    /// The environment reported no usable library location.
    #[error("environment reported no site-packages directory ({reported:?})")]
    NoSitePackages {
        /// What the interpreter printed.
        reported: String,
    },
}

/// An isolated environment, removed with its directory on drop.
#[derive(Debug)]
pub struct IsolatedEnvironment {
    _dir: TempDir,
    python: Utf8PathBuf,
    site_packages: Utf8PathBuf,
}

impl IsolatedEnvironment {
    /// Create an environment for `interpreter` in a fresh temporary
    /// directory and locate its site-packages.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentError`] when any step fails or times out; the
    /// directory is removed in that case too.
    pub fn provision(
        runner: &dyn CommandRunner,
        label: &str,
        interpreter: &Utf8Path,
        timeouts: &Timeouts,
    ) -> Result<Self, EnvironmentError> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("abipack_verify_{}_", sanitize(label)))
            .tempdir()
            .map_err(EnvironmentError::Workspace)?;
        let base = Utf8Path::from_path(dir.path()).ok_or(EnvironmentError::NonUtf8Path)?;
        let venv = base.join("venv");

        run_checked(runner, &venv_command(interpreter, &venv, timeouts.provision()))?;
        let python = venv_python(&venv);

        let output = run_checked(runner, &site_packages_probe(&python, timeouts.probe()))?;
        let reported = output.stdout.trim();
        let site_packages = Utf8PathBuf::from(reported);
        if reported.is_empty() || !site_packages.is_dir() {
            return Err(EnvironmentError::NoSitePackages {
                reported: reported.to_owned(),
            });
        }
        log::debug!("{label}: environment at {venv}, site-packages {site_packages}");

        Ok(Self {
            _dir: dir,
            python,
            site_packages,
        })
    }

    /// The environment's interpreter.
    #[must_use]
    pub fn python(&self) -> &Utf8Path {
        &self.python
    }

    /// The environment's library location.
    #[must_use]
    pub fn site_packages(&self) -> &Utf8Path {
        &self.site_packages
    }
}

/// The interpreter inside a virtual environment.
#[must_use]
pub fn venv_python(venv: &Utf8Path) -> Utf8PathBuf {
    if cfg!(windows) {
        venv.join("Scripts").join("python.exe")
    } else {
        venv.join("bin").join("python")
    }
}

fn run_checked(runner: &dyn CommandRunner, spec: &CommandSpec) -> Result<CommandOutput, EnvironmentError> {
    let output = runner.run(spec)?;
    if output.succeeded() {
        Ok(output)
    } else {
        Err(EnvironmentError::Failed {
            command: spec.to_string(),
            summary: output.failure_summary(),
        })
    }
}

fn sanitize(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '_' })
        .collect()
}
