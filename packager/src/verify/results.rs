//! Per-runtime verification outcomes and their summary.

use camino::Utf8PathBuf;
use serde::Serialize;
use std::fmt;

/// Progress of one runtime through verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// The interpreter was found.
    Discovered,
    /// An isolated environment exists.
    EnvironmentProvisioned,
    /// The package was unpacked into the environment.
    Installed,
    /// The package imported and reported its versions.
    Imported,
    /// A round-trip against the backend succeeded.
    Connected,
    /// Every check succeeded.
    Passed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Discovered => "discovered",
            Self::EnvironmentProvisioned => "environment_provisioned",
            Self::Installed => "installed",
            Self::Imported => "imported",
            Self::Connected => "connected",
            Self::Passed => "passed",
        })
    }
}

/// Final classification of one runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    /// Every check succeeded.
    Pass,
    /// The interpreter did not report a usable version.
    VersionProbeFailure,
    /// The environment could not be created or populated.
    EnvironmentFailure,
    /// The package failed to import.
    ImportFailure,
    /// The backend round-trip failed.
    ConnectionFailure,
}

impl VerificationStatus {
    /// Whether this status counts as a pass.
    #[must_use]
    pub fn is_pass(self) -> bool {
        self == Self::Pass
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pass => "pass",
            Self::VersionProbeFailure => "version_probe_failure",
            Self::EnvironmentFailure => "environment_failure",
            Self::ImportFailure => "import_failure",
            Self::ConnectionFailure => "connection_failure",
        })
    }
}

/// The immutable outcome for one runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    runtime: String,
    interpreter: Utf8PathBuf,
    abi_tag: Option<String>,
    stage_reached: Stage,
    status: VerificationStatus,
    message: String,
}

impl VerificationResult {
    /// A runtime that passed every check.
    #[must_use]
    pub fn passed(
        runtime: &str,
        interpreter: &Utf8PathBuf,
        abi_tag: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            runtime: runtime.to_owned(),
            interpreter: interpreter.clone(),
            abi_tag,
            stage_reached: Stage::Passed,
            status: VerificationStatus::Pass,
            message: message.into(),
        }
    }

    /// A runtime that stopped after `stage_reached`.
    #[must_use]
    pub fn failed(
        runtime: &str,
        interpreter: &Utf8PathBuf,
        abi_tag: Option<String>,
        stage_reached: Stage,
        status: VerificationStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            runtime: runtime.to_owned(),
            interpreter: interpreter.clone(),
            abi_tag,
            stage_reached,
            status,
            message: message.into(),
        }
    }

    /// Label of the runtime, e.g. `system` or `3.11.7`.
    #[must_use]
    pub fn runtime(&self) -> &str {
        &self.runtime
    }

    /// The interpreter that was exercised.
    #[must_use]
    pub fn interpreter(&self) -> &Utf8PathBuf {
        &self.interpreter
    }

    /// The ABI reported by the interpreter, when the version probe ran.
    #[must_use]
    pub fn abi_tag(&self) -> Option<&str> {
        self.abi_tag.as_deref()
    }

    /// The last stage completed.
    #[must_use]
    pub fn stage_reached(&self) -> Stage {
        self.stage_reached
    }

    /// The classification.
    #[must_use]
    pub fn status(&self) -> VerificationStatus {
        self.status
    }

    /// Probe output on success, the failure reason otherwise.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// All results of a verification run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SummaryTable {
    results: Vec<VerificationResult>,
}

impl SummaryTable {
    /// Collect results in verification order.
    #[must_use]
    pub fn new(results: Vec<VerificationResult>) -> Self {
        Self { results }
    }

    /// Every result.
    #[must_use]
    pub fn results(&self) -> &[VerificationResult] {
        &self.results
    }

    /// Number of passing runtimes.
    #[must_use]
    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.status.is_pass()).count()
    }

    /// Number of failing runtimes.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.results.len() - self.passed()
    }

    /// Whether any runtime failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    /// The table as text lines.
    #[must_use]
    pub fn render(&self) -> Vec<String> {
        let runtime_width = self
            .results
            .iter()
            .map(|r| r.runtime.len())
            .chain(std::iter::once("Runtime".len()))
            .max()
            .unwrap_or_default();
        let status_width = self
            .results
            .iter()
            .map(|r| r.status.to_string().len())
            .chain(std::iter::once("Status".len()))
            .max()
            .unwrap_or_default();

        let mut lines = vec![
            format!(
                "| {:<runtime_width$} | {:<6} | {:<status_width$} | Stage reached",
                "Runtime", "ABI", "Status"
            ),
            format!(
                "|{}|{}|{}|{}",
                "-".repeat(runtime_width + 2),
                "-".repeat(8),
                "-".repeat(status_width + 2),
                "-".repeat(24)
            ),
        ];
        for result in &self.results {
            lines.push(format!(
                "| {:<runtime_width$} | {:<6} | {:<status_width$} | {}",
                result.runtime,
                result.abi_tag.as_deref().unwrap_or("?"),
                result.status.to_string(),
                result.stage_reached
            ));
        }
        lines.push(String::new());
        lines.push(format!("Passed: {}/{}", self.passed(), self.results.len()));
        lines
    }

    /// The results as a JSON array.
    ///
    /// # Errors
    ///
    /// Returns the serializer error, which does not occur for these types.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
