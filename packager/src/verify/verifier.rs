//! The per-runtime verification state machine.

use crate::abi::AbiDescriptor;
use crate::config::PackagerConfig;
use crate::output::write_stderr_line;
use crate::process::{CommandOutput, CommandRunner, CommandSpec};
use crate::verify::discovery::Runtime;
use crate::verify::environment::IsolatedEnvironment;
use crate::verify::install::install_archive;
use crate::verify::probes::{connect_probe, import_probe, version_probe};
use crate::verify::results::{Stage, SummaryTable, VerificationResult, VerificationStatus};
use camino::Utf8Path;
use log::{info, warn};
use std::io::Write;

/// Where a runtime stopped and why.
struct Stop {
    stage: Stage,
    status: VerificationStatus,
    message: String,
}

impl Stop {
    fn new(stage: Stage, status: VerificationStatus, message: impl Into<String>) -> Self {
        Self {
            stage,
            status,
            message: message.into(),
        }
    }
}

/// Runs every verification stage for each runtime in turn.
pub struct Verifier<'a> {
    runner: &'a dyn CommandRunner,
    config: &'a PackagerConfig,
    archive: &'a Utf8Path,
}

impl<'a> Verifier<'a> {
    /// Verify `archive` using `runner` for every subprocess.
    #[must_use]
    pub fn new(runner: &'a dyn CommandRunner, config: &'a PackagerConfig, archive: &'a Utf8Path) -> Self {
        Self {
            runner,
            config,
            archive,
        }
    }

    /// Verify every runtime, one after another.
    ///
    /// A failing runtime is recorded and never affects the others. Progress
    /// lines go to `stderr` unless `quiet` is set.
    pub fn verify_all(&self, runtimes: &[Runtime], stderr: &mut dyn Write, quiet: bool) -> SummaryTable {
        let mut results = Vec::with_capacity(runtimes.len());
        for runtime in runtimes {
            if !quiet {
                write_stderr_line(
                    stderr,
                    format!("== {} ({}) ==", runtime.label, runtime.interpreter),
                );
            }
            let result = self.verify_runtime(runtime);
            if !quiet {
                write_stderr_line(
                    stderr,
                    format!("   {}: {}", result.status(), result.message()),
                );
            }
            results.push(result);
        }
        SummaryTable::new(results)
    }

    /// Verify one runtime.
    #[must_use]
    pub fn verify_runtime(&self, runtime: &Runtime) -> VerificationResult {
        let timeout = self.config.timeouts.probe();
        let abi = match self.probe_version(runtime, timeout) {
            Ok(abi) => abi,
            Err(stop) => return Self::record(runtime, None, stop),
        };
        let abi_tag = Some(abi.tag().to_owned());
        match self.exercise(runtime) {
            Ok(message) => {
                info!("{}: passed", runtime.label);
                VerificationResult::passed(&runtime.label, &runtime.interpreter, abi_tag, message)
            }
            Err(stop) => Self::record(runtime, abi_tag, stop),
        }
    }

    fn record(runtime: &Runtime, abi_tag: Option<String>, stop: Stop) -> VerificationResult {
        warn!(
            "{}: {} after {}: {}",
            runtime.label, stop.status, stop.stage, stop.message
        );
        VerificationResult::failed(
            &runtime.label,
            &runtime.interpreter,
            abi_tag,
            stop.stage,
            stop.status,
            stop.message,
        )
    }

    fn probe_version(&self, runtime: &Runtime, timeout: std::time::Duration) -> Result<AbiDescriptor, Stop> {
        let fail = |message: String| {
            Stop::new(Stage::Discovered, VerificationStatus::VersionProbeFailure, message)
        };
        let output = self
            .runner
            .run(&version_probe(&runtime.interpreter, timeout))
            .map_err(|err| fail(err.to_string()))?;
        if !output.succeeded() {
            return Err(fail(output.failure_summary()));
        }
        let text = output.text();
        info!("{}: {text}", runtime.label);
        AbiDescriptor::from_version_output(text)
            .ok_or_else(|| fail(format!("unrecognised version output {text:?}")))
    }

    /// Provision, install, import and connect. The environment is dropped,
    /// and its directory removed, before this returns.
    fn exercise(&self, runtime: &Runtime) -> Result<String, Stop> {
        let timeouts = &self.config.timeouts;
        let env = IsolatedEnvironment::provision(
            self.runner,
            &runtime.label,
            &runtime.interpreter,
            timeouts,
        )
        .map_err(|err| {
            Stop::new(Stage::Discovered, VerificationStatus::EnvironmentFailure, err.to_string())
        })?;

        install_archive(self.archive, env.site_packages(), self.config).map_err(|err| {
            Stop::new(
                Stage::EnvironmentProvisioned,
                VerificationStatus::EnvironmentFailure,
                format!("install failed: {err}"),
            )
        })?;

        let package = &self.config.package.name;
        let imported = self.probe(
            &import_probe(env.python(), package, timeouts.probe()),
            Stage::Installed,
            VerificationStatus::ImportFailure,
        )?;
        info!("{}: {}", runtime.label, imported.text().replace('\n', "; "));

        let connected = self.probe(
            &connect_probe(env.python(), package, &self.config.verify.database, timeouts.probe()),
            Stage::Imported,
            VerificationStatus::ConnectionFailure,
        )?;

        Ok(format!(
            "{}; {}",
            imported.text().replace('\n', "; "),
            connected.text()
        ))
    }

    fn probe(&self, spec: &CommandSpec, stage: Stage, status: VerificationStatus) -> Result<CommandOutput, Stop> {
        let output = self
            .runner
            .run(spec)
            .map_err(|err| Stop::new(stage, status, err.to_string()))?;
        if output.succeeded() {
            Ok(output)
        } else {
            Err(Stop::new(stage, status, output.failure_summary()))
        }
    }
}

#[cfg(test)]
#[path = "verifier_tests.rs"]
mod tests;
