//! Unit tests for the per-runtime verification flow.
//!
//! Interpreters are played by [`ScriptedRunner`], which creates real
//! site-packages directories so the install stage runs for real.

use super::Verifier;
use crate::config::PackagerConfig;
use crate::process::{CommandOutput, MockCommandRunner};
use crate::test_utils::{ScriptedFailure, ScriptedRunner};
use crate::verify::discovery::Runtime;
use crate::verify::results::{Stage, VerificationStatus};
use camino::{Utf8Path, Utf8PathBuf};
use rstest::{fixture, rstest};
use std::fs::File;
use std::io::Write;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

const SYSTEM: &str = "/usr/local/python3.8/bin/python3";
const PY311: &str = "/home/ci/.pyenv/versions/3.11.7/bin/python";
const PY312: &str = "/home/ci/.pyenv/versions/3.12.3/bin/python";

struct Package {
    _dir: TempDir,
    archive: Utf8PathBuf,
    config: PackagerConfig,
}

fn write_archive(path: &Utf8Path, entries: &[&str]) {
    let mut writer = zip::ZipWriter::new(File::create(path).expect("create archive"));
    for name in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .expect("start entry");
        writer.write_all(b"# payload\n").expect("write entry");
    }
    writer.finish().expect("finish archive");
}

#[fixture]
fn package() -> Package {
    let dir = tempfile::tempdir().expect("temp dir");
    let base = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8");
    let archive = base.join("psycounvdb-2.9.11-linux-x86_64-python3.8~3.12.zip");
    write_archive(
        &archive,
        &[
            "psycounvdb/__init__.py",
            "psycounvdb/_psycounvdb.cpython-38-x86_64-linux-gnu.so",
            "psycounvdb_binary.libs/libpq-e8a0ad73.so.5.16",
        ],
    );
    Package {
        _dir: dir,
        archive,
        config: PackagerConfig::default(),
    }
}

fn runtimes() -> Vec<Runtime> {
    vec![
        Runtime::new("system", SYSTEM),
        Runtime::new("3.11.7", PY311),
        Runtime::new("3.12.3", PY312),
    ]
}

fn healthy_runner() -> ScriptedRunner {
    ScriptedRunner::new()
        .with_interpreter(SYSTEM, "3.8.18")
        .with_interpreter(PY311, "3.11.7")
        .with_interpreter(PY312, "3.12.3")
}

#[rstest]
fn every_healthy_runtime_passes(package: Package) {
    let runner = healthy_runner();
    let verifier = Verifier::new(&runner, &package.config, &package.archive);

    let table = verifier.verify_all(&runtimes(), &mut Vec::new(), true);

    assert_eq!(table.passed(), 3);
    let tags: Vec<_> = table.results().iter().map(|r| r.abi_tag()).collect();
    assert_eq!(tags, [Some("cp38"), Some("cp311"), Some("cp312")]);
    for result in table.results() {
        assert_eq!(result.stage_reached(), Stage::Passed);
        assert!(result.message().contains("PostgreSQL 16.4"), "{}", result.message());
    }
}

#[rstest]
fn connection_failure_does_not_affect_other_runtimes(package: Package) {
    let runner = healthy_runner().failing(PY311, ScriptedFailure::Connection);
    let verifier = Verifier::new(&runner, &package.config, &package.archive);

    let table = verifier.verify_all(&runtimes(), &mut Vec::new(), true);

    let statuses: Vec<_> = table.results().iter().map(|r| r.status()).collect();
    assert_eq!(
        statuses,
        [
            VerificationStatus::Pass,
            VerificationStatus::ConnectionFailure,
            VerificationStatus::Pass,
        ]
    );
    let failed = &table.results()[1];
    assert_eq!(failed.stage_reached(), Stage::Imported);
    assert!(failed.message().contains("Connection refused"));
}

#[rstest]
#[case::version(ScriptedFailure::Version, VerificationStatus::VersionProbeFailure, Stage::Discovered)]
#[case::environment(
    ScriptedFailure::Environment,
    VerificationStatus::EnvironmentFailure,
    Stage::Discovered
)]
#[case::import(ScriptedFailure::Import, VerificationStatus::ImportFailure, Stage::Installed)]
#[case::connection_timeout(
    ScriptedFailure::ConnectionTimeout,
    VerificationStatus::ConnectionFailure,
    Stage::Imported
)]
fn failures_are_classified_by_stage(
    package: Package,
    #[case] failure: ScriptedFailure,
    #[case] status: VerificationStatus,
    #[case] stage: Stage,
) {
    let runner = healthy_runner().failing(PY312, failure);
    let verifier = Verifier::new(&runner, &package.config, &package.archive);

    let result = verifier.verify_runtime(&Runtime::new("3.12.3", PY312));

    assert_eq!(result.status(), status);
    assert_eq!(result.stage_reached(), stage);
}

#[rstest]
fn timeout_message_names_the_limit(package: Package) {
    let runner = healthy_runner().failing(PY311, ScriptedFailure::ConnectionTimeout);
    let verifier = Verifier::new(&runner, &package.config, &package.archive);

    let result = verifier.verify_runtime(&Runtime::new("3.11.7", PY311));

    assert!(result.message().contains("timed out after 60 seconds"), "{}", result.message());
}

#[rstest]
fn missing_interpreter_is_a_version_probe_failure(package: Package) {
    let runner = healthy_runner();
    let verifier = Verifier::new(&runner, &package.config, &package.archive);

    let result = verifier.verify_runtime(&Runtime::new("system", "/usr/bin/python-absent"));

    assert_eq!(result.status(), VerificationStatus::VersionProbeFailure);
    assert_eq!(result.abi_tag(), None);
    assert!(result.message().contains("failed to start"));
}

#[rstest]
fn unrecognised_version_output_is_a_version_probe_failure(package: Package) {
    let mut runner = MockCommandRunner::new();
    runner
        .expect_run()
        .times(1)
        .returning(|_| Ok(CommandOutput::success("Python (unknown build)\n")));
    let verifier = Verifier::new(&runner, &package.config, &package.archive);

    let result = verifier.verify_runtime(&Runtime::new("system", SYSTEM));

    assert_eq!(result.status(), VerificationStatus::VersionProbeFailure);
    assert!(result.message().starts_with("unrecognised version output"));
}

#[rstest]
fn unreadable_archive_is_an_environment_failure(package: Package) {
    std::fs::write(&package.archive, b"not a zip").expect("corrupt archive");
    let runner = healthy_runner();
    let verifier = Verifier::new(&runner, &package.config, &package.archive);

    let result = verifier.verify_runtime(&Runtime::new("3.11.7", PY311));

    assert_eq!(result.status(), VerificationStatus::EnvironmentFailure);
    assert_eq!(result.stage_reached(), Stage::EnvironmentProvisioned);
    assert!(result.message().starts_with("install failed"));
}

#[rstest]
fn environments_are_removed_after_each_runtime(package: Package) {
    let runner = healthy_runner().failing(SYSTEM, ScriptedFailure::Import);
    let verifier = Verifier::new(&runner, &package.config, &package.archive);

    let _ = verifier.verify_all(&runtimes(), &mut Vec::new(), true);

    let venvs: Vec<Utf8PathBuf> = runner
        .calls()
        .iter()
        .filter(|spec| spec.args.first().is_some_and(|arg| arg == "-m"))
        .map(|spec| Utf8PathBuf::from(&spec.args[2]))
        .collect();
    assert_eq!(venvs.len(), 3);
    for venv in venvs {
        assert!(!venv.exists(), "{venv} left behind");
    }
}

#[rstest]
#[case::verbose(false, true)]
#[case::quiet(true, false)]
fn progress_lines_follow_quiet(package: Package, #[case] quiet: bool, #[case] expect_output: bool) {
    let runner = healthy_runner();
    let verifier = Verifier::new(&runner, &package.config, &package.archive);
    let mut stderr = Vec::new();

    let _ = verifier.verify_all(&runtimes()[..1], &mut stderr, quiet);

    let text = String::from_utf8(stderr).expect("utf8");
    assert_eq!(text.contains("== system"), expect_output);
    assert_eq!(text.contains("pass:"), expect_output);
}
