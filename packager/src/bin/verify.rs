//! `abipack-verify` entrypoint.
//!
//! Installs a package archive into a fresh environment for every
//! discovered interpreter and reports which ones can import the package and
//! reach the database.

use abipack_packager::cli::{OutputFormat, VerifyCli};
use abipack_packager::config::PackagerConfig;
use abipack_packager::error::{PackagerError, Result};
use abipack_packager::logging::init_logging;
use abipack_packager::output::write_stderr_line;
use abipack_packager::process::{CommandRunner, SystemCommandRunner};
use abipack_packager::verify::{Verifier, discover_runtimes, locate_archive};
use camino::Utf8PathBuf;
use clap::Parser;
use std::io::Write;

/// Exit status when `--strict` is given and a runtime failed.
const STRICT_FAILURE: i32 = 2;

fn main() {
    let cli = VerifyCli::parse();
    init_logging(cli.common.verbosity, cli.common.quiet);
    let mut stdout = std::io::stdout();
    let mut stderr = std::io::stderr();
    let run_result = run(&cli, &SystemCommandRunner, &mut stdout, &mut stderr);
    let exit_code = exit_code_for_run_result(run_result, &mut stderr);
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

fn run(
    cli: &VerifyCli,
    runner: &dyn CommandRunner,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> Result<i32> {
    let common = &cli.common;
    let config = PackagerConfig::load(&common.project_dir, common.config_path())?;
    let archive = resolve_archive(cli, &config)?;

    let runtimes = discover_runtimes(&config.verify);
    if !common.quiet {
        write_stderr_line(
            stderr,
            format!("Verifying {archive} against {} runtime(s)", runtimes.len()),
        );
    }
    let table = Verifier::new(runner, &config, &archive).verify_all(&runtimes, stderr, common.quiet);

    match cli.format {
        OutputFormat::Human => {
            for line in table.render() {
                writeln!(stdout, "{line}")?;
            }
        }
        OutputFormat::Json => writeln!(stdout, "{}", table.to_json()?)?,
    }

    if cli.strict && table.has_failures() {
        return Ok(STRICT_FAILURE);
    }
    Ok(0)
}

fn resolve_archive(cli: &VerifyCli, config: &PackagerConfig) -> Result<Utf8PathBuf> {
    let dist = config.paths.dist_root(&cli.common.project_dir);
    let archive = match &cli.archive {
        Some(path) => path.clone(),
        None => locate_archive(&dist, config).ok_or_else(|| PackagerError::ArchiveMissing {
            path: dist.join(format!(
                "{}-{}-{}-python*.zip",
                config.package.name, config.package.version, config.package.platform
            )),
        })?,
    };
    if !archive.is_file() {
        return Err(PackagerError::ArchiveMissing { path: archive });
    }
    Ok(archive)
}

fn exit_code_for_run_result(result: Result<i32>, stderr: &mut dyn Write) -> i32 {
    match result {
        Ok(code) => code,
        Err(err) => {
            write_stderr_line(stderr, format!("error: {err}"));
            1
        }
    }
}
