//! `abipack-build` entrypoint.
//!
//! Collects the per-ABI extension modules, bundles the upstream shared
//! libraries, repairs runpaths and writes the package archive into the
//! dist directory.

use abipack_packager::cli::BuildCli;
use abipack_packager::config::PackagerConfig;
use abipack_packager::error::Result;
use abipack_packager::fetch::{LocalArchive, PipFetcher, UpstreamFetcher};
use abipack_packager::logging::init_logging;
use abipack_packager::output::write_stderr_line;
use abipack_packager::pipeline::{BuildContext, run_build};
use abipack_packager::process::SystemCommandRunner;
use camino::Utf8Path;
use clap::Parser;
use std::io::Write;

fn main() {
    let cli = BuildCli::parse();
    init_logging(cli.common.verbosity, cli.common.quiet);
    let mut stderr = std::io::stderr();
    let run_result = run(&cli, &mut stderr);
    let exit_code = exit_code_for_run_result(run_result, &mut stderr);
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

fn run(cli: &BuildCli, stderr: &mut dyn Write) -> Result<()> {
    let common = &cli.common;
    let config = PackagerConfig::load(&common.project_dir, common.config_path())?;
    let runner = SystemCommandRunner;
    let fetcher = upstream_fetcher(&config, &common.project_dir, &runner);

    let context = BuildContext {
        project_dir: &common.project_dir,
        config: &config,
        quiet: common.quiet,
    };
    let report = run_build(&context, fetcher.as_ref(), stderr)?;
    if report.is_degraded() {
        log::info!(
            "{} built with {} warning(s)",
            report.archive.path,
            report.warnings.len()
        );
    }
    Ok(())
}

/// A configured local archive skips the download entirely.
fn upstream_fetcher<'a>(
    config: &'a PackagerConfig,
    project_dir: &Utf8Path,
    runner: &'a SystemCommandRunner,
) -> Box<dyn UpstreamFetcher + 'a> {
    match &config.upstream.archive {
        Some(path) => Box::new(LocalArchive::new(project_dir.join(path))),
        None => Box::new(PipFetcher::new(
            runner,
            &config.upstream,
            config.timeouts.download(),
        )),
    }
}

fn exit_code_for_run_result(result: Result<()>, stderr: &mut dyn Write) -> i32 {
    match result {
        Ok(()) => 0,
        Err(err) => {
            write_stderr_line(stderr, format!("error: {err}"));
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abipack_packager::abi::AbiDescriptor;
    use abipack_packager::cli::CommonArgs;
    use abipack_packager::error::PackagerError;
    use abipack_packager::test_utils::{ProjectTree, UPSTREAM_WHEEL};

    fn cli_for(tree: &ProjectTree) -> BuildCli {
        BuildCli {
            common: CommonArgs {
                project_dir: tree.root().to_owned(),
                quiet: true,
                ..CommonArgs::default()
            },
        }
    }

    #[test]
    fn exit_code_for_run_result_returns_zero_on_success() {
        let mut stderr = Vec::new();
        let exit_code = exit_code_for_run_result(Ok(()), &mut stderr);
        assert_eq!(exit_code, 0);
        assert!(stderr.is_empty());
    }

    #[test]
    fn exit_code_for_run_result_prints_error_and_returns_one() {
        let err = PackagerError::ArchiveMissing {
            path: "dist/absent.zip".into(),
        };

        let mut stderr = Vec::new();
        let exit_code = exit_code_for_run_result(Err(err), &mut stderr);
        assert_eq!(exit_code, 1);

        let stderr_text = String::from_utf8(stderr).expect("stderr was not UTF-8");
        assert!(stderr_text.contains("package archive dist/absent.zip not found"));
    }

    #[test]
    fn configured_archive_is_used_instead_of_downloading() {
        let tree = ProjectTree::new();
        tree.add_extension_module(&AbiDescriptor::new(3, 9));
        tree.write_default_upstream();
        std::fs::write(
            tree.root().join("abipack.toml"),
            format!("[upstream]\narchive = \"upstream/{UPSTREAM_WHEEL}\"\n"),
        )
        .expect("write config");

        run(&cli_for(&tree), &mut Vec::new()).expect("build succeeds");

        assert!(
            tree.dist_dir()
                .join("psycounvdb-2.9.11-linux-x86_64-python3.9~3.9.zip")
                .is_file()
        );
    }

    #[test]
    fn missing_build_output_exits_with_remediation() {
        let tree = ProjectTree::new();
        std::fs::write(
            tree.root().join("abipack.toml"),
            "[upstream]\narchive = \"upstream/none.whl\"\n",
        )
        .expect("write config");
        let mut stderr = Vec::new();

        let result = run(&cli_for(&tree), &mut stderr);
        let exit_code = exit_code_for_run_result(result, &mut stderr);

        assert_eq!(exit_code, 1);
        let text = String::from_utf8(stderr).expect("utf8");
        assert!(text.contains("python3.8 setup.py build_ext --inplace"));
    }

    #[test]
    fn invalid_configuration_is_reported() {
        let tree = ProjectTree::new();
        std::fs::write(tree.root().join("abipack.toml"), "[package]\nabis = []\n")
            .expect("write config");

        let err = run(&cli_for(&tree), &mut Vec::new()).expect_err("invalid");

        assert!(err.to_string().contains("package.abis"));
    }
}
