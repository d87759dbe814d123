//! Degraded builds announce themselves through the log facade.
//!
//! `logtest` installs a process-wide logger, so this binary holds a single
//! test.

use abipack_packager::abi::AbiDescriptor;
use abipack_packager::fetch::LocalArchive;
use abipack_packager::pipeline::{BuildContext, run_build};
use abipack_packager::test_utils::ProjectTree;
use log::Level;
use logtest::Logger;

#[test]
fn degraded_build_logs_every_weakness_as_a_warning() {
    let mut logger = Logger::start();
    let mut tree = ProjectTree::new();
    tree.config_mut().package.abis = vec![AbiDescriptor::new(3, 8), AbiDescriptor::new(3, 9)];
    tree.add_extension_module(&AbiDescriptor::new(3, 8));
    let upstream = LocalArchive::new(tree.write_upstream_archive(&[(
        "psycopg2/__init__.py",
        b"# upstream package".as_slice(),
    )]));
    let context = BuildContext {
        project_dir: tree.root(),
        config: tree.config(),
        quiet: true,
    };

    let report = run_build(&context, &upstream, &mut Vec::new()).expect("build succeeds");
    assert!(report.is_degraded());

    let mut warnings = Vec::new();
    while let Some(record) = logger.pop() {
        if record.level() == Level::Warn {
            warnings.push(record.args().to_string());
        }
    }

    assert!(
        warnings.iter().any(|line| line.contains("dropping cp39")),
        "missing dropped-ABI warning: {warnings:?}"
    );
    assert!(
        warnings
            .iter()
            .any(|line| line.contains("contains no entries under")),
        "missing bundled-library warning: {warnings:?}"
    );
}
