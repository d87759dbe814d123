//! Unit tests for artifact collection.

use super::{DropReason, collect_extension_modules, copy_source_modules};
use crate::abi::AbiDescriptor;
use crate::error::PackagerError;
use crate::layout::StagingLayout;
use crate::test_utils::ProjectTree;
use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use tempfile::TempDir;

struct Staging {
    _dir: TempDir,
    layout: StagingLayout,
}

fn staging(tree: &ProjectTree) -> Staging {
    let dir = tempfile::tempdir().expect("temp dir");
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8");
    let layout = StagingLayout::new(&root.join("package"), tree.config());
    layout.create().expect("layout");
    Staging { _dir: dir, layout }
}

#[fixture]
fn tree() -> ProjectTree {
    ProjectTree::new()
}

fn abi(minor: u8) -> AbiDescriptor {
    AbiDescriptor::new(3, minor)
}

#[rstest]
fn stages_one_module_per_present_abi(tree: ProjectTree) {
    tree.add_extension_module(&abi(8));
    let source = tree.add_extension_module(&abi(11));
    let stage = staging(&tree);

    let report = collect_extension_modules(
        &tree.config().paths.build_root(tree.root()),
        tree.config(),
        &stage.layout,
    )
    .expect("collect");

    let present: Vec<_> = report.present_abis().cloned().collect();
    assert_eq!(present, [abi(8), abi(11)]);
    let dropped: Vec<_> = report.dropped.iter().map(|d| d.abi.clone()).collect();
    assert_eq!(dropped, [abi(9), abi(10), abi(12), abi(13), abi(14)]);
    assert!(report.dropped.iter().all(|d| d.reason == DropReason::Missing));

    let staged = &report.modules[1].staged;
    assert_eq!(staged.parent(), Some(stage.layout.package_dir()));
    assert_eq!(
        std::fs::read(staged).expect("staged"),
        std::fs::read(&source).expect("source")
    );
    assert!(source.is_file(), "build output must be left in place");
}

#[rstest]
fn short_tags_do_not_match_longer_ones(mut tree: ProjectTree) {
    tree.config_mut().package.abis = vec![abi(1), abi(11)];
    tree.add_extension_module(&abi(11));
    let stage = staging(&tree);

    let report = collect_extension_modules(
        &tree.config().paths.build_root(tree.root()),
        tree.config(),
        &stage.layout,
    )
    .expect("collect");

    assert_eq!(report.modules.len(), 1);
    assert_eq!(report.modules[0].abi, abi(11));
    assert_eq!(report.dropped[0].abi, abi(1));
}

#[rstest]
fn ambiguous_matches_drop_the_abi(tree: ProjectTree) {
    tree.add_extension_module(&abi(8));
    tree.add_extension_module(&abi(9));
    let second = tree
        .config()
        .paths
        .build_root(tree.root())
        .join("lib.linux-i686-cpython-38/psycounvdb");
    std::fs::create_dir_all(&second).expect("second subdir");
    std::fs::write(second.join("_psycounvdb.cpython-38-i386-linux-gnu.so"), b"x").expect("write");
    let stage = staging(&tree);

    let report = collect_extension_modules(
        &tree.config().paths.build_root(tree.root()),
        tree.config(),
        &stage.layout,
    )
    .expect("collect");

    let present: Vec<_> = report.present_abis().cloned().collect();
    assert_eq!(present, [abi(9)]);
    let cp38 = report
        .dropped
        .iter()
        .find(|d| d.abi == abi(8))
        .expect("cp38 dropped");
    assert!(matches!(&cp38.reason, DropReason::Ambiguous(paths) if paths.len() == 2));
}

#[rstest]
fn subdirectories_outside_the_pattern_are_ignored(tree: ProjectTree) {
    tree.add_extension_module(&abi(12));
    let temp = tree
        .config()
        .paths
        .build_root(tree.root())
        .join("temp.linux-x86_64-cpython-38/psycounvdb");
    std::fs::create_dir_all(&temp).expect("temp subdir");
    std::fs::write(temp.join("_psycounvdb.cpython-38-x86_64-linux-gnu.so"), b"x").expect("write");
    let stage = staging(&tree);

    let report = collect_extension_modules(
        &tree.config().paths.build_root(tree.root()),
        tree.config(),
        &stage.layout,
    )
    .expect("collect");

    let present: Vec<_> = report.present_abis().cloned().collect();
    assert_eq!(present, [abi(12)]);
}

#[rstest]
fn missing_build_root_is_a_precondition_failure(tree: ProjectTree) {
    let stage = staging(&tree);

    let err = collect_extension_modules(
        &tree.config().paths.build_root(tree.root()),
        tree.config(),
        &stage.layout,
    )
    .expect_err("no build root");

    assert!(matches!(err, PackagerError::BuildOutputMissing { .. }));
    let message = err.to_string();
    assert!(message.contains("python3.8 setup.py build_ext --inplace"));
    assert!(message.contains("python3.14 setup.py build_ext --inplace"));
}

#[rstest]
fn empty_build_root_has_no_modules(tree: ProjectTree) {
    tree.create_build_root();
    let stage = staging(&tree);

    let err = collect_extension_modules(
        &tree.config().paths.build_root(tree.root()),
        tree.config(),
        &stage.layout,
    )
    .expect_err("nothing built");

    assert!(matches!(err, PackagerError::NoExtensionModules { .. }));
}

#[rstest]
fn copies_only_python_sources(tree: ProjectTree) {
    tree.add_source_module("README.txt", "not a module");
    let stage = staging(&tree);

    let copied = copy_source_modules(&tree.config().paths.source_root(tree.root()), &stage.layout)
        .expect("copy");

    let names: Vec<_> = copied.iter().filter_map(|p| p.file_name()).collect();
    assert_eq!(names, ["extensions.py", "extras.py"]);
    assert!(!stage.layout.package_dir().join("README.txt").exists());
}

#[rstest]
fn missing_source_directory_copies_nothing(tree: ProjectTree) {
    let stage = staging(&tree);

    let copied = copy_source_modules(&tree.root().join("absent"), &stage.layout).expect("copy");

    assert!(copied.is_empty());
}
