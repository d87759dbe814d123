//! Behaviour-driven tests for package assembly.
//!
//! These scenarios drive the whole build pipeline against a throwaway
//! project tree. Tests use the rstest-bdd v0.5.0 mutable world pattern.

use abipack_packager::abi::AbiDescriptor;
use abipack_packager::error::PackagerError;
use abipack_packager::fetch::LocalArchive;
use abipack_packager::pipeline::{BuildContext, BuildReport, BuildWarning, run_build};
use abipack_packager::test_utils::ProjectTree;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use std::fs::File;
use std::io::Read;
use zip::ZipArchive;

// ---------------------------------------------------------------------------
// World types
// ---------------------------------------------------------------------------

#[derive(Default)]
struct BuildWorld {
    tree: ProjectTree,
    upstream: Option<LocalArchive>,
    report: Option<BuildReport>,
    error: Option<PackagerError>,
}

#[fixture]
fn world() -> BuildWorld {
    BuildWorld::default()
}

fn parse_abis(tags: &str) -> Vec<AbiDescriptor> {
    tags.split_whitespace()
        .map(|tag| tag.parse().expect("valid ABI tag"))
        .collect()
}

fn report(world: &BuildWorld) -> &BuildReport {
    world.report.as_ref().expect("build report set")
}

fn read_entry(world: &BuildWorld, name: &str) -> Vec<u8> {
    let archive = &report(world).archive.path;
    let mut zip = ZipArchive::new(File::open(archive).expect("open archive")).expect("zip");
    let mut entry = zip.by_name(name).expect("entry present");
    let mut bytes = Vec::new();
    entry.read_to_end(&mut bytes).expect("read entry");
    bytes
}

// ---------------------------------------------------------------------------
// Step definitions
// ---------------------------------------------------------------------------

#[given("a project compiled for \"{abis}\"")]
fn given_compiled_project(world: &mut BuildWorld, abis: String) {
    for abi in parse_abis(&abis) {
        world.tree.add_extension_module(&abi);
    }
}

#[given("a project with no build output")]
fn given_no_build_output(world: &mut BuildWorld) {
    let _ = world;
}

#[given("the declared ABIs are \"{abis}\"")]
fn given_declared_abis(world: &mut BuildWorld, abis: String) {
    world.tree.config_mut().package.abis = parse_abis(&abis);
}

#[given("an upstream archive with bundled libraries")]
fn given_upstream_with_libraries(world: &mut BuildWorld) {
    world.upstream = Some(LocalArchive::new(world.tree.write_default_upstream()));
}

#[given("an upstream archive without bundled libraries")]
fn given_upstream_without_libraries(world: &mut BuildWorld) {
    let path = world.tree.write_upstream_archive(&[
        ("psycopg2/__init__.py", b"# upstream package".as_slice()),
        ("psycopg2_binary-2.9.10.dist-info/RECORD", b"".as_slice()),
    ]);
    world.upstream = Some(LocalArchive::new(path));
}

#[when("the package is assembled")]
fn when_assembled(world: &mut BuildWorld) {
    let upstream = world.upstream.as_ref().expect("upstream set");
    let context = BuildContext {
        project_dir: world.tree.root(),
        config: world.tree.config(),
        quiet: true,
    };
    match run_build(&context, upstream, &mut Vec::new()) {
        Ok(report) => world.report = Some(report),
        Err(err) => world.error = Some(err),
    }
}

#[then("the build succeeds")]
fn then_build_succeeds(world: &mut BuildWorld) {
    assert!(world.error.is_none(), "unexpected error: {:?}", world.error);
    assert!(report(world).archive.path.is_file());
}

#[then("the archive is named for the range \"{range}\"")]
fn then_archive_range(world: &mut BuildWorld, range: String) {
    let name = report(world)
        .archive
        .path
        .file_name()
        .expect("file name")
        .to_owned();
    assert_eq!(name, format!("psycounvdb-2.9.11-linux-x86_64-python{range}.zip"));
}

#[then("a warning names \"{abi}\"")]
fn then_warning_names(world: &mut BuildWorld, abi: String) {
    let warnings = &report(world).warnings;
    assert!(
        warnings.iter().any(|warning| matches!(
            warning,
            BuildWarning::AbiDropped { abi: dropped, .. } if dropped.tag() == abi
        )),
        "no dropped-ABI warning for {abi}: {warnings:?}"
    );
}

#[then("every shipped module points at the private library directory")]
fn then_modules_patched(world: &mut BuildWorld) {
    let abis = report(world).shipped_abis();
    assert!(!abis.is_empty(), "no modules shipped");
    for abi in abis {
        let name = format!(
            "psycounvdb/_psycounvdb.{}-x86_64-linux-gnu.so",
            abi.filename_fragment()
        );
        let bytes = read_entry(world, &name);
        let runpath = abipack_rpath::read_runpath(&bytes).expect("readable ELF");
        assert_eq!(
            runpath.as_deref(),
            Some("$ORIGIN/../psycounvdb_binary.libs"),
            "{name} was not repointed"
        );
    }
}

#[then("the archive has no private library directory")]
fn then_no_private_libs(world: &mut BuildWorld) {
    let manifest = &report(world).archive.manifest;
    assert!(
        !manifest
            .iter()
            .any(|entry| entry.starts_with("psycounvdb_binary.libs/")),
        "unexpected library entries: {manifest:?}"
    );
}

#[then("the build reports missing bundled libraries")]
fn then_reports_missing_libraries(world: &mut BuildWorld) {
    assert!(
        report(world)
            .warnings
            .contains(&BuildWarning::NoDependencyLibraries)
    );
}

#[then("the entry point only extends the search path when the directory exists")]
fn then_entry_point_guarded(world: &mut BuildWorld) {
    let init = String::from_utf8(read_entry(world, "psycounvdb/__init__.py")).expect("utf8");
    assert!(init.contains("'psycounvdb_binary.libs'"));
    assert!(init.contains("if os.path.isdir(_libs_dir):"));
}

#[then("the build fails naming \"{command}\"")]
fn then_build_fails(world: &mut BuildWorld, command: String) {
    assert!(world.report.is_none());
    let err = world.error.as_ref().expect("build error set");
    assert!(
        matches!(err, PackagerError::BuildOutputMissing { .. }),
        "unexpected error: {err:?}"
    );
    assert!(err.to_string().contains(&command));
    assert!(!world.tree.dist_dir().exists());
}

// ---------------------------------------------------------------------------
// Scenario bindings
// ---------------------------------------------------------------------------

#[scenario(
    path = "tests/features/build.feature",
    name = "Partial build is named by the ABIs actually present"
)]
fn scenario_partial_build(world: BuildWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/build.feature",
    name = "Upstream archive without bundled libraries"
)]
fn scenario_no_bundled_libraries(world: BuildWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/build.feature", name = "Nothing has been compiled")]
fn scenario_nothing_compiled(world: BuildWorld) {
    let _ = world;
}
