//! Unit tests for configuration loading and validation.

use super::*;
use rstest::rstest;
use tempfile::TempDir;

fn utf8(dir: &TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("temp dir is UTF-8")
}

#[test]
fn defaults_describe_the_psycounvdb_package() {
    let config = PackagerConfig::default();
    assert_eq!(config.package.name, "psycounvdb");
    assert_eq!(config.package.version, "2.9.11");
    assert_eq!(config.package.abis.first().map(AbiDescriptor::tag), Some("cp38"));
    assert_eq!(config.package.abis.last().map(AbiDescriptor::tag), Some("cp314"));
    assert_eq!(config.upstream.reference_abi.tag(), "cp38");
    assert_eq!(
        config.upstream.lib_markers,
        ["psycopg2_binary.libs/", "psycopg2.libs/"]
    );
    assert_eq!(config.module_runpath(), "$ORIGIN/../psycounvdb_binary.libs");
    config.validate().expect("defaults are valid");
}

#[test]
fn missing_project_file_falls_back_to_defaults() {
    let dir = TempDir::new().expect("temp dir");
    let config = PackagerConfig::load(&utf8(&dir), None).expect("load");
    assert_eq!(config, PackagerConfig::default());
}

#[test]
fn project_file_overrides_individual_fields() {
    let dir = TempDir::new().expect("temp dir");
    std::fs::write(
        dir.path().join(CONFIG_FILE_NAME),
        r#"
[package]
version = "3.0.0"
abis = ["cp310", "cp311"]

[verify.database]
host = "db.internal"
port = 5434
"#,
    )
    .expect("write config");

    let config = PackagerConfig::load(&utf8(&dir), None).expect("load");
    assert_eq!(config.package.version, "3.0.0");
    assert_eq!(config.package.name, "psycounvdb");
    assert_eq!(config.package.abis.len(), 2);
    assert_eq!(config.verify.database.host, "db.internal");
    assert_eq!(config.verify.database.port, 5434);
    assert_eq!(config.verify.database.user, "postgres");
}

#[test]
fn explicit_config_path_must_exist() {
    let dir = TempDir::new().expect("temp dir");
    let missing = utf8(&dir).join("nope.toml");
    let err = PackagerConfig::load(&utf8(&dir), Some(&missing)).expect_err("missing file");
    assert!(matches!(err, ConfigError::Read { .. }));
}

#[test]
fn unknown_fields_are_rejected() {
    let dir = TempDir::new().expect("temp dir");
    let path = utf8(&dir).join("custom.toml");
    std::fs::write(&path, "[package]\nflavour = \"binary\"\n").expect("write");
    let err = PackagerConfig::load(&utf8(&dir), Some(&path)).expect_err("unknown field");
    assert!(matches!(err, ConfigError::Parse { .. }));
}

#[test]
fn bad_abi_tag_is_a_parse_error() {
    let err = PackagerConfig::from_toml("[package]\nabis = [\"py311\"]\n").expect_err("bad tag");
    assert!(err.to_string().contains("py311"));
}

#[rstest]
#[case::empty_abis("[package]\nabis = []\n", "package.abis")]
#[case::nested_lib_dir("[package]\nprivate_lib_dir = \"a/b\"\n", "package.private_lib_dir")]
#[case::colliding_lib_dir(
    "[package]\nprivate_lib_dir = \"psycopg2.libs\"\n",
    "package.private_lib_dir"
)]
#[case::lib_dir_is_package("[package]\nprivate_lib_dir = \"psycounvdb\"\n", "package.private_lib_dir")]
#[case::marker_not_a_dir("[upstream]\nlib_markers = [\"libs\"]\n", "upstream.lib_markers")]
#[case::zero_timeout("[timeouts]\nprobe_secs = 0\n", "timeouts")]
fn validation_names_the_offending_field(#[case] toml: &str, #[case] field: &str) {
    let config = PackagerConfig::from_toml(toml).expect("parses");
    let err = config.validate().expect_err("invalid");
    match err {
        ConfigError::Invalid { field: actual, .. } => assert_eq!(actual, field),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn archive_prefix_uses_wheel_name_normalisation() {
    let upstream = UpstreamSettings::default();
    assert_eq!(upstream.archive_prefix(), "psycopg2_binary-2.9.10-cp38");
}

#[test]
fn configured_runtime_root_wins() {
    let settings = VerifySettings {
        runtimes_root: Some(Utf8PathBuf::from("/opt/pythons")),
        ..VerifySettings::default()
    };
    assert_eq!(
        settings.resolved_runtimes_root(),
        Some(Utf8PathBuf::from("/opt/pythons"))
    );
}

#[test]
fn staging_parent_resolves_against_the_project() {
    let config = PackagerConfig::from_toml("[paths]\nstaging_dir = \"scratch\"\n").expect("parses");
    let project = Utf8Path::new("/work/project");
    assert_eq!(
        config.paths.staging_root(project),
        Some(Utf8PathBuf::from("/work/project/scratch"))
    );
    assert_eq!(PathSettings::default().staging_root(project), None);
}
