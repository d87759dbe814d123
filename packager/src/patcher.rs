//! Runtime search path repair for staged extension modules.
//!
//! Every collected module is rewritten in place so its `DT_RUNPATH` points
//! at the private library directory relative to the module itself. A module
//! that cannot be rewritten is removed from the staging tree and recorded;
//! it never ships with a stale search path.

use crate::abi::AbiDescriptor;
use crate::collector::CollectedModule;
use crate::layout::StagingLayout;
use abipack_rpath::{RpathError, Strategy};
use camino::Utf8PathBuf;
use log::{debug, info, warn};

/// A module whose runpath now points at the private library directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchedModule {
    /// The module's ABI.
    pub abi: AbiDescriptor,
    /// The staged module.
    pub path: Utf8PathBuf,
    /// How the dynamic section was rewritten.
    pub strategy: Strategy,
    /// The search path the module carried before.
    pub previous: Option<String>,
}

/// A module excluded from the package because its rewrite failed.
#[derive(Debug)]
pub struct PatchFailure {
    /// The module's ABI.
    pub abi: AbiDescriptor,
    /// The staged module, now deleted.
    pub path: Utf8PathBuf,
    /// Why the rewrite failed.
    pub error: RpathError,
}

/// Outcome of [`patch_extension_modules`].
#[derive(Debug, Default)]
pub struct PatchReport {
    /// Modules rewritten or already correct.
    pub patched: Vec<PatchedModule>,
    /// Modules left untouched because there is no library directory.
    pub untouched: Vec<AbiDescriptor>,
    /// Modules excluded after a failed rewrite.
    pub failed: Vec<PatchFailure>,
}

impl PatchReport {
    /// ABIs whose modules remain in the package.
    pub fn shipped_abis(&self) -> impl Iterator<Item = &AbiDescriptor> {
        self.patched
            .iter()
            .map(|module| &module.abi)
            .chain(self.untouched.iter())
    }
}

/// Point every module's runpath at `runpath`.
///
/// Without a private library directory there is nothing to point at and
/// each module is logged and left as collected.
pub fn patch_extension_modules(
    layout: &StagingLayout,
    modules: &[CollectedModule],
    runpath: &str,
) -> PatchReport {
    let mut report = PatchReport::default();
    if !layout.has_lib_dir() {
        for module in modules {
            info!(
                "{} not present; leaving runpath of {} unchanged",
                layout.lib_dir(),
                module.staged
            );
            report.untouched.push(module.abi.clone());
        }
        return report;
    }

    for module in modules {
        match abipack_rpath::patch_file(module.staged.as_std_path(), runpath) {
            Ok(patched) => {
                debug!(
                    "{}: {:?} -> {runpath} ({:?})",
                    module.staged, patched.previous, patched.strategy
                );
                report.patched.push(PatchedModule {
                    abi: module.abi.clone(),
                    path: module.staged.clone(),
                    strategy: patched.strategy,
                    previous: patched.previous,
                });
            }
            Err(error) => {
                warn!(
                    "cannot rewrite runpath of {}: {error}; excluding {} from the package",
                    module.staged, module.abi
                );
                if let Err(remove) = std::fs::remove_file(&module.staged) {
                    warn!("failed to remove {}: {remove}", module.staged);
                }
                report.failed.push(PatchFailure {
                    abi: module.abi.clone(),
                    path: module.staged.clone(),
                    error,
                });
            }
        }
    }
    info!(
        "patched {} modules, {} excluded",
        report.patched.len(),
        report.failed.len()
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PackagerConfig;
    use abipack_rpath::test_support::ElfFixture;
    use rstest::{fixture, rstest};

    const RUNPATH: &str = "$ORIGIN/../psycounvdb_binary.libs";

    struct Staged {
        _dir: tempfile::TempDir,
        layout: StagingLayout,
    }

    #[fixture]
    fn staged() -> Staged {
        let dir = tempfile::tempdir().expect("temp dir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8");
        let layout = StagingLayout::new(&root, &PackagerConfig::default());
        layout.create().expect("create");
        Staged { _dir: dir, layout }
    }

    fn stage(layout: &StagingLayout, abi: AbiDescriptor, bytes: &[u8]) -> CollectedModule {
        let name = format!("_psycounvdb.{}-x86_64-linux-gnu.so", abi.filename_fragment());
        let staged = layout.package_dir().join(name);
        std::fs::write(&staged, bytes).expect("write module");
        CollectedModule {
            abi,
            source: staged.clone(),
            staged,
        }
    }

    #[rstest]
    fn rewrites_every_module(staged: Staged) {
        std::fs::create_dir_all(staged.layout.lib_dir()).expect("lib dir");
        let modules = [
            stage(&staged.layout, AbiDescriptor::new(3, 8), &ElfFixture::shared_object().build()),
            stage(
                &staged.layout,
                AbiDescriptor::new(3, 11),
                &ElfFixture::shared_object().with_rpath("/usr/lib/postgresql").build(),
            ),
        ];

        let report = patch_extension_modules(&staged.layout, &modules, RUNPATH);

        assert_eq!(report.patched.len(), 2);
        assert!(report.failed.is_empty());
        assert_eq!(report.patched[1].previous.as_deref(), Some("/usr/lib/postgresql"));
        for module in &modules {
            let runpath = abipack_rpath::read_file_runpath(module.staged.as_std_path()).expect("read");
            assert_eq!(runpath.as_deref(), Some(RUNPATH));
        }
    }

    #[rstest]
    fn missing_lib_dir_leaves_modules_alone(staged: Staged) {
        let bytes = ElfFixture::shared_object().build();
        let modules = [stage(&staged.layout, AbiDescriptor::new(3, 8), &bytes)];

        let report = patch_extension_modules(&staged.layout, &modules, RUNPATH);

        assert!(report.patched.is_empty());
        assert_eq!(report.untouched, [AbiDescriptor::new(3, 8)]);
        assert_eq!(std::fs::read(&modules[0].staged).expect("read"), bytes);
    }

    #[rstest]
    fn unpatchable_module_is_excluded(staged: Staged) {
        std::fs::create_dir_all(staged.layout.lib_dir()).expect("lib dir");
        let modules = [
            stage(&staged.layout, AbiDescriptor::new(3, 8), b"not an elf object"),
            stage(&staged.layout, AbiDescriptor::new(3, 9), &ElfFixture::shared_object().build()),
        ];

        let report = patch_extension_modules(&staged.layout, &modules, RUNPATH);

        assert_eq!(report.failed.len(), 1);
        assert!(matches!(report.failed[0].error, RpathError::NotElf { .. }));
        assert!(!modules[0].staged.exists());
        let shipped: Vec<_> = report.shipped_abis().cloned().collect();
        assert_eq!(shipped, [AbiDescriptor::new(3, 9)]);
    }

    #[rstest]
    fn corrupt_segment_table_is_excluded_not_fatal(staged: Staged) {
        std::fs::create_dir_all(staged.layout.lib_dir()).expect("lib dir");
        let mut corrupt = ElfFixture::shared_object().build();
        // p_memsz of the fixture's data segment.
        let memsz_at = 64 + 2 * 56 + 40;
        corrupt[memsz_at..memsz_at + 8].copy_from_slice(&u64::MAX.to_le_bytes());
        let modules = [
            stage(&staged.layout, AbiDescriptor::new(3, 8), &corrupt),
            stage(&staged.layout, AbiDescriptor::new(3, 11), &ElfFixture::shared_object().build()),
        ];

        let report = patch_extension_modules(&staged.layout, &modules, RUNPATH);

        assert_eq!(report.failed.len(), 1);
        assert!(matches!(report.failed[0].error, RpathError::Malformed(_)));
        let shipped: Vec<_> = report.shipped_abis().cloned().collect();
        assert_eq!(shipped, [AbiDescriptor::new(3, 11)]);
    }
}
