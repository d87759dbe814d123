//! Staging layout and the scoped workspace that holds it.
//!
//! A build assembles the package inside a temporary workspace:
//!
//! ```text
//! <workspace>/
//!   package/                 staging root, becomes the archive root
//!     <package>/             source modules, extension modules, __init__.py
//!     <private-lib-dir>/     renamed upstream shared libraries
//!   upstream/                fetched upstream archives
//! ```
//!
//! The workspace is removed when [`StagingWorkspace`] is dropped, on every
//! exit path.

use crate::config::PackagerConfig;
use crate::error::{PackagerError, Result};
use camino::{Utf8Path, Utf8PathBuf};
use tempfile::TempDir;

/// Paths inside the staging root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingLayout {
    root: Utf8PathBuf,
    package_dir: Utf8PathBuf,
    lib_dir: Utf8PathBuf,
}

impl StagingLayout {
    /// Describe a layout rooted at `root` for the configured package.
    ///
    /// # Examples
    ///
    /// ```
    /// use abipack_packager::config::PackagerConfig;
    /// use abipack_packager::layout::StagingLayout;
    /// use camino::Utf8Path;
    ///
    /// let layout = StagingLayout::new(Utf8Path::new("/tmp/stage"), &PackagerConfig::default());
    /// assert_eq!(layout.package_dir(), "/tmp/stage/psycounvdb");
    /// assert_eq!(layout.lib_dir(), "/tmp/stage/psycounvdb_binary.libs");
    /// ```
    #[must_use]
    pub fn new(root: &Utf8Path, config: &PackagerConfig) -> Self {
        Self {
            root: root.to_owned(),
            package_dir: root.join(&config.package.name),
            lib_dir: root.join(&config.package.private_lib_dir),
        }
    }

    /// The staging root; archive entry names are relative to it.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Directory holding every module of the package.
    #[must_use]
    pub fn package_dir(&self) -> &Utf8Path {
        &self.package_dir
    }

    /// The private shared-library directory.
    #[must_use]
    pub fn lib_dir(&self) -> &Utf8Path {
        &self.lib_dir
    }

    /// Create the root and package directories.
    ///
    /// The library directory is only created when libraries are extracted,
    /// so its presence tells later stages whether any exist.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the directories cannot be created.
    pub fn create(&self) -> Result<()> {
        std::fs::create_dir_all(&self.package_dir)?;
        Ok(())
    }

    /// Whether the private library directory was populated.
    #[must_use]
    pub fn has_lib_dir(&self) -> bool {
        self.lib_dir.is_dir()
    }
}

/// A temporary build workspace, removed on drop.
#[derive(Debug)]
pub struct StagingWorkspace {
    dir: TempDir,
    layout: StagingLayout,
    upstream_dir: Utf8PathBuf,
}

impl StagingWorkspace {
    /// Create a fresh workspace under `parent`, or in the system temporary
    /// directory when `parent` is `None`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the directory cannot be created, or
    /// [`PackagerError::NonUtf8Path`] when the temporary directory path is
    /// not UTF-8.
    pub fn create(config: &PackagerConfig, parent: Option<&Utf8Path>) -> Result<Self> {
        let prefix = format!("{}_build_", config.package.name);
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let dir = match parent {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };
        let base = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
            .map_err(|path| PackagerError::NonUtf8Path { path })?;

        let layout = StagingLayout::new(&base.join("package"), config);
        layout.create()?;
        let upstream_dir = base.join("upstream");
        std::fs::create_dir_all(&upstream_dir)?;
        log::debug!("staging workspace at {base}");

        Ok(Self {
            dir,
            layout,
            upstream_dir,
        })
    }

    /// The staging layout inside this workspace.
    #[must_use]
    pub fn layout(&self) -> &StagingLayout {
        &self.layout
    }

    /// Directory for fetched upstream archives.
    #[must_use]
    pub fn upstream_dir(&self) -> &Utf8Path {
        &self.upstream_dir
    }

    /// The workspace root.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        self.dir.path()
    }
}
