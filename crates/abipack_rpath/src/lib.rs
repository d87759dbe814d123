//! In-process runtime search path rewriting for ELF shared objects.
//!
//! The packager relocates native extension modules next to a private copy of
//! their shared-library dependencies. Each module's `DT_RUNPATH` must then
//! point at that directory relative to `$ORIGIN`. This crate performs the
//! rewrite directly on the object bytes without an external relinking tool.
//!
//! # Example
//!
//! ```no_run
//! use abipack_rpath::{patch_file, read_file_runpath};
//! use std::path::Path;
//!
//! let module = Path::new("build/_psycopg.cpython-311-x86_64-linux-gnu.so");
//! patch_file(module, "$ORIGIN/../psycounvdb_binary.libs")?;
//! assert_eq!(
//!     read_file_runpath(module)?.as_deref(),
//!     Some("$ORIGIN/../psycounvdb_binary.libs"),
//! );
//! # Ok::<(), abipack_rpath::RpathError>(())
//! ```
//!
//! # Modules
//!
//! - [`elf`] - Header, segment and dynamic-array decoding
//! - [`error`] - Classified rewrite failures

pub mod elf;
pub mod error;
mod patch;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use elf::{Class, ElfFile, Endian};
pub use error::{Result, RpathError};
pub use patch::{Patched, Strategy, read_runpath, set_runpath};

use log::debug;
use std::fs;
use std::path::Path;

/// Read the runtime search path of the ELF object at `path`.
///
/// # Errors
///
/// Returns [`RpathError::Io`] when the file cannot be read, otherwise the
/// errors of [`read_runpath`].
pub fn read_file_runpath(path: &Path) -> Result<Option<String>> {
    let bytes = fs::read(path)?;
    read_runpath(&bytes)
}

/// Rewrite the runtime search path of the ELF object at `path`.
///
/// The file is only written when its contents change. Permissions are
/// preserved because the existing file is truncated and rewritten.
///
/// # Errors
///
/// Returns [`RpathError::Io`] on read or write failure, otherwise the errors
/// of [`set_runpath`]. The file is left untouched when the rewrite fails.
pub fn patch_file(path: &Path, runpath: &str) -> Result<Patched> {
    let bytes = fs::read(path)?;
    let patched = set_runpath(&bytes, runpath)?;
    if patched.strategy != Strategy::Unchanged {
        fs::write(path, &patched.bytes)?;
    }
    debug!("patched {} with {:?}", path.display(), patched.strategy);
    Ok(patched)
}
