//! Synthesis of the package's `__init__.py`.
//!
//! The generated module makes the private library directory visible to the
//! platform's dynamic loader, re-exports the native module's DB-API surface
//! and registers the default adapters before exposing `connect()`.

use crate::config::PackagerConfig;
use crate::error::Result;
use crate::layout::StagingLayout;
use camino::Utf8PathBuf;

const HEADER: &str = r#""""@PACKAGE@ - PostgreSQL database adapter for Python.

Bundles one native module per supported interpreter together with the shared
libraries it links against.
"""

"#;

const SEARCH_PATH_SETUP: &str = r"import os
import sys

_libs_dir = os.path.normpath(
    os.path.join(os.path.dirname(os.path.abspath(__file__)), '..', '@LIB_DIR@')
)


def _prepend_library_path(variable, directory):
    entries = [e for e in os.environ.get(variable, '').split(os.pathsep) if e]
    if directory not in entries:
        os.environ[variable] = os.pathsep.join([directory] + entries)


if os.path.isdir(_libs_dir):
    if sys.platform.startswith('linux'):
        _prepend_library_path('LD_LIBRARY_PATH', _libs_dir)
    elif sys.platform == 'darwin':
        _prepend_library_path('DYLD_LIBRARY_PATH', _libs_dir)
";

const EXPORTS: &str = r"
from @PACKAGE@.@NATIVE@ import (
    BINARY, NUMBER, STRING, DATETIME, ROWID,
    Binary, Date, Time, Timestamp,
    DateFromTicks, TimeFromTicks, TimestampFromTicks,
    Error, Warning, DataError, DatabaseError, ProgrammingError, IntegrityError,
    InterfaceError, InternalError, NotSupportedError, OperationalError,
    _connect, apilevel, threadsafety, paramstyle,
    __version__, __libpq_version__,
)
";

const ADAPTERS: &str = r"
from @PACKAGE@ import extensions as _ext
_ext.register_adapter(tuple, _ext.SQL_IN)
_ext.register_adapter(type(None), _ext.NoneAdapter)

from decimal import Decimal
from @PACKAGE@.@NATIVE@ import Decimal as Adapter
_ext.register_adapter(Decimal, Adapter)
del Decimal, Adapter
";

const CONNECT: &str = r#"

def connect(dsn=None, connection_factory=None, cursor_factory=None, **kwargs):
    """Create a new database connection."""
    kwasync = {}
    if 'async' in kwargs:
        kwasync['async'] = kwargs.pop('async')
    if 'async_' in kwargs:
        kwasync['async_'] = kwargs.pop('async_')

    dsn = _ext.make_dsn(dsn, **kwargs)
    conn = _connect(dsn, connection_factory=connection_factory, **kwasync)
    if cursor_factory is not None:
        conn.cursor_factory = cursor_factory

    return conn
"#;

/// Names substituted into the generated entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPointTemplate {
    package: String,
    native_module: String,
    lib_dir: String,
}

impl EntryPointTemplate {
    /// Template for the configured package.
    #[must_use]
    pub fn from_config(config: &PackagerConfig) -> Self {
        Self {
            package: config.package.name.clone(),
            native_module: config.package.native_module.clone(),
            lib_dir: config.package.private_lib_dir.clone(),
        }
    }

    fn fill(&self, section: &str) -> String {
        section
            .replace("@PACKAGE@", &self.package)
            .replace("@NATIVE@", &self.native_module)
            .replace("@LIB_DIR@", &self.lib_dir)
    }

    /// Only the loader search path setup, which runs first on import.
    #[must_use]
    pub fn render_search_path_setup(&self) -> String {
        self.fill(SEARCH_PATH_SETUP)
    }

    /// The complete `__init__.py` source.
    ///
    /// # Examples
    ///
    /// ```
    /// use abipack_packager::config::PackagerConfig;
    /// use abipack_packager::entry_point::EntryPointTemplate;
    ///
    /// let source = EntryPointTemplate::from_config(&PackagerConfig::default()).render();
    /// assert!(source.contains("'psycounvdb_binary.libs'"));
    /// assert!(source.contains("from psycounvdb._psycounvdb import ("));
    /// assert!(source.contains("def connect(dsn=None"));
    /// ```
    #[must_use]
    pub fn render(&self) -> String {
        [HEADER, SEARCH_PATH_SETUP, EXPORTS, ADAPTERS, CONNECT]
            .iter()
            .map(|section| self.fill(section))
            .collect()
    }
}

/// Write the rendered entry point into the staged package directory.
///
/// A plain `__init__.py` copied from the source directory is replaced.
///
/// # Errors
///
/// Returns an I/O error when the file cannot be written.
pub fn write_entry_point(layout: &StagingLayout, template: &EntryPointTemplate) -> Result<Utf8PathBuf> {
    let path = layout.package_dir().join("__init__.py");
    if path.exists() {
        log::debug!("replacing copied {path} with the generated entry point");
    }
    std::fs::write(&path, template.render())?;
    Ok(path)
}
