//! Interpreter probe scripts.
//!
//! Each probe is a short program passed with `-c`. Values interpolated into
//! the scripts are emitted as JSON string literals, which Python parses as
//! ordinary string literals.

use crate::config::DatabaseSettings;
use crate::process::CommandSpec;
use camino::Utf8Path;
use std::time::Duration;

/// Script printing the environment's first site-packages directory.
pub const SITE_PACKAGES_SCRIPT: &str = "import site; print(site.getsitepackages()[0])";

/// `<python> --version`.
#[must_use]
pub fn version_probe(interpreter: &Utf8Path, timeout: Duration) -> CommandSpec {
    CommandSpec::new(interpreter, timeout).args(["--version"])
}

/// `<python> -m venv <dir>`.
#[must_use]
pub fn venv_command(interpreter: &Utf8Path, venv: &Utf8Path, timeout: Duration) -> CommandSpec {
    CommandSpec::new(interpreter, timeout).args(["-m", "venv", venv.as_str()])
}

/// Query of the environment's library location.
#[must_use]
pub fn site_packages_probe(python: &Utf8Path, timeout: Duration) -> CommandSpec {
    CommandSpec::new(python, timeout).args(["-c", SITE_PACKAGES_SCRIPT])
}

/// Import the package and print its version strings.
#[must_use]
pub fn import_probe(python: &Utf8Path, package: &str, timeout: Duration) -> CommandSpec {
    CommandSpec::new(python, timeout).args(["-c".to_owned(), import_script(package)])
}

/// Open a connection, run one metadata query and close it.
#[must_use]
pub fn connect_probe(
    python: &Utf8Path,
    package: &str,
    database: &DatabaseSettings,
    timeout: Duration,
) -> CommandSpec {
    CommandSpec::new(python, timeout).args(["-c".to_owned(), connect_script(package, database)])
}

fn import_script(package: &str) -> String {
    format!(
        "import {package}\n\
         print('{package} ' + str({package}.__version__))\n\
         print('libpq ' + str({package}.__libpq_version__))\n"
    )
}

fn connect_script(package: &str, database: &DatabaseSettings) -> String {
    format!(
        "import sys\n\
         import {package}\n\
         try:\n\
         \x20   conn = {package}.connect(host={host}, port={port}, dbname={name}, user={user}, password={password})\n\
         \x20   cur = conn.cursor()\n\
         \x20   cur.execute('SELECT version();')\n\
         \x20   print('server: ' + cur.fetchone()[0][:50])\n\
         \x20   cur.close()\n\
         \x20   conn.close()\n\
         except Exception as exc:\n\
         \x20   print('connection failed: %s' % (exc,), file=sys.stderr)\n\
         \x20   sys.exit(1)\n",
        host = literal(&database.host),
        port = database.port,
        name = literal(&database.database),
        user = literal(&database.user),
        password = literal(&database.password),
    )
}

fn literal(value: &str) -> String {
    serde_json::Value::from(value).to_string()
}
