//! Discovery of the interpreters to verify.
//!
//! The configured system interpreter is always listed first, even when it
//! is missing, so its absence shows up in the results. Managed
//! installations follow, one per `<root>/versions/<label>/bin/python`.

use crate::config::VerifySettings;
use camino::{Utf8Path, Utf8PathBuf};

/// An interpreter to verify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Runtime {
    /// Display label, `system` or the managed version directory name.
    pub label: String,
    /// Interpreter executable.
    pub interpreter: Utf8PathBuf,
}

impl Runtime {
    /// Describe a runtime.
    #[must_use]
    pub fn new(label: &str, interpreter: impl Into<Utf8PathBuf>) -> Self {
        Self {
            label: label.to_owned(),
            interpreter: interpreter.into(),
        }
    }
}

/// List the runtimes configured in `settings`.
#[must_use]
pub fn discover_runtimes(settings: &VerifySettings) -> Vec<Runtime> {
    let mut runtimes = vec![Runtime::new("system", settings.system_interpreter.clone())];
    match settings.resolved_runtimes_root() {
        Some(root) => runtimes.extend(managed_runtimes(&root)),
        None => log::debug!("no managed runtime root configured"),
    }
    runtimes
}

/// Managed installations under `root`, ordered by version.
#[must_use]
pub fn managed_runtimes(root: &Utf8Path) -> Vec<Runtime> {
    let versions = root.join("versions");
    let Ok(entries) = versions.read_dir_utf8() else {
        log::debug!("{versions} not readable; no managed runtimes");
        return Vec::new();
    };
    let mut runtimes: Vec<Runtime> = entries
        .filter_map(std::result::Result::ok)
        .filter_map(|entry| {
            let interpreter = entry.path().join("bin").join("python");
            interpreter
                .is_file()
                .then(|| Runtime::new(entry.file_name(), interpreter))
        })
        .collect();
    runtimes.sort_by_key(|runtime| version_key(&runtime.label));
    runtimes
}

/// Sort key comparing dotted numeric components numerically.
fn version_key(label: &str) -> Vec<(u64, String)> {
    label
        .split('.')
        .map(|part| {
            let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
            (digits.parse().unwrap_or(u64::MAX), part.to_owned())
        })
        .collect()
}
