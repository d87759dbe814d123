//! Shared test utilities for the packager crate.

#![expect(
    clippy::expect_used,
    reason = "fixtures abort the test when the scratch tree cannot be prepared"
)]

use crate::abi::AbiDescriptor;
use crate::config::PackagerConfig;
use crate::process::{CommandOutput, CommandRunner, CommandSpec, RunError};
use crate::verify::environment::venv_python;
use crate::verify::probes::SITE_PACKAGES_SCRIPT;
use abipack_rpath::test_support::ElfFixture;
use camino::{Utf8Path, Utf8PathBuf};
use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Write;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

/// File name of the upstream archive written by [`ProjectTree`].
pub const UPSTREAM_WHEEL: &str = "psycopg2_binary-2.9.10-cp38-cp38-manylinux_2_17_x86_64.whl";

/// A throwaway project directory laid out like a real checkout.
///
/// ```text
/// <root>/
///   lib/*.py
///   build/lib.linux-x86_64-cpython-XY/<package>/<native>.cpython-XY-x86_64-linux-gnu.so
///   upstream/<wheel>
///   dist/
/// ```
#[derive(Debug)]
pub struct ProjectTree {
    _dir: TempDir,
    root: Utf8PathBuf,
    config: PackagerConfig,
}

impl ProjectTree {
    /// An empty project with the default configuration and two source
    /// modules in `lib/`.
    ///
    /// # Panics
    ///
    /// Panics when the temporary directory cannot be prepared.
    #[must_use]
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 temp dir");
        let tree = Self {
            _dir: dir,
            root,
            config: PackagerConfig::default(),
        };
        tree.add_source_module("extensions.py", "# extensions\n");
        tree.add_source_module("extras.py", "# extras\n");
        tree
    }

    /// The project directory.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// The configuration the project is built with.
    #[must_use]
    pub fn config(&self) -> &PackagerConfig {
        &self.config
    }

    /// Mutable access to the configuration.
    pub fn config_mut(&mut self) -> &mut PackagerConfig {
        &mut self.config
    }

    /// The archive output directory.
    #[must_use]
    pub fn dist_dir(&self) -> Utf8PathBuf {
        self.config.paths.dist_root(&self.root)
    }

    /// Write `lib/<name>`.
    ///
    /// # Panics
    ///
    /// Panics when the file cannot be written.
    pub fn add_source_module(&self, name: &str, contents: &str) {
        let dir = self.config.paths.source_root(&self.root);
        std::fs::create_dir_all(&dir).expect("source dir");
        std::fs::write(dir.join(name), contents).expect("source module");
    }

    /// Create the build output root without any modules.
    ///
    /// # Panics
    ///
    /// Panics when the directory cannot be created.
    pub fn create_build_root(&self) {
        std::fs::create_dir_all(self.config.paths.build_root(&self.root)).expect("build root");
    }

    /// Write a loadable-looking extension module compiled for `abi`.
    ///
    /// # Panics
    ///
    /// Panics when the file cannot be written.
    pub fn add_extension_module(&self, abi: &AbiDescriptor) -> Utf8PathBuf {
        let bytes = ElfFixture::shared_object()
            .with_rpath("/usr/lib/postgresql/16/lib")
            .build();
        self.add_extension_bytes(abi, &bytes)
    }

    /// Write `bytes` as the extension module for `abi`.
    ///
    /// # Panics
    ///
    /// Panics when the file cannot be written.
    pub fn add_extension_bytes(&self, abi: &AbiDescriptor, bytes: &[u8]) -> Utf8PathBuf {
        let package = &self.config.package;
        let dir = self
            .config
            .paths
            .build_root(&self.root)
            .join(format!("lib.linux-x86_64-cpython-{}", abi.compact()))
            .join(&package.name);
        std::fs::create_dir_all(&dir).expect("build subdir");
        let path = dir.join(format!(
            "{}.{}-x86_64-linux-gnu.so",
            package.native_module,
            abi.filename_fragment()
        ));
        std::fs::write(&path, bytes).expect("extension module");
        path
    }

    /// Write an upstream archive holding `entries` and return its path.
    ///
    /// # Panics
    ///
    /// Panics when the archive cannot be written.
    pub fn write_upstream_archive(&self, entries: &[(&str, &[u8])]) -> Utf8PathBuf {
        let dir = self.root.join("upstream");
        std::fs::create_dir_all(&dir).expect("upstream dir");
        let path = dir.join(UPSTREAM_WHEEL);
        let file = std::fs::File::create(&path).expect("create archive");
        let mut writer = zip::ZipWriter::new(file);
        for (name, contents) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .expect("start entry");
            writer.write_all(contents).expect("write entry");
        }
        writer.finish().expect("finish archive");
        path
    }

    /// Write an upstream archive shaped like the real distribution.
    ///
    /// # Panics
    ///
    /// Panics when the archive cannot be written.
    pub fn write_default_upstream(&self) -> Utf8PathBuf {
        self.write_upstream_archive(&[
            ("psycopg2/__init__.py", b"# upstream package".as_slice()),
            ("psycopg2/_psycopg.cpython-38-x86_64-linux-gnu.so", b"\x7fELF upstream".as_slice()),
            ("psycopg2_binary.libs/libpq-e8a0ad73.so.5.16", b"libpq".as_slice()),
            ("psycopg2_binary.libs/libssl-81ffa89e.so.3", b"libssl".as_slice()),
            ("psycopg2_binary-2.9.10.dist-info/RECORD", b"".as_slice()),
        ])
    }
}

impl Default for ProjectTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Failure injected into one scripted interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedFailure {
    /// `--version` exits non-zero.
    Version,
    /// `-m venv` exits non-zero.
    Environment,
    /// The import probe exits non-zero.
    Import,
    /// The connectivity probe exits non-zero.
    Connection,
    /// The connectivity probe exceeds its time limit.
    ConnectionTimeout,
}

#[derive(Debug, Clone)]
struct ScriptedInterpreter {
    version: String,
    failure: Option<ScriptedFailure>,
}

#[derive(Debug, Default)]
struct ScriptState {
    interpreters: HashMap<Utf8PathBuf, ScriptedInterpreter>,
    environments: HashMap<Utf8PathBuf, (Utf8PathBuf, Utf8PathBuf)>,
    calls: Vec<CommandSpec>,
}

/// A [`CommandRunner`] that plays the part of real interpreters.
///
/// Registered interpreters answer `--version`, create environments on
/// `-m venv` (with a real site-packages directory), and answer the import
/// and connectivity probes. The import probe only succeeds when the package
/// was actually installed into the environment. Unregistered programs fail
/// to spawn.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    state: RefCell<ScriptState>,
}

impl ScriptedRunner {
    /// A runner with no interpreters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a healthy interpreter reporting `version`, e.g. `3.11.7`.
    #[must_use]
    pub fn with_interpreter(self, path: impl Into<Utf8PathBuf>, version: &str) -> Self {
        self.state.borrow_mut().interpreters.insert(
            path.into(),
            ScriptedInterpreter {
                version: version.to_owned(),
                failure: None,
            },
        );
        self
    }

    /// Make the interpreter at `path` fail at `failure`.
    #[must_use]
    pub fn failing(self, path: impl AsRef<Utf8Path>, failure: ScriptedFailure) -> Self {
        if let Some(interpreter) = self.state.borrow_mut().interpreters.get_mut(path.as_ref()) {
            interpreter.failure = Some(failure);
        }
        self
    }

    /// Every command run so far.
    #[must_use]
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.state.borrow().calls.clone()
    }

    fn run_interpreter(
        state: &mut ScriptState,
        interpreter: &ScriptedInterpreter,
        spec: &CommandSpec,
    ) -> CommandOutput {
        let args: Vec<&str> = spec.args.iter().map(String::as_str).collect();
        match args.as_slice() {
            ["--version"] if interpreter.failure == Some(ScriptedFailure::Version) => {
                CommandOutput::failure(126, "cannot execute binary file")
            }
            ["--version"] => CommandOutput::success(&format!("Python {}\n", interpreter.version)),
            ["-m", "venv", _] if interpreter.failure == Some(ScriptedFailure::Environment) => {
                CommandOutput::failure(1, "Error: ensurepip is not available")
            }
            ["-m", "venv", venv] => {
                let venv = Utf8PathBuf::from(*venv);
                let dotted: String = interpreter.version.split('.').take(2).collect::<Vec<_>>().join(".");
                let site = venv.join("lib").join(format!("python{dotted}")).join("site-packages");
                if let Err(err) = std::fs::create_dir_all(&site) {
                    return CommandOutput::failure(1, &err.to_string());
                }
                state
                    .environments
                    .insert(venv_python(&venv), (spec.program.clone(), site));
                CommandOutput::success("")
            }
            _ => CommandOutput::failure(2, "unexpected interpreter invocation"),
        }
    }

    fn run_environment(
        interpreter: &ScriptedInterpreter,
        site: &Utf8Path,
        spec: &CommandSpec,
    ) -> Result<CommandOutput, RunError> {
        let script = match spec.args.as_slice() {
            [flag, script] if flag == "-c" => script.as_str(),
            _ => return Ok(CommandOutput::failure(2, "unexpected environment invocation")),
        };
        if script == SITE_PACKAGES_SCRIPT {
            return Ok(CommandOutput::success(&format!("{site}\n")));
        }
        let package = script
            .lines()
            .filter_map(|line| line.strip_prefix("import "))
            .find(|name| *name != "sys")
            .unwrap_or_default();
        if !site.join(package).join("__init__.py").is_file() {
            return Ok(CommandOutput::failure(
                1,
                &format!("ModuleNotFoundError: No module named '{package}'"),
            ));
        }
        if script.contains("__libpq_version__") {
            if interpreter.failure == Some(ScriptedFailure::Import) {
                return Ok(CommandOutput::failure(
                    1,
                    "ImportError: libpq.so.5: cannot open shared object file",
                ));
            }
            return Ok(CommandOutput::success(&format!("{package} 2.9.11\nlibpq 160004\n")));
        }
        if script.contains(".connect(") {
            return match interpreter.failure {
                Some(ScriptedFailure::Connection) => Ok(CommandOutput::failure(
                    1,
                    "connection failed: could not connect to server: Connection refused",
                )),
                Some(ScriptedFailure::ConnectionTimeout) => Err(RunError::TimedOut {
                    program: spec.program.clone(),
                    timeout: spec.timeout,
                }),
                _ => Ok(CommandOutput::success(
                    "server: PostgreSQL 16.4 on x86_64-pc-linux-gnu, compiled by gcc\n",
                )),
            };
        }
        Ok(CommandOutput::failure(2, "unexpected probe"))
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, RunError> {
        let mut state = self.state.borrow_mut();
        state.calls.push(spec.clone());

        if let Some(interpreter) = state.interpreters.get(&spec.program).cloned() {
            return Ok(Self::run_interpreter(&mut state, &interpreter, spec));
        }
        if let Some((owner, site)) = state.environments.get(&spec.program).cloned() {
            let interpreter = state.interpreters.get(&owner).cloned().ok_or_else(|| {
                RunError::Io(std::io::Error::other("environment without interpreter"))
            })?;
            return Self::run_environment(&interpreter, &site, spec);
        }
        Err(RunError::Spawn {
            program: spec.program.clone(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "No such file or directory"),
        })
    }
}
