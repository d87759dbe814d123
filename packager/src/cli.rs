//! CLI argument definitions for `abipack-build` and `abipack-verify`.
//!
//! Both binaries share [`CommonArgs`]; with no flags they operate on the
//! current directory using the default configuration.

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, ValueEnum};

/// Options shared by both binaries.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct CommonArgs {
    /// Project directory holding the build output and source modules.
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub project_dir: Utf8PathBuf,

    /// Configuration file [default: <project-dir>/abipack.toml when present].
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<Utf8PathBuf>,

    /// Increase log verbosity (repeatable: -v, -vv, -vvv).
    #[arg(
        short,
        long = "verbose",
        action = clap::ArgAction::Count,
        conflicts_with = "quiet"
    )]
    pub verbosity: u8,

    /// Suppress progress output (warnings and errors still shown).
    #[arg(short, long, conflicts_with = "verbosity")]
    pub quiet: bool,
}

impl CommonArgs {
    /// The explicit configuration file, if any.
    #[must_use]
    pub fn config_path(&self) -> Option<&Utf8Path> {
        self.config.as_deref()
    }
}

impl Default for CommonArgs {
    fn default() -> Self {
        Self {
            project_dir: Utf8PathBuf::from("."),
            config: None,
            verbosity: 0,
            quiet: false,
        }
    }
}

/// Assemble a multi-ABI package archive from compiled build output.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "abipack-build")]
#[command(version, about)]
#[command(after_help = concat!(
    "EXAMPLES:\n",
    "  Package the current project:\n",
    "    $ abipack-build\n\n",
    "  Use an already-downloaded upstream archive:\n",
    "    $ abipack-build --config ci/abipack.toml\n",
))]
pub struct BuildCli {
    /// Shared options.
    #[command(flatten)]
    pub common: CommonArgs,
}

/// How verification results are printed.
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// An aligned table followed by the pass count.
    #[default]
    Human,
    /// A JSON array with one object per runtime.
    Json,
}

/// Verify a package archive against every available interpreter.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "abipack-verify")]
#[command(version, about)]
#[command(after_help = concat!(
    "EXIT STATUS:\n",
    "  0  verification ran (failures are reported in the table)\n",
    "  1  verification could not run\n",
    "  2  --strict was given and at least one runtime failed\n",
))]
pub struct VerifyCli {
    /// Archive to verify [default: newest matching archive in the dist directory].
    #[arg(value_name = "ARCHIVE")]
    pub archive: Option<Utf8PathBuf>,

    /// Exit with status 2 when any runtime fails.
    #[arg(long)]
    pub strict: bool,

    /// Result output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Human)]
    pub format: OutputFormat,

    /// Shared options.
    #[command(flatten)]
    pub common: CommonArgs,
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
