//! Multi-ABI native package assembly and verification.
//!
//! This crate turns per-interpreter build output into one relocatable
//! package archive that carries a private copy of its shared-library
//! dependencies, then checks that archive against every interpreter on the
//! machine. It backs the `abipack-build` and `abipack-verify` binaries and
//! can be driven programmatically for testing.
//!
//! # Modules
//!
//! - [`abi`] - CPython ABI tags and the ranges they span
//! - [`assembler`] - Archive naming and atomic archive writing
//! - [`cli`] - Command-line argument definitions
//! - [`collector`] - Source and extension module collection
//! - [`config`] - Immutable packager configuration
//! - [`entry_point`] - Generated package `__init__.py`
//! - [`error`] - Error types with remediation hints
//! - [`extractor`] - Bundled library extraction from the upstream archive
//! - [`fetch`] - Upstream archive retrieval
//! - [`layout`] - Staging layout and scoped workspace
//! - [`logging`] - Diagnostic logger set-up
//! - [`output`] - Operator-facing stderr output
//! - [`patcher`] - Runtime search path repair
//! - [`pipeline`] - Build orchestration
//! - [`process`] - Subprocess execution with time limits
//! - [`rename`] - Upstream library path renaming
//! - [`verify`] - Per-interpreter verification

pub mod abi;
pub mod assembler;
pub mod cli;
pub mod collector;
pub mod config;
pub mod entry_point;
pub mod error;
pub mod extractor;
pub mod fetch;
pub mod layout;
pub mod logging;
pub mod output;
pub mod patcher;
pub mod pipeline;
pub mod process;
pub mod rename;
pub mod verify;

#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;
