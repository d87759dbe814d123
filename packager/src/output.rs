//! Operator-facing output for the build and verify commands.
//!
//! Progress and results go to stderr as plain lines; diagnostics go through
//! the `log` facade instead.

use crate::assembler::PackageArchive;
use std::fmt::Display;
use std::io::Write;

/// Number of archive entries shown after a build.
pub const LISTING_LIMIT: usize = 20;

/// Write one line to `stderr`, ignoring write failures.
pub fn write_stderr_line(stderr: &mut dyn Write, message: impl Display) {
    if writeln!(stderr, "{message}").is_err() {
        // Best-effort output; ignore write failures.
    }
}

/// Lines describing a finished archive: its path, digest, and the first
/// [`LISTING_LIMIT`] sorted entries followed by the total when truncated.
///
/// # Example
///
/// ```
/// use abipack_packager::output::listing_lines;
///
/// let entries: Vec<String> = (0..25).map(|i| format!("psycounvdb/m{i:02}.py")).collect();
/// let lines = listing_lines(&entries);
/// assert_eq!(lines.len(), 21);
/// assert_eq!(lines.last().map(String::as_str), Some("  ... 25 files in total"));
/// ```
#[must_use]
pub fn listing_lines(manifest: &[String]) -> Vec<String> {
    let mut sorted: Vec<&String> = manifest.iter().collect();
    sorted.sort();
    let mut lines: Vec<String> = sorted
        .iter()
        .take(LISTING_LIMIT)
        .map(|name| format!("  {name}"))
        .collect();
    if manifest.len() > LISTING_LIMIT {
        lines.push(format!("  ... {} files in total", manifest.len()));
    }
    lines
}

/// Summary printed once the archive is in place.
#[must_use]
pub fn archive_summary(archive: &PackageArchive) -> Vec<String> {
    let mut lines = vec![
        format!("Wrote {}", archive.path),
        format!("  ABIs: {}", archive.name.range()),
        format!("  SHA-256: {}", archive.sha256),
        String::new(),
        "Contents:".to_owned(),
    ];
    lines.extend(listing_lines(&archive.manifest));
    lines
}
