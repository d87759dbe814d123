//! Renaming of upstream shared-library paths.
//!
//! Upstream distributions bundle their shared libraries under a directory
//! such as `psycopg2_binary.libs/`. [`LibDirRename`] maps every entry under
//! one of the configured marker prefixes to the package's own private
//! library directory. It is the only place that knows the mapping, so the
//! extractor and the runpath the patcher emits always agree.

use crate::config::PackagerConfig;

/// Maps upstream library paths onto the private library directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibDirRename {
    markers: Vec<String>,
    target: String,
}

impl LibDirRename {
    /// Build the rename from the configured markers and directory.
    #[must_use]
    pub fn from_config(config: &PackagerConfig) -> Self {
        Self::new(
            config.upstream.lib_markers.iter().cloned(),
            &config.package.private_lib_dir,
        )
    }

    /// Build a rename mapping each `marker` prefix to `target/`.
    #[must_use]
    pub fn new(markers: impl IntoIterator<Item = String>, target: &str) -> Self {
        Self {
            markers: markers.into_iter().collect(),
            target: format!("{}/", target.trim_end_matches('/')),
        }
    }

    /// The marker prefix and its position in `entry`, if any.
    fn locate(&self, entry: &str) -> Option<(usize, &str)> {
        self.markers
            .iter()
            .filter_map(|marker| {
                entry
                    .match_indices(marker.as_str())
                    .find(|(at, _)| *at == 0 || entry.as_bytes()[at - 1] == b'/')
                    .map(|(at, _)| (at, marker.as_str()))
            })
            .min_by_key(|(at, _)| *at)
    }

    /// Whether `entry` lives under an upstream library directory.
    ///
    /// # Examples
    ///
    /// ```
    /// use abipack_packager::rename::LibDirRename;
    ///
    /// let rename = LibDirRename::new(["psycopg2_binary.libs/".to_owned()], "psycounvdb_binary.libs");
    /// assert!(rename.is_dependency_entry("psycopg2_binary.libs/libpq-9b38f5e3.so.5.17"));
    /// assert!(!rename.is_dependency_entry("psycopg2/_psycopg.cpython-38-x86_64-linux-gnu.so"));
    /// ```
    #[must_use]
    pub fn is_dependency_entry(&self, entry: &str) -> bool {
        self.locate(entry).is_some()
    }

    /// Rewrite the library directory prefix of `entry`.
    ///
    /// Only the marker component is replaced; any leading directories and the
    /// remainder of the path are kept. Returns `None` for entries outside
    /// every library directory.
    ///
    /// # Examples
    ///
    /// ```
    /// use abipack_packager::rename::LibDirRename;
    ///
    /// let rename = LibDirRename::new(
    ///     ["psycopg2_binary.libs/".to_owned(), "psycopg2.libs/".to_owned()],
    ///     "psycounvdb_binary.libs",
    /// );
    /// assert_eq!(
    ///     rename.rename("psycopg2.libs/libssl-81ffa89e.so.3").as_deref(),
    ///     Some("psycounvdb_binary.libs/libssl-81ffa89e.so.3"),
    /// );
    /// assert_eq!(rename.rename("psycopg2/__init__.py"), None);
    /// ```
    #[must_use]
    pub fn rename(&self, entry: &str) -> Option<String> {
        let (at, marker) = self.locate(entry)?;
        Some(format!(
            "{}{}{}",
            &entry[..at],
            self.target,
            &entry[at + marker.len()..]
        ))
    }

    /// The private directory prefix, with a trailing slash.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The upstream directory prefixes being renamed.
    #[must_use]
    pub fn markers(&self) -> &[String] {
        &self.markers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use std::collections::HashSet;

    #[fixture]
    fn rename() -> LibDirRename {
        LibDirRename::from_config(&PackagerConfig::default())
    }

    #[rstest]
    #[case("psycopg2_binary.libs/", "psycounvdb_binary.libs/")]
    #[case("psycopg2_binary.libs/libpq-e8a0ad73.so.5.16", "psycounvdb_binary.libs/libpq-e8a0ad73.so.5.16")]
    #[case("psycopg2.libs/libcrypto-d2a6a1c5.so.3", "psycounvdb_binary.libs/libcrypto-d2a6a1c5.so.3")]
    #[case("psycopg2_binary.libs/nested/libz.so.1", "psycounvdb_binary.libs/nested/libz.so.1")]
    #[case("data/psycopg2.libs/libz.so.1", "data/psycounvdb_binary.libs/libz.so.1")]
    fn renames_marker_entries(rename: LibDirRename, #[case] entry: &str, #[case] expected: &str) {
        assert_eq!(rename.rename(entry).as_deref(), Some(expected));
    }

    #[rstest]
    #[case("psycopg2/__init__.py")]
    #[case("psycopg2_binary-2.9.10.dist-info/RECORD")]
    #[case("not_psycopg2.libs/libfoo.so")]
    #[case("psycopg2.libsx/libfoo.so")]
    fn leaves_other_entries_untouched(rename: LibDirRename, #[case] entry: &str) {
        assert!(!rename.is_dependency_entry(entry));
        assert_eq!(rename.rename(entry), None);
    }

    #[rstest]
    fn renaming_is_injective_per_marker(rename: LibDirRename) {
        let entries = [
            "psycopg2_binary.libs/libpq-e8a0ad73.so.5.16",
            "psycopg2_binary.libs/libssl-81ffa89e.so.3",
            "psycopg2_binary.libs/libcrypto-d2a6a1c5.so.3",
            "psycopg2_binary.libs/libgssapi_krb5-497db0c6.so.2.2",
        ];
        let renamed: HashSet<String> = entries
            .iter()
            .filter_map(|e| rename.rename(e))
            .collect();
        assert_eq!(renamed.len(), entries.len());
    }

    #[test]
    fn target_gets_a_single_trailing_slash() {
        let rename = LibDirRename::new(["a.libs/".to_owned()], "b.libs/");
        assert_eq!(rename.target(), "b.libs/");
    }
}
