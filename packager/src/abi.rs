//! CPython ABI tags and the ranges they span.
//!
//! An ABI tag such as `cp311` names the interpreter a native module was
//! compiled for. The tag selects the matching module by its filename
//! fragment (`cpython-311`) and contributes to the archive name through the
//! dotted version (`3.11`).

use serde::Deserialize;
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

const TAG_PREFIX: &str = "cp";

/// Error returned when an ABI tag cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid ABI tag {tag:?}: {reason}")]
pub struct AbiParseError {
    tag: String,
    reason: &'static str,
}

/// A CPython ABI, e.g. `cp311`.
///
/// # Examples
///
/// ```
/// use abipack_packager::abi::AbiDescriptor;
///
/// let abi: AbiDescriptor = "cp311".parse().expect("valid tag");
/// assert_eq!(abi.major(), 3);
/// assert_eq!(abi.minor(), 11);
/// assert_eq!(abi.filename_fragment(), "cpython-311");
/// assert_eq!(abi.dotted(), "3.11");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub struct AbiDescriptor {
    tag: String,
    major: u8,
    minor: u8,
}

impl AbiDescriptor {
    /// Build a descriptor from its version numbers.
    #[must_use]
    pub fn new(major: u8, minor: u8) -> Self {
        Self {
            tag: format!("{TAG_PREFIX}{major}{minor}"),
            major,
            minor,
        }
    }

    /// The tag string, e.g. `cp311`.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Major interpreter version.
    #[must_use]
    pub fn major(&self) -> u8 {
        self.major
    }

    /// Minor interpreter version.
    #[must_use]
    pub fn minor(&self) -> u8 {
        self.minor
    }

    /// The fragment a compiled module's filename embeds for this ABI.
    #[must_use]
    pub fn filename_fragment(&self) -> String {
        format!("cpython-{}{}", self.major, self.minor)
    }

    /// The dotted interpreter version, e.g. `3.11`.
    #[must_use]
    pub fn dotted(&self) -> String {
        format!("{}.{}", self.major, self.minor)
    }

    /// The compact version pip expects for `--python-version`, e.g. `311`.
    #[must_use]
    pub fn compact(&self) -> String {
        format!("{}{}", self.major, self.minor)
    }

    /// The conventional interpreter executable name, e.g. `python3.11`.
    #[must_use]
    pub fn interpreter_name(&self) -> String {
        format!("python{}", self.dotted())
    }

    /// Derive the ABI from `python --version` output such as
    /// `Python 3.11.7`.
    #[must_use]
    pub fn from_version_output(output: &str) -> Option<Self> {
        let version = output.split_whitespace().find_map(|word| {
            word.chars()
                .next()
                .filter(char::is_ascii_digit)
                .map(|_| word)
        })?;
        let mut parts = version.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts
            .next()?
            .chars()
            .take_while(char::is_ascii_digit)
            .collect::<String>()
            .parse()
            .ok()?;
        Some(Self::new(major, minor))
    }
}

impl std::str::FromStr for AbiDescriptor {
    type Err = AbiParseError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        let fail = |reason| AbiParseError {
            tag: tag.to_owned(),
            reason,
        };
        let digits = tag
            .strip_prefix(TAG_PREFIX)
            .ok_or_else(|| fail("expected a `cp` prefix"))?;
        if digits.len() < 2 || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(fail("expected at least two version digits"));
        }
        let (major, minor) = digits.split_at(1);
        let major = major.parse().map_err(|_| fail("major version out of range"))?;
        let minor = minor.parse().map_err(|_| fail("minor version out of range"))?;
        Ok(Self::new(major, minor))
    }
}

impl TryFrom<String> for AbiDescriptor {
    type Error = AbiParseError;

    fn try_from(tag: String) -> Result<Self, Self::Error> {
        tag.parse()
    }
}

impl Ord for AbiDescriptor {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor).cmp(&(other.major, other.minor))
    }
}

impl PartialOrd for AbiDescriptor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for AbiDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag)
    }
}

/// The lowest and highest ABI actually present in a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbiRange {
    min: AbiDescriptor,
    max: AbiDescriptor,
}

impl AbiRange {
    /// The range spanned by `abis`, or `None` when it is empty.
    ///
    /// # Examples
    ///
    /// ```
    /// use abipack_packager::abi::{AbiDescriptor, AbiRange};
    ///
    /// let present = [AbiDescriptor::new(3, 11), AbiDescriptor::new(3, 8)];
    /// let range = AbiRange::spanning(&present).expect("non-empty");
    /// assert_eq!(range.to_string(), "3.8~3.11");
    /// ```
    #[must_use]
    pub fn spanning<'a>(abis: impl IntoIterator<Item = &'a AbiDescriptor>) -> Option<Self> {
        let mut iter = abis.into_iter();
        let first = iter.next()?;
        let (min, max) = iter.fold((first, first), |(min, max), abi| {
            (min.min(abi), max.max(abi))
        });
        Some(Self {
            min: min.clone(),
            max: max.clone(),
        })
    }

    /// The oldest ABI in the range.
    #[must_use]
    pub fn min(&self) -> &AbiDescriptor {
        &self.min
    }

    /// The newest ABI in the range.
    #[must_use]
    pub fn max(&self) -> &AbiDescriptor {
        &self.max
    }
}

impl fmt::Display for AbiRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}~{}", self.min.dotted(), self.max.dotted())
    }
}
