//! Protocol version numbers and their ordering.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// A NatNet version number of up to four components
/// (major, minor, revision, build).
///
/// Components that were not given read as zero, and comparison pads the
/// shorter side with zeros, so `Version` values of different lengths compare
/// component-wise: a bare major `4` equals `4.0.0.0` and precedes `4.1`.
/// [`Version::truncate`] drops trailing components, which matters for
/// rendering (`Bitstream,3.0` carries exactly two components) but never for
/// comparison.
#[derive(Debug, Copy, Clone, Default)]
pub struct Version {
    parts: [u32; 4],
    len: u8,
}

impl Version {
    /// Builds a version from up to four components.
    ///
    /// # Panics
    ///
    /// Panics if more than four components are given.
    pub const fn from_parts(components: &[u32]) -> Self {
        assert!(components.len() <= 4, "a version has at most 4 components");

        let mut parts = [0; 4];
        let mut i = 0;
        while i < components.len() {
            parts[i] = components[i];
            i += 1;
        }

        Self {
            parts,
            len: components.len() as u8,
        }
    }

    /// The first component, or zero if the version is empty.
    pub fn major(&self) -> u32 {
        self.parts[0]
    }

    /// The second component, or zero if not given.
    pub fn minor(&self) -> u32 {
        self.parts[1]
    }

    /// The third component, or zero if not given.
    pub fn revision(&self) -> u32 {
        self.parts[2]
    }

    /// The fourth component, or zero if not given.
    pub fn build(&self) -> u32 {
        self.parts[3]
    }

    /// The components this version was built from.
    pub fn components(&self) -> &[u32] {
        &self.parts[..self.len as usize]
    }

    /// Returns this version cut down to at most `len` components.
    pub fn truncate(&self, len: usize) -> Self {
        if len >= self.len as usize {
            *self
        } else {
            Self::from_parts(&self.parts[..len])
        }
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.parts == other.parts
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.parts.cmp(&other.parts)
    }
}

impl std::hash::Hash for Version {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.parts.hash(state);
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.components().iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", part)?;
        }
        Ok(())
    }
}

/// The error returned when parsing a dotted version string fails.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
#[error("invalid version string {0:?}")]
pub struct ParseVersionError(String);

impl FromStr for Version {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = [0; 4];
        let mut len = 0;

        for component in s.split('.') {
            if len == 4 {
                return Err(ParseVersionError(s.to_owned()));
            }

            parts[len] = component
                .parse()
                .map_err(|_| ParseVersionError(s.to_owned()))?;
            len += 1;
        }

        Ok(Self {
            parts,
            len: len as u8,
        })
    }
}
