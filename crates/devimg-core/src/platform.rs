//! Target platform identifiers (`os/arch[/variant]`).
//!
//! Build tools only understand the canonical OCI architecture names, so
//! every architecture string coming from a host probe goes through
//! [`normalize_arch`] before it becomes a [`Platform`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An OCI platform such as `linux/amd64` or `linux/arm/v7`.
///
/// # Examples
///
/// ```
/// use devimg_core::Platform;
///
/// let p: Platform = "linux/aarch64".parse().unwrap();
/// assert_eq!(p.to_string(), "linux/arm64");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Platform {
    pub os: String,
    pub arch: String,
    pub variant: Option<String>,
}

impl Platform {
    /// Linux platform for the given (possibly aliased) architecture.
    pub fn linux(arch: &str) -> Self {
        let (arch, variant) = normalize_arch(arch);
        Self {
            os: "linux".to_owned(),
            arch,
            variant,
        }
    }

    /// The platform of the machine this process runs on.
    pub fn host() -> Self {
        Self::linux(std::env::consts::ARCH)
    }

    /// Default multi-architecture set for CI builds.
    pub fn ci_defaults() -> Vec<Self> {
        vec![Self::linux("amd64"), Self::linux("arm64")]
    }
}

/// Map an architecture name to its canonical OCI spelling.
///
/// Returns the architecture and an optional variant (`armv7l` → `arm`, `v7`).
/// Unknown names pass through lowercased.
pub fn normalize_arch(raw: &str) -> (String, Option<String>) {
    let lower = raw.trim().to_ascii_lowercase();
    match lower.as_str() {
        "x86_64" | "x86-64" | "amd64" | "x64" => ("amd64".to_owned(), None),
        "aarch64" | "arm64" | "armv8" | "arm64/v8" => ("arm64".to_owned(), None),
        "armv7l" | "armv7" | "armhf" | "arm/v7" => ("arm".to_owned(), Some("v7".to_owned())),
        "armv6l" | "armv6" | "arm/v6" => ("arm".to_owned(), Some("v6".to_owned())),
        "i386" | "i686" | "x86" | "386" => ("386".to_owned(), None),
        "ppc64le" | "ppc64el" => ("ppc64le".to_owned(), None),
        _ => (lower, None),
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.variant {
            Some(v) => write!(f, "{}/{}/{}", self.os, self.arch, v),
            None => write!(f, "{}/{}", self.os, self.arch),
        }
    }
}

impl FromStr for Platform {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| crate::Error::InvalidPlatform {
            value: s.to_owned(),
            reason,
        };

        let parts: Vec<&str> = s.trim().split('/').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(invalid("empty component"));
        }

        match parts.as_slice() {
            [arch] => Ok(Self::linux(arch)),
            [os, arch] => {
                let (arch, variant) = normalize_arch(arch);
                Ok(Self {
                    os: os.to_ascii_lowercase(),
                    arch,
                    variant,
                })
            }
            [os, arch, variant] => {
                let (arch, _) = normalize_arch(arch);
                Ok(Self {
                    os: os.to_ascii_lowercase(),
                    arch,
                    variant: Some(variant.to_ascii_lowercase()),
                })
            }
            _ => Err(invalid("expected os/arch[/variant]")),
        }
    }
}

impl TryFrom<String> for Platform {
    type Error = crate::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Platform> for String {
    fn from(p: Platform) -> Self {
        p.to_string()
    }
}

/// Join platforms into the comma-separated form build tools accept.
pub fn join_platforms(platforms: &[Platform]) -> String {
    platforms
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
