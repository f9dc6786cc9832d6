use std::cmp::Ordering;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{DeployError, DeployResult};

/// Version this binary was built as.
pub const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Release asset basename prefix: `infinity-metrics-v<version>-<arch>`.
pub const ASSET_PREFIX: &str = "infinity-metrics";

static URL_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"infinity-metrics-v([0-9]+(?:\.[0-9]+)*)-(?:amd64|arm64)$")
        .expect("static regex is valid")
});

/// Compare two dotted versions numerically, segment by segment.
///
/// The shorter version is padded with zeros, a leading `v` is
/// ignored, and segments that are not numbers count as 0.
///
/// ```
/// use std::cmp::Ordering;
/// use infinity_metrics_installer::version::compare_versions;
///
/// assert_eq!(compare_versions("1.10.1", "1.9.9"), Ordering::Greater);
/// assert_eq!(compare_versions("1.0", "1.0.0"), Ordering::Equal);
/// ```
#[must_use]
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let a = segments(a);
    let b = segments(b);
    let len = a.len().max(b.len());

    (0..len)
        .map(|i| {
            let x = a.get(i).copied().unwrap_or(0);
            let y = b.get(i).copied().unwrap_or(0);
            x.cmp(&y)
        })
        .find(|ord| ord.is_ne())
        .unwrap_or(Ordering::Equal)
}

fn segments(version: &str) -> Vec<u64> {
    let version = version.trim();
    let version = version
        .strip_prefix('v')
        .or_else(|| version.strip_prefix('V'))
        .unwrap_or(version);
    version
        .split('.')
        .map(|s| s.trim().parse().unwrap_or(0))
        .collect()
}

/// Version embedded in an installer download URL, or an empty string
/// when the URL does not follow the asset naming scheme.
#[must_use]
pub fn extract_version_from_url(url: &str) -> String {
    URL_VERSION
        .captures(url.trim())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

/// Release architectures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    Amd64,
    Arm64,
}

impl Arch {
    /// Architecture of the running binary.
    pub fn current() -> DeployResult<Self> {
        Self::from_rust_arch(std::env::consts::ARCH)
    }

    pub fn from_rust_arch(arch: &str) -> DeployResult<Self> {
        match arch {
            "x86_64" | "amd64" => Ok(Self::Amd64),
            "aarch64" | "arm64" => Ok(Self::Arm64),
            other => Err(DeployError::UnsupportedPlatform(other.to_string())),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Amd64 => "amd64",
            Self::Arm64 => "arm64",
        }
    }

    /// Asset name of a release for this architecture.
    #[must_use]
    pub fn asset_name(self, version: &str) -> String {
        format!("{ASSET_PREFIX}-v{version}-{}", self.as_str())
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
