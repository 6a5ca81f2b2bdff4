//! Platform profile resolution.
//!
//! Parses the system identity file (`/etc/os-release`) once per run,
//! classifies the distribution into one of four OS families, and selects
//! the first available package-manager binary for that family. The
//! resulting [`PlatformProfile`] is immutable and passed by value to every
//! consumer; there are no process-wide globals and no re-detection mid-run.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use crate::error::PlatformError;
use crate::exec::Executor;

/// Default location of the system identity file.
pub const OS_RELEASE_PATH: &str = "/etc/os-release";

/// Minimum supported versions, keyed by distribution `ID`.
///
/// Distributions without a recorded minimum pass the pre-flight gate.
const MINIMUM_VERSIONS: &[(&str, u32, u32)] = &[("ubuntu", 23, 10), ("fedora", 37, 0)];

/// A cluster of distributions sharing a package manager and service-naming
/// conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    /// Debian, Ubuntu and derivatives (apt).
    Debian,
    /// RHEL, Fedora, Rocky, Alma and derivatives (dnf/yum).
    Rhel,
    /// openSUSE and SLE (zypper).
    Suse,
    /// Arch and derivatives (pacman).
    Arch,
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debian => write!(f, "debian"),
            Self::Rhel => write!(f, "rhel"),
            Self::Suse => write!(f, "suse"),
            Self::Arch => write!(f, "arch"),
        }
    }
}

impl OsFamily {
    /// Distribution IDs that belong directly to this family.
    const fn known_ids(self) -> &'static [&'static str] {
        match self {
            Self::Debian => &[
                "debian",
                "ubuntu",
                "linuxmint",
                "pop",
                "raspbian",
                "elementary",
            ],
            Self::Rhel => &["rhel", "fedora", "centos", "rocky", "almalinux", "ol"],
            Self::Suse => &["opensuse-leap", "opensuse-tumbleweed", "sles", "sled"],
            Self::Arch => &["arch", "archarm", "manjaro", "endeavouros"],
        }
    }

    /// `ID_LIKE` tokens that map a derivative onto this family.
    const fn like_tokens(self) -> &'static [&'static str] {
        match self {
            Self::Debian => &["debian", "ubuntu"],
            Self::Rhel => &["rhel", "fedora", "centos"],
            Self::Suse => &["suse"],
            Self::Arch => &["arch"],
        }
    }

    /// Package-manager candidates for this family, most preferred first.
    #[must_use]
    pub const fn package_manager_candidates(self) -> &'static [PackageManager] {
        match self {
            Self::Debian => &[PackageManager::Apt],
            Self::Rhel => &[PackageManager::Dnf, PackageManager::Yum],
            Self::Suse => &[PackageManager::Zypper],
            Self::Arch => &[PackageManager::Pacman],
        }
    }
}

/// Supported package-manager toolchains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    /// Debian family.
    Apt,
    /// Modern RHEL family.
    Dnf,
    /// Legacy RHEL family fallback.
    Yum,
    /// Arch family.
    Pacman,
    /// SUSE family.
    Zypper,
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary())
    }
}

impl PackageManager {
    /// Name of the package-manager binary.
    #[must_use]
    pub const fn binary(self) -> &'static str {
        match self {
            Self::Apt => "apt",
            Self::Dnf => "dnf",
            Self::Yum => "yum",
            Self::Pacman => "pacman",
            Self::Zypper => "zypper",
        }
    }

    /// Arguments for refreshing the package cache.
    #[must_use]
    pub const fn update_args(self) -> &'static [&'static str] {
        match self {
            Self::Apt => &["update"],
            // check-update exits 100 when updates are available; callers
            // must treat that exit code as success.
            Self::Dnf | Self::Yum => &["check-update"],
            Self::Pacman => &["-Sy"],
            Self::Zypper => &["refresh"],
        }
    }

    /// Leading arguments for a non-interactive install; package names are
    /// appended by the caller.
    #[must_use]
    pub const fn install_args(self) -> &'static [&'static str] {
        match self {
            Self::Apt | Self::Dnf | Self::Yum | Self::Zypper => &["install", "-y"],
            Self::Pacman => &["-S", "--needed", "--noconfirm"],
        }
    }

    /// Program and arguments for querying whether a single package is
    /// installed; success means installed.
    #[must_use]
    pub const fn query_command(self, package: &str) -> (&'static str, [&str; 2]) {
        match self {
            Self::Apt => ("dpkg", ["-s", package]),
            Self::Dnf | Self::Yum | Self::Zypper => ("rpm", ["-q", package]),
            Self::Pacman => ("pacman", ["-Q", package]),
        }
    }

    /// Extra environment required for non-interactive operation.
    #[must_use]
    pub const fn install_env(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::Apt => &[("DEBIAN_FRONTEND", "noninteractive")],
            _ => &[],
        }
    }

    /// Exit codes other than zero that indicate success for the update
    /// command.
    #[must_use]
    pub const fn update_ok_codes(self) -> &'static [i32] {
        match self {
            Self::Dnf | Self::Yum => &[100],
            _ => &[],
        }
    }
}

/// Immutable description of the host's OS family and package toolchain.
///
/// Created once at process start by [`PlatformProfile::resolve`]; every
/// other component consumes it read-only.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PlatformProfile {
    /// Resolved OS family.
    pub os_family: OsFamily,
    /// Raw distribution `ID` from the identity file.
    pub id: String,
    /// Human-readable `PRETTY_NAME`.
    pub pretty_name: String,
    /// Raw `VERSION_ID` string.
    pub version_id: String,
    /// Selected package manager for this host.
    pub package_manager: PackageManager,
}

impl PlatformProfile {
    /// Resolve the platform profile from the default identity file.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::UnsupportedPlatform`] if the identity file
    /// is missing or its `ID` matches no known family, and
    /// [`PlatformError::PackageManagerNotFound`] when the family is
    /// recognized but none of its package-manager binaries are on PATH.
    pub fn resolve(executor: &dyn Executor) -> Result<Self, PlatformError> {
        Self::resolve_from(Path::new(OS_RELEASE_PATH), executor)
    }

    /// Resolve from an explicit identity file path (used by tests).
    ///
    /// # Errors
    ///
    /// Same as [`PlatformProfile::resolve`].
    pub fn resolve_from(path: &Path, executor: &dyn Executor) -> Result<Self, PlatformError> {
        let content = std::fs::read_to_string(path).map_err(|_| {
            PlatformError::UnsupportedPlatform(format!(
                "cannot read identity file {}",
                path.display()
            ))
        })?;
        let fields = parse_os_release(&content);

        let id = fields.get("ID").cloned().unwrap_or_default().to_lowercase();
        let id_like = fields
            .get("ID_LIKE")
            .cloned()
            .unwrap_or_default()
            .to_lowercase();

        let os_family = classify(&id, &id_like).ok_or_else(|| {
            PlatformError::UnsupportedPlatform(if id.is_empty() {
                "identity file has no ID field".to_string()
            } else {
                id.clone()
            })
        })?;

        let package_manager = select_package_manager(os_family, executor)?;

        Ok(Self {
            os_family,
            id,
            pretty_name: fields
                .get("PRETTY_NAME")
                .cloned()
                .unwrap_or_else(|| "Unknown Linux".to_string()),
            version_id: fields.get("VERSION_ID").cloned().unwrap_or_default(),
            package_manager,
        })
    }

    /// Parsed `(major, minor)` of `VERSION_ID`; zeroes when unparseable.
    #[must_use]
    pub fn version(&self) -> (u32, u32) {
        let mut parts = self.version_id.split('.');
        let major = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        (major, minor)
    }

    /// Pre-flight minimum-version gate.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::UnsupportedOsVersion`] when this
    /// distribution has a recorded minimum and the host is below it.
    pub fn check_version_supported(&self) -> Result<(), PlatformError> {
        let Some((_, min_major, min_minor)) = MINIMUM_VERSIONS
            .iter()
            .find(|(known_id, _, _)| *known_id == self.id)
        else {
            return Ok(());
        };
        let (major, minor) = self.version();
        if major > *min_major || (major == *min_major && minor >= *min_minor) {
            return Ok(());
        }
        Err(PlatformError::UnsupportedOsVersion {
            pretty_name: self.pretty_name.clone(),
            minimum: if *min_minor == 0 {
                min_major.to_string()
            } else {
                format!("{min_major}.{min_minor}")
            },
        })
    }
}

/// Parse `KEY=value` pairs from os-release content, stripping quotes and
/// skipping comments and blank lines.
fn parse_os_release(content: &str) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim_matches('"').trim_matches('\'');
            fields.insert(key.to_string(), value.to_string());
        }
    }
    fields
}

/// Classify a distribution into an OS family via fixed set membership of
/// `ID`, falling back to `ID_LIKE` token membership for derivatives.
fn classify(id: &str, id_like: &str) -> Option<OsFamily> {
    const FAMILIES: [OsFamily; 4] = [
        OsFamily::Debian,
        OsFamily::Rhel,
        OsFamily::Suse,
        OsFamily::Arch,
    ];

    for family in FAMILIES {
        if family.known_ids().contains(&id) {
            return Some(family);
        }
    }

    let like_tokens: Vec<&str> = id_like.split_whitespace().collect();
    for family in FAMILIES {
        if family
            .like_tokens()
            .iter()
            .any(|token| like_tokens.contains(token))
        {
            return Some(family);
        }
    }

    None
}

/// Select the first available package-manager binary for a family.
fn select_package_manager(
    family: OsFamily,
    executor: &dyn Executor,
) -> Result<PackageManager, PlatformError> {
    let candidates = family.package_manager_candidates();
    candidates
        .iter()
        .copied()
        .find(|manager| executor.which(manager.binary()))
        .ok_or_else(|| PlatformError::PackageManagerNotFound {
            family: family.to_string(),
            tried: candidates
                .iter()
                .map(|m| m.binary())
                .collect::<Vec<_>>()
                .join(", "),
        })
}
