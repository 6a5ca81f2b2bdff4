//! Cross-distribution resource name mapping.
//!
//! Logical names used throughout the installer (package identities, service
//! units, config file locations) are translated to the concrete name the
//! host family uses. Unmapped names fall back to identity, and a mapping
//! may declare a resource deliberately absent on a family, which consumers
//! treat as a skip rather than an error.

use std::path::PathBuf;

use crate::platform::OsFamily;

/// Category of a logical resource name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// Installable package.
    Package,
    /// Systemd service unit.
    Service,
    /// Well-known configuration file location.
    ConfigPath,
}

/// Result of resolving a logical name for one family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// Concrete name on this family.
    Name(String),
    /// The resource deliberately does not exist on this family.
    Absent,
}

impl Resolved {
    /// The concrete name, or `None` when absent.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Name(name) => Some(name),
            Self::Absent => None,
        }
    }
}

/// One mapping row: logical name, family, and the family-specific name
/// (`None` marks the resource absent on that family).
type Row = (&'static str, OsFamily, Option<&'static str>);

const PACKAGE_ROWS: &[Row] = &[
    ("nodejs", OsFamily::Debian, Some("nodejs")),
    ("nodejs", OsFamily::Rhel, Some("nodejs")),
    ("nodejs", OsFamily::Suse, Some("nodejs22")),
    ("nodejs", OsFamily::Arch, Some("nodejs")),
    ("npm", OsFamily::Debian, Some("npm")),
    ("npm", OsFamily::Rhel, Some("npm")),
    ("npm", OsFamily::Suse, Some("npm22")),
    ("npm", OsFamily::Arch, Some("npm")),
    ("postgresql-server", OsFamily::Debian, Some("postgresql")),
    ("postgresql-server", OsFamily::Rhel, Some("postgresql-server")),
    ("postgresql-server", OsFamily::Suse, Some("postgresql-server")),
    ("postgresql-server", OsFamily::Arch, Some("postgresql")),
    ("postgresql-contrib", OsFamily::Debian, Some("postgresql-contrib")),
    ("postgresql-contrib", OsFamily::Rhel, Some("postgresql-contrib")),
    ("postgresql-contrib", OsFamily::Suse, Some("postgresql-contrib")),
    // Contrib modules ship inside the main Arch package.
    ("postgresql-contrib", OsFamily::Arch, None),
    ("build-essential", OsFamily::Debian, Some("build-essential")),
    ("build-essential", OsFamily::Rhel, Some("gcc-c++")),
    ("build-essential", OsFamily::Suse, Some("gcc-c++")),
    ("build-essential", OsFamily::Arch, Some("base-devel")),
    ("qemu-kvm", OsFamily::Debian, Some("qemu-system-x86")),
    ("qemu-kvm", OsFamily::Rhel, Some("qemu-kvm")),
    ("qemu-kvm", OsFamily::Suse, Some("qemu-kvm")),
    ("qemu-kvm", OsFamily::Arch, Some("qemu-full")),
    ("libvirt", OsFamily::Debian, Some("libvirt-daemon-system")),
    ("libvirt", OsFamily::Rhel, Some("libvirt")),
    ("libvirt", OsFamily::Suse, Some("libvirt")),
    ("libvirt", OsFamily::Arch, Some("libvirt")),
    ("libvirt-clients", OsFamily::Debian, Some("libvirt-clients")),
    ("libvirt-clients", OsFamily::Rhel, Some("libvirt-client")),
    ("libvirt-clients", OsFamily::Suse, Some("libvirt-client")),
    ("libvirt-clients", OsFamily::Arch, None),
    ("openssl-dev", OsFamily::Debian, Some("libssl-dev")),
    ("openssl-dev", OsFamily::Rhel, Some("openssl-devel")),
    ("openssl-dev", OsFamily::Suse, Some("libopenssl-devel")),
    ("openssl-dev", OsFamily::Arch, Some("openssl")),
    ("redis", OsFamily::Debian, Some("redis-server")),
    ("redis", OsFamily::Rhel, Some("redis")),
    ("redis", OsFamily::Suse, Some("redis")),
    ("redis", OsFamily::Arch, Some("redis")),
    ("cpu-checker", OsFamily::Debian, Some("cpu-checker")),
    // kvm-ok only exists on Debian; elsewhere KVM support is probed via
    // /dev/kvm directly.
    ("cpu-checker", OsFamily::Rhel, None),
    ("cpu-checker", OsFamily::Suse, None),
    ("cpu-checker", OsFamily::Arch, None),
    ("virt-install", OsFamily::Debian, Some("virtinst")),
    ("virt-install", OsFamily::Rhel, Some("virt-install")),
    ("virt-install", OsFamily::Suse, Some("virt-install")),
    ("virt-install", OsFamily::Arch, Some("virt-install")),
];

const SERVICE_ROWS: &[Row] = &[
    ("postgresql", OsFamily::Debian, Some("postgresql")),
    ("postgresql", OsFamily::Rhel, Some("postgresql")),
    ("postgresql", OsFamily::Suse, Some("postgresql")),
    ("postgresql", OsFamily::Arch, Some("postgresql")),
    ("redis", OsFamily::Debian, Some("redis-server")),
    ("redis", OsFamily::Rhel, Some("redis")),
    ("redis", OsFamily::Suse, Some("redis")),
    ("redis", OsFamily::Arch, Some("redis")),
    ("libvirtd", OsFamily::Debian, Some("libvirtd")),
    ("libvirtd", OsFamily::Rhel, Some("libvirtd")),
    ("libvirtd", OsFamily::Suse, Some("libvirtd")),
    ("libvirtd", OsFamily::Arch, Some("libvirtd")),
];

const CONFIG_PATH_ROWS: &[Row] = &[
    ("redis.conf", OsFamily::Debian, Some("/etc/redis/redis.conf")),
    ("redis.conf", OsFamily::Rhel, Some("/etc/redis/redis.conf")),
    ("redis.conf", OsFamily::Suse, Some("/etc/redis/redis.conf")),
    ("redis.conf", OsFamily::Arch, Some("/etc/redis/redis.conf")),
];

/// Resolve one logical name for a family.
///
/// Names without a table row resolve to themselves; a `None` row marks the
/// resource [`Resolved::Absent`] on that family.
#[must_use]
pub fn resolve(kind: ResourceKind, logical: &str, family: OsFamily) -> Resolved {
    let rows = match kind {
        ResourceKind::Package => PACKAGE_ROWS,
        ResourceKind::Service => SERVICE_ROWS,
        ResourceKind::ConfigPath => CONFIG_PATH_ROWS,
    };
    match rows
        .iter()
        .find(|(name, row_family, _)| *name == logical && *row_family == family)
    {
        Some((_, _, Some(concrete))) => Resolved::Name((*concrete).to_string()),
        Some((_, _, None)) => Resolved::Absent,
        None => Resolved::Name(logical.to_string()),
    }
}

/// Resolve a service unit name.
#[must_use]
pub fn service_name(logical: &str, family: OsFamily) -> String {
    match resolve(ResourceKind::Service, logical, family) {
        Resolved::Name(name) => name,
        Resolved::Absent => logical.to_string(),
    }
}

/// Resolve a well-known config file path, if it exists on this family.
#[must_use]
pub fn config_path(logical: &str, family: OsFamily) -> Option<PathBuf> {
    match resolve(ResourceKind::ConfigPath, logical, family) {
        Resolved::Name(path) => Some(PathBuf::from(path)),
        Resolved::Absent => None,
    }
}

/// Resolve a batch of logical package names, dropping entries the family
/// marks absent. Returns `(concrete, skipped_logical)` lists.
#[must_use]
pub fn resolve_packages(logical: &[&str], family: OsFamily) -> (Vec<String>, Vec<String>) {
    let mut concrete = Vec::with_capacity(logical.len());
    let mut skipped = Vec::new();
    for name in logical {
        match resolve(ResourceKind::Package, name, family) {
            Resolved::Name(resolved) => concrete.push(resolved),
            Resolved::Absent => skipped.push((*name).to_string()),
        }
    }
    (concrete, skipped)
}
