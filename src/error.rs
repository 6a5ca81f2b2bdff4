//! Domain-specific error types for the provisioning engine.
//!
//! This module provides a structured error hierarchy using [`thiserror`].
//! Internal modules return typed errors (e.g., [`PlatformError`],
//! [`ServiceError`]) while command handlers at the CLI boundary convert them
//! to [`anyhow::Error`] via the standard `?` operator.
//!
//! # Error hierarchy
//!
//! ```text
//! ProvisionError
//! ├── Platform(PlatformError)     OS family resolution, version gate
//! ├── ConfigFile(ConfigFileError) locating and mutating config files
//! ├── Service(ServiceError)       systemd lifecycle and readiness
//! └── Install(InstallError)       phase execution failures
//! ```

use thiserror::Error;

/// Top-level error type for the provisioning engine.
///
/// Aggregates domain-specific sub-errors and is convertible to
/// [`anyhow::Error`] for use at CLI command boundaries.
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// Platform resolution or compatibility error.
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    /// Configuration file location or mutation error.
    #[error("Configuration file error: {0}")]
    ConfigFile(#[from] ConfigFileError),

    /// Service lifecycle or readiness error.
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    /// Installation phase error.
    #[error("Installation error: {0}")]
    Install(#[from] InstallError),
}

/// Errors that arise from platform profile resolution.
#[derive(Error, Debug)]
pub enum PlatformError {
    /// The distribution identifier matched no known OS family, or the
    /// identity file is missing entirely.
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// The OS family is recognized but none of its package-manager binaries
    /// are present on PATH.
    #[error("No package manager found for {family} (tried: {tried})")]
    PackageManagerNotFound {
        /// Name of the resolved OS family.
        family: String,
        /// Comma-separated list of binaries that were probed.
        tried: String,
    },

    /// The distribution is recognized but its version is below the minimum
    /// this installer supports.
    #[error("{pretty_name} is not supported. Minimum version required: {minimum}")]
    UnsupportedOsVersion {
        /// Human-readable distribution name and version.
        pretty_name: String,
        /// Minimum supported version for this distribution.
        minimum: String,
    },
}

/// Errors that arise from locating or mutating configuration files.
#[derive(Error, Debug)]
pub enum ConfigFileError {
    /// None of the candidate paths for a config file exist.
    #[error("Configuration file '{name}' not found (tried: {tried})")]
    NotFound {
        /// Generic name of the file being located.
        name: String,
        /// Comma-separated list of candidate paths that were checked.
        tried: String,
    },

    /// An I/O error occurred while reading or writing a config file.
    #[error("IO error on config file {}: {source}", path.display())]
    Io {
        /// Path to the file that could not be accessed.
        path: std::path::PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Errors that arise from service lifecycle management.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// A readiness probe exhausted its attempt limit.
    #[error("Service '{service}' not ready after {attempts} attempts: {diagnostic}")]
    NotReady {
        /// Name of the probed service or dependency.
        service: String,
        /// Number of attempts made before giving up.
        attempts: u32,
        /// Last observed diagnostic output (e.g. `systemctl status`).
        diagnostic: String,
    },

    /// A service failed to start.
    #[error("Failed to start service '{service}': {detail}")]
    StartFailed {
        /// Name of the service.
        service: String,
        /// stderr or status output from the failed start.
        detail: String,
    },
}

/// Errors that arise during installation phases.
#[derive(Error, Debug)]
pub enum InstallError {
    /// The database superuser could not be reached with the available
    /// credentials.
    #[error("Database authentication failed: {detail}")]
    AuthenticationRequired {
        /// What was attempted and what the server reported.
        detail: String,
    },

    /// A single package failed to install. Non-fatal: some packages are
    /// distribution-optional and the batch continues without them.
    #[error("Failed to install package '{package}': {detail}")]
    DependencyInstall {
        /// Name of the package that could not be installed.
        package: String,
        /// Output from the package manager.
        detail: String,
    },

    /// A phase failed in a way that later phases cannot recover from.
    #[error("Phase '{phase}' failed: {reason}")]
    PhaseFailed {
        /// Name of the phase that aborted the run.
        phase: String,
        /// Human-readable reason for the failure.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn unsupported_platform_display() {
        let e = PlatformError::UnsupportedPlatform("gentoo".to_string());
        assert_eq!(e.to_string(), "Unsupported platform: gentoo");
    }

    #[test]
    fn package_manager_not_found_display() {
        let e = PlatformError::PackageManagerNotFound {
            family: "rhel".to_string(),
            tried: "dnf, yum".to_string(),
        };
        assert_eq!(
            e.to_string(),
            "No package manager found for rhel (tried: dnf, yum)"
        );
    }

    #[test]
    fn unsupported_os_version_display() {
        let e = PlatformError::UnsupportedOsVersion {
            pretty_name: "Ubuntu 20.04 LTS".to_string(),
            minimum: "23.10".to_string(),
        };
        assert_eq!(
            e.to_string(),
            "Ubuntu 20.04 LTS is not supported. Minimum version required: 23.10"
        );
    }

    #[test]
    fn config_file_not_found_display() {
        let e = ConfigFileError::NotFound {
            name: "redis.conf".to_string(),
            tried: "/etc/redis/redis.conf, /etc/redis.conf".to_string(),
        };
        assert!(e.to_string().contains("redis.conf"));
        assert!(e.to_string().contains("/etc/redis.conf"));
    }

    #[test]
    fn config_file_io_has_source() {
        use std::error::Error as StdError;
        let e = ConfigFileError::Io {
            path: std::path::PathBuf::from("/etc/redis/redis.conf"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "permission denied"),
        };
        assert!(e.source().is_some());
    }

    #[test]
    fn service_not_ready_display() {
        let e = ServiceError::NotReady {
            service: "postgresql".to_string(),
            attempts: 5,
            diagnostic: "inactive (dead)".to_string(),
        };
        assert_eq!(
            e.to_string(),
            "Service 'postgresql' not ready after 5 attempts: inactive (dead)"
        );
    }

    #[test]
    fn dependency_install_display() {
        let e = InstallError::DependencyInstall {
            package: "cpu-checker".to_string(),
            detail: "no such package".to_string(),
        };
        assert!(e.to_string().contains("cpu-checker"));
    }

    #[test]
    fn provision_error_from_platform_error() {
        let e: ProvisionError = PlatformError::UnsupportedPlatform("beos".to_string()).into();
        assert!(e.to_string().contains("Platform error"));
    }

    #[test]
    fn provision_error_from_service_error() {
        let e: ProvisionError = ServiceError::StartFailed {
            service: "redis".to_string(),
            detail: "unit not found".to_string(),
        }
        .into();
        assert!(e.to_string().contains("Service error"));
    }

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn all_error_types_are_send_sync() {
        assert_send_sync::<ProvisionError>();
        assert_send_sync::<PlatformError>();
        assert_send_sync::<ConfigFileError>();
        assert_send_sync::<ServiceError>();
        assert_send_sync::<InstallError>();
    }

    #[test]
    fn typed_errors_convert_to_anyhow() {
        let _e: anyhow::Error = PlatformError::UnsupportedPlatform("x".to_string()).into();
        let _e: anyhow::Error = InstallError::AuthenticationRequired {
            detail: "peer authentication".to_string(),
        }
        .into();
    }
}
