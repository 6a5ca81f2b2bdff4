//! Systemd unit file generation.

use std::fs;
use std::path::PathBuf;

use crate::error::ConfigFileError;

/// Directory systemd units are installed into.
pub const UNIT_DIR: &str = "/etc/systemd/system";

/// Declarative description of a generated service unit.
#[derive(Debug, Clone)]
pub struct UnitSpec {
    /// Unit name without the `.service` suffix.
    pub name: String,
    pub description: String,
    pub exec_start: String,
    pub working_dir: PathBuf,
    pub user: String,
    /// `Environment=` entries as key/value pairs.
    pub env: Vec<(String, String)>,
    /// Units listed in `After=` in addition to `network.target`.
    pub after: Vec<String>,
    /// Units listed in `Requires=`.
    pub requires: Vec<String>,
}

impl UnitSpec {
    /// Path the unit file is installed at.
    #[must_use]
    pub fn unit_path(&self) -> PathBuf {
        PathBuf::from(UNIT_DIR).join(format!("{}.service", self.name))
    }

    /// Render the unit file content.
    ///
    /// Crash-only restart policy: a failed start restarts after ten
    /// seconds, a clean stop stays stopped.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("[Unit]\n");
        out.push_str(&format!("Description={}\n", self.description));
        let mut after = vec!["network.target".to_string()];
        after.extend(self.after.iter().cloned());
        out.push_str(&format!("After={}\n", after.join(" ")));
        if !self.requires.is_empty() {
            out.push_str(&format!("Requires={}\n", self.requires.join(" ")));
        }
        out.push('\n');
        out.push_str("[Service]\n");
        out.push_str("Type=simple\n");
        out.push_str(&format!("User={}\n", self.user));
        out.push_str(&format!("WorkingDirectory={}\n", self.working_dir.display()));
        for (key, value) in &self.env {
            out.push_str(&format!("Environment={key}={value}\n"));
        }
        out.push_str(&format!("ExecStart={}\n", self.exec_start));
        out.push_str("Restart=on-failure\n");
        out.push_str("RestartSec=10\n");
        out.push_str("StandardOutput=journal\n");
        out.push_str("StandardError=journal\n");
        out.push('\n');
        out.push_str("[Install]\n");
        out.push_str("WantedBy=multi-user.target\n");
        out
    }

    /// Write the unit file to [`UNIT_DIR`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigFileError::Io`] when the unit file cannot be
    /// written.
    pub fn install(&self) -> Result<(), ConfigFileError> {
        let path = self.unit_path();
        fs::write(&path, self.render()).map_err(|source| ConfigFileError::Io { path, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend_spec() -> UnitSpec {
        UnitSpec {
            name: "platform-backend".to_string(),
            description: "Platform backend service".to_string(),
            exec_start: "/usr/bin/npm run start:prod".to_string(),
            working_dir: PathBuf::from("/opt/platform/backend"),
            user: "root".to_string(),
            env: vec![("NODE_ENV".to_string(), "production".to_string())],
            after: vec!["postgresql.service".to_string()],
            requires: vec!["postgresql.service".to_string()],
        }
    }

    #[test]
    fn renders_restart_on_failure() {
        let rendered = backend_spec().render();
        assert!(rendered.contains("Restart=on-failure\n"));
        assert!(rendered.contains("RestartSec=10\n"));
        assert!(!rendered.contains("Restart=always"));
    }

    #[test]
    fn renders_dependencies_and_environment() {
        let rendered = backend_spec().render();
        assert!(rendered.contains("After=network.target postgresql.service\n"));
        assert!(rendered.contains("Requires=postgresql.service\n"));
        assert!(rendered.contains("Environment=NODE_ENV=production\n"));
        assert!(rendered.contains("WorkingDirectory=/opt/platform/backend\n"));
    }

    #[test]
    fn omits_requires_when_empty() {
        let mut spec = backend_spec();
        spec.requires.clear();
        assert!(!spec.render().contains("Requires="));
    }

    #[test]
    fn unit_path_lands_in_system_dir() {
        assert_eq!(
            backend_spec().unit_path(),
            PathBuf::from("/etc/systemd/system/platform-backend.service")
        );
    }
}
