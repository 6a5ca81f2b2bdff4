//! Core logging types: phase entries, status, and the [`Log`] trait.

/// Phase execution result for summary reporting.
#[derive(Debug, Clone)]
pub struct PhaseEntry {
    /// Human-readable phase name.
    pub name: String,
    /// Final status of the phase.
    pub status: PhaseStatus,
    /// Optional detail message (e.g., skip reason or error description).
    pub message: Option<String>,
}

/// Status of a completed phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseStatus {
    /// Phase completed successfully.
    Ok,
    /// Phase was skipped because its goal state already holds.
    Skipped,
    /// Phase ran in dry-run mode; no changes were applied.
    DryRun,
    /// Phase encountered an error and could not complete.
    Failed,
    /// Phase never started because an earlier phase failed.
    NotReached,
}

/// Abstraction over logging backends.
///
/// Phase code logs through this trait so tests can substitute a silent
/// recording implementation for [`Logger`](super::logger::Logger).
pub trait Log: Send + Sync {
    /// Log a stage header (major section).
    fn stage(&self, msg: &str);
    /// Log an informational message.
    fn info(&self, msg: &str);
    /// Log a debug message (suppressed on console unless verbose).
    fn debug(&self, msg: &str);
    /// Log a warning message.
    fn warn(&self, msg: &str);
    /// Log an error message.
    fn error(&self, msg: &str);
    /// Log a dry-run action message.
    fn dry_run(&self, msg: &str);
    /// Record a phase result for the summary.
    fn record_phase(&self, name: &str, status: PhaseStatus, message: Option<&str>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_status_equality() {
        assert_eq!(PhaseStatus::Ok, PhaseStatus::Ok);
        assert_ne!(PhaseStatus::Ok, PhaseStatus::Failed);
        assert_ne!(PhaseStatus::Skipped, PhaseStatus::DryRun);
        assert_ne!(PhaseStatus::Failed, PhaseStatus::NotReached);
    }

    #[test]
    fn phase_entry_is_cloneable() {
        let entry = PhaseEntry {
            name: "Database Setup".to_string(),
            status: PhaseStatus::Ok,
            message: None,
        };
        let copy = entry.clone();
        assert_eq!(copy.name, "Database Setup");
        assert_eq!(copy.status, PhaseStatus::Ok);
    }
}
