//! Systemd service lifecycle and readiness polling.
//!
//! All state transitions go through `systemctl` via the [`Executor`]
//! abstraction. The manager only ever converges toward the desired state:
//! an already-running service is never restarted by `ensure_running`, and
//! applying new configuration is an explicit, separate restart.

use std::sync::Arc;
use std::time::Duration;

use crate::error::ServiceError;
use crate::exec::Executor;
use crate::logging::Log;

/// Converges systemd units toward a desired state.
pub struct ServiceManager {
    executor: Arc<dyn Executor>,
    log: Arc<dyn Log>,
    dry_run: bool,
}

impl ServiceManager {
    #[must_use]
    pub const fn new(executor: Arc<dyn Executor>, log: Arc<dyn Log>, dry_run: bool) -> Self {
        Self {
            executor,
            log,
            dry_run,
        }
    }

    /// Whether the unit is currently active.
    #[must_use]
    pub fn is_active(&self, unit: &str) -> bool {
        self.executor
            .run_unchecked("systemctl", &["is-active", "--quiet", unit])
            .is_ok_and(|r| r.success)
    }

    /// Whether the unit is enabled at boot.
    #[must_use]
    pub fn is_enabled(&self, unit: &str) -> bool {
        self.executor
            .run_unchecked("systemctl", &["is-enabled", "--quiet", unit])
            .is_ok_and(|r| r.success)
    }

    /// Whether systemd knows the unit at all.
    #[must_use]
    pub fn unit_exists(&self, unit: &str) -> bool {
        self.executor
            .run_unchecked("systemctl", &["cat", unit])
            .is_ok_and(|r| r.success)
    }

    /// Start the unit if inactive and enable it if disabled.
    ///
    /// An already-running service is left untouched; convergence never
    /// restarts.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::StartFailed`] when systemctl reports a
    /// failure to start or enable.
    pub fn ensure_running(&self, unit: &str) -> Result<(), ServiceError> {
        if self.dry_run {
            self.log.dry_run(&format!("Would start and enable {unit}"));
            return Ok(());
        }
        if self.is_active(unit) {
            self.log.debug(&format!("{unit} already active"));
        } else {
            self.log.info(&format!("Starting {unit}"));
            self.systemctl("start", unit)?;
        }
        if !self.is_enabled(unit) {
            self.log.debug(&format!("Enabling {unit}"));
            self.systemctl("enable", unit)?;
        }
        Ok(())
    }

    /// Restart the unit so freshly written configuration takes effect.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::StartFailed`] when the restart fails.
    pub fn restart_to_apply(&self, unit: &str) -> Result<(), ServiceError> {
        if self.dry_run {
            self.log.dry_run(&format!("Would restart {unit}"));
            return Ok(());
        }
        self.log.info(&format!("Restarting {unit}"));
        self.systemctl("restart", unit)
    }

    /// Stop and disable the unit, tolerating a unit systemd does not know.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::StartFailed`] when stopping or disabling a
    /// known unit fails.
    pub fn stop_and_disable(&self, unit: &str) -> Result<(), ServiceError> {
        if self.dry_run {
            self.log.dry_run(&format!("Would stop and disable {unit}"));
            return Ok(());
        }
        if !self.unit_exists(unit) {
            self.log.debug(&format!("{unit} not present, skipping"));
            return Ok(());
        }
        if self.is_active(unit) {
            self.log.info(&format!("Stopping {unit}"));
            self.systemctl("stop", unit)?;
        }
        if self.is_enabled(unit) {
            self.log.debug(&format!("Disabling {unit}"));
            self.systemctl("disable", unit)?;
        }
        Ok(())
    }

    /// Reload unit definitions after writing or removing unit files.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::StartFailed`] when the reload fails.
    pub fn daemon_reload(&self) -> Result<(), ServiceError> {
        if self.dry_run {
            self.log.dry_run("Would reload systemd units");
            return Ok(());
        }
        let result = self
            .executor
            .run_unchecked("systemctl", &["daemon-reload"])
            .map_err(|e| ServiceError::StartFailed {
                service: "systemd".to_string(),
                detail: e.to_string(),
            })?;
        if result.success {
            Ok(())
        } else {
            Err(ServiceError::StartFailed {
                service: "systemd".to_string(),
                detail: result.stderr.trim().to_string(),
            })
        }
    }

    fn systemctl(&self, verb: &str, unit: &str) -> Result<(), ServiceError> {
        let result = self
            .executor
            .run_unchecked("systemctl", &[verb, unit])
            .map_err(|e| ServiceError::StartFailed {
                service: unit.to_string(),
                detail: e.to_string(),
            })?;
        if result.success {
            Ok(())
        } else {
            Err(ServiceError::StartFailed {
                service: unit.to_string(),
                detail: format!("systemctl {verb} failed: {}", result.stderr.trim()),
            })
        }
    }
}

/// One observation from a readiness check.
#[derive(Debug, Clone)]
pub struct ProbeObservation {
    /// Whether the service answered its health check.
    pub ready: bool,
    /// Diagnostic detail for the failure report.
    pub diagnostic: String,
}

impl ProbeObservation {
    #[must_use]
    pub const fn ready() -> Self {
        Self {
            ready: true,
            diagnostic: String::new(),
        }
    }

    #[must_use]
    pub fn not_ready(diagnostic: impl Into<String>) -> Self {
        Self {
            ready: false,
            diagnostic: diagnostic.into(),
        }
    }
}

/// Bounded readiness poll for a just-started service.
#[derive(Debug, Clone)]
pub struct ReadinessProbe {
    /// Service name for error reporting.
    pub target: String,
    /// Hard ceiling on check attempts.
    pub max_attempts: u32,
    /// Delay between consecutive attempts.
    pub interval: Duration,
}

impl ReadinessProbe {
    #[must_use]
    pub fn new(target: impl Into<String>, max_attempts: u32, interval: Duration) -> Self {
        Self {
            target: target.into(),
            max_attempts,
            interval,
        }
    }

    /// Poll `check` until it reports ready or the attempt ceiling is hit.
    ///
    /// Sleeps [`interval`](Self::interval) between attempts, never after
    /// the last one. The poll can never run longer than
    /// `max_attempts * interval` worth of waiting.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::NotReady`] carrying the attempt count and
    /// the diagnostic from the final failed observation.
    pub fn wait_ready<F>(&self, mut check: F) -> Result<(), ServiceError>
    where
        F: FnMut() -> ProbeObservation,
    {
        let mut last_diagnostic = String::new();
        for attempt in 1..=self.max_attempts {
            let observation = check();
            if observation.ready {
                return Ok(());
            }
            last_diagnostic = observation.diagnostic;
            if attempt < self.max_attempts {
                std::thread::sleep(self.interval);
            }
        }
        Err(ServiceError::NotReady {
            service: self.target.clone(),
            attempts: self.max_attempts,
            diagnostic: last_diagnostic,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::exec::test_helpers::{MockExecutor, RecordingExecutor};
    use crate::logging::RecordingLog;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn manager(executor: Arc<dyn Executor>, dry_run: bool) -> ServiceManager {
        ServiceManager::new(executor, Arc::new(RecordingLog::new()), dry_run)
    }

    #[test]
    fn ensure_running_skips_active_service() {
        // is-active succeeds, is-enabled succeeds: nothing else runs.
        let executor = Arc::new(MockExecutor::with_responses(vec![
            (true, String::new()),
            (true, String::new()),
        ]));
        manager(executor.clone(), false)
            .ensure_running("postgresql")
            .unwrap();
        assert_eq!(executor.call_count(), 2);
    }

    #[test]
    fn ensure_running_starts_inactive_service() {
        // is-active fails, start succeeds, is-enabled succeeds.
        let executor = Arc::new(MockExecutor::with_responses(vec![
            (false, String::new()),
            (true, String::new()),
            (true, String::new()),
        ]));
        manager(executor.clone(), false)
            .ensure_running("redis-server")
            .unwrap();
        assert_eq!(executor.call_count(), 3);
    }

    #[test]
    fn ensure_running_surfaces_start_failure() {
        let executor = Arc::new(MockExecutor::with_responses(vec![
            (false, String::new()),
            (false, "unit masked".to_string()),
        ]));
        let err = manager(executor, false)
            .ensure_running("libvirtd")
            .unwrap_err();
        assert!(matches!(err, ServiceError::StartFailed { .. }));
        assert!(err.to_string().contains("libvirtd"));
    }

    #[test]
    fn stop_and_disable_skips_unknown_unit() {
        // systemctl cat fails: unit unknown, no further calls.
        let executor = Arc::new(MockExecutor::fail());
        manager(executor.clone(), false)
            .stop_and_disable("platform-backend")
            .unwrap();
        assert_eq!(executor.call_count(), 1);
    }

    #[test]
    fn dry_run_issues_no_commands() {
        let executor = Arc::new(RecordingExecutor::new());
        let manager = manager(executor.clone(), true);
        manager.ensure_running("postgresql").unwrap();
        manager.restart_to_apply("redis").unwrap();
        manager.stop_and_disable("platform-backend").unwrap();
        manager.daemon_reload().unwrap();
        assert!(executor.recorded_calls().is_empty());
    }

    #[test]
    fn probe_succeeds_on_third_attempt() {
        let calls = AtomicU32::new(0);
        let probe = ReadinessProbe::new("postgres", 5, Duration::from_millis(1));
        probe
            .wait_ready(|| {
                if calls.fetch_add(1, Ordering::SeqCst) + 1 >= 3 {
                    ProbeObservation::ready()
                } else {
                    ProbeObservation::not_ready("connection refused")
                }
            })
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn probe_stops_at_attempt_ceiling_with_last_diagnostic() {
        let calls = AtomicU32::new(0);
        let probe = ReadinessProbe::new("platform-backend", 5, Duration::from_millis(1));
        let err = probe
            .wait_ready(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                ProbeObservation::not_ready(format!("refused ({n})"))
            })
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        match err {
            ServiceError::NotReady {
                service,
                attempts,
                diagnostic,
            } => {
                assert_eq!(service, "platform-backend");
                assert_eq!(attempts, 5);
                assert_eq!(diagnostic, "refused (5)");
            }
            other => panic!("expected NotReady, got {other}"),
        }
    }

    #[test]
    fn probe_never_sleeps_when_first_attempt_succeeds() {
        let probe = ReadinessProbe::new("redis", 3, Duration::from_secs(60));
        let start = std::time::Instant::now();
        probe.wait_ready(ProbeObservation::ready).unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
