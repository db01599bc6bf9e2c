// Container runtime availability
//
// `docker --version` succeeds whenever the client binary exists, even with the daemon
// down, so it is never used as a readiness signal. `docker info` has to reach the daemon
// and is authoritative: success means Ready, a missing binary means Absent, anything else
// means the client is installed but its daemon is not reachable.

use async_trait::async_trait;
use log::{debug, info, warn};
use std::time::Instant;
use tokio::time::Duration;

use crate::installation::{CommandError, CommandRunner, CommandSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeStatus {
    Ready,
    ClientOnlyNotRunning,
    Absent,
}

#[async_trait]
pub trait RuntimeProbe: Send + Sync {
    async fn probe(&self) -> RuntimeStatus;
}

pub struct RuntimeAvailabilityChecker<'a> {
    runner: &'a dyn CommandRunner,
    docker: String,
    timeout: Duration,
}

impl<'a> RuntimeAvailabilityChecker<'a> {
    pub fn new(runner: &'a dyn CommandRunner, docker: impl Into<String>) -> Self {
        Self {
            runner,
            docker: docker.into(),
            timeout: Duration::from_secs(15),
        }
    }
}

#[async_trait]
impl RuntimeProbe for RuntimeAvailabilityChecker<'_> {
    async fn probe(&self) -> RuntimeStatus {
        debug!("[PHASE: preflight] [STEP: runtime] probe entered (docker={})", self.docker);

        let spec = CommandSpec::new(self.docker.clone(), "docker_info")
            .args(["info", "--format", "{{.ServerVersion}}"])
            .timeout(self.timeout);

        let status = match self.runner.run(&spec).await {
            Ok(out) if out.success() => {
                debug!(
                    "[PHASE: preflight] [STEP: runtime] daemon reachable (server_version={})",
                    out.stdout.trim()
                );
                RuntimeStatus::Ready
            }
            Ok(out) => {
                if out.stderr.to_lowercase().contains("permission denied") {
                    warn!(
                        "[PHASE: preflight] [STEP: runtime] daemon check failed due to permission denied (is the user in the docker group?)"
                    );
                }
                RuntimeStatus::ClientOnlyNotRunning
            }
            Err(CommandError::NotFound { .. }) => RuntimeStatus::Absent,
            Err(e) => {
                debug!(
                    "[PHASE: preflight] [STEP: runtime] daemon check did not complete: {}",
                    e
                );
                RuntimeStatus::ClientOnlyNotRunning
            }
        };

        debug!("[PHASE: preflight] [STEP: runtime] probe exit (status={:?})", status);
        status
    }
}

/// Poll `probe` until it reports Ready or `window` elapses.
///
/// Probes immediately, then every `interval`. Returns true when Ready was observed.
pub async fn wait_for_daemon(probe: &dyn RuntimeProbe, window: Duration, interval: Duration) -> bool {
    let started = Instant::now();
    info!(
        "[PHASE: install] [STEP: runtime] waiting for daemon (window_ms={}, interval_ms={})",
        window.as_millis(),
        interval.as_millis()
    );

    let poll = async {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            if probe.probe().await == RuntimeStatus::Ready {
                return attempt;
            }
            tokio::time::sleep(interval).await;
        }
    };

    match tokio::time::timeout(window, poll).await {
        Ok(attempts) => {
            info!(
                "[PHASE: install] [STEP: runtime] daemon ready (attempts={}, elapsed_ms={})",
                attempts,
                started.elapsed().as_millis()
            );
            true
        }
        Err(_) => {
            warn!(
                "[PHASE: install] [STEP: runtime] daemon not ready after {}ms",
                started.elapsed().as_millis()
            );
            false
        }
    }
}
