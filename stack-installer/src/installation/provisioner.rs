// Runtime installer
//
// Brings the host from "nothing" to "container daemon answering": compatibility layer
// first (Windows only, needs a restart), then the runtime itself. Each step is a
// detect -> install-if-missing -> wait-for-ready sequence and is a no-op when the host is
// already in the desired state.

use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::time::Instant;
use tokio::time::Duration;

use crate::config::RuntimeConfig;
use crate::installation::privilege::{elevation_instruction, PrivilegeCheck};
use crate::installation::runtime::{wait_for_daemon, RuntimeProbe, RuntimeStatus};
use crate::installation::{CommandError, CommandRunner, CommandSpec};
use crate::models::outcome::InstallFailure;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    Ready,
    RestartRequired,
    Failed(InstallFailure),
}

#[async_trait]
pub trait RuntimeProvisioner: Send + Sync {
    async fn ensure_compat_layer(&self) -> ProvisionOutcome;
    async fn ensure_runtime(&self) -> ProvisionOutcome;
    /// Read-only check used for status reporting.
    async fn compat_layer_present(&self) -> bool;
}

pub struct RuntimeInstaller<'a> {
    runner: &'a dyn CommandRunner,
    probe: &'a dyn RuntimeProbe,
    privilege: &'a dyn PrivilegeCheck,
    config: &'a RuntimeConfig,
}

impl<'a> RuntimeInstaller<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        probe: &'a dyn RuntimeProbe,
        privilege: &'a dyn PrivilegeCheck,
        config: &'a RuntimeConfig,
    ) -> Self {
        Self {
            runner,
            probe,
            privilege,
            config,
        }
    }

    fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.config.install_timeout_secs)
    }

    async fn require_elevation(&self, what: &str) -> Option<ProvisionOutcome> {
        if self.privilege.is_elevated().await {
            return None;
        }
        warn!(
            "[PHASE: install] [STEP: privilege] elevation required to install {}",
            what
        );
        Some(ProvisionOutcome::Failed(InstallFailure::Precondition(format!(
            "installing the {} requires elevated privileges. {}",
            what,
            elevation_instruction()
        ))))
    }

    /// Run an installer command; `Err` carries the failure outcome.
    async fn run_installer(
        &self,
        argv: &[String],
        operation: &str,
        what: &str,
    ) -> Result<(), ProvisionOutcome> {
        let Some(spec) = CommandSpec::from_argv(argv, operation) else {
            return Err(ProvisionOutcome::Failed(InstallFailure::Precondition(format!(
                "no install command is configured for the {}",
                what
            ))));
        };
        let spec = spec.timeout(self.install_timeout());

        match self.runner.run(&spec).await {
            Ok(out) if out.success() => {
                info!(
                    "[PHASE: install] [STEP: {}] installer finished (duration_ms={})",
                    operation, out.duration_ms
                );
                Ok(())
            }
            Ok(out) => {
                error!(
                    "[PHASE: install] [STEP: {}] installer exited with {:?}",
                    operation, out.exit_code
                );
                Err(ProvisionOutcome::Failed(InstallFailure::Fatal(format!(
                    "{} installer failed (exit code {:?}): {}",
                    what,
                    out.exit_code,
                    out.diagnostic()
                ))))
            }
            Err(e @ CommandError::TimedOut { .. }) => Err(ProvisionOutcome::Failed(
                InstallFailure::Transient(format!("{} installer did not finish: {}", what, e)),
            )),
            Err(e @ CommandError::NotFound { .. }) => Err(ProvisionOutcome::Failed(
                InstallFailure::Precondition(format!("{} installer is unavailable: {}", what, e)),
            )),
            Err(e) => Err(ProvisionOutcome::Failed(InstallFailure::Fatal(format!(
                "{} installer could not run: {}",
                what, e
            )))),
        }
    }

    /// Best-effort daemon start. Some launchers return before the daemon is up, so the
    /// exit status is only logged; the subsequent wait decides.
    async fn start_daemon(&self) {
        let Some(spec) = CommandSpec::from_argv(&self.config.start_command, "runtime_start")
        else {
            debug!("[PHASE: install] [STEP: runtime_start] no start command configured");
            return;
        };
        let spec = spec.timeout(Duration::from_secs(120));
        match self.runner.run(&spec).await {
            Ok(out) if out.success() => {
                info!("[PHASE: install] [STEP: runtime_start] start command issued")
            }
            Ok(out) => warn!(
                "[PHASE: install] [STEP: runtime_start] start command exited with {:?}: {}",
                out.exit_code,
                out.diagnostic()
            ),
            Err(e) => warn!(
                "[PHASE: install] [STEP: runtime_start] start command could not run: {}",
                e
            ),
        }
    }

    async fn wait_or_restart(&self) -> ProvisionOutcome {
        if wait_for_daemon(
            self.probe,
            self.config.wait_window(),
            self.config.wait_interval(),
        )
        .await
        {
            ProvisionOutcome::Ready
        } else {
            warn!(
                "[PHASE: install] [STEP: runtime] daemon not reachable within {}s; a restart is required",
                self.config.wait_window_secs
            );
            ProvisionOutcome::RestartRequired
        }
    }
}

#[async_trait]
impl RuntimeProvisioner for RuntimeInstaller<'_> {
    async fn compat_layer_present(&self) -> bool {
        let Some(spec) = CommandSpec::from_argv(&self.config.compat_probe_command, "compat_probe")
        else {
            return true;
        };
        let spec = spec.timeout(Duration::from_secs(30));
        matches!(self.runner.run(&spec).await, Ok(out) if out.success())
    }

    async fn ensure_compat_layer(&self) -> ProvisionOutcome {
        let started = Instant::now();
        info!("[PHASE: install] [STEP: compat_layer] ensure_compat_layer entered");

        if self.compat_layer_present().await {
            info!(
                "[PHASE: install] [STEP: compat_layer] already present (duration_ms={})",
                started.elapsed().as_millis()
            );
            return ProvisionOutcome::Ready;
        }

        if let Some(denied) = self.require_elevation("compatibility layer").await {
            return denied;
        }

        if let Err(failed) = self
            .run_installer(
                &self.config.compat_install_command,
                "compat_install",
                "compatibility layer",
            )
            .await
        {
            return failed;
        }

        info!(
            "[PHASE: install] [STEP: compat_layer] installed; restart required (duration_ms={})",
            started.elapsed().as_millis()
        );
        ProvisionOutcome::RestartRequired
    }

    async fn ensure_runtime(&self) -> ProvisionOutcome {
        let started = Instant::now();
        info!("[PHASE: install] [STEP: runtime] ensure_runtime entered");

        let outcome = match self.probe.probe().await {
            RuntimeStatus::Ready => ProvisionOutcome::Ready,
            RuntimeStatus::ClientOnlyNotRunning => {
                info!("[PHASE: install] [STEP: runtime] client present, daemon down; starting it");
                self.start_daemon().await;
                self.wait_or_restart().await
            }
            RuntimeStatus::Absent => {
                if let Some(denied) = self.require_elevation("container runtime").await {
                    return denied;
                }
                info!("[PHASE: install] [STEP: runtime] runtime absent; installing");
                if let Err(failed) = self
                    .run_installer(
                        &self.config.install_command,
                        "runtime_install",
                        "container runtime",
                    )
                    .await
                {
                    return failed;
                }
                if self.probe.probe().await != RuntimeStatus::Ready {
                    self.start_daemon().await;
                }
                self.wait_or_restart().await
            }
        };

        info!(
            "[PHASE: install] [STEP: runtime] ensure_runtime exit (outcome={:?}, duration_ms={})",
            outcome,
            started.elapsed().as_millis()
        );
        outcome
    }
}
