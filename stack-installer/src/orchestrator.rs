// Resumable install orchestration
//
// Sequences the provisioning steps:
//   Init -> EnsuringCompatLayer -> EnsuringRuntime -> (AwaitingRestart) -> MaterializingRepo
//        -> MaterializingEnv -> BringingUpStack -> ProbingReadiness -> Done | Failed
//
// Nothing is read from a saved state file. Every run re-inspects the host; the only
// cross-run datum is the OS-level resume marker. A run that finds the marker starts at
// the runtime check and clears the marker once the runtime answers.

use log::{debug, error, info, warn};
use std::time::Instant;
use tokio::time::Duration;

use crate::config::InstallerConfig;
use crate::installation::environment::{read_env_value, EnvError, EnvOutcome, EnvironmentSource};
use crate::installation::preflight::{first_failure, PortPreflight};
use crate::installation::provisioner::{ProvisionOutcome, RuntimeProvisioner};
use crate::installation::readiness::{Readiness, ReadinessCheck};
use crate::installation::repository::{RepoOutcome, RepositorySource};
use crate::installation::resume::ResumeScheduler;
use crate::installation::runtime::{RuntimeProbe, RuntimeStatus};
use crate::installation::stack::StackOperations;
use crate::installation::{CommandError, CommandOutput};
use crate::models::outcome::{InstallFailure, InstallOutcome, InstallSummary};
use crate::models::state::InstallationState;
use crate::models::target::InstallationTarget;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallPhase {
    Init,
    EnsuringCompatLayer,
    EnsuringRuntime,
    AwaitingRestart,
    MaterializingRepo,
    MaterializingEnv,
    BringingUpStack,
    ProbingReadiness,
    Done,
    Failed,
}

/// The orchestrator's collaborators, injected as trait objects.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub provisioner: &'a dyn RuntimeProvisioner,
    pub probe: &'a dyn RuntimeProbe,
    pub resume: &'a dyn ResumeScheduler,
    pub repository: &'a dyn RepositorySource,
    pub environment: &'a dyn EnvironmentSource,
    pub stack: &'a dyn StackOperations,
    pub readiness: &'a dyn ReadinessCheck,
    pub ports: &'a dyn PortPreflight,
}

#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Never install anything; the runtime must already be up.
    pub skip_runtime_install: bool,
    /// Record the resume marker but leave the restart to the operator.
    pub no_restart: bool,
    /// argv registered with the resume marker.
    pub resume_command: Vec<String>,
}

/// Re-derive the installation state by inspecting the host.
pub async fn inspect_state(
    deps: &Collaborators<'_>,
    target: &InstallationTarget,
    cfg: &InstallerConfig,
) -> InstallationState {
    let runtime = deps.probe.probe().await;
    let daemon_ready = runtime == RuntimeStatus::Ready;
    let stack_up = daemon_ready && target.root().is_dir() && deps.stack.is_running().await;
    InstallationState {
        compat_layer_present: deps.provisioner.compat_layer_present().await,
        runtime_present: runtime != RuntimeStatus::Absent,
        runtime_daemon_ready: daemon_ready,
        repo_present: target.has_checkout(),
        env_file_present: target.join(&cfg.environment.env_file).exists(),
        stack_up,
        pending_restart: deps.resume.has_scheduled_resume().await,
    }
}

pub struct ResumableInstallOrchestrator<'a> {
    deps: Collaborators<'a>,
    target: &'a InstallationTarget,
    cfg: &'a InstallerConfig,
    options: InstallOptions,
}

fn advance(phase: &mut InstallPhase, next: InstallPhase) {
    info!(
        "[PHASE: install] [STEP: state] {:?} -> {:?}",
        *phase, next
    );
    *phase = next;
}

/// Map a stack command result to a failure; `None` means it succeeded.
fn stack_failure(what: &str, res: Result<CommandOutput, CommandError>) -> Option<InstallFailure> {
    match res {
        Ok(out) if out.success() => None,
        Ok(out) => Some(InstallFailure::Fatal(format!(
            "{} failed (exit code {:?}): {}",
            what,
            out.exit_code,
            out.diagnostic()
        ))),
        Err(e @ CommandError::TimedOut { .. }) => {
            Some(InstallFailure::Transient(format!("{} did not finish: {}", what, e)))
        }
        Err(e @ CommandError::NotFound { .. }) => {
            Some(InstallFailure::Precondition(format!("{} is unavailable: {}", what, e)))
        }
        Err(e) => Some(InstallFailure::Fatal(format!("{} could not run: {}", what, e))),
    }
}

impl<'a> ResumableInstallOrchestrator<'a> {
    pub fn new(
        deps: Collaborators<'a>,
        target: &'a InstallationTarget,
        cfg: &'a InstallerConfig,
        options: InstallOptions,
    ) -> Self {
        Self {
            deps,
            target,
            cfg,
            options,
        }
    }

    pub async fn run(&self) -> InstallOutcome {
        let started = Instant::now();
        let outcome = self.run_inner().await;
        match &outcome {
            InstallOutcome::Done(s) => info!(
                "[PHASE: install] [STEP: done] install finished (readiness={:?}, duration_ms={})",
                s.readiness,
                started.elapsed().as_millis()
            ),
            InstallOutcome::AwaitingRestart { restart_requested } => info!(
                "[PHASE: install] [STEP: done] awaiting restart (restart_requested={}, duration_ms={})",
                restart_requested,
                started.elapsed().as_millis()
            ),
            InstallOutcome::Failed(f) => error!(
                "[PHASE: install] [STEP: done] install failed: {} (duration_ms={})",
                f,
                started.elapsed().as_millis()
            ),
        }
        outcome
    }

    async fn run_inner(&self) -> InstallOutcome {
        let d = &self.deps;
        let mut phase = InstallPhase::Init;

        let state = inspect_state(d, self.target, self.cfg).await;
        info!(
            "[PHASE: install] [STEP: inspect] target={:?} state={:?}",
            self.target.root(),
            state
        );

        let resuming = state.pending_restart;
        if resuming {
            info!("[PHASE: install] [STEP: resume] resume marker found; re-validating from the runtime check");
        } else {
            advance(&mut phase, InstallPhase::EnsuringCompatLayer);
            match self.ensure_compat_layer().await {
                ProvisionOutcome::Ready => {}
                ProvisionOutcome::RestartRequired => {
                    advance(&mut phase, InstallPhase::AwaitingRestart);
                    return self.await_restart().await;
                }
                ProvisionOutcome::Failed(f) => {
                    advance(&mut phase, InstallPhase::Failed);
                    return InstallOutcome::Failed(f);
                }
            }
        }

        advance(&mut phase, InstallPhase::EnsuringRuntime);
        match self.ensure_runtime().await {
            ProvisionOutcome::Ready => {}
            ProvisionOutcome::RestartRequired => {
                advance(&mut phase, InstallPhase::AwaitingRestart);
                return self.await_restart().await;
            }
            ProvisionOutcome::Failed(f) => {
                advance(&mut phase, InstallPhase::Failed);
                return InstallOutcome::Failed(f);
            }
        }

        if resuming {
            if let Err(e) = d.resume.clear_scheduled_resume().await {
                warn!(
                    "[PHASE: install] [STEP: resume] could not clear the resume marker: {:#}",
                    e
                );
            }
        }

        if let Some(f) = self.preflight_ports().await {
            advance(&mut phase, InstallPhase::Failed);
            return InstallOutcome::Failed(f);
        }

        advance(&mut phase, InstallPhase::MaterializingRepo);
        let repository = d.repository.ensure(self.target).await;
        if let RepoOutcome::Failed(reason) = &repository {
            advance(&mut phase, InstallPhase::Failed);
            return InstallOutcome::Failed(InstallFailure::Transient(format!(
                "repository could not be materialized: {}",
                reason
            )));
        }

        advance(&mut phase, InstallPhase::MaterializingEnv);
        let env_path = self.target.join(&self.cfg.environment.env_file);
        let template = self.target.join(&self.cfg.environment.template_file);
        let initial_admin_secret = match d.environment.ensure(&template, &env_path) {
            Ok(EnvOutcome::Created(bundle)) => Some(bundle.initial_admin_secret),
            Ok(EnvOutcome::AlreadyPresent) => None,
            Err(e @ EnvError::TemplateMissing(_)) => {
                advance(&mut phase, InstallPhase::Failed);
                return InstallOutcome::Failed(InstallFailure::Precondition(e.to_string()));
            }
            Err(e) => {
                advance(&mut phase, InstallPhase::Failed);
                return InstallOutcome::Failed(InstallFailure::Fatal(e.to_string()));
            }
        };

        advance(&mut phase, InstallPhase::BringingUpStack);
        if let Some(f) = stack_failure("image pull", d.stack.pull().await) {
            advance(&mut phase, InstallPhase::Failed);
            return InstallOutcome::Failed(f);
        }
        if let Some(f) = stack_failure("stack bring-up", d.stack.up().await) {
            advance(&mut phase, InstallPhase::Failed);
            return InstallOutcome::Failed(f);
        }

        advance(&mut phase, InstallPhase::ProbingReadiness);
        let rc = &self.cfg.readiness;
        let readiness = d
            .readiness
            .wait_until_ready(
                &rc.url,
                Duration::from_secs(rc.timeout_secs),
                Duration::from_secs(rc.interval_secs.max(1)),
            )
            .await;
        if readiness == Readiness::TimedOut {
            warn!(
                "[PHASE: install] [STEP: readiness] stack is up but {} did not answer within {}s; check `logs`",
                rc.url, rc.timeout_secs
            );
        }

        advance(&mut phase, InstallPhase::Done);
        InstallOutcome::Done(InstallSummary {
            target_root: self.target.root().display().to_string(),
            repository,
            env_created: initial_admin_secret.is_some(),
            server_name: read_env_value(&env_path, "SERVER_NAME"),
            probe_url: rc.url.clone(),
            readiness,
            initial_admin_secret,
        })
    }

    async fn ensure_compat_layer(&self) -> ProvisionOutcome {
        if !self.options.skip_runtime_install {
            return self.deps.provisioner.ensure_compat_layer().await;
        }
        if self.deps.provisioner.compat_layer_present().await {
            ProvisionOutcome::Ready
        } else {
            ProvisionOutcome::Failed(InstallFailure::Precondition(
                "the compatibility layer is missing and --skip-runtime-install was given".to_string(),
            ))
        }
    }

    async fn ensure_runtime(&self) -> ProvisionOutcome {
        if !self.options.skip_runtime_install {
            return self.deps.provisioner.ensure_runtime().await;
        }
        match self.deps.probe.probe().await {
            RuntimeStatus::Ready => ProvisionOutcome::Ready,
            other => ProvisionOutcome::Failed(InstallFailure::Precondition(format!(
                "the container runtime is not ready ({:?}) and --skip-runtime-install was given",
                other
            ))),
        }
    }

    async fn preflight_ports(&self) -> Option<InstallFailure> {
        let ports = &self.cfg.preflight.ports;
        if ports.is_empty() {
            return None;
        }
        if self.target.root().is_dir() && self.deps.stack.is_running().await {
            debug!("[PHASE: preflight] [STEP: ports] stack already running; port check skipped");
            return None;
        }
        let checks = self.deps.ports.check_ports(ports).await;
        first_failure(&checks).map(|c| InstallFailure::Precondition(c.detail.clone()))
    }

    async fn await_restart(&self) -> InstallOutcome {
        let d = &self.deps;
        if let Err(e) = d
            .resume
            .schedule_post_restart_resume(&self.options.resume_command)
            .await
        {
            return InstallOutcome::Failed(InstallFailure::Fatal(format!(
                "a restart is required but the resume marker could not be recorded: {:#}",
                e
            )));
        }

        if self.options.no_restart {
            info!("[PHASE: install] [STEP: restart] restart left to the operator (--no-restart)");
            return InstallOutcome::AwaitingRestart {
                restart_requested: false,
            };
        }

        let restart_requested = match d.resume.request_restart().await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "[PHASE: install] [STEP: restart] restart request failed; restart manually: {:#}",
                    e
                );
                false
            }
        };
        InstallOutcome::AwaitingRestart { restart_requested }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installation::preflight::{CheckStatus, PreflightCheck};
    use crate::security::secrets::SecretBundle;
    use crate::utils::os_detection::HostPlatform;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Shared, ordered record of collaborator calls.
    #[derive(Default)]
    struct Journal(Mutex<Vec<&'static str>>);

    impl Journal {
        fn push(&self, e: &'static str) {
            self.0.lock().unwrap().push(e);
        }
        fn events(&self) -> Vec<&'static str> {
            self.0.lock().unwrap().clone()
        }
        fn has(&self, e: &str) -> bool {
            self.events().iter().any(|x| *x == e)
        }
    }

    struct FakeProvisioner<'j> {
        j: &'j Journal,
        compat: ProvisionOutcome,
        runtime: ProvisionOutcome,
    }

    #[async_trait]
    impl RuntimeProvisioner for FakeProvisioner<'_> {
        async fn ensure_compat_layer(&self) -> ProvisionOutcome {
            self.j.push("ensure_compat_layer");
            self.compat.clone()
        }
        async fn ensure_runtime(&self) -> ProvisionOutcome {
            self.j.push("ensure_runtime");
            self.runtime.clone()
        }
        async fn compat_layer_present(&self) -> bool {
            self.compat == ProvisionOutcome::Ready
        }
    }

    struct FakeProbe(RuntimeStatus);

    #[async_trait]
    impl RuntimeProbe for FakeProbe {
        async fn probe(&self) -> RuntimeStatus {
            self.0
        }
    }

    #[derive(Default)]
    struct FakeResume {
        active: AtomicBool,
        scheduled: AtomicUsize,
        restarts: AtomicUsize,
    }

    impl FakeResume {
        fn with_marker() -> Self {
            let r = Self::default();
            r.active.store(true, Ordering::SeqCst);
            r
        }
    }

    #[async_trait]
    impl ResumeScheduler for FakeResume {
        async fn schedule_post_restart_resume(&self, command: &[String]) -> anyhow::Result<()> {
            assert!(!command.is_empty());
            self.active.store(true, Ordering::SeqCst);
            self.scheduled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn clear_scheduled_resume(&self) -> anyhow::Result<()> {
            self.active.store(false, Ordering::SeqCst);
            Ok(())
        }
        async fn has_scheduled_resume(&self) -> bool {
            self.active.load(Ordering::SeqCst)
        }
        async fn request_restart(&self) -> anyhow::Result<()> {
            self.restarts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeRepo<'j>(&'j Journal, RepoOutcome);

    #[async_trait]
    impl RepositorySource for FakeRepo<'_> {
        async fn ensure(&self, _target: &InstallationTarget) -> RepoOutcome {
            self.0.push("repository");
            self.1.clone()
        }
    }

    struct FakeEnv<'j> {
        j: &'j Journal,
        template_missing: bool,
    }

    impl EnvironmentSource for FakeEnv<'_> {
        fn ensure(&self, template: &Path, _target: &Path) -> Result<EnvOutcome, EnvError> {
            self.j.push("environment");
            if self.template_missing {
                return Err(EnvError::TemplateMissing(template.to_path_buf()));
            }
            Ok(EnvOutcome::Created(SecretBundle {
                postgres_user_secret: "a".into(),
                postgres_admin_secret: "b".into(),
                app_secret_key: "c".into(),
                app_salt: "d".into(),
                initial_admin_secret: "admin-once".into(),
            }))
        }
    }

    struct FakeStack<'j> {
        j: &'j Journal,
        pull_exit: i32,
        up_exit: i32,
        running: bool,
    }

    fn exit(code: i32) -> Result<CommandOutput, CommandError> {
        Ok(CommandOutput {
            exit_code: Some(code),
            ..Default::default()
        })
    }

    #[async_trait]
    impl StackOperations for FakeStack<'_> {
        async fn pull(&self) -> Result<CommandOutput, CommandError> {
            self.j.push("pull");
            exit(self.pull_exit)
        }
        async fn up(&self) -> Result<CommandOutput, CommandError> {
            self.j.push("up");
            exit(self.up_exit)
        }
        async fn down(&self) -> Result<CommandOutput, CommandError> {
            exit(0)
        }
        async fn ps(&self) -> Result<CommandOutput, CommandError> {
            exit(0)
        }
        async fn logs(&self, _service: &str, _follow: bool) -> Result<Option<i32>, CommandError> {
            Ok(Some(0))
        }
        async fn exec(
            &self,
            _service: &str,
            _command: &[String],
            _timeout: Duration,
        ) -> Result<CommandOutput, CommandError> {
            exit(0)
        }
        async fn is_running(&self) -> bool {
            self.running
        }
    }

    struct FakeReadiness<'j>(&'j Journal, Readiness);

    #[async_trait]
    impl ReadinessCheck for FakeReadiness<'_> {
        async fn wait_until_ready(&self, _url: &str, _t: Duration, _i: Duration) -> Readiness {
            self.0.push("readiness");
            self.1
        }
    }

    struct FakePorts(Vec<u16>);

    #[async_trait]
    impl PortPreflight for FakePorts {
        async fn check_ports(&self, ports: &[u16]) -> Vec<PreflightCheck> {
            ports
                .iter()
                .map(|p| PreflightCheck {
                    name: format!("Port {}", p),
                    status: if self.0.contains(p) {
                        CheckStatus::Fail
                    } else {
                        CheckStatus::Pass
                    },
                    detail: format!("port {} is already in use", p),
                })
                .collect()
        }
    }

    /// Knobs for one scenario; defaults describe a healthy host.
    struct Scenario {
        compat: ProvisionOutcome,
        runtime: ProvisionOutcome,
        probe: RuntimeStatus,
        marker: bool,
        repo: RepoOutcome,
        template_missing: bool,
        pull_exit: i32,
        up_exit: i32,
        running: bool,
        readiness: Readiness,
        busy_ports: Vec<u16>,
        options: InstallOptions,
    }

    impl Default for Scenario {
        fn default() -> Self {
            Self {
                compat: ProvisionOutcome::Ready,
                runtime: ProvisionOutcome::Ready,
                probe: RuntimeStatus::Ready,
                marker: false,
                repo: RepoOutcome::Cloned,
                template_missing: false,
                pull_exit: 0,
                up_exit: 0,
                running: false,
                readiness: Readiness::Ready,
                busy_ports: Vec::new(),
                options: InstallOptions {
                    resume_command: vec!["stack-installer".into(), "install".into()],
                    ..Default::default()
                },
            }
        }
    }

    struct Run {
        outcome: InstallOutcome,
        journal: Journal,
        resume: FakeResume,
    }

    async fn run(s: Scenario) -> Run {
        let journal = Journal::default();
        let resume = if s.marker {
            FakeResume::with_marker()
        } else {
            FakeResume::default()
        };
        let tmp = tempfile::tempdir().unwrap();
        let target = InstallationTarget::new(tmp.path(), "iris-web", "https://example.com/r.git");
        let cfg = InstallerConfig::defaults_for(HostPlatform::Linux);

        let outcome = {
            let provisioner = FakeProvisioner {
                j: &journal,
                compat: s.compat,
                runtime: s.runtime,
            };
            let probe = FakeProbe(s.probe);
            let repo = FakeRepo(&journal, s.repo);
            let env = FakeEnv {
                j: &journal,
                template_missing: s.template_missing,
            };
            let stack = FakeStack {
                j: &journal,
                pull_exit: s.pull_exit,
                up_exit: s.up_exit,
                running: s.running,
            };
            let readiness = FakeReadiness(&journal, s.readiness);
            let ports = FakePorts(s.busy_ports);
            let deps = Collaborators {
                provisioner: &provisioner,
                probe: &probe,
                resume: &resume,
                repository: &repo,
                environment: &env,
                stack: &stack,
                readiness: &readiness,
                ports: &ports,
            };
            ResumableInstallOrchestrator::new(deps, &target, &cfg, s.options)
                .run()
                .await
        };
        Run {
            outcome,
            journal,
            resume,
        }
    }

    #[tokio::test]
    async fn healthy_host_runs_every_step_in_order() {
        let r = run(Scenario::default()).await;
        assert_eq!(r.outcome.exit_code(), 0);
        assert_eq!(
            r.journal.events(),
            vec![
                "ensure_compat_layer",
                "ensure_runtime",
                "repository",
                "environment",
                "pull",
                "up",
                "readiness"
            ]
        );
        let InstallOutcome::Done(summary) = r.outcome else {
            panic!("expected Done");
        };
        assert!(summary.env_created);
        assert_eq!(summary.initial_admin_secret.as_deref(), Some("admin-once"));
        assert_eq!(summary.readiness, Readiness::Ready);
    }

    #[tokio::test]
    async fn compat_restart_halts_with_single_marker() {
        let r = run(Scenario {
            compat: ProvisionOutcome::RestartRequired,
            ..Default::default()
        })
        .await;
        assert_eq!(
            r.outcome,
            InstallOutcome::AwaitingRestart {
                restart_requested: true
            }
        );
        assert_eq!(r.outcome.exit_code(), 0);
        assert_eq!(r.resume.scheduled.load(Ordering::SeqCst), 1);
        assert_eq!(r.resume.restarts.load(Ordering::SeqCst), 1);
        assert!(!r.journal.has("repository"));
        assert!(!r.journal.has("ensure_runtime"));
    }

    #[tokio::test]
    async fn runtime_restart_without_reboot_request() {
        let r = run(Scenario {
            runtime: ProvisionOutcome::RestartRequired,
            options: InstallOptions {
                no_restart: true,
                resume_command: vec!["stack-installer".into(), "install".into()],
                ..Default::default()
            },
            ..Default::default()
        })
        .await;
        assert_eq!(
            r.outcome,
            InstallOutcome::AwaitingRestart {
                restart_requested: false
            }
        );
        assert_eq!(r.resume.scheduled.load(Ordering::SeqCst), 1);
        assert_eq!(r.resume.restarts.load(Ordering::SeqCst), 0);
        assert!(!r.journal.has("repository"));
    }

    #[tokio::test]
    async fn resume_revalidates_runtime_then_goes_to_repository() {
        let r = run(Scenario {
            marker: true,
            ..Default::default()
        })
        .await;
        assert_eq!(r.outcome.exit_code(), 0);
        let events = r.journal.events();
        assert!(!events.contains(&"ensure_compat_layer"));
        assert_eq!(&events[..2], &["ensure_runtime", "repository"]);
        // Marker consumed once the runtime answered.
        assert!(!r.resume.active.load(Ordering::SeqCst));
        assert_eq!(r.resume.scheduled.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failing_pull_stops_before_up_and_readiness() {
        let r = run(Scenario {
            pull_exit: 1,
            ..Default::default()
        })
        .await;
        assert_eq!(r.outcome.exit_code(), 1);
        assert!(matches!(
            r.outcome,
            InstallOutcome::Failed(InstallFailure::Fatal(_))
        ));
        assert!(r.journal.has("pull"));
        assert!(!r.journal.has("up"));
        assert!(!r.journal.has("readiness"));
    }

    #[tokio::test]
    async fn failing_up_skips_readiness() {
        let r = run(Scenario {
            up_exit: 1,
            ..Default::default()
        })
        .await;
        assert_eq!(r.outcome.exit_code(), 1);
        assert!(!r.journal.has("readiness"));
    }

    #[tokio::test]
    async fn readiness_timeout_is_done_with_warning() {
        let r = run(Scenario {
            readiness: Readiness::TimedOut,
            ..Default::default()
        })
        .await;
        assert_eq!(r.outcome.exit_code(), 0);
        assert!(matches!(
            r.outcome,
            InstallOutcome::Done(InstallSummary {
                readiness: Readiness::TimedOut,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn provisioning_failure_exits_nonzero() {
        let r = run(Scenario {
            runtime: ProvisionOutcome::Failed(InstallFailure::Precondition("not root".into())),
            ..Default::default()
        })
        .await;
        assert_eq!(r.outcome.exit_code(), 1);
        assert!(!r.journal.has("repository"));
        assert_eq!(r.resume.scheduled.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn clone_failure_is_fatal_to_the_run() {
        let r = run(Scenario {
            repo: RepoOutcome::Failed("network unreachable".into()),
            ..Default::default()
        })
        .await;
        assert!(matches!(
            r.outcome,
            InstallOutcome::Failed(InstallFailure::Transient(_))
        ));
        assert!(!r.journal.has("environment"));
    }

    #[tokio::test]
    async fn stale_pull_still_proceeds() {
        let r = run(Scenario {
            repo: RepoOutcome::UpdateSkipped("offline".into()),
            ..Default::default()
        })
        .await;
        assert_eq!(r.outcome.exit_code(), 0);
        assert!(r.journal.has("up"));
    }

    #[tokio::test]
    async fn missing_template_is_a_precondition() {
        let r = run(Scenario {
            template_missing: true,
            ..Default::default()
        })
        .await;
        assert!(matches!(
            r.outcome,
            InstallOutcome::Failed(InstallFailure::Precondition(_))
        ));
        assert!(!r.journal.has("pull"));
    }

    #[tokio::test]
    async fn occupied_port_fails_before_repository() {
        let r = run(Scenario {
            busy_ports: vec![443],
            ..Default::default()
        })
        .await;
        assert!(
            matches!(r.outcome, InstallOutcome::Failed(InstallFailure::Precondition(ref m)) if m.contains("443"))
        );
        assert!(!r.journal.has("repository"));
    }

    #[tokio::test]
    async fn skip_runtime_install_requires_a_ready_runtime() {
        let r = run(Scenario {
            probe: RuntimeStatus::ClientOnlyNotRunning,
            options: InstallOptions {
                skip_runtime_install: true,
                resume_command: vec!["stack-installer".into()],
                ..Default::default()
            },
            ..Default::default()
        })
        .await;
        assert!(matches!(
            r.outcome,
            InstallOutcome::Failed(InstallFailure::Precondition(_))
        ));
        assert!(!r.journal.has("ensure_runtime"));
        assert!(!r.journal.has("ensure_compat_layer"));
    }
}
