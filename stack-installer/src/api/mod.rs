// Command handlers
//
// One handler per CLI subcommand. Handlers wire the host implementations of the installer's
// collaborators and return the process exit code; `Err` is reported by the caller as exit 1.

pub mod installer;
pub mod maintenance;
pub mod stack;

use anyhow::Result;

use crate::config::InstallerConfig;
use crate::installation::environment::EnvironmentSource;
use crate::installation::preflight::LocalPortProbe;
use crate::installation::privilege::HostPrivilegeCheck;
use crate::installation::provisioner::RuntimeProvisioner;
use crate::installation::readiness::ReadinessProbe;
use crate::installation::repository::RepositoryMaterializer;
use crate::installation::resume::{host_resume_scheduler, ResumeScheduler};
use crate::installation::runtime::RuntimeAvailabilityChecker;
use crate::installation::stack::StackController;
use crate::installation::CommandRunner;
use crate::models::target::InstallationTarget;
use crate::orchestrator::Collaborators;
use crate::security::secrets::SystemSecretSource;

/// Effective configuration plus the resolved target for one invocation.
pub struct AppContext<'a> {
    pub cfg: InstallerConfig,
    pub target: InstallationTarget,
    pub runner: &'a dyn CommandRunner,
}

impl<'a> AppContext<'a> {
    pub fn new(cfg: InstallerConfig, runner: &'a dyn CommandRunner) -> Self {
        let target = InstallationTarget::from_config(&cfg);
        Self {
            cfg,
            target,
            runner,
        }
    }

    pub fn stack(&self) -> StackController<'_> {
        StackController::new(
            self.runner,
            &self.cfg.binaries,
            &self.cfg.stack,
            self.target.root(),
        )
    }

    /// Stack commands need an existing checkout to run in.
    pub fn require_checkout(&self) -> Result<()> {
        if !self.target.root().is_dir() {
            anyhow::bail!(
                "no installation found at {:?}; run `install` first or pass --target-parent/--folder-name",
                self.target.root()
            );
        }
        Ok(())
    }
}

/// Host implementations of the collaborators that do not borrow each other.
pub struct HostServices<'a> {
    pub probe: RuntimeAvailabilityChecker<'a>,
    pub privilege: HostPrivilegeCheck<'a>,
    pub resume: Box<dyn ResumeScheduler + 'a>,
    pub repository: RepositoryMaterializer<'a>,
    pub secrets: SystemSecretSource,
    pub stack: StackController<'a>,
    pub readiness: ReadinessProbe,
    pub ports: LocalPortProbe,
}

impl<'a> HostServices<'a> {
    pub fn new(ctx: &'a AppContext<'_>) -> Result<Self> {
        Ok(Self {
            probe: RuntimeAvailabilityChecker::new(ctx.runner, ctx.cfg.binaries.docker.clone()),
            privilege: HostPrivilegeCheck::new(ctx.runner),
            resume: host_resume_scheduler(
                ctx.runner,
                &ctx.cfg.resume,
                &ctx.target.parent_directory,
            ),
            repository: RepositoryMaterializer::new(ctx.runner, ctx.cfg.binaries.git.clone()),
            secrets: SystemSecretSource::new(),
            stack: ctx.stack(),
            readiness: ReadinessProbe::new(&ctx.cfg.readiness)?,
            ports: LocalPortProbe::default(),
        })
    }

    pub fn collaborators<'b>(
        &'b self,
        provisioner: &'b dyn RuntimeProvisioner,
        environment: &'b dyn EnvironmentSource,
    ) -> Collaborators<'b> {
        Collaborators {
            provisioner,
            probe: &self.probe,
            resume: self.resume.as_ref(),
            repository: &self.repository,
            environment,
            stack: &self.stack,
            readiness: &self.readiness,
            ports: &self.ports,
        }
    }
}
