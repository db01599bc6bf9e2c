// Install command
//
// Wires the host collaborators into the orchestrator and reports the outcome to the operator.
// The initial admin secret is printed here exactly once, on the run that created `.env`.

use anyhow::Result;
use log::{info, warn};
use uuid::Uuid;

use crate::api::{AppContext, HostServices};
use crate::config::InstallerConfig;
use crate::installation::environment::EnvironmentMaterializer;
use crate::installation::provisioner::RuntimeInstaller;
use crate::installation::readiness::Readiness;
use crate::installation::repository::RepoOutcome;
use crate::models::outcome::{InstallFailure, InstallOutcome, InstallSummary};
use crate::models::target::InstallationTarget;
use crate::orchestrator::{InstallOptions, ResumableInstallOrchestrator};

pub async fn install(ctx: &AppContext<'_>, options: InstallOptions) -> Result<i32> {
    let run_id = Uuid::new_v4();
    info!(
        "[PHASE: install] [STEP: start] install requested (run_id={}, target={:?}, remote={}, skip_runtime_install={}, no_restart={})",
        run_id,
        ctx.target.root(),
        ctx.target.remote_url,
        options.skip_runtime_install,
        options.no_restart
    );

    let services = HostServices::new(ctx)?;
    let provisioner = RuntimeInstaller::new(
        ctx.runner,
        &services.probe,
        &services.privilege,
        &ctx.cfg.runtime,
    );
    let environment = EnvironmentMaterializer::from_config(
        &services.secrets,
        &ctx.cfg.environment,
        ctx.target.root(),
    );
    let deps = services.collaborators(&provisioner, &environment);

    let outcome = ResumableInstallOrchestrator::new(deps, &ctx.target, &ctx.cfg, options)
        .run()
        .await;

    match serde_json::to_string(&outcome) {
        Ok(json) => info!("[PHASE: install] [STEP: outcome] run_id={} {}", run_id, json),
        Err(e) => warn!("[PHASE: install] [STEP: outcome] outcome not serializable: {}", e),
    }

    let report = render_outcome(&outcome, &ctx.target, &ctx.cfg);
    match outcome {
        InstallOutcome::Failed(_) => eprintln!("{}", report),
        _ => println!("{}", report),
    }
    Ok(outcome.exit_code())
}

fn describe_repository(repo: &RepoOutcome) -> String {
    match repo {
        RepoOutcome::Cloned => "cloned".to_string(),
        RepoOutcome::UpdatedInPlace => "updated in place".to_string(),
        RepoOutcome::UpdateSkipped(reason) => format!("existing checkout kept (update skipped: {})", reason),
        RepoOutcome::Failed(reason) => format!("failed: {}", reason),
    }
}

fn render_summary(s: &InstallSummary, target: &InstallationTarget, cfg: &InstallerConfig) -> String {
    let mut lines = vec![
        "Installation complete.".to_string(),
        format!("  Target:      {}", s.target_root),
        format!("  Repository:  {}", describe_repository(&s.repository)),
    ];
    if let Some(name) = &s.server_name {
        lines.push(format!("  Server name: {}", name));
    }
    lines.push(match s.readiness {
        Readiness::Ready => format!("  Web UI:      {} (responding)", s.probe_url),
        Readiness::TimedOut => format!(
            "  Web UI:      {} (not responding yet; the stack is up, check `stack-installer logs`)",
            s.probe_url
        ),
    });

    match &s.initial_admin_secret {
        Some(secret) => {
            lines.push(String::new());
            lines.push(format!("  Initial administrator password: {}", secret));
            lines.push("  It is shown only once. Store it now.".to_string());
            if let Some(file) = &cfg.environment.admin_secret_file {
                lines.push(format!("  A copy was written to {}", target.join(file).display()));
            }
        }
        None if !s.env_created => {
            lines.push(format!(
                "  Environment: existing {} kept; credentials unchanged",
                cfg.environment.env_file
            ));
        }
        None => {}
    }
    lines.join("\n")
}

fn failure_hint(f: &InstallFailure) -> &'static str {
    match f {
        InstallFailure::Precondition(_) => "Fix the condition above and run the installer again.",
        InstallFailure::Transient(_) => {
            "This may be temporary. Running the installer again resumes where it stopped."
        }
        InstallFailure::Fatal(_) => "See the installer log for the full command output.",
    }
}

/// Operator-facing text for an outcome.
pub fn render_outcome(outcome: &InstallOutcome, target: &InstallationTarget, cfg: &InstallerConfig) -> String {
    match outcome {
        InstallOutcome::Done(s) => render_summary(s, target, cfg),
        InstallOutcome::AwaitingRestart { restart_requested: true } => {
            "A restart is required to finish provisioning the container runtime.\n\
             The host is restarting; installation resumes automatically afterwards."
                .to_string()
        }
        InstallOutcome::AwaitingRestart { restart_requested: false } => {
            "A restart is required to finish provisioning the container runtime.\n\
             Restart the host when convenient; installation resumes automatically afterwards."
                .to_string()
        }
        InstallOutcome::Failed(f) => format!("Installation failed: {}\n{}", f, failure_hint(f)),
    }
}
