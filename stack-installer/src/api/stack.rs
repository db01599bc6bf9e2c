// Stack lifecycle commands
//
// Thin wrappers over the compose controller. A non-zero compose exit is reported with its
// output and mapped to exit code 1; the stack's state is never altered beyond the command.

use anyhow::{Context, Result};
use log::{error, info};

use crate::api::{AppContext, HostServices};
use crate::installation::environment::EnvironmentMaterializer;
use crate::installation::provisioner::RuntimeInstaller;
use crate::installation::stack::{parse_compose_ps_output, StackOperations};
use crate::installation::{CommandError, CommandOutput};
use crate::orchestrator::inspect_state;

/// Print a captured compose result; `Ok(0)` on success, `Ok(1)` on a non-zero exit.
fn report(what: &str, res: Result<CommandOutput, CommandError>) -> Result<i32> {
    let out = res.with_context(|| format!("{} could not run", what))?;
    if out.success() {
        info!("[PHASE: stack] [STEP: {}] ok (duration_ms={})", what, out.duration_ms);
        if !out.stdout.trim().is_empty() {
            println!("{}", out.stdout.trim_end());
        }
        return Ok(0);
    }
    error!(
        "[PHASE: stack] [STEP: {}] failed (exit_code={:?})",
        what, out.exit_code
    );
    eprintln!(
        "{} failed (exit code {:?}):\n{}",
        what,
        out.exit_code,
        out.diagnostic()
    );
    Ok(1)
}

pub async fn start(ctx: &AppContext<'_>) -> Result<i32> {
    ctx.require_checkout()?;
    report("start", ctx.stack().up().await)
}

pub async fn stop(ctx: &AppContext<'_>) -> Result<i32> {
    ctx.require_checkout()?;
    report("stop", ctx.stack().down().await)
}

/// `down` then `up -d`; the start is not attempted when the stop failed.
pub async fn restart(ctx: &AppContext<'_>) -> Result<i32> {
    ctx.require_checkout()?;
    let stack = ctx.stack();
    let code = report("stop", stack.down().await)?;
    if code != 0 {
        return Ok(code);
    }
    report("start", stack.up().await)
}

pub async fn status(ctx: &AppContext<'_>) -> Result<i32> {
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

    let state = inspect_state(&deps, &ctx.target, &ctx.cfg).await;
    println!("Target: {}", ctx.target.root().display());
    println!("{}", state.render());

    if !state.repo_present || !state.runtime_daemon_ready {
        return Ok(0);
    }

    let out = services
        .stack
        .ps()
        .await
        .context("status could not run")?;
    if !out.success() {
        return report("status", Ok(out));
    }
    let parsed = parse_compose_ps_output(&out.stdout);
    info!(
        "[PHASE: stack] [STEP: status] containers={} all_running={}",
        parsed.container_count, parsed.all_running
    );
    println!();
    println!("{}", out.stdout.trim_end());
    Ok(0)
}

/// Stream or tail one service's logs with the terminal attached.
pub async fn logs(ctx: &AppContext<'_>, service: Option<&str>, follow: bool) -> Result<i32> {
    ctx.require_checkout()?;
    let service = service.unwrap_or(ctx.cfg.stack.default_log_service.as_str());
    crate::utils::validation::validate_service_name(service)?;

    let code = ctx
        .stack()
        .logs(service, follow)
        .await
        .context("logs could not run")?;
    match code {
        Some(0) => Ok(0),
        // Interrupted follow (Ctrl+C) reports no exit code.
        None if follow => Ok(0),
        other => {
            error!("[PHASE: stack] [STEP: logs] failed (exit_code={:?})", other);
            Ok(1)
        }
    }
}
