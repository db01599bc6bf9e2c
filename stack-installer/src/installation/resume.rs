// Resume-after-restart markers
//
// When the host must restart mid-install, we register an OS-level "run this again" entry
// and pick up from the runtime check on the next run:
// - Windows: a scheduled task triggered at logon, elevated.
// - Linux: a systemd oneshot unit enabled for multi-user.target.
//
// At most one marker exists per installation; scheduling always clears the previous one.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use tokio::time::Duration;

use crate::config::ResumeConfig;
use crate::installation::{CommandRunner, CommandSpec};

#[async_trait]
pub trait ResumeScheduler: Send + Sync {
    /// Register `command` (argv) to run after the next restart/login.
    async fn schedule_post_restart_resume(&self, command: &[String]) -> Result<()>;
    async fn clear_scheduled_resume(&self) -> Result<()>;
    async fn has_scheduled_resume(&self) -> bool;
    async fn request_restart(&self) -> Result<()>;
}

/// Pick the host's marker implementation.
/// `working_dir` is where the resumed run starts; the task scheduler keeps the
/// caller's directory on its own.
pub fn host_resume_scheduler<'a>(
    runner: &'a dyn CommandRunner,
    cfg: &ResumeConfig,
    working_dir: &Path,
) -> Box<dyn ResumeScheduler + 'a> {
    if cfg!(windows) {
        Box::new(ScheduledTaskResume::new(runner, cfg))
    } else {
        Box::new(SystemdResume::new(runner, cfg, working_dir))
    }
}

async fn run_checked(runner: &dyn CommandRunner, spec: CommandSpec) -> Result<()> {
    let out = runner
        .run(&spec)
        .await
        .with_context(|| format!("{} could not run", spec.program))?;
    if !out.success() {
        anyhow::bail!(
            "{} {} failed (exit_code={:?}): {}",
            spec.program,
            spec.args.first().map(String::as_str).unwrap_or_default(),
            out.exit_code,
            out.diagnostic()
        );
    }
    Ok(())
}

// ============================================================================
// Windows: scheduled task
// ============================================================================

pub struct ScheduledTaskResume<'a> {
    runner: &'a dyn CommandRunner,
    task_name: String,
    restart_delay_secs: u64,
}

impl<'a> ScheduledTaskResume<'a> {
    pub fn new(runner: &'a dyn CommandRunner, cfg: &ResumeConfig) -> Self {
        Self {
            runner,
            task_name: cfg.task_name.clone(),
            restart_delay_secs: cfg.restart_delay_secs,
        }
    }

    fn schtasks(&self, operation: &str) -> CommandSpec {
        CommandSpec::new("schtasks", operation).timeout(Duration::from_secs(30))
    }
}

/// Quote one argument for a Windows command line.
fn quote_windows_arg(arg: &str) -> String {
    if arg.is_empty() || arg.contains(' ') || arg.contains('\t') || arg.contains('"') {
        format!("\"{}\"", arg.replace('"', "\\\""))
    } else {
        arg.to_string()
    }
}

pub fn windows_command_line(argv: &[String]) -> String {
    argv.iter()
        .map(|a| quote_windows_arg(a))
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl ResumeScheduler for ScheduledTaskResume<'_> {
    async fn schedule_post_restart_resume(&self, command: &[String]) -> Result<()> {
        if command.is_empty() {
            anyhow::bail!("Resume command cannot be empty");
        }
        self.clear_scheduled_resume().await?;

        let spec = self.schtasks("schtasks_create").args([
            "/Create".to_string(),
            "/TN".to_string(),
            self.task_name.clone(),
            "/TR".to_string(),
            windows_command_line(command),
            "/SC".to_string(),
            "ONLOGON".to_string(),
            "/RL".to_string(),
            "HIGHEST".to_string(),
            "/F".to_string(),
        ]);
        run_checked(self.runner, spec).await?;
        info!(
            "[PHASE: install] [STEP: resume] scheduled task registered (task={})",
            self.task_name
        );
        Ok(())
    }

    async fn clear_scheduled_resume(&self) -> Result<()> {
        if !self.has_scheduled_resume().await {
            debug!("[PHASE: install] [STEP: resume] no scheduled task to clear");
            return Ok(());
        }
        let spec = self
            .schtasks("schtasks_delete")
            .args(["/Delete", "/TN", self.task_name.as_str(), "/F"]);
        run_checked(self.runner, spec).await?;
        info!(
            "[PHASE: install] [STEP: resume] scheduled task removed (task={})",
            self.task_name
        );
        Ok(())
    }

    async fn has_scheduled_resume(&self) -> bool {
        let spec = self
            .schtasks("schtasks_query")
            .args(["/Query", "/TN", self.task_name.as_str()]);
        matches!(self.runner.run(&spec).await, Ok(out) if out.success())
    }

    async fn request_restart(&self) -> Result<()> {
        let spec = CommandSpec::new("shutdown", "restart").args([
            "/r".to_string(),
            "/t".to_string(),
            self.restart_delay_secs.to_string(),
        ]);
        run_checked(self.runner, spec).await
    }
}

// ============================================================================
// Linux: systemd oneshot unit
// ============================================================================

/// Quote a value for a systemd unit file if it contains spaces or quotes.
fn quote_systemd_arg(arg: &str) -> String {
    if arg.contains(' ') || arg.contains('\t') || arg.contains('"') {
        format!("\"{}\"", arg.replace('"', "\\\""))
    } else {
        arg.to_string()
    }
}

/// Text of the oneshot unit that re-runs the installer once at boot.
pub fn build_resume_unit_text(unit_stem: &str, command: &[String], working_dir: &Path) -> String {
    let exec = command
        .iter()
        .map(|a| quote_systemd_arg(a))
        .collect::<Vec<_>>()
        .join(" ");
    let work = quote_systemd_arg(&working_dir.to_string_lossy());

    format!(
        r#"[Unit]
Description=Resume stack installation ({unit_stem})
Wants=network-online.target
After=network-online.target

[Service]
Type=oneshot
WorkingDirectory={work}
ExecStart={exec}
RemainAfterExit=no

[Install]
WantedBy=multi-user.target
"#
    )
}

pub struct SystemdResume<'a> {
    runner: &'a dyn CommandRunner,
    unit_dir: PathBuf,
    unit_stem: String,
    working_dir: PathBuf,
    restart_delay_secs: u64,
}

impl<'a> SystemdResume<'a> {
    pub fn new(runner: &'a dyn CommandRunner, cfg: &ResumeConfig, working_dir: &Path) -> Self {
        Self {
            runner,
            unit_dir: cfg.systemd_unit_dir.clone(),
            unit_stem: cfg.task_name.to_ascii_lowercase(),
            working_dir: working_dir.to_path_buf(),
            restart_delay_secs: cfg.restart_delay_secs,
        }
    }

    async fn reload_and_enable(&self, unit: &str) -> Result<()> {
        run_checked(self.runner, self.systemctl(&["daemon-reload"], "daemon_reload")).await?;
        run_checked(self.runner, self.systemctl(&["enable", unit], "enable")).await
    }

    fn unit_name(&self) -> String {
        format!("{}.service", self.unit_stem)
    }

    fn unit_path(&self) -> PathBuf {
        self.unit_dir.join(self.unit_name())
    }

    fn systemctl(&self, args: &[&str], operation: &str) -> CommandSpec {
        CommandSpec::new("systemctl", operation)
            .args(args.iter().copied())
            .timeout(Duration::from_secs(30))
    }
}

#[async_trait]
impl ResumeScheduler for SystemdResume<'_> {
    async fn schedule_post_restart_resume(&self, command: &[String]) -> Result<()> {
        if command.is_empty() {
            anyhow::bail!("Resume command cannot be empty");
        }
        self.clear_scheduled_resume().await?;

        let text = build_resume_unit_text(&self.unit_stem, command, &self.working_dir);
        let path = self.unit_path();
        tokio::fs::create_dir_all(&self.unit_dir)
            .await
            .with_context(|| format!("Failed to create unit directory {:?}", self.unit_dir))?;
        tokio::fs::write(&path, text)
            .await
            .with_context(|| format!("Failed to write resume unit {:?}", path))?;

        let unit = self.unit_name();
        if let Err(e) = self.reload_and_enable(&unit).await {
            // A unit that systemd never enabled must not read as a pending resume.
            if let Err(rm) = tokio::fs::remove_file(&path).await {
                warn!(
                    "[PHASE: install] [STEP: resume] could not remove unenabled unit {:?}: {}",
                    path, rm
                );
            }
            return Err(e);
        }
        info!(
            "[PHASE: install] [STEP: resume] resume unit enabled (unit={}, path={:?})",
            unit, path
        );
        Ok(())
    }

    async fn clear_scheduled_resume(&self) -> Result<()> {
        let path = self.unit_path();
        if !path.exists() {
            debug!("[PHASE: install] [STEP: resume] no resume unit to clear");
            return Ok(());
        }
        let unit = self.unit_name();
        if let Err(e) = run_checked(self.runner, self.systemctl(&["disable", unit.as_str()], "disable")).await
        {
            warn!(
                "[PHASE: install] [STEP: resume] disabling {} failed; removing the unit anyway: {}",
                unit, e
            );
        }
        tokio::fs::remove_file(&path)
            .await
            .with_context(|| format!("Failed to remove resume unit {:?}", path))?;
        if let Err(e) =
            run_checked(self.runner, self.systemctl(&["daemon-reload"], "daemon_reload")).await
        {
            warn!("[PHASE: install] [STEP: resume] daemon-reload failed: {}", e);
        }
        info!("[PHASE: install] [STEP: resume] resume unit removed (unit={})", unit);
        Ok(())
    }

    async fn has_scheduled_resume(&self) -> bool {
        self.unit_path().exists()
    }

    async fn request_restart(&self) -> Result<()> {
        info!(
            "[PHASE: install] [STEP: restart] rebooting in {}s",
            self.restart_delay_secs
        );
        tokio::time::sleep(Duration::from_secs(self.restart_delay_secs)).await;
        run_checked(self.runner, self.systemctl(&["reboot"], "reboot")).await
    }
}
