// Database backup
//
// Runs the dump command inside the database service and stores its stdout as
// `backup-<timestamp>.sql`. The file only appears under its final name once the dump
// succeeded.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use log::{error, info};
use std::path::{Path, PathBuf};
use tokio::time::Duration;

use crate::config::BackupConfig;
use crate::installation::files::write_atomically;
use crate::installation::stack::StackOperations;

pub fn backup_file_name(now: DateTime<Local>) -> String {
    format!("backup-{}.sql", now.format("%Y%m%d-%H%M%S"))
}

/// `cfg.dir` when set, else `<target_root>/backups`.
pub fn resolve_backup_dir(cfg: &BackupConfig, target_root: &Path) -> PathBuf {
    cfg.dir
        .clone()
        .unwrap_or_else(|| target_root.join("backups"))
}

pub async fn run_backup(
    stack: &dyn StackOperations,
    cfg: &BackupConfig,
    backup_dir: &Path,
    now: DateTime<Local>,
) -> Result<PathBuf> {
    let path = backup_dir.join(backup_file_name(now));
    info!(
        "[PHASE: backup] [STEP: dump] starting (service={}, dest={:?})",
        cfg.service, path
    );

    let out = stack
        .exec(
            &cfg.service,
            &cfg.command,
            Duration::from_secs(cfg.timeout_secs),
        )
        .await
        .context("Backup command could not run")?;

    if !out.success() {
        error!(
            "[PHASE: backup] [STEP: dump] dump failed (exit_code={:?})",
            out.exit_code
        );
        anyhow::bail!(
            "backup command failed (exit code {:?}): {}",
            out.exit_code,
            out.diagnostic()
        );
    }
    if out.stdout_bytes.iter().all(u8::is_ascii_whitespace) {
        anyhow::bail!("backup command produced no output");
    }

    tokio::fs::create_dir_all(backup_dir)
        .await
        .with_context(|| format!("Failed to create backup directory {:?}", backup_dir))?;
    write_atomically(&path, &out.stdout_bytes).await?;

    info!(
        "[PHASE: backup] [STEP: dump] written (bytes={}, path={:?}, duration_ms={})",
        out.stdout_bytes.len(),
        path,
        out.duration_ms
    );
    Ok(path)
}
