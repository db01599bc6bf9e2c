// Maintenance commands: database backup, module patching, effective configuration.

use anyhow::Result;
use log::info;
use std::path::Path;

use crate::api::AppContext;
use crate::config::InstallerConfig;
use crate::installation::backup::{resolve_backup_dir, run_backup};
use crate::installation::patch::patch_module as apply_patch;

pub async fn backup(ctx: &AppContext<'_>) -> Result<i32> {
    ctx.require_checkout()?;
    let dir = resolve_backup_dir(&ctx.cfg.backup, ctx.target.root());
    let path = run_backup(&ctx.stack(), &ctx.cfg.backup, &dir, chrono::Local::now()).await?;
    println!("Backup written to {}", path.display());
    Ok(0)
}

pub async fn patch_module(ctx: &AppContext<'_>, target_root: &Path) -> Result<i32> {
    let report = apply_patch(target_root, &ctx.cfg.patch).await?;
    info!(
        "[PHASE: patch] [STEP: done] files_copied={} lines_inserted={}",
        report.files_copied, report.lines_inserted
    );
    println!(
        "Module deployed to {} ({} file(s) copied).",
        target_root.join(&ctx.cfg.patch.destination).display(),
        report.files_copied
    );
    if report.lines_inserted == 0 {
        println!("{} already mounts the module; left unchanged.", ctx.cfg.patch.manifest);
    } else {
        println!(
            "{}: {} line(s) added. Restart the stack to apply.",
            ctx.cfg.patch.manifest, report.lines_inserted
        );
    }
    Ok(0)
}

/// Print the effective configuration (defaults, file, environment and flags merged).
pub fn show_config(cfg: &InstallerConfig) -> Result<i32> {
    print!("{}", cfg.to_toml()?);
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installation::testing::{FakeRunner, Scripted};
    use crate::utils::os_detection::HostPlatform;

    #[tokio::test]
    async fn backup_writes_into_default_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = InstallerConfig::defaults_for(HostPlatform::Linux);
        cfg.target.parent_directory = Some(tmp.path().to_path_buf());
        let runner = FakeRunner::new().on("exec -T", Scripted::Exit(0, "-- dump\n"));
        let ctx = AppContext::new(cfg, &runner);
        std::fs::create_dir_all(ctx.target.root()).unwrap();

        assert_eq!(backup(&ctx).await.unwrap(), 0);
        let written: Vec<_> = std::fs::read_dir(ctx.target.join("backups"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(written.len(), 1);
        assert!(written[0].starts_with("backup-") && written[0].ends_with(".sql"));
    }

    #[tokio::test]
    async fn backup_failure_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = InstallerConfig::defaults_for(HostPlatform::Linux);
        cfg.target.parent_directory = Some(tmp.path().to_path_buf());
        let runner = FakeRunner::new().on("exec -T", Scripted::Exit(2, ""));
        let ctx = AppContext::new(cfg, &runner);
        std::fs::create_dir_all(ctx.target.root()).unwrap();

        assert!(backup(&ctx).await.is_err());
        assert!(!ctx.target.join("backups").exists());
    }

    #[tokio::test]
    async fn patch_module_rejects_missing_root() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new();
        let ctx = AppContext::new(InstallerConfig::defaults_for(HostPlatform::Linux), &runner);
        assert!(patch_module(&ctx, &tmp.path().join("absent")).await.is_err());
    }
}
