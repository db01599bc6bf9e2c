//! Command-line surface.
//!
//! Global flags override the layered configuration; see [`Cli::apply_overrides`].

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::config::InstallerConfig;
use crate::models::target::InstallationTarget;

/// Idempotent installer for a containerized application stack.
///
/// Run one instance per target directory at a time: concurrent runs against the same
/// target are not locked against each other.
#[derive(Parser, Debug)]
#[command(name = "stack-installer", version)]
#[command(about = "Install and operate a containerized application stack", long_about)]
pub struct Cli {
    /// Configuration file (TOML). Defaults to ./stack-installer.toml when present.
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory for the installer's own log files.
    #[arg(long, global = true, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    /// Print debug-level logs to the terminal.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Parent directory of the checkout (default: home directory).
    #[arg(long, global = true, value_name = "DIR")]
    pub target_parent: Option<PathBuf>,

    /// Name of the checkout directory under the parent.
    #[arg(long, global = true, value_name = "NAME")]
    pub folder_name: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Provision the host and bring the stack up.
    ///
    /// Safe to re-run: completed steps are detected and skipped. When a restart is
    /// required, a resume entry is registered and the installer continues after it.
    Install {
        /// Remote to clone.
        #[arg(long, value_name = "URL")]
        repo_url: Option<String>,

        /// Never install the runtime or compatibility layer; fail if they are not ready.
        #[arg(long)]
        skip_runtime_install: bool,

        /// Register the resume entry but do not restart the host automatically.
        #[arg(long)]
        no_restart: bool,
    },

    /// Start the stack (`up -d`).
    Start,

    /// Stop the stack (`down`).
    Stop,

    /// Stop then start the stack.
    Restart,

    /// Show the installation state and the stack's containers.
    Status,

    /// Show logs for one service.
    Logs {
        /// Service name (default from configuration, usually `app`).
        service: Option<String>,

        /// Keep streaming until interrupted.
        #[arg(short, long)]
        follow: bool,
    },

    /// Dump the database into the backup directory.
    Backup,

    /// Copy the add-on module into a checkout and mount it in the deployment manifest.
    #[command(name = "patch-module")]
    PatchModule {
        /// Root of the checkout to patch.
        target_root: PathBuf,

        /// Module directory to deploy (overrides configuration).
        #[arg(long, value_name = "DIR")]
        module_source: Option<PathBuf>,
    },

    /// Print the effective configuration as TOML.
    Config,
}

fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()
        .context("Failed to resolve working directory")?
        .join(path))
}

impl Cli {
    /// Apply CLI flags on top of the loaded configuration (highest precedence).
    pub fn apply_overrides(&self, cfg: &mut InstallerConfig) -> Result<()> {
        if let Some(dir) = &self.log_dir {
            cfg.log_dir = Some(dir.clone());
        }
        if let Some(parent) = &self.target_parent {
            cfg.target.parent_directory = Some(absolutize(parent)?);
        }
        if let Some(name) = &self.folder_name {
            cfg.target.folder_name = name.clone();
        }
        match &self.command {
            Commands::Install {
                repo_url: Some(url),
                ..
            } => cfg.target.remote_url = url.clone(),
            Commands::PatchModule {
                module_source: Some(src),
                ..
            } => cfg.patch.module_source = absolutize(src)?,
            _ => {}
        }
        cfg.validate()
    }

    /// argv that re-runs this install after a restart.
    ///
    /// Paths are absolute and the target is pinned, so the resumed run resolves the same
    /// installation regardless of its working directory or user profile.
    pub fn resume_command(&self, exe: &Path, target: &InstallationTarget) -> Result<Vec<String>> {
        let mut argv = vec![exe.display().to_string()];
        if let Some(cfg) = &self.config {
            argv.push("--config".to_string());
            argv.push(absolutize(cfg)?.display().to_string());
        }
        if let Some(dir) = &self.log_dir {
            argv.push("--log-dir".to_string());
            argv.push(absolutize(dir)?.display().to_string());
        }
        argv.push("--target-parent".to_string());
        argv.push(target.parent_directory.display().to_string());
        argv.push("--folder-name".to_string());
        argv.push(target.folder_name.clone());
        argv.push("install".to_string());
        argv.push("--repo-url".to_string());
        argv.push(target.remote_url.clone());
        if let Commands::Install {
            skip_runtime_install,
            no_restart,
            ..
        } = &self.command
        {
            if *skip_runtime_install {
                argv.push("--skip-runtime-install".to_string());
            }
            if *no_restart {
                argv.push("--no-restart".to_string());
            }
        }
        Ok(argv)
    }
}
