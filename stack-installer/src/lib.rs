// Stack installer
// Main library entry point

pub mod api;
pub mod cli;
pub mod config;
pub mod installation;
pub mod models;
pub mod orchestrator;
pub mod security;
pub mod utils;

use anyhow::{Context, Result};
use log::{error, info};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::api::AppContext;
use crate::cli::{Cli, Commands};
use crate::config::InstallerConfig;
use crate::installation::SystemCommandRunner;
use crate::orchestrator::InstallOptions;

/// Initialize logging with dual file formats (JSON + human-readable) and an optional
/// terminal sink. Returns the log directory.
pub fn init_logging(log_dir: Option<&Path>, with_stdout: bool, verbose: bool) -> Result<PathBuf> {
    let log_dir = utils::path_resolver::resolve_log_folder(log_dir)?;
    let timestamp = chrono::Utc::now().format("%Y-%m-%d-%H%M%S");

    // JSON log file for structured parsing
    let json_log_file = log_dir.join(format!("stack-installer-{}.log", timestamp));
    // Human-readable log file (.txt)
    let txt_log_file = log_dir.join(format!("stack-installer-{}.txt", timestamp));

    let mut dispatch = fern::Dispatch::new()
        .level(log::LevelFilter::Debug)
        .level_for("hyper_util", log::LevelFilter::Warn)
        .level_for("reqwest", log::LevelFilter::Info);

    // Terminal output is disabled for commands whose stdout is machine-readable.
    if with_stdout {
        let terminal_level = if verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        };
        dispatch = dispatch.chain(
            fern::Dispatch::new()
                .level(terminal_level)
                .format(move |out, message, record| {
                    let timestamp_local = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
                    let message_str = format!("{}", message);
                    let (phase, step, cleaned_message) =
                        utils::logging::parse_log_metadata(&message_str);
                    let txt_line = utils::logging::format_human_readable_log(
                        &timestamp_local.to_string(),
                        record.level(),
                        record.target(),
                        &cleaned_message,
                        phase.as_deref(),
                        step.as_deref(),
                    );
                    out.finish(format_args!("{}", txt_line));
                })
                .chain(std::io::stdout()),
        );
    }

    dispatch = dispatch
        .chain(
            fern::Dispatch::new()
                .format(move |out, message, record| {
                    let timestamp_utc = chrono::Utc::now().to_rfc3339();
                    let message_str = format!("{}", message);
                    let (phase, step, cleaned_message) =
                        utils::logging::parse_log_metadata(&message_str);
                    let json_line = utils::logging::format_json_log(
                        &timestamp_utc,
                        record.level(),
                        record.target(),
                        &cleaned_message,
                        phase.as_deref(),
                        step.as_deref(),
                    );
                    out.finish(format_args!("{}\n", json_line));
                })
                .chain(
                    fern::log_file(&json_log_file)
                        .with_context(|| format!("Failed to open {:?}", json_log_file))?,
                ),
        )
        .chain(
            fern::Dispatch::new()
                .format(move |out, message, record| {
                    let timestamp_local = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
                    let message_str = format!("{}", message);
                    let (phase, step, cleaned_message) =
                        utils::logging::parse_log_metadata(&message_str);
                    let txt_line = utils::logging::format_human_readable_log(
                        &timestamp_local.to_string(),
                        record.level(),
                        record.target(),
                        &cleaned_message,
                        phase.as_deref(),
                        step.as_deref(),
                    );
                    out.finish(format_args!("{}\n", txt_line));
                })
                .chain(
                    fern::log_file(&txt_log_file)
                        .with_context(|| format!("Failed to open {:?}", txt_log_file))?,
                ),
        );

    dispatch.apply().context("A logger is already installed")?;

    info!(
        "[PHASE: initialization] Logging initialized, log directory: {:?}",
        log_dir
    );
    Ok(log_dir)
}

/// Run one CLI invocation and return the process exit code.
pub async fn run(cli: Cli) -> i32 {
    match run_command(&cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("[PHASE: cli] [STEP: exit] command failed: {:#}", e);
            eprintln!("error: {:#}", e);
            1
        }
    }
}

async fn run_command(cli: &Cli) -> Result<i32> {
    let mut cfg = InstallerConfig::load(cli.config.as_deref())?;
    cli.apply_overrides(&mut cfg)?;

    let with_stdout = !matches!(cli.command, Commands::Config);
    if let Err(e) = init_logging(cfg.log_dir.as_deref(), with_stdout, cli.verbose) {
        eprintln!("warning: file logging unavailable: {:#}", e);
    }

    let invocation_id = Uuid::new_v4();
    info!(
        "[PHASE: initialization] stack-installer {} starting (invocation_id={}, command={:?}, platform={:?})",
        env!("CARGO_PKG_VERSION"),
        invocation_id,
        cli.command,
        utils::os_detection::detect_platform()
    );

    let runner = SystemCommandRunner;
    let ctx = AppContext::new(cfg, &runner);

    match &cli.command {
        Commands::Install {
            skip_runtime_install,
            no_restart,
            ..
        } => {
            let exe = std::env::current_exe().context("Failed to resolve the installer executable")?;
            let options = InstallOptions {
                skip_runtime_install: *skip_runtime_install,
                no_restart: *no_restart,
                resume_command: cli.resume_command(&exe, &ctx.target)?,
            };
            api::installer::install(&ctx, options).await
        }
        Commands::Start => api::stack::start(&ctx).await,
        Commands::Stop => api::stack::stop(&ctx).await,
        Commands::Restart => api::stack::restart(&ctx).await,
        Commands::Status => api::stack::status(&ctx).await,
        Commands::Logs { service, follow } => {
            api::stack::logs(&ctx, service.as_deref(), *follow).await
        }
        Commands::Backup => api::maintenance::backup(&ctx).await,
        Commands::PatchModule { target_root, .. } => {
            api::maintenance::patch_module(&ctx, target_root).await
        }
        Commands::Config => api::maintenance::show_config(&ctx.cfg),
    }
}
