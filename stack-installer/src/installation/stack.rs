// Stack control through the compose front end
//
// Every call runs with its working directory pinned to the target root so compose picks
// up the checkout's definition and `.env` without touching the process cwd.

use async_trait::async_trait;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use tokio::sync::OnceCell;
use tokio::time::Duration;

use crate::config::{BinaryPaths, StackConfig};
use crate::installation::{CommandError, CommandOutput, CommandRunner, CommandSpec};

/// How compose is invoked on this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeInvocation {
    /// `docker compose` (v2 plugin)
    DockerSubcommand,
    /// `docker-compose` (v1 standalone)
    DockerComposeBinary,
}

#[async_trait]
pub trait StackOperations: Send + Sync {
    async fn pull(&self) -> Result<CommandOutput, CommandError>;
    async fn up(&self) -> Result<CommandOutput, CommandError>;
    async fn down(&self) -> Result<CommandOutput, CommandError>;
    async fn ps(&self) -> Result<CommandOutput, CommandError>;
    /// Streams to the terminal; returns the exit code.
    async fn logs(&self, service: &str, follow: bool) -> Result<Option<i32>, CommandError>;
    async fn exec(
        &self,
        service: &str,
        command: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, CommandError>;
    /// True when at least one service container is running.
    async fn is_running(&self) -> bool;
}

pub struct StackController<'a> {
    runner: &'a dyn CommandRunner,
    docker: String,
    docker_compose: String,
    cfg: &'a StackConfig,
    root: PathBuf,
    invocation: OnceCell<ComposeInvocation>,
}

impl<'a> StackController<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        binaries: &BinaryPaths,
        cfg: &'a StackConfig,
        root: &Path,
    ) -> Self {
        Self {
            runner,
            docker: binaries.docker.clone(),
            docker_compose: binaries.docker_compose.clone(),
            cfg,
            root: root.to_path_buf(),
            invocation: OnceCell::new(),
        }
    }

    /// Detect which compose invocation method is available.
    ///
    /// Priority order (V2 preferred):
    /// 1. `docker compose` (Docker Compose V2 - plugin style)
    /// 2. `docker-compose` (Docker Compose V1 - standalone binary)
    pub async fn detect_compose_invocation(&self) -> Result<ComposeInvocation, CommandError> {
        debug!("[PHASE: stack] [STEP: compose] detect_compose_invocation: checking V2 (docker compose)");
        let v2 = CommandSpec::new(self.docker.clone(), "docker_compose_subcommand_version")
            .args(["compose", "version"])
            .timeout(Duration::from_secs(10));
        if matches!(self.runner.run(&v2).await, Ok(out) if out.success()) {
            debug!("[PHASE: stack] [STEP: compose] using docker compose (V2)");
            return Ok(ComposeInvocation::DockerSubcommand);
        }

        debug!("[PHASE: stack] [STEP: compose] V2 not available, checking V1 (docker-compose)");
        let v1 = CommandSpec::new(self.docker_compose.clone(), "docker_compose_version")
            .arg("--version")
            .timeout(Duration::from_secs(10));
        if matches!(self.runner.run(&v1).await, Ok(out) if out.success()) {
            debug!("[PHASE: stack] [STEP: compose] using docker-compose (V1)");
            return Ok(ComposeInvocation::DockerComposeBinary);
        }

        warn!("[PHASE: stack] [STEP: compose] neither 'docker compose' nor 'docker-compose' is available");
        Err(CommandError::NotFound {
            program: format!("{} compose / {}", self.docker, self.docker_compose),
            operation: "detect_compose".to_string(),
        })
    }

    async fn invocation(&self) -> Result<ComposeInvocation, CommandError> {
        self.invocation
            .get_or_try_init(|| self.detect_compose_invocation())
            .await
            .copied()
    }

    /// Build a compose command for `subcommand` with the pinned working directory.
    async fn compose_spec(
        &self,
        subcommand: &str,
        extra_args: &[String],
        timeout: Duration,
        label: &str,
    ) -> Result<CommandSpec, CommandError> {
        let inv = self.invocation().await?;
        let mut spec = match inv {
            ComposeInvocation::DockerSubcommand => {
                CommandSpec::new(self.docker.clone(), label).arg("compose")
            }
            ComposeInvocation::DockerComposeBinary => {
                CommandSpec::new(self.docker_compose.clone(), label)
            }
        };
        if let Some(file) = &self.cfg.compose_file {
            spec = spec.args(["-f", file.as_str()]);
        }
        Ok(spec
            .arg(subcommand)
            .args(extra_args.iter().cloned())
            .cwd(&self.root)
            .timeout(timeout))
    }

    async fn run_compose_cmd(
        &self,
        subcommand: &str,
        extra_args: &[String],
        timeout: Duration,
        label: &str,
    ) -> Result<CommandOutput, CommandError> {
        let spec = self.compose_spec(subcommand, extra_args, timeout, label).await?;
        let out = self.runner.run(&spec).await?;
        if out.success() {
            info!(
                "[PHASE: stack] [STEP: {}] compose {} ok (duration_ms={})",
                label, subcommand, out.duration_ms
            );
        } else {
            warn!(
                "[PHASE: stack] [STEP: {}] compose {} failed (exit_code={:?}): {}",
                label,
                subcommand,
                out.exit_code,
                out.diagnostic()
            );
        }
        Ok(out)
    }

    fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.cfg.command_timeout_secs)
    }
}

#[async_trait]
impl StackOperations for StackController<'_> {
    async fn pull(&self) -> Result<CommandOutput, CommandError> {
        self.run_compose_cmd(
            "pull",
            &[],
            Duration::from_secs(self.cfg.pull_timeout_secs),
            "compose_pull",
        )
        .await
    }

    async fn up(&self) -> Result<CommandOutput, CommandError> {
        self.run_compose_cmd(
            "up",
            &["-d".to_string()],
            Duration::from_secs(self.cfg.up_timeout_secs),
            "compose_up",
        )
        .await
    }

    async fn down(&self) -> Result<CommandOutput, CommandError> {
        self.run_compose_cmd("down", &[], self.command_timeout(), "compose_down")
            .await
    }

    async fn ps(&self) -> Result<CommandOutput, CommandError> {
        self.run_compose_cmd("ps", &[], self.command_timeout(), "compose_ps")
            .await
    }

    async fn logs(&self, service: &str, follow: bool) -> Result<Option<i32>, CommandError> {
        let mut extra = Vec::new();
        if follow {
            extra.push("--follow".to_string());
        } else {
            extra.push("--tail=200".to_string());
        }
        extra.push(service.to_string());
        let spec = self
            .compose_spec("logs", &extra, self.command_timeout(), "compose_logs")
            .await?;
        self.runner.run_attached(&spec).await
    }

    async fn exec(
        &self,
        service: &str,
        command: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, CommandError> {
        let mut extra = vec!["-T".to_string(), service.to_string()];
        extra.extend(command.iter().cloned());
        self.run_compose_cmd("exec", &extra, timeout, "compose_exec")
            .await
    }

    async fn is_running(&self) -> bool {
        match self.ps().await {
            Ok(out) if out.success() => parse_compose_ps_output(&out.stdout).any_running(),
            _ => false,
        }
    }
}

/// Parsed status from `compose ps` output.
#[derive(Debug, Default)]
pub struct ComposePsStatus {
    pub container_count: usize,
    pub all_running: bool,
    pub containers: Vec<ContainerStatus>,
}

impl ComposePsStatus {
    pub fn any_running(&self) -> bool {
        self.containers.iter().any(|c| c.state == "running")
    }
}

#[derive(Debug, Clone)]
pub struct ContainerStatus {
    pub name: String,
    pub state: String,
}

/// Parse the table printed by `compose ps` (v1 and v2 layouts).
pub fn parse_compose_ps_output(stdout: &str) -> ComposePsStatus {
    let mut containers = Vec::new();

    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let upper = line.to_uppercase();
        if upper.contains("NAME") && (upper.contains("STATUS") || upper.contains("STATE")) {
            continue;
        }
        // v1 prints a dashed rule under the header.
        if line.chars().all(|c| c == '-') {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 2 {
            continue;
        }
        let words: Vec<String> = parts.iter().map(|p| p.to_lowercase()).collect();
        let has = |w: &str| words.iter().any(|x| x == w);
        let state = if has("running") || has("up") {
            "running"
        } else if words.iter().any(|x| x.starts_with("exited") || x == "exit") {
            "exited"
        } else if has("created") {
            "created"
        } else if has("restarting") {
            "restarting"
        } else {
            "unknown"
        };

        containers.push(ContainerStatus {
            name: parts[0].to_string(),
            state: state.to_string(),
        });
    }

    let all_running = !containers.is_empty() && containers.iter().all(|c| c.state == "running");

    ComposePsStatus {
        container_count: containers.len(),
        all_running,
        containers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installation::testing::{FakeRunner, Scripted};
    use crate::utils::os_detection::HostPlatform;

    fn fixtures() -> (BinaryPaths, StackConfig) {
        let cfg = crate::config::InstallerConfig::defaults_for(HostPlatform::Linux);
        (cfg.binaries, cfg.stack)
    }

    #[tokio::test]
    async fn prefers_compose_v2_and_pins_cwd() {
        let (bins, stack) = fixtures();
        let runner = FakeRunner::new().on("docker compose version", Scripted::Exit(0, "v2.29"));
        let ctl = StackController::new(&runner, &bins, &stack, Path::new("/srv/iris-web"));

        let out = ctl.up().await.unwrap();
        assert!(out.success());

        let calls = runner.calls.lock().unwrap();
        let up = calls.last().unwrap();
        assert_eq!(up.program, "docker");
        assert_eq!(up.args, vec!["compose", "up", "-d"]);
        assert_eq!(up.cwd.as_deref(), Some(Path::new("/srv/iris-web")));
        assert_eq!(up.timeout, Duration::from_secs(stack.up_timeout_secs));
    }

    #[tokio::test]
    async fn falls_back_to_compose_v1_and_detects_once() {
        let (bins, stack) = fixtures();
        let runner = FakeRunner::new()
            .on("docker compose version", Scripted::Exit(1, ""))
            .on("docker-compose --version", Scripted::Exit(0, "1.29.2"));
        let ctl = StackController::new(&runner, &bins, &stack, Path::new("/srv/x"));

        ctl.pull().await.unwrap();
        ctl.down().await.unwrap();

        assert_eq!(runner.count("docker-compose --version"), 1);
        assert_eq!(runner.count("docker-compose pull"), 1);
        assert_eq!(runner.count("docker-compose down"), 1);
    }

    #[tokio::test]
    async fn no_compose_is_not_found() {
        let (bins, stack) = fixtures();
        let runner = FakeRunner::new()
            .on("docker compose version", Scripted::NotFound)
            .on("docker-compose --version", Scripted::NotFound);
        let ctl = StackController::new(&runner, &bins, &stack, Path::new("/srv/x"));
        let err = ctl.pull().await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn compose_file_and_exec_arguments() {
        let (bins, mut stack) = fixtures();
        stack.compose_file = Some("docker-compose.yml".to_string());
        let runner = FakeRunner::new();
        let ctl = StackController::new(&runner, &bins, &stack, Path::new("/srv/x"));

        let cmd = vec!["pg_dumpall".to_string(), "-U".to_string(), "postgres".to_string()];
        ctl.exec("db", &cmd, Duration::from_secs(5)).await.unwrap();
        assert_eq!(
            runner.command_lines().last().unwrap(),
            "docker compose -f docker-compose.yml exec -T db pg_dumpall -U postgres"
        );
    }

    #[tokio::test]
    async fn nonzero_exit_is_returned_not_raised() {
        let (bins, stack) = fixtures();
        let runner = FakeRunner::new().on("compose down", Scripted::Exit(1, ""));
        let ctl = StackController::new(&runner, &bins, &stack, Path::new("/srv/x"));
        let out = ctl.down().await.unwrap();
        assert_eq!(out.exit_code, Some(1));
    }

    #[tokio::test]
    async fn logs_follow_is_attached() {
        let (bins, stack) = fixtures();
        let runner = FakeRunner::new();
        let ctl = StackController::new(&runner, &bins, &stack, Path::new("/srv/x"));
        assert_eq!(ctl.logs("app", true).await.unwrap(), Some(0));
        assert_eq!(
            runner.command_lines().last().unwrap(),
            "docker compose logs --follow app"
        );
    }

    #[tokio::test]
    async fn is_running_reads_ps_table() {
        let (bins, stack) = fixtures();
        let table = "NAME        IMAGE   COMMAND   SERVICE   CREATED   STATUS         PORTS\n\
                     iris-app    app     run       app       1m        Up 1 minute    443/tcp\n";
        let runner = FakeRunner::new().on("compose ps", Scripted::Exit(0, table));
        let ctl = StackController::new(&runner, &bins, &stack, Path::new("/srv/x"));
        assert!(ctl.is_running().await);

        let runner = FakeRunner::new().on("compose ps", Scripted::Exit(0, "NAME   STATUS\n"));
        let ctl = StackController::new(&runner, &bins, &stack, Path::new("/srv/x"));
        assert!(!ctl.is_running().await);
    }

    #[test]
    fn parse_compose_ps_output_detects_running() {
        let stdout = "NAME              SERVICE    STATUS   PORTS\n\
                      iris-web-app      app        running  0.0.0.0:443->443/tcp\n\
                      iris-web-worker   worker     running  \n";
        let status = parse_compose_ps_output(stdout);
        assert_eq!(status.container_count, 2);
        assert!(status.all_running);
    }

    #[test]
    fn parse_compose_ps_output_detects_not_all_running() {
        let stdout = "NAME              SERVICE    STATUS   PORTS\n\
                      iris-web-app      app        running  0.0.0.0:443->443/tcp\n\
                      iris-web-worker   worker     exited   \n";
        let status = parse_compose_ps_output(stdout);
        assert_eq!(status.container_count, 2);
        assert!(!status.all_running);
        assert!(status.any_running());
    }

    #[test]
    fn parse_compose_ps_output_v1_layout() {
        let stdout = "      Name                 Command          State    Ports\n\
                      ---------------------------------------------------------\n\
                      iris_db_1       docker-entrypoint.sh   Exit 0\n";
        let status = parse_compose_ps_output(stdout);
        assert_eq!(status.container_count, 1);
        assert_eq!(status.containers[0].state, "exited");
        assert!(!status.any_running());
    }

    #[test]
    fn parse_compose_ps_output_handles_empty() {
        let status = parse_compose_ps_output("");
        assert_eq!(status.container_count, 0);
        assert!(!status.all_running);
    }
}
