// Repository materialization
//
// Ensures the target root holds a working copy of the remote. An existing checkout is
// updated in place; an update failure is only a warning and the on-disk tree is used.

use async_trait::async_trait;
use log::{error, info, warn};
use serde::Serialize;
use std::time::Instant;
use tokio::time::Duration;

use crate::installation::{CommandError, CommandRunner, CommandSpec};
use crate::models::target::InstallationTarget;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "reason", rename_all = "snake_case")]
pub enum RepoOutcome {
    Cloned,
    UpdatedInPlace,
    UpdateSkipped(String),
    Failed(String),
}

#[async_trait]
pub trait RepositorySource: Send + Sync {
    async fn ensure(&self, target: &InstallationTarget) -> RepoOutcome;
}

pub struct RepositoryMaterializer<'a> {
    runner: &'a dyn CommandRunner,
    git: String,
    timeout: Duration,
}

impl<'a> RepositoryMaterializer<'a> {
    pub fn new(runner: &'a dyn CommandRunner, git: impl Into<String>) -> Self {
        Self {
            runner,
            git: git.into(),
            timeout: Duration::from_secs(900),
        }
    }

    async fn pull(&self, target: &InstallationTarget) -> RepoOutcome {
        let spec = CommandSpec::new(self.git.clone(), "git_pull")
            .arg("pull")
            .cwd(target.root())
            .timeout(self.timeout);

        let reason = match self.runner.run(&spec).await {
            Ok(out) if out.success() => {
                info!(
                    "[PHASE: install] [STEP: repository] updated in place (root={:?}, duration_ms={})",
                    target.root(),
                    out.duration_ms
                );
                return RepoOutcome::UpdatedInPlace;
            }
            Ok(out) => format!("git pull exited with {:?}: {}", out.exit_code, out.diagnostic()),
            Err(e) => e.to_string(),
        };

        warn!(
            "[PHASE: install] [STEP: repository] update skipped, continuing with the existing tree: {}",
            reason
        );
        RepoOutcome::UpdateSkipped(reason)
    }

    async fn clone_fresh(&self, target: &InstallationTarget) -> RepoOutcome {
        if let Err(e) = tokio::fs::create_dir_all(&target.parent_directory).await {
            return RepoOutcome::Failed(format!(
                "cannot create parent directory {:?}: {}",
                target.parent_directory, e
            ));
        }

        let spec = CommandSpec::new(self.git.clone(), "git_clone")
            .args(["clone", target.remote_url.as_str(), target.folder_name.as_str()])
            .cwd(&target.parent_directory)
            .timeout(self.timeout);

        let failure = match self.runner.run(&spec).await {
            Ok(out) if out.success() => None,
            Ok(out) => Some(format!(
                "git clone exited with {:?}: {}",
                out.exit_code,
                out.diagnostic()
            )),
            Err(CommandError::NotFound { .. }) => Some(format!(
                "git ('{}') is not installed or not on PATH",
                self.git
            )),
            Err(e) => Some(e.to_string()),
        };
        if let Some(reason) = failure {
            error!("[PHASE: install] [STEP: repository] clone failed: {}", reason);
            return RepoOutcome::Failed(reason);
        }

        if !target.root().is_dir() {
            let reason = format!("clone reported success but {:?} does not exist", target.root());
            error!("[PHASE: install] [STEP: repository] {}", reason);
            return RepoOutcome::Failed(reason);
        }

        info!(
            "[PHASE: install] [STEP: repository] cloned (remote={}, root={:?})",
            target.remote_url,
            target.root()
        );
        RepoOutcome::Cloned
    }
}

#[async_trait]
impl RepositorySource for RepositoryMaterializer<'_> {
    async fn ensure(&self, target: &InstallationTarget) -> RepoOutcome {
        let started = Instant::now();
        info!(
            "[PHASE: install] [STEP: repository] ensure entered (root={:?})",
            target.root()
        );
        let outcome = if target.has_checkout() {
            self.pull(target).await
        } else {
            self.clone_fresh(target).await
        };
        info!(
            "[PHASE: install] [STEP: repository] ensure exit (outcome={:?}, duration_ms={})",
            outcome,
            started.elapsed().as_millis()
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installation::testing::{FakeRunner, Scripted};

    fn target_in(dir: &std::path::Path) -> InstallationTarget {
        InstallationTarget::new(dir, "iris-web", "https://example.com/iris-web.git")
    }

    #[tokio::test]
    async fn existing_checkout_is_pulled_in_root() {
        let tmp = tempfile::tempdir().unwrap();
        let target = target_in(tmp.path());
        std::fs::create_dir_all(target.join(".git")).unwrap();

        let runner = FakeRunner::new().on("git pull", Scripted::Exit(0, "Already up to date."));
        let outcome = RepositoryMaterializer::new(&runner, "git").ensure(&target).await;

        assert_eq!(outcome, RepoOutcome::UpdatedInPlace);
        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].cwd.as_deref(), Some(target.root()));
    }

    #[tokio::test]
    async fn failed_pull_is_a_warning() {
        let tmp = tempfile::tempdir().unwrap();
        let target = target_in(tmp.path());
        std::fs::create_dir_all(target.join(".git")).unwrap();

        let runner = FakeRunner::new().on("git pull", Scripted::Exit(1, ""));
        let outcome = RepositoryMaterializer::new(&runner, "git").ensure(&target).await;
        assert!(matches!(outcome, RepoOutcome::UpdateSkipped(_)));
        assert_eq!(runner.count("clone"), 0);
    }

    #[tokio::test]
    async fn clone_without_resulting_root_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let target = target_in(tmp.path());

        // The fake "succeeds" without creating anything.
        let runner = FakeRunner::new().on("git clone", Scripted::Exit(0, ""));
        let outcome = RepositoryMaterializer::new(&runner, "git").ensure(&target).await;
        assert!(matches!(outcome, RepoOutcome::Failed(ref r) if r.contains("does not exist")));
        assert_eq!(
            runner.command_lines(),
            vec!["git clone https://example.com/iris-web.git iris-web".to_string()]
        );
    }

    #[tokio::test]
    async fn missing_git_fails_clone() {
        let tmp = tempfile::tempdir().unwrap();
        let target = target_in(tmp.path());
        let runner = FakeRunner::new().on("git clone", Scripted::NotFound);
        let outcome = RepositoryMaterializer::new(&runner, "git").ensure(&target).await;
        assert!(matches!(outcome, RepoOutcome::Failed(ref r) if r.contains("not installed")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn clone_from_local_repository() {
        use crate::installation::SystemCommandRunner;

        if which::which("git").is_err() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let origin = tmp.path().join("origin");
        std::fs::create_dir_all(&origin).unwrap();
        let sh = |script: &str| {
            std::process::Command::new("sh")
                .args(["-c", script])
                .current_dir(&origin)
                .status()
                .unwrap()
        };
        let init = sh("git init -q && git -c user.email=t@t -c user.name=t commit -q --allow-empty -m init");
        if !init.success() {
            return;
        }

        let parent = tmp.path().join("hosts");
        let target = InstallationTarget::new(
            &parent,
            "stack",
            format!("file://{}", origin.display()),
        );
        let runner = SystemCommandRunner;
        let repo = RepositoryMaterializer::new(&runner, "git");
        assert_eq!(repo.ensure(&target).await, RepoOutcome::Cloned);
        assert!(target.has_checkout());
        // Second run updates instead of cloning again.
        assert_eq!(repo.ensure(&target).await, RepoOutcome::UpdatedInPlace);
    }
}
