// Install outcomes
//
// Terminal results of the orchestrator and the failure taxonomy carried by `Failed`.

use serde::Serialize;

use crate::installation::readiness::Readiness;
use crate::installation::repository::RepoOutcome;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum InstallFailure {
    /// Checked before any mutation (privileges, occupied port, missing template or tool).
    #[error("precondition not met: {0}")]
    Precondition(String),
    /// Network or timing dependent; re-running the installer may succeed.
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("{0}")]
    Fatal(String),
}

/// What a successful run reports back to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallSummary {
    pub target_root: String,
    pub repository: RepoOutcome,
    pub env_created: bool,
    pub server_name: Option<String>,
    pub probe_url: String,
    pub readiness: Readiness,
    /// Only set when the environment file was created by this run.
    #[serde(skip)]
    pub initial_admin_secret: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InstallOutcome {
    Done(InstallSummary),
    /// A restart is needed; a resume marker has been recorded.
    AwaitingRestart { restart_requested: bool },
    Failed(InstallFailure),
}

impl InstallOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            InstallOutcome::Done(_) | InstallOutcome::AwaitingRestart { .. } => 0,
            InstallOutcome::Failed(_) => 1,
        }
    }
}
