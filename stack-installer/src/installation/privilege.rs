// Privilege detection
//
// Installing the compatibility layer or the runtime needs root / an elevated
// administrator token. We check up front and fail with an instruction instead of letting
// an installer die half-way with "access denied".

use async_trait::async_trait;
use log::debug;
use tokio::time::Duration;

use crate::installation::{CommandRunner, CommandSpec};

#[async_trait]
pub trait PrivilegeCheck: Send + Sync {
    async fn is_elevated(&self) -> bool;
}

/// Host-backed check: effective uid on Unix, `net session` on Windows.
pub struct HostPrivilegeCheck<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> HostPrivilegeCheck<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl PrivilegeCheck for HostPrivilegeCheck<'_> {
    async fn is_elevated(&self) -> bool {
        if cfg!(windows) {
            // `net session` only succeeds from an elevated token.
            let spec = CommandSpec::new("net", "net_session")
                .arg("session")
                .timeout(Duration::from_secs(15));
            let elevated = matches!(self.runner.run(&spec).await, Ok(out) if out.success());
            debug!(
                "[PHASE: preflight] [STEP: privilege] windows elevation check (elevated={})",
                elevated
            );
            return elevated;
        }
        is_running_as_root()
    }
}

/// True when the effective uid is 0.
#[cfg(unix)]
pub fn is_running_as_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
pub fn is_running_as_root() -> bool {
    false
}

/// Operator instruction printed when elevation is missing.
pub fn elevation_instruction() -> &'static str {
    if cfg!(windows) {
        "Re-run this installer from an elevated terminal (right-click > 'Run as administrator')."
    } else {
        "Re-run this installer as root (for example: sudo stack-installer install)."
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruction_names_the_remedy() {
        let msg = elevation_instruction();
        assert!(msg.contains("administrator") || msg.contains("root"));
    }

    #[cfg(unix)]
    #[test]
    fn root_check_matches_effective_uid() {
        let uid = unsafe { libc::geteuid() };
        assert_eq!(is_running_as_root(), uid == 0);
    }
}
