// Installation state (in-memory)
//
// NOTE: This is NOT persisted. It is re-derived by inspecting the host at the start of
// every run; the only durable cross-run datum is the resume marker owned by the OS.

use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InstallationState {
    pub compat_layer_present: bool,
    pub runtime_present: bool,
    pub runtime_daemon_ready: bool,
    pub repo_present: bool,
    pub env_file_present: bool,
    pub stack_up: bool,
    pub pending_restart: bool,
}

impl InstallationState {
    /// One line per field, for the `status` subcommand.
    pub fn render(&self) -> String {
        let rows = [
            ("compat_layer_present", self.compat_layer_present),
            ("runtime_present", self.runtime_present),
            ("runtime_daemon_ready", self.runtime_daemon_ready),
            ("repo_present", self.repo_present),
            ("env_file_present", self.env_file_present),
            ("stack_up", self.stack_up),
            ("pending_restart", self.pending_restart),
        ];
        rows.iter()
            .map(|(k, v)| format!("{:<22} {}", k, if *v { "yes" } else { "no" }))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
