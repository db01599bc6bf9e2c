use serde::{Deserialize, Serialize};

/// Host family the installer is running on.
///
/// Windows hosts need the WSL compatibility layer and Docker Desktop; Linux hosts run the
/// engine natively, so the compatibility layer is always considered present there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostPlatform {
    Windows,
    Linux,
    Unknown,
}

impl HostPlatform {
    /// Whether container workloads need an OS compatibility layer on this host.
    pub fn needs_compat_layer(self) -> bool {
        matches!(self, HostPlatform::Windows)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HostPlatform::Windows => "windows",
            HostPlatform::Linux => "linux",
            HostPlatform::Unknown => "unknown",
        }
    }
}

/// Detect the current operating system
pub fn detect_platform() -> HostPlatform {
    #[cfg(target_os = "windows")]
    return HostPlatform::Windows;

    #[cfg(target_os = "linux")]
    return HostPlatform::Linux;

    #[cfg(not(any(target_os = "windows", target_os = "linux")))]
    return HostPlatform::Unknown;
}
