// Host preflight checks
//
// Run before the first bring-up: a port already bound on localhost would make `up` fail
// half-way with containers created but not started.

use async_trait::async_trait;
use log::{info, warn};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CheckStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreflightCheck {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

#[async_trait]
pub trait PortPreflight: Send + Sync {
    async fn check_ports(&self, ports: &[u16]) -> Vec<PreflightCheck>;
}

/// Connect-based probe: a port that accepts a TCP connection on localhost is in use.
pub struct LocalPortProbe {
    connect_timeout: Duration,
}

impl Default for LocalPortProbe {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(750),
        }
    }
}

impl LocalPortProbe {
    async fn in_use(&self, port: u16) -> bool {
        matches!(
            tokio::time::timeout(self.connect_timeout, TcpStream::connect(("127.0.0.1", port)))
                .await,
            Ok(Ok(_))
        )
    }
}

#[async_trait]
impl PortPreflight for LocalPortProbe {
    async fn check_ports(&self, ports: &[u16]) -> Vec<PreflightCheck> {
        let mut checks = Vec::with_capacity(ports.len());
        for &port in ports {
            let busy = self.in_use(port).await;
            if busy {
                warn!("[PHASE: preflight] [STEP: ports] port {} is already in use", port);
            } else {
                info!("[PHASE: preflight] [STEP: ports] port {} is free", port);
            }
            checks.push(PreflightCheck {
                name: format!("Port {}", port),
                status: if busy {
                    CheckStatus::Fail
                } else {
                    CheckStatus::Pass
                },
                detail: if busy {
                    format!(
                        "port {} is already in use on this host; stop the service bound to it",
                        port
                    )
                } else {
                    format!("port {} is available", port)
                },
            });
        }
        checks
    }
}

/// First failing check, if any.
pub fn first_failure(checks: &[PreflightCheck]) -> Option<&PreflightCheck> {
    checks.iter().find(|c| c.status == CheckStatus::Fail)
}
