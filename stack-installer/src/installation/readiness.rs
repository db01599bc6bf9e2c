// HTTP readiness probe
//
// Polls the deployed application until it answers with one of the accepted status codes.
// The stack ships a self-signed certificate, so certificate validation is disabled for
// this client only. Redirects are not followed: a 302 to the login page already proves
// the application is serving.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use serde::Serialize;
use std::time::Instant;
use tokio::time::Duration;

use crate::config::ReadinessConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    Ready,
    TimedOut,
}

#[async_trait]
pub trait ReadinessCheck: Send + Sync {
    async fn wait_until_ready(&self, url: &str, timeout: Duration, interval: Duration)
        -> Readiness;
}

pub struct ReadinessProbe {
    client: reqwest::Client,
    success_codes: Vec<u16>,
}

impl ReadinessProbe {
    pub fn new(cfg: &ReadinessConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(cfg.request_timeout_secs.max(1)))
            .build()
            .context("Failed to build readiness HTTP client")?;
        Ok(Self {
            client,
            success_codes: cfg.success_codes.clone(),
        })
    }

    /// One GET. Network errors count as "not ready".
    async fn check_once(&self, url: &str) -> bool {
        match self.client.get(url).send().await {
            Ok(resp) => {
                let code = resp.status().as_u16();
                let ok = self.success_codes.contains(&code);
                debug!(
                    "[PHASE: install] [STEP: readiness] GET {} -> {} (accepted={})",
                    url, code, ok
                );
                ok
            }
            Err(e) => {
                debug!("[PHASE: install] [STEP: readiness] GET {} failed: {}", url, e);
                false
            }
        }
    }
}

#[async_trait]
impl ReadinessCheck for ReadinessProbe {
    async fn wait_until_ready(
        &self,
        url: &str,
        timeout: Duration,
        interval: Duration,
    ) -> Readiness {
        let started = Instant::now();
        info!(
            "[PHASE: install] [STEP: readiness] probing {} (timeout_ms={}, interval_ms={})",
            url,
            timeout.as_millis(),
            interval.as_millis()
        );

        let poll = async {
            let mut attempt: u32 = 0;
            loop {
                attempt += 1;
                if self.check_once(url).await {
                    return attempt;
                }
                tokio::time::sleep(interval).await;
            }
        };

        match tokio::time::timeout(timeout, poll).await {
            Ok(attempts) => {
                info!(
                    "[PHASE: install] [STEP: readiness] ready (attempts={}, elapsed_ms={})",
                    attempts,
                    started.elapsed().as_millis()
                );
                Readiness::Ready
            }
            Err(_) => {
                warn!(
                    "[PHASE: install] [STEP: readiness] no accepted response from {} within {}s",
                    url,
                    timeout.as_secs()
                );
                Readiness::TimedOut
            }
        }
    }
}
