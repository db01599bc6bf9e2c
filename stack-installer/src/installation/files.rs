//! File helpers for module deployment and artifacts.
//!
//! Goals:
//! - Async I/O only (tokio)
//! - Retry transient file lock errors (Windows AV/indexers, etc.)
//! - Timeout all copies
//! - Never leave a half-written artifact under its final name

use anyhow::{Context, Result};
use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::time::{timeout, Duration};

/// Directory names never deployed (interpreter caches, VCS metadata).
const SKIPPED_DIRS: &[&str] = &["__pycache__", ".git", ".pytest_cache"];

/// Recursively collect all regular files under `root`, skipping cache/VCS directories.
///
/// Returned paths are sorted for stable logs.
pub async fn collect_files_recursive(root: &Path) -> Result<Vec<PathBuf>> {
    let started = Instant::now();
    debug!(
        "[PHASE: patch] [STEP: files] collect_files_recursive entered (root={:?})",
        root
    );

    let mut out: Vec<PathBuf> = Vec::new();
    let mut stack: Vec<PathBuf> = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut rd = tokio::fs::read_dir(&dir)
            .await
            .with_context(|| format!("read_dir failed: {:?}", dir))?;
        while let Some(ent) = rd.next_entry().await? {
            let p = ent.path();
            let meta = ent.metadata().await?;
            if meta.is_dir() {
                let skip = p
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| SKIPPED_DIRS.contains(&n))
                    .unwrap_or(false);
                if !skip {
                    stack.push(p);
                }
            } else if meta.is_file() {
                out.push(p);
            }
        }
    }
    out.sort();

    debug!(
        "[PHASE: patch] [STEP: files] collect_files_recursive exit (files={}, duration_ms={})",
        out.len(),
        started.elapsed().as_millis()
    );
    Ok(out)
}

fn is_transient_fs_error(e: &anyhow::Error) -> bool {
    let msg = format!("{:#}", e).to_ascii_lowercase();
    msg.contains("used by another process")
        || msg.contains("in use")
        || msg.contains("resource busy")
        || msg.contains("temporarily")
        || msg.contains("temporary")
        || msg.contains("timed out")
}

/// Copy one file with retries + timeout.
///
/// Caller must create parent directory.
pub async fn copy_file_with_retries(src: &Path, dst: &Path, label: &str) -> Result<u64> {
    let started = Instant::now();
    debug!(
        "[PHASE: patch] [STEP: files] copy_file_with_retries entered (label={}, src={:?}, dst={:?})",
        label, src, dst
    );

    let mut last_err: Option<anyhow::Error> = None;
    for attempt in 1..=3 {
        match timeout(Duration::from_secs(60), tokio::fs::copy(src, dst)).await {
            Ok(Ok(n)) => {
                debug!(
                    "[PHASE: patch] [STEP: files] copy_file_with_retries exit ok (label={}, bytes={}, attempt={}, duration_ms={})",
                    label,
                    n,
                    attempt,
                    started.elapsed().as_millis()
                );
                return Ok(n);
            }
            Ok(Err(e)) => {
                let err = anyhow::Error::new(e).context(format!("copy {:?} -> {:?} failed", src, dst));
                let transient = is_transient_fs_error(&err);
                warn!(
                    "[PHASE: patch] [STEP: files] copy failed (label={}, attempt={}, transient={}, err={:#})",
                    label, attempt, transient, err
                );
                last_err = Some(err);
                if !transient {
                    break;
                }
            }
            Err(_) => {
                warn!(
                    "[PHASE: patch] [STEP: files] copy timeout (label={}, attempt={}, src={:?}, dst={:?})",
                    label, attempt, src, dst
                );
                last_err = Some(anyhow::anyhow!("copy {:?} timed out after 60s", src));
            }
        }

        let backoff_ms = 200_u64.saturating_mul(1_u64 << ((attempt - 1) as u32));
        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("copy failed")))
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CopyReport {
    pub files: usize,
    pub bytes: u64,
}

/// Copy every file under `src_root` into `dst_root`, preserving relative paths.
pub async fn copy_tree(src_root: &Path, dst_root: &Path) -> Result<CopyReport> {
    if !src_root.is_dir() {
        anyhow::bail!("source directory {:?} does not exist", src_root);
    }
    let mut report = CopyReport::default();
    for src in collect_files_recursive(src_root).await? {
        let rel = src
            .strip_prefix(src_root)
            .with_context(|| format!("{:?} is outside {:?}", src, src_root))?;
        let dst = dst_root.join(rel);
        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
        report.bytes += copy_file_with_retries(&src, &dst, "copy_tree").await?;
        report.files += 1;
    }
    Ok(report)
}

/// Sibling path used while an artifact is being written.
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

/// Write `content` to `path` through a `.partial` sibling and a rename.
pub async fn write_atomically(path: &Path, content: &[u8]) -> Result<()> {
    let tmp = partial_path(path);
    if let Err(e) = tokio::fs::write(&tmp, content).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(anyhow::Error::new(e).context(format!("Failed to write {:?}", tmp)));
    }
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to move {:?} into place", tmp))
}
