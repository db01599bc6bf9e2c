// Module patching
//
// Deploys an add-on module into an existing checkout: the module tree is copied under the
// target root and the deployment manifest gains the mount lines the module needs. Lines
// already present are never duplicated, so re-running changes nothing.

use anyhow::{Context, Result};
use log::info;
use std::path::Path;

use crate::config::PatchConfig;
use crate::installation::files::{copy_tree, write_atomically};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchReport {
    pub files_copied: usize,
    pub lines_inserted: usize,
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Insert each of `lines` right after `anchor` when it is not already in the manifest.
///
/// With `section`, the anchor is searched only inside the block opened by the section line
/// (until the next line indented at or above the section's level). Returns the new text
/// and the number of inserted lines.
pub fn insert_lines_after_anchor(
    content: &str,
    section: Option<&str>,
    anchor: &str,
    lines: &[String],
) -> Result<(String, usize)> {
    let eol = if content.contains("\r\n") { "\r\n" } else { "\n" };
    let mut rows: Vec<&str> = content.lines().collect();

    let missing: Vec<&String> = lines
        .iter()
        .filter(|l| !rows.iter().any(|r| r.trim_end() == l.trim_end()))
        .collect();
    if missing.is_empty() {
        return Ok((content.to_string(), 0));
    }

    let (start, end) = match section {
        Some(section) => {
            let header = section.trim_end();
            let idx = rows
                .iter()
                .position(|r| r.trim_end() == header)
                .with_context(|| format!("section line '{}' not found in manifest", header))?;
            let level = indent_of(rows[idx]);
            let end = rows
                .iter()
                .enumerate()
                .skip(idx + 1)
                .find(|(_, r)| {
                    let t = r.trim();
                    !t.is_empty() && !t.starts_with('#') && indent_of(r) <= level
                })
                .map(|(i, _)| i)
                .unwrap_or(rows.len());
            (idx + 1, end)
        }
        None => (0, rows.len()),
    };

    let anchor_trimmed = anchor.trim_end();
    let at = (start..end)
        .find(|&i| rows[i].trim_end() == anchor_trimmed)
        .with_context(|| format!("anchor line '{}' not found in manifest", anchor_trimmed))?;

    for (offset, line) in missing.iter().enumerate() {
        rows.insert(at + 1 + offset, line.as_str());
    }

    let mut out = rows.join(eol);
    if content.ends_with('\n') {
        out.push_str(eol);
    }
    Ok((out, missing.len()))
}

/// Copy the module into `target_root` and patch its manifest.
pub async fn patch_module(target_root: &Path, cfg: &PatchConfig) -> Result<PatchReport> {
    if !target_root.is_dir() {
        anyhow::bail!("target root {:?} does not exist", target_root);
    }
    let manifest = target_root.join(&cfg.manifest);
    if !manifest.is_file() {
        anyhow::bail!("deployment manifest {:?} does not exist", manifest);
    }

    let dest = target_root.join(&cfg.destination);
    let copied = copy_tree(&cfg.module_source, &dest)
        .await
        .with_context(|| format!("Failed to copy module from {:?}", cfg.module_source))?;
    info!(
        "[PHASE: patch] [STEP: copy] module copied (files={}, bytes={}, dest={:?})",
        copied.files, copied.bytes, dest
    );

    let text = tokio::fs::read_to_string(&manifest)
        .await
        .with_context(|| format!("Failed to read {:?}", manifest))?;
    let (patched, inserted) =
        insert_lines_after_anchor(&text, cfg.section.as_deref(), &cfg.anchor, &cfg.lines)?;

    if inserted > 0 {
        write_atomically(&manifest, patched.as_bytes()).await?;
        info!(
            "[PHASE: patch] [STEP: manifest] inserted {} line(s) into {:?}",
            inserted, manifest
        );
    } else {
        info!(
            "[PHASE: patch] [STEP: manifest] {:?} already contains the module mounts",
            manifest
        );
    }

    Ok(PatchReport {
        files_copied: copied.files,
        lines_inserted: inserted,
    })
}
