// Environment file materialization
//
// The stack's `.env` is created exactly once from its template. Placeholder lines are
// replaced by freshly generated secrets only when the literal line appears exactly once;
// anything the operator edited by hand is left alone. An existing `.env` is never
// rewritten and no secret is generated for it.

use log::{debug, info, warn};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::{EnvironmentConfig, Placeholder};
use crate::security::crypto::secret_fingerprint;
use crate::security::secrets::{SecretBundle, SecretField, SecretSource};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvOutcome {
    Created(SecretBundle),
    AlreadyPresent,
}

#[derive(Debug, thiserror::Error)]
pub enum EnvError {
    #[error("environment template {0:?} does not exist")]
    TemplateMissing(PathBuf),
    #[error("failed to {action} {path:?}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to generate secrets: {0}")]
    Secrets(#[source] anyhow::Error),
}

pub trait EnvironmentSource: Send + Sync {
    fn ensure(&self, template: &Path, target: &Path) -> Result<EnvOutcome, EnvError>;
}

pub struct EnvironmentMaterializer<'a> {
    source: &'a dyn SecretSource,
    placeholders: &'a [Placeholder],
    /// Absolute path receiving the initial admin secret, when enabled.
    admin_secret_path: Option<PathBuf>,
}

impl<'a> EnvironmentMaterializer<'a> {
    pub fn new(
        source: &'a dyn SecretSource,
        placeholders: &'a [Placeholder],
        admin_secret_path: Option<PathBuf>,
    ) -> Self {
        Self {
            source,
            placeholders,
            admin_secret_path,
        }
    }

    /// Build from configuration for a given target root.
    pub fn from_config(source: &'a dyn SecretSource, cfg: &'a EnvironmentConfig, root: &Path) -> Self {
        Self::new(
            source,
            &cfg.placeholders,
            cfg.admin_secret_file.as_ref().map(|f| root.join(f)),
        )
    }
}

fn line_body(line: &str) -> &str {
    line.trim_end_matches(['\n', '\r'])
}

/// Replace each placeholder literal that occurs exactly once as a whole line.
///
/// Line endings of the template are preserved.
pub fn substitute_placeholders(
    template: &str,
    placeholders: &[Placeholder],
    secret_for: impl Fn(SecretField) -> String,
) -> String {
    let mut lines: Vec<String> = template.split_inclusive('\n').map(str::to_string).collect();

    for p in placeholders {
        let hits: Vec<usize> = lines
            .iter()
            .enumerate()
            .filter(|(_, l)| line_body(l) == p.literal)
            .map(|(i, _)| i)
            .collect();

        match hits.as_slice() {
            [idx] => {
                let ending = &lines[*idx][line_body(&lines[*idx]).len()..];
                let replaced = format!("{}={}{}", p.key, secret_for(p.secret), ending);
                lines[*idx] = replaced;
                debug!(
                    "[PHASE: install] [STEP: environment] substituted placeholder (key={})",
                    p.key
                );
            }
            [] => debug!(
                "[PHASE: install] [STEP: environment] placeholder not found, skipped (key={})",
                p.key
            ),
            many => debug!(
                "[PHASE: install] [STEP: environment] placeholder appears {} times, skipped (key={})",
                many.len(),
                p.key
            ),
        }
    }

    lines.concat()
}

/// Read `KEY=value` from an env-style file. Later assignments win; quotes are stripped.
pub fn read_env_value(path: &Path, key: &str) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    let prefix = format!("{}=", key);
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.starts_with('#'))
        .filter_map(|l| l.strip_prefix(prefix.as_str()))
        .last()
        .map(|v| v.trim().trim_matches('"').trim_matches('\'').to_string())
        .filter(|v| !v.is_empty())
}

/// Create `path` with owner-only permissions; fails if it already exists.
fn write_private_file(path: &Path, content: &str) -> std::io::Result<()> {
    let mut opts = OpenOptions::new();
    opts.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    let mut file = opts.open(path)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()
}

impl EnvironmentSource for EnvironmentMaterializer<'_> {
    fn ensure(&self, template: &Path, target: &Path) -> Result<EnvOutcome, EnvError> {
        // Existence check precedes any secret generation.
        if target.exists() {
            info!(
                "[PHASE: install] [STEP: environment] {:?} already present; left untouched",
                target
            );
            return Ok(EnvOutcome::AlreadyPresent);
        }
        if !template.is_file() {
            return Err(EnvError::TemplateMissing(template.to_path_buf()));
        }

        let text = std::fs::read_to_string(template).map_err(|e| EnvError::Io {
            action: "read",
            path: template.to_path_buf(),
            source: e,
        })?;

        let bundle = SecretBundle::generate(self.source).map_err(EnvError::Secrets)?;
        let rendered =
            substitute_placeholders(&text, self.placeholders, |f| bundle.get(f).to_string());

        write_private_file(target, &rendered).map_err(|e| EnvError::Io {
            action: "write",
            path: target.to_path_buf(),
            source: e,
        })?;

        info!(
            "[PHASE: install] [STEP: environment] created {:?} (postgres_user={}, postgres_admin={}, app_secret_key={}, app_salt={}, initial_admin={})",
            target,
            secret_fingerprint(&bundle.postgres_user_secret),
            secret_fingerprint(&bundle.postgres_admin_secret),
            secret_fingerprint(&bundle.app_secret_key),
            secret_fingerprint(&bundle.app_salt),
            secret_fingerprint(&bundle.initial_admin_secret),
        );

        if let Some(admin_path) = &self.admin_secret_path {
            match write_private_file(admin_path, &format!("{}\n", bundle.initial_admin_secret)) {
                Ok(()) => info!(
                    "[PHASE: install] [STEP: environment] initial admin secret written to {:?}; delete it after first login",
                    admin_path
                ),
                Err(e) => warn!(
                    "[PHASE: install] [STEP: environment] could not write {:?}: {}",
                    admin_path, e
                ),
            }
        }

        Ok(EnvOutcome::Created(bundle))
    }
}
