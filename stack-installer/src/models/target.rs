// Installation target
//
// Resolved once at startup (CLI flags, then config, then defaults) and immutable for the run.

use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::config::InstallerConfig;
use crate::utils::path_resolver::resolve_default_parent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallationTarget {
    pub parent_directory: PathBuf,
    pub folder_name: String,
    pub remote_url: String,
    root: PathBuf,
}

impl InstallationTarget {
    pub fn new(
        parent_directory: impl Into<PathBuf>,
        folder_name: impl Into<String>,
        remote_url: impl Into<String>,
    ) -> Self {
        let parent_directory = parent_directory.into();
        let folder_name = folder_name.into();
        let root = parent_directory.join(&folder_name);
        Self {
            parent_directory,
            folder_name,
            remote_url: remote_url.into(),
            root,
        }
    }

    /// Build from the effective configuration (CLI overrides are already applied to it).
    pub fn from_config(cfg: &InstallerConfig) -> Self {
        let parent = cfg
            .target
            .parent_directory
            .clone()
            .unwrap_or_else(resolve_default_parent);
        Self::new(parent, cfg.target.folder_name.clone(), cfg.target.remote_url.clone())
    }

    /// `parent_directory/folder_name`.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn join(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.root.join(relative)
    }

    /// A version-control marker at the root means a previous clone exists.
    pub fn has_checkout(&self) -> bool {
        self.root.join(".git").exists()
    }
}
