// Installer configuration
//
// Layering (lowest to highest precedence):
// 1. Built-in defaults for the detected host platform
// 2. Optional TOML file (`--config`, else `./stack-installer.toml` when present)
// 3. `STACK_INSTALLER__<SECTION>__<KEY>` environment variables
// 4. CLI flags (applied by the caller on the deserialized struct)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::security::secrets::SecretField;
use crate::utils::os_detection::{detect_platform, HostPlatform};
use crate::utils::path_resolver::default_config_file;

const ENV_PREFIX: &str = "STACK_INSTALLER";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallerConfig {
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    pub target: TargetConfig,
    pub binaries: BinaryPaths,
    pub runtime: RuntimeConfig,
    pub environment: EnvironmentConfig,
    pub stack: StackConfig,
    pub readiness: ReadinessConfig,
    pub preflight: PreflightConfig,
    pub resume: ResumeConfig,
    pub backup: BackupConfig,
    pub patch: PatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Parent directory of the checkout. `None` means the user's home directory.
    #[serde(default)]
    pub parent_directory: Option<PathBuf>,
    pub folder_name: String,
    pub remote_url: String,
}

/// Locations of the external tools. Plain names are resolved through PATH by the OS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinaryPaths {
    pub docker: String,
    pub docker_compose: String,
    pub git: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Exit code 0 means the compatibility layer is present. Empty = always present.
    #[serde(default)]
    pub compat_probe_command: Vec<String>,
    #[serde(default)]
    pub compat_install_command: Vec<String>,
    #[serde(default)]
    pub install_command: Vec<String>,
    #[serde(default)]
    pub start_command: Vec<String>,
    pub install_timeout_secs: u64,
    pub wait_window_secs: u64,
    pub wait_interval_secs: u64,
}

impl RuntimeConfig {
    pub fn wait_window(&self) -> Duration {
        Duration::from_secs(self.wait_window_secs)
    }

    pub fn wait_interval(&self) -> Duration {
        Duration::from_secs(self.wait_interval_secs.max(1))
    }
}

/// One literal placeholder in the environment template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placeholder {
    /// Key written on the substituted line (`KEY=<secret>`).
    pub key: String,
    /// Exact line text expected in the pristine template.
    pub literal: String,
    pub secret: SecretField,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub template_file: String,
    pub env_file: String,
    /// When set, the initial admin secret is also written to this file in the target root.
    #[serde(default)]
    pub admin_secret_file: Option<String>,
    pub placeholders: Vec<Placeholder>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackConfig {
    /// Compose file relative to the target root. `None` lets compose discover it.
    #[serde(default)]
    pub compose_file: Option<String>,
    pub pull_timeout_secs: u64,
    pub up_timeout_secs: u64,
    pub command_timeout_secs: u64,
    pub default_log_service: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessConfig {
    pub url: String,
    pub timeout_secs: u64,
    pub interval_secs: u64,
    pub request_timeout_secs: u64,
    pub success_codes: Vec<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreflightConfig {
    /// Host ports that must be free before a first bring-up.
    #[serde(default)]
    pub ports: Vec<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeConfig {
    /// Scheduled task name (Windows) / systemd unit stem (Linux).
    pub task_name: String,
    pub systemd_unit_dir: PathBuf,
    pub restart_delay_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Output directory. `None` means `<target>/backups`.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    pub service: String,
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchConfig {
    /// Module tree to copy (relative paths resolve against the working directory).
    pub module_source: PathBuf,
    /// Destination inside the target root.
    pub destination: String,
    /// Deployment manifest inside the target root.
    pub manifest: String,
    /// Line opening the section to patch (matched after trimming trailing whitespace).
    #[serde(default)]
    pub section: Option<String>,
    /// Line after which the new lines are inserted.
    pub anchor: String,
    pub lines: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

pub fn default_placeholders() -> Vec<Placeholder> {
    vec![
        Placeholder {
            key: "POSTGRES_PASSWORD".to_string(),
            literal: "POSTGRES_PASSWORD=__MUST_BE_CHANGED__".to_string(),
            secret: SecretField::PostgresUser,
        },
        Placeholder {
            key: "POSTGRES_ADMIN_PASSWORD".to_string(),
            literal: "POSTGRES_ADMIN_PASSWORD=__MUST_BE_CHANGED__".to_string(),
            secret: SecretField::PostgresAdmin,
        },
        Placeholder {
            key: "APP_SECRET_KEY".to_string(),
            literal: "APP_SECRET_KEY=AVerySuperSecretKey-SoNotThisOne".to_string(),
            secret: SecretField::AppSecretKey,
        },
        Placeholder {
            key: "APP_SECURITY_SALT".to_string(),
            literal: "APP_SECURITY_SALT=ARandomSalt-NotThisOneEither".to_string(),
            secret: SecretField::AppSalt,
        },
        Placeholder {
            key: "APP_ADM_PASSWORD".to_string(),
            literal: "#APP_ADM_PASSWORD=MySuperAdminPassword!".to_string(),
            secret: SecretField::InitialAdmin,
        },
    ]
}

impl InstallerConfig {
    /// Built-in defaults for a host platform.
    pub fn defaults_for(platform: HostPlatform) -> Self {
        let runtime = match platform {
            HostPlatform::Windows => RuntimeConfig {
                compat_probe_command: strings(&["wsl", "--status"]),
                compat_install_command: strings(&["wsl", "--install", "--no-distribution"]),
                install_command: strings(&[
                    "winget",
                    "install",
                    "-e",
                    "--id",
                    "Docker.DockerDesktop",
                    "--accept-package-agreements",
                    "--accept-source-agreements",
                ]),
                start_command: strings(&[
                    "cmd",
                    "/C",
                    "start",
                    "",
                    r"C:\Program Files\Docker\Docker\Docker Desktop.exe",
                ]),
                install_timeout_secs: 1800,
                wait_window_secs: 90,
                wait_interval_secs: 5,
            },
            HostPlatform::Linux | HostPlatform::Unknown => RuntimeConfig {
                compat_probe_command: Vec::new(),
                compat_install_command: Vec::new(),
                install_command: strings(&["sh", "-c", "curl -fsSL https://get.docker.com | sh"]),
                start_command: strings(&["systemctl", "start", "docker"]),
                install_timeout_secs: 1800,
                wait_window_secs: 90,
                wait_interval_secs: 5,
            },
        };

        Self {
            log_dir: None,
            target: TargetConfig {
                parent_directory: None,
                folder_name: "iris-web".to_string(),
                remote_url: "https://github.com/dfir-iris/iris-web.git".to_string(),
            },
            binaries: BinaryPaths {
                docker: "docker".to_string(),
                docker_compose: "docker-compose".to_string(),
                git: "git".to_string(),
            },
            runtime,
            environment: EnvironmentConfig {
                template_file: ".env.model".to_string(),
                env_file: ".env".to_string(),
                admin_secret_file: Some("initial_admin_password.txt".to_string()),
                placeholders: default_placeholders(),
            },
            stack: StackConfig {
                compose_file: None,
                pull_timeout_secs: 1800,
                up_timeout_secs: 600,
                command_timeout_secs: 120,
                default_log_service: "app".to_string(),
            },
            readiness: ReadinessConfig {
                url: "https://localhost".to_string(),
                timeout_secs: 180,
                interval_secs: 5,
                request_timeout_secs: 10,
                success_codes: vec![200, 302],
            },
            preflight: PreflightConfig { ports: vec![443] },
            resume: ResumeConfig {
                task_name: "StackInstallerResume".to_string(),
                systemd_unit_dir: PathBuf::from("/etc/systemd/system"),
                restart_delay_secs: 10,
            },
            backup: BackupConfig {
                dir: None,
                service: "db".to_string(),
                command: strings(&["pg_dumpall", "-U", "postgres"]),
                timeout_secs: 900,
            },
            patch: PatchConfig {
                module_source: PathBuf::from("modules/iris_e01_processor"),
                destination: "source/iris_e01_processor".to_string(),
                manifest: "docker-compose.base.yml".to_string(),
                section: Some("  worker:".to_string()),
                anchor: "    volumes:".to_string(),
                lines: strings(&[
                    "      - ./source/iris_e01_processor:/iriswebapp/dependencies/iris_e01_processor:ro",
                    "      - ./e01_processing:/opt/iris/e01_processing:ro",
                ]),
            },
        }
    }

    /// Load the layered configuration.
    ///
    /// `file` is required to exist when given explicitly; the default file is optional.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let defaults = Self::defaults_for(detect_platform());
        let explicit = file.is_some();
        let path = file
            .map(Path::to_path_buf)
            .unwrap_or_else(default_config_file);

        let built = config::Config::builder()
            .add_source(
                config::Config::try_from(&defaults)
                    .context("Failed to seed configuration defaults")?,
            )
            .add_source(config::File::from(path.as_path()).required(explicit))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to load configuration (file={:?})", path))?;

        let cfg: InstallerConfig = built
            .try_deserialize()
            .context("Configuration has an invalid shape")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        crate::utils::validation::validate_folder_name(&self.target.folder_name)?;
        crate::utils::validation::validate_remote_url(&self.target.remote_url)?;
        crate::utils::validation::validate_probe_url(&self.readiness.url)?;
        crate::utils::validation::validate_service_name(&self.backup.service)?;
        crate::utils::validation::validate_service_name(&self.stack.default_log_service)?;
        if self.readiness.success_codes.is_empty() {
            anyhow::bail!("readiness.success_codes must list at least one status code");
        }
        if self.backup.command.is_empty() {
            anyhow::bail!("backup.command cannot be empty");
        }
        if self.patch.lines.is_empty() {
            anyhow::bail!("patch.lines cannot be empty");
        }
        Ok(())
    }

    /// Render as TOML (used by the `config` subcommand).
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to render configuration as TOML")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_on_every_platform() {
        for p in [HostPlatform::Windows, HostPlatform::Linux, HostPlatform::Unknown] {
            InstallerConfig::defaults_for(p)
                .validate()
                .unwrap_or_else(|e| panic!("defaults for {:?} invalid: {}", p, e));
        }
    }

    #[test]
    fn linux_defaults_have_no_compat_layer_probe() {
        let cfg = InstallerConfig::defaults_for(HostPlatform::Linux);
        assert!(cfg.runtime.compat_probe_command.is_empty());
        let win = InstallerConfig::defaults_for(HostPlatform::Windows);
        assert_eq!(win.runtime.compat_probe_command[0], "wsl");
    }

    #[test]
    fn default_placeholders_cover_all_five_secrets() {
        let fields: Vec<SecretField> = default_placeholders().iter().map(|p| p.secret).collect();
        assert_eq!(fields.len(), 5);
        for f in [
            SecretField::PostgresUser,
            SecretField::PostgresAdmin,
            SecretField::AppSecretKey,
            SecretField::AppSalt,
            SecretField::InitialAdmin,
        ] {
            assert!(fields.contains(&f), "missing {:?}", f);
        }
    }

    #[test]
    fn load_applies_file_over_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("installer.toml");
        std::fs::write(
            &file,
            r#"
[target]
folder_name = "custom-stack"
remote_url = "https://example.com/stack.git"

[readiness]
url = "https://localhost:8443/login"
timeout_secs = 30
interval_secs = 2
request_timeout_secs = 5
success_codes = [200]
"#,
        )
        .unwrap();

        let cfg = InstallerConfig::load(Some(&file)).unwrap();
        assert_eq!(cfg.target.folder_name, "custom-stack");
        assert_eq!(cfg.readiness.timeout_secs, 30);
        assert_eq!(cfg.readiness.url, "https://localhost:8443/login");
        // Untouched sections keep their defaults.
        assert_eq!(cfg.environment.env_file, ".env");
    }

    // The config builder drops empty arrays, so empty command lists must deserialize
    // from an absent key.
    #[test]
    fn load_keeps_empty_runtime_commands() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("empty.toml");
        std::fs::write(&file, "").unwrap();

        let from_empty_file = InstallerConfig::load(Some(&file)).unwrap();
        let expected = InstallerConfig::defaults_for(detect_platform());
        assert_eq!(
            from_empty_file.runtime.compat_probe_command,
            expected.runtime.compat_probe_command
        );
        assert_eq!(from_empty_file.preflight.ports, expected.preflight.ports);

        let without_file = InstallerConfig::load(None).unwrap();
        assert_eq!(
            without_file.runtime.start_command,
            expected.runtime.start_command
        );
        assert_eq!(without_file.target.folder_name, expected.target.folder_name);
    }

    #[test]
    fn empty_command_lists_deserialize_from_absent_keys() {
        let rendered = r#"
install_timeout_secs = 600
wait_window_secs = 120
wait_interval_secs = 5
"#;
        let runtime: RuntimeConfig = toml::from_str(rendered).unwrap();
        assert!(runtime.compat_probe_command.is_empty());
        assert!(runtime.compat_install_command.is_empty());
        assert!(runtime.install_command.is_empty());
        assert!(runtime.start_command.is_empty());
    }

    #[test]
    fn load_rejects_missing_explicit_file() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("nope.toml");
        assert!(InstallerConfig::load(Some(&missing)).is_err());
    }

    #[test]
    fn to_toml_round_trips_section_names() {
        let cfg = InstallerConfig::defaults_for(HostPlatform::Linux);
        let rendered = cfg.to_toml().unwrap();
        assert!(rendered.contains("[target]"));
        assert!(rendered.contains("[readiness]"));
        assert!(rendered.contains("folder_name = \"iris-web\""));
    }
}
