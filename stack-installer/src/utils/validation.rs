// Input validation utilities

use anyhow::Result;
use regex::Regex;

/// Validate the installation folder name (single path component, no traversal).
pub fn validate_folder_name(name: &str) -> Result<()> {
    let s = name.trim();
    if s.is_empty() {
        return Err(anyhow::anyhow!("Folder name cannot be empty"));
    }
    if s == "." || s == ".." {
        return Err(anyhow::anyhow!("Folder name cannot be '.' or '..'"));
    }
    if s.len() > 128 {
        return Err(anyhow::anyhow!("Folder name cannot exceed 128 characters"));
    }

    let re = Regex::new(r"^[A-Za-z0-9._-]+$")
        .map_err(|e| anyhow::anyhow!("Internal error: failed to compile folder regex: {}", e))?;
    if !re.is_match(s) {
        return Err(anyhow::anyhow!(
            "Folder name '{}' may only contain letters, digits, '.', '_' and '-'",
            s
        ));
    }
    Ok(())
}

/// Validate a compose service name as accepted by the runtime.
pub fn validate_service_name(name: &str) -> Result<()> {
    let re = Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_.-]*$")
        .map_err(|e| anyhow::anyhow!("Internal error: failed to compile service regex: {}", e))?;
    if !re.is_match(name) {
        return Err(anyhow::anyhow!("Invalid service name '{}'", name));
    }
    Ok(())
}

/// Validate a repository remote. Accepts http(s)/ssh/git/file URLs and scp-style
/// `user@host:path` remotes.
pub fn validate_remote_url(remote: &str) -> Result<()> {
    let s = remote.trim();
    if s.is_empty() {
        return Err(anyhow::anyhow!("Repository URL cannot be empty"));
    }

    if let Ok(parsed) = url::Url::parse(s) {
        return match parsed.scheme() {
            "http" | "https" | "ssh" | "git" | "file" => Ok(()),
            other => Err(anyhow::anyhow!(
                "Unsupported repository URL scheme '{}'",
                other
            )),
        };
    }

    let scp = Regex::new(r"^[A-Za-z0-9._-]+@[A-Za-z0-9.-]+:[^\s]+$")
        .map_err(|e| anyhow::anyhow!("Internal error: failed to compile remote regex: {}", e))?;
    if scp.is_match(s) {
        return Ok(());
    }
    Err(anyhow::anyhow!("Invalid repository URL '{}'", s))
}

/// Validate the readiness probe URL (must be absolute http/https).
pub fn validate_probe_url(probe: &str) -> Result<url::Url> {
    let parsed = url::Url::parse(probe.trim())
        .map_err(|e| anyhow::anyhow!("Invalid readiness URL '{}': {}", probe, e))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(anyhow::anyhow!(
            "Readiness URL must be http or https (got '{}')",
            other
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_name_rules() {
        assert!(validate_folder_name("iris-web").is_ok());
        assert!(validate_folder_name("stack_v2.1").is_ok());
        assert!(validate_folder_name("").is_err());
        assert!(validate_folder_name("..").is_err());
        assert!(validate_folder_name("a/b").is_err());
        assert!(validate_folder_name("with space").is_err());
    }

    #[test]
    fn service_name_rules() {
        assert!(validate_service_name("app").is_ok());
        assert!(validate_service_name("worker_1").is_ok());
        assert!(validate_service_name("-rm").is_err());
        assert!(validate_service_name("a b").is_err());
    }

    #[test]
    fn remote_url_accepts_common_forms() {
        assert!(validate_remote_url("https://github.com/dfir-iris/iris-web.git").is_ok());
        assert!(validate_remote_url("git@github.com:dfir-iris/iris-web.git").is_ok());
        assert!(validate_remote_url("file:///srv/git/stack.git").is_ok());
        assert!(validate_remote_url("ftp://example.com/repo").is_err());
        assert!(validate_remote_url("   ").is_err());
    }

    #[test]
    fn probe_url_requires_http() {
        assert!(validate_probe_url("https://localhost/login").is_ok());
        assert!(validate_probe_url("localhost").is_err());
        assert!(validate_probe_url("ftp://localhost").is_err());
    }
}
