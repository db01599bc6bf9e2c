// Logging utilities
// Structured logging with JSON and human-readable formats

use log::Level;
use serde_json::json;

/// Mask the value of a `KEY=value` assignment when the key names a credential.
///
/// Used for env-file lines and `-e KEY=value` style command arguments. Anything that
/// does not look like an assignment is returned unchanged.
pub fn mask_assignment(assignment: &str) -> String {
    let Some((k, _v)) = assignment.split_once('=') else {
        return assignment.to_string();
    };
    if is_secret_key(k) {
        return format!("{}=***", k);
    }
    assignment.to_string()
}

fn is_secret_key(key: &str) -> bool {
    let norm = key
        .trim()
        .trim_start_matches('#')
        .to_ascii_lowercase()
        .replace(['-', ' '], "_");
    norm.contains("password")
        || norm.contains("passwd")
        || norm.contains("secret")
        || norm.contains("salt")
        || norm.contains("token")
        || norm.ends_with("_key")
        || norm == "pwd"
}

/// Parse phase and step from log message
/// Extracts [PHASE: ...] and [STEP: ...] patterns
pub fn parse_log_metadata(message: &str) -> (Option<String>, Option<String>, String) {
    let mut phase = None;
    let mut step = None;
    let mut cleaned_message = message.to_string();

    if let Some(start) = cleaned_message.find("[PHASE:") {
        if let Some(end) = cleaned_message[start..].find(']') {
            phase = Some(cleaned_message[start + 7..start + end].trim().to_string());
            cleaned_message = format!(
                "{} {}",
                &cleaned_message[..start],
                &cleaned_message[start + end + 1..]
            )
            .trim()
            .to_string();
        }
    }

    if let Some(start) = cleaned_message.find("[STEP:") {
        if let Some(end) = cleaned_message[start..].find(']') {
            step = Some(cleaned_message[start + 6..start + end].trim().to_string());
            cleaned_message = format!(
                "{} {}",
                &cleaned_message[..start],
                &cleaned_message[start + end + 1..]
            )
            .trim()
            .to_string();
        }
    }

    (phase, step, cleaned_message)
}

/// Format log entry as JSON for structured logging
pub fn format_json_log(
    timestamp: &str,
    level: Level,
    target: &str,
    message: &str,
    phase: Option<&str>,
    step: Option<&str>,
) -> String {
    let mut log_entry = json!({
        "timestamp": timestamp,
        "level": level.as_str(),
        "target": target,
        "message": message,
    });

    if let Some(phase) = phase {
        log_entry["phase"] = json!(phase);
    }

    if let Some(step) = step {
        log_entry["step"] = json!(step);
    }

    serde_json::to_string(&log_entry).unwrap_or_else(|_| "{}".to_string())
}

/// Format log entry as human-readable text
pub fn format_human_readable_log(
    timestamp: &str,
    level: Level,
    target: &str,
    message: &str,
    phase: Option<&str>,
    step: Option<&str>,
) -> String {
    let mut log_line = format!("[{}] [{}]", timestamp, level.as_str());

    if let Some(phase) = phase {
        log_line.push_str(&format!(" [PHASE: {}]", phase));
    }

    if let Some(step) = step {
        log_line.push_str(&format!(" [STEP: {}]", step));
    }

    log_line.push_str(&format!(" [{}] {}", target, message));
    log_line
}

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------------------------------------------------------------
    // A) Credential masking
    // -------------------------------------------------------------------------

    #[test]
    fn mask_assignment_never_leaks_credential_values() {
        let cases = vec![
            ("POSTGRES_PASSWORD=hunter2hunter2", "POSTGRES_PASSWORD=***"),
            ("POSTGRES_ADMIN_PASSWORD=hunter2", "POSTGRES_ADMIN_PASSWORD=***"),
            ("APP_SECRET_KEY=abc", "APP_SECRET_KEY=***"),
            ("APP_SECURITY_SALT=abc", "APP_SECURITY_SALT=***"),
            ("#APP_ADM_PASSWORD=abc", "#APP_ADM_PASSWORD=***"),
        ];
        for (input, expected) in cases {
            assert_eq!(mask_assignment(input), expected, "input {}", input);
        }
    }

    #[test]
    fn mask_assignment_keeps_non_secret_values() {
        assert_eq!(mask_assignment("SERVER_NAME=iris.local"), "SERVER_NAME=iris.local");
        assert_eq!(mask_assignment("not-an-assignment"), "not-an-assignment");
    }

    // -------------------------------------------------------------------------
    // B) Metadata parsing / formatting
    // -------------------------------------------------------------------------

    #[test]
    fn parse_log_metadata_extracts_phase_and_step() {
        let (phase, step, msg) =
            parse_log_metadata("[PHASE: install] [STEP: runtime] daemon is ready");
        assert_eq!(phase.as_deref(), Some("install"));
        assert_eq!(step.as_deref(), Some("runtime"));
        assert_eq!(msg, "daemon is ready");
    }

    #[test]
    fn parse_log_metadata_without_tags_is_passthrough() {
        let (phase, step, msg) = parse_log_metadata("plain message");
        assert!(phase.is_none());
        assert!(step.is_none());
        assert_eq!(msg, "plain message");
    }

    #[test]
    fn format_json_log_includes_optional_fields() {
        let line = format_json_log(
            "2026-01-01T00:00:00Z",
            Level::Info,
            "stack_installer",
            "hello",
            Some("install"),
            None,
        );
        let v: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(v["phase"], "install");
        assert_eq!(v["level"], "INFO");
        assert!(v.get("step").is_none());
    }

    #[test]
    fn format_human_readable_log_layout() {
        let line = format_human_readable_log(
            "ts",
            Level::Warn,
            "t",
            "careful",
            Some("install"),
            Some("readiness"),
        );
        assert_eq!(line, "[ts] [WARN] [PHASE: install] [STEP: readiness] [t] careful");
    }
}
