//! Append-only JSON-lines audit log of ledger transitions and wallet actions.
//! Disabled until a path is set.

use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static AUDIT_LOG_PATH: OnceLock<PathBuf> = OnceLock::new();

pub fn set_audit_log_path(path: &Path) {
    let _ = AUDIT_LOG_PATH.set(path.to_path_buf());
}

pub fn get_audit_log_path() -> Option<&'static Path> {
    AUDIT_LOG_PATH.get().map(PathBuf::as_path)
}

pub fn audit_event(event: &str, data: Value) {
    let Some(path) = get_audit_log_path() else {
        return;
    };

    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let log_line = serde_json::json!({
        "ts": chrono::Utc::now().to_rfc3339(),
        "event": event,
        "data": data
    });

    match std::fs::OpenOptions::new().create(true).append(true).open(path) {
        Ok(mut file) => {
            if let Err(e) = writeln!(file, "{}", log_line) {
                tracing::warn!(error = %e, "failed to append audit log");
            }
        }
        Err(e) => tracing::warn!(error = %e, path = %path.display(), "failed to open audit log"),
    }
}
