//! Audit & Event Sink (C8): tracing init, audit log, security events.
//!
//! Two independently configurable JSONL streams:
//! - audit: `confirmation_requested`, `confirmation_response`,
//!   `execution_started`, `execution_completed`
//! - security events: `security_scan_high`, `security_scan_approved`,
//!   `security_scan_rejected`
//!
//! Writes are best-effort append; any I/O error is swallowed — audit must
//! never take down an execution.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use chrono::Utc;
use serde_json::json;
use tracing_subscriber::{prelude::*, EnvFilter};

use crate::config::ObservabilityConfig;

/// Initialize tracing. Call once at process startup.
pub fn init_tracing() {
    let cfg = ObservabilityConfig::from_env();
    let level = if cfg.quiet {
        "skilllite=warn".to_string()
    } else {
        cfg.log_level.clone()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = if cfg.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .try_init()
    };
}

fn audit_path() -> Option<&'static str> {
    ObservabilityConfig::from_env().audit_log.as_deref()
}

fn security_events_path() -> Option<&'static str> {
    ObservabilityConfig::from_env().security_events_log.as_deref()
}

fn append_jsonl(path: &str, record: &serde_json::Value) {
    if let Some(parent) = Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(path) {
        if let Ok(line) = serde_json::to_string(record) {
            let _ = writeln!(f, "{}", line);
        }
    }
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Audit: `confirmation_requested`.
pub fn audit_confirmation_requested(skill_id: &str, code_hash: &str, issues_count: usize, severity: &str) {
    if let Some(path) = audit_path() {
        append_jsonl(
            path,
            &json!({
                "ts": now_iso(),
                "event": "confirmation_requested",
                "skill_id": skill_id,
                "code_hash": code_hash,
                "issues_count": issues_count,
                "severity": severity,
                "source": "rust"
            }),
        );
    }
}

/// Audit: `confirmation_response`. `source` ∈ {user, auto, remembered}.
pub fn audit_confirmation_response(skill_id: &str, approved: bool, source: &str) {
    if let Some(path) = audit_path() {
        append_jsonl(
            path,
            &json!({
                "ts": now_iso(),
                "event": "confirmation_response",
                "skill_id": skill_id,
                "approved": approved,
                "source": source
            }),
        );
    }
}

/// Audit: `execution_started`.
pub fn audit_execution_started(skill_id: &str, cmd: &str, args: &[&str], cwd: &str) {
    if let Some(path) = audit_path() {
        append_jsonl(
            path,
            &json!({
                "ts": now_iso(),
                "event": "execution_started",
                "skill_id": skill_id,
                "cmd": cmd,
                "args": args,
                "cwd": cwd,
                "source": "rust"
            }),
        );
    }
}

/// Audit: `execution_completed`.
pub fn audit_execution_completed(skill_id: &str, exit_code: i32, duration_ms: u64, stdout_len: usize) {
    if let Some(path) = audit_path() {
        append_jsonl(
            path,
            &json!({
                "ts": now_iso(),
                "event": "execution_completed",
                "skill_id": skill_id,
                "exit_code": exit_code,
                "duration_ms": duration_ms,
                "stdout_len": stdout_len,
                "success": exit_code == 0,
                "source": "rust"
            }),
        );
    }
}

/// Security event: scan found High/Critical issues.
pub fn security_scan_high(skill_id: &str, severity: &str, issues: &serde_json::Value) {
    if let Some(path) = security_events_path() {
        append_jsonl(
            path,
            &json!({
                "ts": now_iso(),
                "type": "security_scan_high",
                "category": "code_scan",
                "skill_id": skill_id,
                "details": { "severity": severity, "issues": issues }
            }),
        );
    }
}

/// Security event: user approved after a High/Critical scan.
pub fn security_scan_approved(skill_id: &str, scan_id: &str, issues_count: usize) {
    tracing::info!(skill_id = %skill_id, scan_id = %scan_id, issues_count, "scan approved by user");
    if let Some(path) = security_events_path() {
        append_jsonl(
            path,
            &json!({
                "ts": now_iso(),
                "type": "security_scan_approved",
                "category": "code_scan",
                "skill_id": skill_id,
                "details": { "scan_id": scan_id, "issues_count": issues_count, "decision": "approved" }
            }),
        );
    }
}

/// Security event: user rejected after a High/Critical scan.
pub fn security_scan_rejected(skill_id: &str, scan_id: &str, issues_count: usize) {
    tracing::info!(skill_id = %skill_id, scan_id = %scan_id, issues_count, "scan rejected by user");
    if let Some(path) = security_events_path() {
        append_jsonl(
            path,
            &json!({
                "ts": now_iso(),
                "type": "security_scan_rejected",
                "category": "code_scan",
                "skill_id": skill_id,
                "details": { "scan_id": scan_id, "issues_count": issues_count, "decision": "rejected" }
            }),
        );
    }
}

/// Security event: a skill declares `requires_elevated_permissions`. Never
/// silent — every such skill gets one of these on every run regardless of
/// whether the run ultimately succeeds.
pub fn security_elevated_permissions_declared(skill_id: &str) {
    tracing::warn!(skill_id = %skill_id, "skill declares requires_elevated_permissions");
    if let Some(path) = security_events_path() {
        append_jsonl(
            path,
            &json!({
                "ts": now_iso(),
                "type": "elevated_permissions_declared",
                "category": "code_scan",
                "skill_id": skill_id,
                "details": {}
            }),
        );
    }
}

/// Security event: sandbox backend fell back to a weaker isolation mode.
pub fn security_sandbox_fallback(skill_id: &str, reason: &str) {
    tracing::warn!(skill_id = %skill_id, reason = %reason, "sandbox fallback to weaker isolation");
    if let Some(path) = security_events_path() {
        append_jsonl(
            path,
            &json!({
                "ts": now_iso(),
                "type": "sandbox_fallback",
                "category": "runtime",
                "skill_id": skill_id,
                "details": { "reason": reason }
            }),
        );
    }
}

/// Security event: a runtime network request was blocked by policy.
pub fn security_blocked_network(skill_id: &str, blocked_target: &str, reason: &str) {
    tracing::warn!(skill_id = %skill_id, blocked_target = %blocked_target, reason = %reason, "blocked network request");
    if let Some(path) = security_events_path() {
        append_jsonl(
            path,
            &json!({
                "ts": now_iso(),
                "type": "security_blocked",
                "category": "network",
                "skill_id": skill_id,
                "details": { "blocked_target": blocked_target, "reason": reason }
            }),
        );
    }
}
