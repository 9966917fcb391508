//! Security issue types and severity definitions
//!
//! This module contains the core type definitions for security scanning.

use serde::{Deserialize, Serialize};

/// Security issue found in script
#[derive(Debug, Clone)]
pub struct SecurityIssue {
    /// Rule ID that triggered this issue
    pub rule_id: String,
    /// Issue severity
    pub severity: SecuritySeverity,
    /// Issue type/category
    pub issue_type: SecurityIssueType,
    /// Line number where issue was found
    pub line_number: usize,
    /// Description of the issue
    pub description: String,
    /// The code snippet that triggered the issue
    pub code_snippet: String,
}

/// Severity levels for security issues
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecuritySeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Types of security issues
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityIssueType {
    FileOperation,
    NetworkRequest,
    CodeInjection,
    MemoryBomb,
    ProcessExecution,
    SystemAccess,
    DangerousModule,
    /// High-entropy line detected — likely obfuscated/encoded payload
    ObfuscatedCode,
    /// Scan process failed (timeout, IO error, etc.) — fail-secure
    ScanError,
}

impl std::fmt::Display for SecurityIssueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecurityIssueType::FileOperation => write!(f, "File Operation"),
            SecurityIssueType::NetworkRequest => write!(f, "Network Request"),
            SecurityIssueType::CodeInjection => write!(f, "Code Injection"),
            SecurityIssueType::MemoryBomb => write!(f, "Memory Bomb"),
            SecurityIssueType::ProcessExecution => write!(f, "Process Execution"),
            SecurityIssueType::SystemAccess => write!(f, "System Access"),
            SecurityIssueType::DangerousModule => write!(f, "Dangerous Module"),
            SecurityIssueType::ObfuscatedCode => write!(f, "Obfuscated Code"),
            SecurityIssueType::ScanError => write!(f, "Scan Error"),
        }
    }
}

/// Per-severity issue counts for a scan.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub low: usize,
    pub medium: usize,
    pub high: usize,
    pub critical: usize,
}

impl SeverityCounts {
    pub fn from_issues(issues: &[SecurityIssue]) -> Self {
        let mut counts = Self::default();
        for issue in issues {
            match issue.severity {
                SecuritySeverity::Low => counts.low += 1,
                SecuritySeverity::Medium => counts.medium += 1,
                SecuritySeverity::High => counts.high += 1,
                SecuritySeverity::Critical => counts.critical += 1,
            }
        }
        counts
    }
}

/// Result of scanning a script
#[derive(Debug, Clone)]
pub struct ScanResult {
    /// Whether the script is safe to execute (no Critical/High issues)
    pub is_safe: bool,
    /// List of security issues found
    pub issues: Vec<SecurityIssue>,
    /// Fresh UUIDv4 identifying this scan; correlates a confirmation with the
    /// scan that triggered it.
    pub scan_id: String,
    /// SHA-256 digest (hex) of the scanned source. Stable across re-scans of
    /// unchanged content; the Approval Cache is keyed on this.
    pub code_hash: String,
    /// Issue counts broken down by severity.
    pub counters: SeverityCounts,
    /// UTC timestamp the scan completed.
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// `true` iff `counters.critical + counters.high > 0`.
    pub requires_confirmation: bool,
}
