//! Script scanner for detecting security issues
//!
//! This module provides the `ScriptScanner` struct for scanning scripts
//! for potential security issues before execution.

#![allow(dead_code)]

use super::default_rules::get_default_rules;
use super::rules::{RulesConfig, SecurityRule};
use super::types::{ScanResult, SecurityIssue, SecurityIssueType, SecuritySeverity, SeverityCounts};
use anyhow::{Context, Result};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

/// Script scanner for detecting security issues
pub struct ScriptScanner {
    /// Whether to allow network operations
    allow_network: bool,
    /// Whether to allow file operations
    allow_file_ops: bool,
    /// Whether to allow process execution
    allow_process_exec: bool,
    /// Compiled rules for scanning
    rules: Vec<(SecurityRule, Regex)>,
    /// Disabled rule IDs
    disabled_rules: Vec<String>,
}

impl Default for ScriptScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptScanner {
    /// Create a new scanner with default rules
    pub fn new() -> Self {
        let default_rules = get_default_rules();
        let compiled_rules = Self::compile_rules(&default_rules);

        Self {
            allow_network: false,
            allow_file_ops: false,
            allow_process_exec: false,
            rules: compiled_rules,
            disabled_rules: Vec::new(),
        }
    }

    /// Create a scanner with custom rules configuration
    pub fn with_config(config: &RulesConfig) -> Self {
        let mut rules = if config.use_default_rules {
            get_default_rules()
        } else {
            Vec::new()
        };

        // Add custom rules
        rules.extend(config.rules.clone());

        let compiled_rules = Self::compile_rules(&rules);

        Self {
            allow_network: false,
            allow_file_ops: false,
            allow_process_exec: false,
            rules: compiled_rules,
            disabled_rules: config.disabled_rules.clone(),
        }
    }

    /// Compile a list of rules into regex patterns
    fn compile_rules(rules: &[SecurityRule]) -> Vec<(SecurityRule, Regex)> {
        rules
            .iter()
            .filter(|r| r.enabled)
            .filter_map(|rule| match rule.compile() {
                Ok(regex) => Some((rule.clone(), regex)),
                Err(e) => {
                    tracing::warn!("Failed to compile rule '{}': {}", rule.id, e);
                    None
                }
            })
            .collect()
    }

    /// Set whether network operations are allowed
    pub fn allow_network(mut self, allowed: bool) -> Self {
        self.allow_network = allowed;
        self
    }

    /// Set whether file operations are allowed
    pub fn allow_file_ops(mut self, allowed: bool) -> Self {
        self.allow_file_ops = allowed;
        self
    }

    /// Set whether process execution is allowed
    pub fn allow_process_exec(mut self, allowed: bool) -> Self {
        self.allow_process_exec = allowed;
        self
    }

    /// Disable specific rules by ID
    pub fn disable_rules(mut self, rule_ids: &[&str]) -> Self {
        self.disabled_rules
            .extend(rule_ids.iter().map(|s| s.to_string()));
        self
    }

    /// Scan a script file for security issues
    pub fn scan_file(&self, script_path: &Path) -> Result<ScanResult> {
        let content = fs::read_to_string(script_path)
            .with_context(|| format!("Failed to read script file: {}", script_path.display()))?;

        self.scan_content(&content, script_path)
    }

    /// Scan script content for security issues
    pub fn scan_content(&self, content: &str, script_path: &Path) -> Result<ScanResult> {
        let language = detect_language(script_path);
        let mut issues = Vec::new();

        self.scan_with_rules(content, &language, &mut issues);

        let counters = SeverityCounts::from_issues(&issues);
        let is_safe = counters.critical + counters.high == 0;
        let requires_confirmation = counters.critical + counters.high > 0;
        let code_hash = hex::encode(Sha256::digest(content.as_bytes()));

        Ok(ScanResult {
            is_safe,
            issues,
            scan_id: uuid::Uuid::new_v4().to_string(),
            code_hash,
            counters,
            timestamp: chrono::Utc::now(),
            requires_confirmation,
        })
    }

    /// Scan content using the configured rules
    fn scan_with_rules(&self, content: &str, language: &str, issues: &mut Vec<SecurityIssue>) {
        let lines: Vec<&str> = content.lines().collect();

        for (line_idx, line) in lines.iter().enumerate() {
            // Skip comment lines to reduce false positives
            let trimmed = line.trim();
            if Self::is_comment_line(trimmed, language) {
                continue;
            }

            for (rule, regex) in &self.rules {
                // Skip disabled rules
                if self.disabled_rules.contains(&rule.id) {
                    continue;
                }

                // Check if rule applies to this language
                if !rule.languages.is_empty() && !rule.languages.contains(&language.to_string()) {
                    continue;
                }

                if regex.is_match(line) {
                    // Check if this should be allowed based on scanner settings
                    let should_report = match rule.issue_type {
                        SecurityIssueType::NetworkRequest => !self.allow_network,
                        SecurityIssueType::FileOperation => !self.allow_file_ops,
                        SecurityIssueType::ProcessExecution => !self.allow_process_exec,
                        _ => true,
                    };

                    if should_report {
                        issues.push(SecurityIssue {
                            rule_id: rule.id.clone(),
                            severity: rule.severity.clone(),
                            issue_type: rule.issue_type.clone(),
                            line_number: line_idx + 1,
                            description: rule.description.clone(),
                            code_snippet: trimmed.to_string(),
                        });
                    }
                }
            }
        }
    }

    /// Check if a line is a comment
    fn is_comment_line(line: &str, language: &str) -> bool {
        match language {
            "python" | "bash" => line.starts_with('#'),
            "javascript" | "node" => {
                line.starts_with("//") || line.starts_with("/*") || line.starts_with('*')
            }
            _ => false,
        }
    }
}

/// Detect programming language from file extension
fn detect_language(script_path: &Path) -> String {
    script_path
        .extension()
        .and_then(|e| e.to_str())
        .map(|ext| match ext.to_lowercase().as_str() {
            "py" => "python",
            "js" => "javascript",
            "ts" => "javascript",
            "sh" | "bash" => "bash",
            _ => "unknown",
        })
        .unwrap_or("unknown")
        .to_string()
}

/// Format scan result for display.
/// When `compact` is true and issues > 5, groups by rule and shows summary.
pub fn format_scan_result(result: &ScanResult) -> String {
    format_scan_result_impl(result, false)
}

/// Compact format for chat/CLI when there are many issues.
pub fn format_scan_result_compact(result: &ScanResult) -> String {
    format_scan_result_impl(result, true)
}

fn format_scan_result_impl(result: &ScanResult, compact: bool) -> String {
    if result.issues.is_empty() {
        return "✅ No security issues found. Script is safe to execute.".to_string();
    }

    let use_compact = compact && result.issues.len() > 5;

    if use_compact {
        // Group by (rule_id, severity) and count
        use std::collections::HashMap;
        let mut groups: HashMap<(String, String), usize> = HashMap::new();
        for issue in &result.issues {
            let severity_str = match issue.severity {
                SecuritySeverity::Low => "Low",
                SecuritySeverity::Medium => "Medium",
                SecuritySeverity::High => "High",
                SecuritySeverity::Critical => "Critical",
            };
            *groups
                .entry((issue.rule_id.clone(), severity_str.to_string()))
                .or_insert(0) += 1;
        }

        let mut output = format!(
            "📋 Security Scan: {} item(s) flagged for review\n\n",
            result.issues.len()
        );
        for ((rule_id, severity_str), count) in groups {
            let icon = match severity_str.as_str() {
                "Low" => "🟢",
                "Medium" => "🟡",
                "High" => "🟠",
                "Critical" => "🔴",
                _ => "⚪",
            };
            output.push_str(&format!("  {} {}× {} [{}]\n", icon, count, rule_id, severity_str));
        }
        if result.is_safe {
            output.push_str("\n✅ All clear - only informational items found.");
        } else {
            output.push_str("\n📝 Review complete. Awaiting your approval to proceed.");
        }
        return output;
    }

    let mut output = format!(
        "📋 Security Scan: {} item(s) flagged for review\n\n",
        result.issues.len()
    );

    for (idx, issue) in result.issues.iter().enumerate() {
        let severity_icon = match issue.severity {
            SecuritySeverity::Low => "🟢",
            SecuritySeverity::Medium => "🟡",
            SecuritySeverity::High => "🟠",
            SecuritySeverity::Critical => "🔴",
        };
        let severity_label = match issue.severity {
            SecuritySeverity::Low => "Low",
            SecuritySeverity::Medium => "Medium",
            SecuritySeverity::High => "High",
            SecuritySeverity::Critical => "Critical",
        };

        output.push_str(&format!(
            "  {} #{} [{}] {}\n",
            severity_icon, idx + 1, severity_label, issue.issue_type
        ));
        output.push_str(&format!("     ├─ Rule: {}\n", issue.rule_id));
        output.push_str(&format!("     ├─ Line {}: {}\n", issue.line_number, issue.description));
        output.push_str(&format!("     └─ Code: {}\n\n", issue.code_snippet));
    }

    if result.is_safe {
        output.push_str("✅ All clear - only informational items found.");
    } else {
        output.push_str("📝 Review complete. Awaiting your approval to proceed.");
    }

    output
}

/// Format scan result as structured JSON for machine parsing
pub fn format_scan_result_json(result: &ScanResult) -> String {
    let severity_str = |s: &SecuritySeverity| -> &str {
        match s {
            SecuritySeverity::Low => "Low",
            SecuritySeverity::Medium => "Medium",
            SecuritySeverity::High => "High",
            SecuritySeverity::Critical => "Critical",
        }
    };

    let issues_json: Vec<serde_json::Value> = result
        .issues
        .iter()
        .map(|issue| {
            serde_json::json!({
                "rule_id": issue.rule_id,
                "severity": severity_str(&issue.severity),
                "issue_type": issue.issue_type.to_string(),
                "line_number": issue.line_number,
                "description": issue.description,
                "code_snippet": issue.code_snippet,
            })
        })
        .collect();

    let output = serde_json::json!({
        "scan_id": result.scan_id,
        "code_hash": result.code_hash,
        "timestamp": result.timestamp.to_rfc3339(),
        "is_safe": result.is_safe,
        "requires_confirmation": result.requires_confirmation,
        "issues": issues_json,
        "counts": {
            "low": result.counters.low,
            "medium": result.counters.medium,
            "high": result.counters.high,
            "critical": result.counters.critical,
        },
        "high_severity_count": result.counters.high + result.counters.critical,
        "medium_severity_count": result.counters.medium,
        "low_severity_count": result.counters.low,
    });

    serde_json::to_string(&output).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn clean_script_has_no_confirmation_requirement() {
        let scanner = ScriptScanner::new();
        let result = scanner
            .scan_content("print('hello world')\n", &PathBuf::from("skill.py"))
            .unwrap();
        assert!(result.is_safe);
        assert!(!result.requires_confirmation);
        assert_eq!(result.counters.critical, 0);
        assert_eq!(result.counters.high, 0);
    }

    #[test]
    fn unchanged_source_yields_same_code_hash() {
        let scanner = ScriptScanner::new();
        let content = "import os\nos.system('rm -rf /')\n";
        let a = scanner.scan_content(content, &PathBuf::from("skill.py")).unwrap();
        let b = scanner.scan_content(content, &PathBuf::from("skill.py")).unwrap();
        assert_eq!(a.code_hash, b.code_hash);
        assert_ne!(a.scan_id, b.scan_id, "scan_id is fresh per scan even for identical source");
    }

    #[test]
    fn one_byte_change_invalidates_code_hash() {
        let scanner = ScriptScanner::new();
        let a = scanner.scan_content("x = 1\n", &PathBuf::from("skill.py")).unwrap();
        let b = scanner.scan_content("x = 2\n", &PathBuf::from("skill.py")).unwrap();
        assert_ne!(a.code_hash, b.code_hash);
    }

    #[test]
    fn critical_or_high_issue_requires_confirmation() {
        let scanner = ScriptScanner::new();
        let result = scanner
            .scan_content("eval(user_input)\n", &PathBuf::from("skill.py"))
            .unwrap();
        assert_eq!(
            result.requires_confirmation,
            result.counters.critical + result.counters.high > 0
        );
    }

    #[test]
    fn medium_only_issue_is_still_safe() {
        let scanner = ScriptScanner::new();
        let result = scanner
            .scan_content("f = open('data.txt')\n", &PathBuf::from("skill.py"))
            .unwrap();
        assert_eq!(result.counters.critical, 0);
        assert_eq!(result.counters.high, 0);
        assert!(result.counters.medium > 0, "expected open() to trigger a Medium finding");
        assert!(result.is_safe, "is_safe must only depend on critical+high, not medium");
        assert!(!result.requires_confirmation);
    }
}
