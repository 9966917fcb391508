//! Static security scanner (C2): rule-based pattern matching over skill
//! entry-point source, run ahead of sandboxed execution.

pub mod default_rules;
pub mod policy;
pub mod rules;
pub mod scanner;
pub mod types;

pub use rules::{RulesConfig, SecurityRule, CONFIG_FILE_NAMES};
pub use scanner::{format_scan_result, format_scan_result_compact, format_scan_result_json, ScriptScanner};
pub use types::{ScanResult, SecurityIssue, SecurityIssueType, SecuritySeverity, SeverityCounts};
