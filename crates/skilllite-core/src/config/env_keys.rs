//! Environment variable key constants and legacy aliases.
//!
//! Primary names use the `SKILLLITE_*` prefix; `SKILLBOX_*` is accepted as a
//! deprecated alias wherever one existed historically.

/// Skills root, workspace, output paths.
pub mod paths {
    pub const SKILLLITE_OUTPUT_DIR: &str = "SKILLLITE_OUTPUT_DIR";
    pub const SKILLLITE_WORKSPACE: &str = "SKILLLITE_WORKSPACE";

    /// Root directory sandboxed skill/script paths must resolve under.
    pub const SKILLLITE_SKILLS_ROOT: &str = "SKILLLITE_SKILLS_ROOT";
    pub const SKILLS_ROOT_ALIASES: &[&str] = &["SKILLBOX_SKILLS_ROOT"];
}

/// Cache directory for resolved skill environments (venv / node_modules).
pub mod cache {
    pub const SKILLLITE_CACHE_DIR: &str = "SKILLLITE_CACHE_DIR";
    pub const CACHE_DIR_ALIASES: &[&str] = &["SKILLBOX_CACHE_DIR", "AGENTSKILL_CACHE_DIR"];
}

/// Observability and logging.
pub mod observability {
    pub const SKILLLITE_QUIET: &str = "SKILLLITE_QUIET";
    pub const QUIET_ALIASES: &[&str] = &["SKILLBOX_QUIET"];

    pub const SKILLLITE_LOG_LEVEL: &str = "SKILLLITE_LOG_LEVEL";
    pub const LOG_LEVEL_ALIASES: &[&str] = &["SKILLBOX_LOG_LEVEL"];

    pub const SKILLLITE_LOG_JSON: &str = "SKILLLITE_LOG_JSON";
    pub const LOG_JSON_ALIASES: &[&str] = &["SKILLBOX_LOG_JSON"];

    pub const SKILLLITE_AUDIT_LOG: &str = "SKILLLITE_AUDIT_LOG";
    pub const AUDIT_LOG_ALIASES: &[&str] = &["SKILLBOX_AUDIT_LOG"];

    pub const SKILLLITE_SECURITY_EVENTS_LOG: &str = "SKILLLITE_SECURITY_EVENTS_LOG";
}

/// Execution Context fields: sandbox level, network, limits, approval.
/// `SKILLBOX_*` is the primary name here for historical reasons;
/// `SKILLLITE_*` is accepted as the forward-compatible alias.
pub mod execution {
    pub const SANDBOX_LEVEL: &str = "SKILLBOX_SANDBOX_LEVEL";
    pub const SANDBOX_LEVEL_ALIASES: &[&str] = &["SKILLLITE_SANDBOX_LEVEL"];

    pub const ALLOW_NETWORK: &str = "SKILLBOX_ALLOW_NETWORK";
    pub const ALLOW_NETWORK_ALIASES: &[&str] = &["SKILLLITE_ALLOW_NETWORK"];

    pub const TIMEOUT_SECS: &str = "SKILLBOX_TIMEOUT_SECS";
    pub const TIMEOUT_SECS_ALIASES: &[&str] = &["SKILLLITE_TIMEOUT_SECS"];

    pub const MAX_MEMORY_MB: &str = "SKILLBOX_MAX_MEMORY_MB";
    pub const MAX_MEMORY_MB_ALIASES: &[&str] = &["SKILLLITE_MAX_MEMORY_MB"];

    pub const AUTO_APPROVE: &str = "SKILLBOX_AUTO_APPROVE";
    pub const AUTO_APPROVE_ALIASES: &[&str] = &["SKILLLITE_AUTO_APPROVE"];

    pub const NO_SANDBOX: &str = "SKILLBOX_NO_SANDBOX";
    pub const NO_SANDBOX_ALIASES: &[&str] = &["SKILLLITE_NO_SANDBOX"];

    pub const ALLOW_PLAYWRIGHT: &str = "SKILLBOX_ALLOW_PLAYWRIGHT";
    pub const ALLOW_PLAYWRIGHT_ALIASES: &[&str] = &["SKILLLITE_ALLOW_PLAYWRIGHT"];
}
