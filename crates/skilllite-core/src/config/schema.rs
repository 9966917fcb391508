//! Domain-grouped configuration structs, loaded from environment with a
//! shared fallback/alias policy (see `env_keys`, `loader`).

use super::env_keys::execution as exec_keys;
use super::env_keys::observability as obv_keys;
use super::loader::{env_bool, env_optional, env_or};
use std::path::PathBuf;

/// Workspace and output path configuration.
#[derive(Debug, Clone)]
pub struct PathsConfig {
    pub workspace: String,
    pub output_dir: Option<String>,
    /// Root directory sandboxed skill paths must resolve under.
    pub skills_root: Option<String>,
}

impl PathsConfig {
    pub fn from_env() -> Self {
        super::loader::load_dotenv();
        let workspace =
            env_optional(super::env_keys::paths::SKILLLITE_WORKSPACE, &[]).unwrap_or_else(|| {
                std::env::current_dir()
                    .unwrap_or_else(|_| PathBuf::from("."))
                    .to_string_lossy()
                    .to_string()
            });

        let output_dir = env_optional(super::env_keys::paths::SKILLLITE_OUTPUT_DIR, &[]);

        let skills_root =
            env_optional(super::env_keys::paths::SKILLLITE_SKILLS_ROOT, super::env_keys::paths::SKILLS_ROOT_ALIASES);

        Self {
            workspace,
            output_dir,
            skills_root,
        }
    }
}

/// Observability configuration: quiet, log_level, log_json, audit_log, security_events_log.
///
/// Read once per process and cached — components consult this instead of
/// reading `std::env` directly.
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub quiet: bool,
    pub log_level: String,
    pub log_json: bool,
    pub audit_log: Option<String>,
    pub security_events_log: Option<String>,
}

impl ObservabilityConfig {
    pub fn from_env() -> &'static Self {
        use std::sync::OnceLock;
        static CACHE: OnceLock<ObservabilityConfig> = OnceLock::new();
        CACHE.get_or_init(|| {
            super::loader::load_dotenv();
            let quiet = env_bool(obv_keys::SKILLLITE_QUIET, obv_keys::QUIET_ALIASES, false);
            let log_level = env_or(
                obv_keys::SKILLLITE_LOG_LEVEL,
                obv_keys::LOG_LEVEL_ALIASES,
                || "skilllite=info".to_string(),
            );
            let log_json = env_bool(obv_keys::SKILLLITE_LOG_JSON, obv_keys::LOG_JSON_ALIASES, false);
            let audit_log = env_optional(obv_keys::SKILLLITE_AUDIT_LOG, obv_keys::AUDIT_LOG_ALIASES);
            let security_events_log = env_optional(obv_keys::SKILLLITE_SECURITY_EVENTS_LOG, &[]);
            Self {
                quiet,
                log_level,
                log_json,
                audit_log,
                security_events_log,
            }
        })
    }
}

/// Execution Context fields: sandbox level, network, resource limits,
/// confirmation auto-approve, and the sandbox-disable escape hatch.
///
/// Read fresh on every call (not cached) since CLI flags and RPC params
/// take precedence over these and are resolved per invocation.
#[derive(Debug, Clone)]
pub struct ExecutionEnvConfig {
    pub sandbox_level: Option<u8>,
    pub allow_network: Option<bool>,
    pub timeout_secs: Option<u64>,
    pub max_memory_mb: Option<u64>,
    pub auto_approve: bool,
    pub no_sandbox: bool,
}

impl ExecutionEnvConfig {
    pub fn from_env() -> Self {
        super::loader::load_dotenv();
        let sandbox_level = env_optional(exec_keys::SANDBOX_LEVEL, exec_keys::SANDBOX_LEVEL_ALIASES)
            .and_then(|v| v.trim().parse::<u8>().ok());
        let allow_network = env_optional(exec_keys::ALLOW_NETWORK, exec_keys::ALLOW_NETWORK_ALIASES)
            .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"));
        let timeout_secs = env_optional(exec_keys::TIMEOUT_SECS, exec_keys::TIMEOUT_SECS_ALIASES)
            .and_then(|v| v.trim().parse::<u64>().ok());
        let max_memory_mb = env_optional(exec_keys::MAX_MEMORY_MB, exec_keys::MAX_MEMORY_MB_ALIASES)
            .and_then(|v| v.trim().parse::<u64>().ok());
        // A security-sensitive flag: only an explicit "1"/"true"/"yes" opts
        // in, unlike env_bool's blacklist semantics which would auto-approve
        // on any unrecognized value.
        let auto_approve = env_optional(exec_keys::AUTO_APPROVE, exec_keys::AUTO_APPROVE_ALIASES)
            .is_some_and(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"));
        let no_sandbox = env_optional(exec_keys::NO_SANDBOX, exec_keys::NO_SANDBOX_ALIASES).is_some();

        Self {
            sandbox_level,
            allow_network,
            timeout_secs,
            max_memory_mb,
            auto_approve,
            no_sandbox,
        }
    }
}

/// Cache directory configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig;

impl CacheConfig {
    pub fn cache_dir() -> Option<String> {
        super::loader::load_dotenv();
        env_optional(
            super::env_keys::cache::SKILLLITE_CACHE_DIR,
            super::env_keys::cache::CACHE_DIR_ALIASES,
        )
    }
}
