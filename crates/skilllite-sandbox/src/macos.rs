#![cfg(target_os = "macos")]

use crate::common::{
    wait_with_timeout, DEFAULT_FILE_SIZE_LIMIT_MB, DEFAULT_MAX_MEMORY_MB, DEFAULT_MAX_PROCESSES,
    DEFAULT_TIMEOUT_SECS,
};
use crate::move_protection::{generate_log_tag, generate_move_blocking_rules, get_session_suffix};
use crate::network_proxy::{ProxyConfig, ProxyManager};
use crate::runner::{ExecutionResult, ResourceLimits, RuntimePaths, SandboxConfig};
use crate::security::policy::generate_seatbelt_mandatory_deny_patterns;
use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use tempfile::TempDir;

/// Execute a skill in a macOS sandbox with custom resource limits
pub fn execute_with_limits(
    skill_dir: &Path,
    runtime: &RuntimePaths,
    config: &SandboxConfig,
    input_json: &str,
    limits: ResourceLimits,
) -> Result<ExecutionResult> {
    if skilllite_core::config::ExecutionEnvConfig::from_env().no_sandbox {
        tracing::warn!("Sandbox disabled via SKILLLITE_NO_SANDBOX - running without protection");
        return execute_simple_with_limits(skill_dir, runtime, config, input_json, limits);
    }

    match execute_with_sandbox(skill_dir, runtime, config, input_json, limits) {
        Ok(result) if result.exit_code != -1 => Ok(result),
        Ok(_) | Err(_) => {
            skilllite_core::observability::security_sandbox_fallback(
                &config.name,
                "sandbox-exec failed, falling back to simple execution",
            );
            execute_simple_with_limits(skill_dir, runtime, config, input_json, limits)
        }
    }
}

/// Simple execution without sandbox (Level 1, or fallback when sandbox-exec is unavailable)
pub fn execute_simple_with_limits(
    skill_dir: &Path,
    runtime: &RuntimePaths,
    config: &SandboxConfig,
    input_json: &str,
    limits: ResourceLimits,
) -> Result<ExecutionResult> {
    let entry_point = &config.entry_point;

    let temp_dir = TempDir::new()?;
    let work_dir = temp_dir.path();

    let mut cmd = match config.language.as_str() {
        "python" => {
            let mut c = Command::new(&runtime.python);
            c.arg(entry_point);
            c
        }
        "node" => {
            let mut c = Command::new(&runtime.node);
            c.arg(entry_point);
            if let Some(node_modules) = &runtime.node_modules {
                c.env("NODE_PATH", node_modules);
            }
            c
        }
        other => {
            anyhow::bail!("Unsupported language: {}", other);
        }
    };

    cmd.current_dir(skill_dir);
    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    cmd.env("SKILLLITE_SANDBOX", "0");
    cmd.env("TMPDIR", work_dir);

    if !config.network_enabled {
        cmd.env("SKILLLITE_NETWORK_DISABLED", "1");
    }

    let mut child = cmd.spawn().with_context(|| "Failed to spawn skill process")?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(input_json.as_bytes())
            .with_context(|| "Failed to write to stdin")?;
    }

    let memory_limit_bytes = limits.max_memory_bytes();
    let (stdout, stderr, exit_code, _, _) =
        wait_with_timeout(&mut child, limits.timeout_secs, memory_limit_bytes, false)?;

    Ok(ExecutionResult {
        stdout,
        stderr,
        exit_code,
    })
}

/// Execute with macOS sandbox-exec, resource limits and network proxy (pure Rust, no script injection)
fn execute_with_sandbox(
    skill_dir: &Path,
    runtime: &RuntimePaths,
    config: &SandboxConfig,
    input_json: &str,
    limits: ResourceLimits,
) -> Result<ExecutionResult> {
    use std::os::unix::process::CommandExt;

    let entry_point = &config.entry_point;

    let temp_dir = TempDir::new()?;
    let work_dir = temp_dir.path();

    let has_wildcard = config.network_outbound.iter().any(|d| d.trim() == "*");

    let proxy_manager = if config.network_enabled && !has_wildcard {
        let proxy_config = if config.network_outbound.is_empty() {
            ProxyConfig::block_all()
        } else {
            ProxyConfig::with_allowed_domains(config.network_outbound.clone())
        };

        match ProxyManager::new(proxy_config) {
            Ok(mut manager) => {
                if let Err(e) = manager.start() {
                    tracing::warn!("Failed to start network proxy: {}", e);
                    None
                } else {
                    tracing::info!(
                        http_port = ?manager.http_port(),
                        socks5_port = ?manager.socks5_port(),
                        "network proxy started"
                    );
                    Some(manager)
                }
            }
            Err(e) => {
                tracing::warn!("Failed to create network proxy: {}", e);
                None
            }
        }
    } else if has_wildcard {
        tracing::info!("network access allowed for all domains (wildcard '*' configured)");
        None
    } else {
        None
    };

    let profile_path = work_dir.join("sandbox.sb");
    let profile_content = generate_sandbox_profile_with_proxy(
        skill_dir,
        runtime,
        config,
        work_dir,
        proxy_manager.as_ref().and_then(|m| m.http_port()),
        proxy_manager.as_ref().and_then(|m| m.socks5_port()),
        has_wildcard,
    )?;
    fs::write(&profile_path, &profile_content)?;

    let (executable, args): (std::path::PathBuf, Vec<String>) = match config.language.as_str() {
        "python" => (runtime.python.clone(), vec![entry_point.to_string()]),
        "node" => (runtime.node.clone(), vec![entry_point.to_string()]),
        other => {
            anyhow::bail!("Unsupported language: {}", other);
        }
    };

    let mut cmd = Command::new("sandbox-exec");
    cmd.args(["-f", profile_path.to_str().unwrap()]);
    cmd.arg(&executable);
    cmd.args(&args);

    cmd.current_dir(skill_dir);
    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    cmd.env("SKILLLITE_SANDBOX", "1");
    cmd.env("TMPDIR", work_dir);
    cmd.env("HOME", work_dir);

    if config.language == "node" {
        if let Some(node_modules) = &runtime.node_modules {
            cmd.env("NODE_PATH", node_modules);
        }
    }

    if let Some(ref manager) = proxy_manager {
        for (key, value) in manager.get_proxy_env_vars() {
            cmd.env(&key, &value);
        }
    }

    // Apply resource limits via pre_exec (pure Rust, no script injection). Runs
    // in the child before exec, setting ulimits with setrlimit.
    let memory_limit_mb = DEFAULT_MAX_MEMORY_MB;
    let cpu_limit_secs = DEFAULT_TIMEOUT_SECS;
    let file_size_limit_mb = DEFAULT_FILE_SIZE_LIMIT_MB;
    let max_processes = DEFAULT_MAX_PROCESSES;

    unsafe {
        cmd.pre_exec(move || {
            use nix::libc::{rlimit, setrlimit, RLIMIT_AS, RLIMIT_CPU, RLIMIT_FSIZE, RLIMIT_NPROC};

            let memory_limit_bytes = memory_limit_mb * 1024 * 1024;
            let mem_limit = rlimit {
                rlim_cur: memory_limit_bytes,
                rlim_max: memory_limit_bytes,
            };
            setrlimit(RLIMIT_AS, &mem_limit);

            let cpu_limit = rlimit {
                rlim_cur: cpu_limit_secs,
                rlim_max: cpu_limit_secs,
            };
            setrlimit(RLIMIT_CPU, &cpu_limit);

            let file_limit_bytes = file_size_limit_mb * 1024 * 1024;
            let file_limit = rlimit {
                rlim_cur: file_limit_bytes,
                rlim_max: file_limit_bytes,
            };
            setrlimit(RLIMIT_FSIZE, &file_limit);

            let nproc_limit = rlimit {
                rlim_cur: max_processes,
                rlim_max: max_processes,
            };
            setrlimit(RLIMIT_NPROC, &nproc_limit);

            Ok(())
        });
    }

    let mut child = cmd.spawn().with_context(|| "Failed to spawn sandbox-exec")?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(input_json.as_bytes())
            .with_context(|| "Failed to write to stdin")?;
    }

    let memory_limit_bytes = limits.max_memory_bytes();
    let (stdout, stderr, exit_code, was_killed, kill_reason) =
        wait_with_timeout(&mut child, limits.timeout_secs, memory_limit_bytes, false)?;

    if exit_code == 1 && stderr.is_empty() && stdout.is_empty() && !was_killed {
        anyhow::bail!("sandbox-exec failed to execute");
    }

    if was_killed {
        if let Some(reason) = &kill_reason {
            skilllite_core::observability::security_sandbox_fallback(&config.name, reason);
        }
    }

    drop(proxy_manager);

    Ok(ExecutionResult {
        stdout,
        stderr,
        exit_code,
    })
}

/// Generate a Seatbelt sandbox profile for macOS with network proxy support.
///
/// Security controls (using allow-default with explicit deny):
/// 1. MANDATORY DENY: always block writes to shell configs, git hooks, IDE configs, etc.
/// 2. MOVE PROTECTION: block file movement to prevent bypass via mv/rename
/// 3. NETWORK: route through proxy when enabled, block all when disabled
/// 4. FILE READ: block sensitive files (/etc, ~/.ssh, etc.)
/// 5. FILE WRITE: block writes outside the work directory
/// 6. PROCESS: block execution of dangerous commands
/// 7. LOGTAG: embed a unique tag in deny rules for precise violation tracking
fn generate_sandbox_profile_with_proxy(
    skill_dir: &Path,
    runtime: &RuntimePaths,
    config: &SandboxConfig,
    work_dir: &Path,
    http_proxy_port: Option<u16>,
    socks5_proxy_port: Option<u16>,
    allow_all_network: bool,
) -> Result<String> {
    let skill_dir_str = skill_dir.to_string_lossy();
    let work_dir_str = work_dir.to_string_lossy();

    let command_desc = format!("skill:{}", config.name);
    let log_tag = generate_log_tag(&command_desc);

    let mut profile = String::new();

    profile.push_str("(version 1)\n\n");
    profile.push_str(&format!("; LogTag: {}\n", log_tag));
    profile.push_str(&format!("; SessionSuffix: {}\n\n", get_session_suffix()));

    profile.push_str("; SECURITY: Mandatory deny paths (auto-protected files)\n");
    profile.push_str("; These are ALWAYS blocked from writes, even within allowed paths\n");
    for pattern in generate_seatbelt_mandatory_deny_patterns() {
        let pattern_with_tag = if pattern.ends_with(')') {
            let without_close = &pattern[..pattern.len() - 1];
            format!("{}\n  (with message \"{}\"))", without_close, log_tag)
        } else {
            pattern
        };
        profile.push_str(&pattern_with_tag);
        profile.push('\n');
    }
    profile.push('\n');

    profile.push_str("; SECURITY: Move blocking rules (prevents bypass via mv/rename)\n");
    let protected_paths: Vec<String> = crate::security::policy::get_move_protection_paths();
    for rule in generate_move_blocking_rules(&protected_paths, &log_tag) {
        profile.push_str(&rule);
        profile.push('\n');
    }
    profile.push('\n');

    profile.push_str("; SECURITY: Block reading sensitive files\n");
    profile.push_str("(deny file-read* (subpath \"/etc\"))\n");
    profile.push_str("(deny file-read* (subpath \"/private/etc\"))\n");
    profile.push_str("(deny file-read* (regex #\"^/Users/[^/]+/\\.ssh\"))\n");
    profile.push_str("(deny file-read* (regex #\"^/Users/[^/]+/\\.aws\"))\n");
    profile.push_str("(deny file-read* (regex #\"^/Users/[^/]+/\\.gnupg\"))\n");
    profile.push_str("(deny file-read* (regex #\"^/Users/[^/]+/\\.kube\"))\n");
    profile.push_str("(deny file-read* (regex #\"^/Users/[^/]+/\\.docker\"))\n");
    profile.push_str("(deny file-read* (regex #\"^/Users/[^/]+/\\.config\"))\n");
    profile.push_str("(deny file-read* (regex #\"^/Users/[^/]+/\\.netrc\"))\n");
    profile.push_str("(deny file-read* (regex #\"^/Users/[^/]+/\\.npmrc\"))\n");
    profile.push_str("(deny file-read* (regex #\"^/Users/[^/]+/\\.pypirc\"))\n");
    profile.push_str("(deny file-read* (regex #\"^/Users/[^/]+/\\.bash_history\"))\n");
    profile.push_str("(deny file-read* (regex #\"^/Users/[^/]+/\\.zsh_history\"))\n");
    profile.push_str("(deny file-read* (regex #\"^/Users/[^/]+/Library/Keychains\"))\n");
    profile.push_str("(deny file-read* (regex #\"/\\.git/\"))\n");
    profile.push_str("(deny file-read* (regex #\"/\\.env$\"))\n");
    profile.push_str("(deny file-read* (regex #\"/\\.env\\.[^/]+$\"))\n");
    profile.push('\n');

    if !config.network_enabled {
        profile.push_str("; SECURITY: Network access DISABLED\n");
        profile.push_str("(deny network*)\n\n");
    } else if allow_all_network {
        profile.push_str("; SECURITY: Network access ALLOWED (wildcard '*' configured)\n");
        profile.push_str("(allow network*)\n\n");
        profile.push_str("; SECURITY: Loopback allowed for DNS only; other loopback services denied\n");
        profile.push_str("(deny network-outbound (remote tcp \"localhost:*\"))\n");
        profile.push_str("(deny network-outbound (remote udp \"localhost:*\"))\n");
        profile.push_str("(allow network-outbound (remote udp \"localhost:53\"))\n");
        profile.push_str("(allow network-outbound (remote tcp \"localhost:53\"))\n\n");
    } else if http_proxy_port.is_some() || socks5_proxy_port.is_some() {
        profile.push_str("; SECURITY: Network access via PROXY\n");
        profile.push_str(&format!(
            "; HTTP proxy port: {:?}, SOCKS5 proxy port: {:?}\n",
            http_proxy_port, socks5_proxy_port
        ));
        if let Some(http_port) = http_proxy_port {
            profile.push_str(&format!(
                "(allow network-outbound (remote tcp \"localhost:{}\"))\n",
                http_port
            ));
        }
        if let Some(socks_port) = socks5_proxy_port {
            profile.push_str(&format!(
                "(allow network-outbound (remote tcp \"localhost:{}\"))\n",
                socks_port
            ));
        }
        profile.push('\n');
    } else {
        profile.push_str("; SECURITY: Network access BLOCKED (deny-default mode)\n");
        profile.push_str("(deny network*)\n\n");
    }

    if config.network_enabled {
        // Metadata-service exfiltration guard: even when network is allowed
        // (wildcard or proxy), deny non-DNS loopback and link-local ranges.
        profile.push_str("; SECURITY: Deny link-local/metadata-service ranges regardless of network mode\n");
        profile.push_str("(deny network* (remote ip \"169.254.0.0/16\"))\n");
        profile.push_str("(deny network* (remote ip \"fe80::/10\"))\n\n");
    }

    profile.push_str("; SECURITY: Block dangerous commands\n");
    profile.push_str("(deny process-exec (literal \"/bin/bash\"))\n");
    profile.push_str("(deny process-exec (literal \"/bin/zsh\"))\n");
    profile.push_str("(deny process-exec (literal \"/bin/sh\"))\n");
    profile.push_str("(deny process-exec (literal \"/usr/bin/env\"))\n");
    profile.push_str("(deny process-exec (literal \"/usr/bin/curl\"))\n");
    profile.push_str("(deny process-exec (literal \"/usr/bin/wget\"))\n");
    profile.push_str("(deny process-exec (literal \"/usr/bin/ssh\"))\n");
    profile.push_str("(deny process-exec (literal \"/usr/bin/scp\"))\n");
    profile.push_str("(deny process-exec (literal \"/usr/bin/git\"))\n");
    profile.push_str("(deny process-exec (literal \"/bin/rm\"))\n");
    profile.push_str("(deny process-exec (literal \"/bin/chmod\"))\n");
    profile.push_str("(deny process-exec (literal \"/usr/bin/osascript\"))\n");
    profile.push('\n');

    profile.push_str("; SECURITY: File write restrictions (deny-default mode)\n");
    profile.push_str("(deny file-write*)\n\n");

    profile.push_str("; Allow writing to isolated work directory\n");
    profile.push_str(&format!("(allow file-write* (subpath \"{}\"))\n", work_dir_str));

    profile.push_str("; Allow writing to /var/folders for system temp files\n");
    profile.push_str("(allow file-write* (subpath \"/var/folders\"))\n");
    profile.push_str("(allow file-write* (subpath \"/private/var/folders\"))\n\n");

    profile.push_str("; Allow default for runtime compatibility (non-file-write operations)\n");
    profile.push_str("(allow default)\n\n");

    profile.push_str("; Allow reading skill directory\n");
    profile.push_str(&format!("(allow file-read* (subpath \"{}\"))\n", skill_dir_str));

    if !runtime.env_dir.as_os_str().is_empty() && runtime.env_dir.exists() {
        let env_dir_str = runtime.env_dir.to_string_lossy();
        profile.push_str(&format!("(allow file-read* (subpath \"{}\"))\n", env_dir_str));
    }
    profile.push('\n');

    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> SandboxConfig {
        SandboxConfig {
            name: "test".to_string(),
            entry_point: "main.py".to_string(),
            language: "python".to_string(),
            network_enabled: false,
            network_outbound: vec![],
            uses_playwright: false,
        }
    }

    fn test_runtime() -> RuntimePaths {
        RuntimePaths {
            python: std::path::PathBuf::from("python3"),
            node: std::path::PathBuf::from("node"),
            node_modules: None,
            env_dir: std::path::PathBuf::new(),
        }
    }

    #[test]
    fn profile_blocks_network_when_disabled() {
        let skill_dir = Path::new("/tmp/test_skill");
        let work_dir = Path::new("/tmp/work");
        let config = test_config();
        let runtime = test_runtime();

        let profile =
            generate_sandbox_profile_with_proxy(skill_dir, &runtime, &config, work_dir, None, None, false)
                .unwrap();

        assert!(profile.contains("(version 1)"));
        assert!(profile.contains("/tmp/test_skill"));
        assert!(profile.contains("(deny network*)"));
    }

    #[test]
    fn profile_allows_network_with_wildcard() {
        let skill_dir = Path::new("/tmp/test_skill");
        let work_dir = Path::new("/tmp/work");
        let mut config = test_config();
        config.network_enabled = true;
        let runtime = test_runtime();

        let profile =
            generate_sandbox_profile_with_proxy(skill_dir, &runtime, &config, work_dir, None, None, true)
                .unwrap();

        assert!(profile.contains("(allow network*)"));
    }

    #[test]
    fn profile_denies_link_local_even_with_wildcard_network() {
        let skill_dir = Path::new("/tmp/test_skill");
        let work_dir = Path::new("/tmp/work");
        let mut config = test_config();
        config.network_enabled = true;
        let runtime = test_runtime();

        let profile =
            generate_sandbox_profile_with_proxy(skill_dir, &runtime, &config, work_dir, None, None, true)
                .unwrap();

        assert!(profile.contains("169.254.0.0/16"));
        assert!(profile.contains("fe80::/10"));
    }
}
