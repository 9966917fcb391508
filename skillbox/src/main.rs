mod cli;
mod tool_call;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use serde_json::{json, Value};
use skilllite_core::config::{set_env_var, ScopedEnvGuard};
use skilllite_core::path_validation::{validate_path_under_root, validate_skill_path};
use skilllite_core::skill::discovery::discover_skills_in_workspace;
use skilllite_core::skill::metadata::{self, SkillMetadata};
use skilllite_sandbox::env::builder as env_builder;
use skilllite_sandbox::runner::{ResourceLimits, RuntimePaths, SandboxConfig, SandboxLevel};
use skilllite_sandbox::security::{format_scan_result, format_scan_result_json, ScriptScanner};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::Path;
use tool_call::decode_tool_call;

fn main() -> Result<()> {
    skilllite_core::observability::init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { stdio } => {
            if stdio {
                serve_stdio()?;
            }
        }
        Commands::Run {
            skill_dir,
            input_json,
            allow_network,
            cache_dir,
            max_memory,
            timeout,
            sandbox_level,
            auto_approve,
        } => {
            let input_json = if input_json == "-" {
                let mut s = String::new();
                std::io::stdin().read_to_string(&mut s)?;
                s
            } else {
                input_json
            };
            let _approve_guard = auto_approve_guard(auto_approve);
            let sandbox_level = SandboxLevel::from_env_or_cli(sandbox_level);
            let limits = ResourceLimits::from_env().with_cli_overrides(max_memory, timeout);
            let result = run_skill(
                &skill_dir,
                &input_json,
                allow_network,
                cache_dir.as_deref(),
                limits,
                sandbox_level,
            )?;
            println!("{}", result);
        }
        Commands::Scan { path, json: json_output } => {
            let result = scan_path(&path, json_output)?;
            println!("{}", result);
        }
        Commands::Validate { skill_dir } => {
            validate_skill(&skill_dir)?;
            println!("Skill validation passed!");
        }
        Commands::Info { skill_dir } => {
            show_skill_info(&skill_dir)?;
        }
        Commands::List { workspace, json: json_output } => {
            list_skills(&workspace, json_output)?;
        }
    }

    Ok(())
}

/// When `--auto-approve` is passed, set `SKILLLITE_AUTO_APPROVE=1` for the
/// confirmation gate and clear it again on drop so it never leaks beyond
/// this invocation.
fn auto_approve_guard(auto_approve: bool) -> Option<ScopedEnvGuard> {
    if !auto_approve {
        return None;
    }
    set_env_var("SKILLLITE_AUTO_APPROVE", "1");
    Some(ScopedEnvGuard("SKILLLITE_AUTO_APPROVE"))
}

/// IPC daemon: read JSON-RPC requests from stdin (one per line), write responses to stdout.
/// Request: {"jsonrpc":"2.0","id":1,"method":"scan_code"|"execute_code"|"run"|"exec"|"tool_call","params":{...}}
/// Response: {"jsonrpc":"2.0","id":1,"result":{...}} or {"jsonrpc":"2.0","id":1,"error":{...}}
fn serve_stdio() -> Result<()> {
    skilllite_core::config::init_daemon_env();

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let reader = BufReader::new(stdin.lock());

    for line in reader.lines() {
        let line = line.context("Failed to read stdin")?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let request: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                let err_resp = json!({
                    "jsonrpc": "2.0",
                    "id": null,
                    "error": {"code": -32700, "message": format!("Parse error: {}", e)}
                });
                writeln!(stdout, "{}", err_resp)?;
                stdout.flush()?;
                continue;
            }
        };

        let id = request.get("id").cloned().unwrap_or(Value::Null);
        let method = request.get("method").and_then(|m| m.as_str()).unwrap_or("");
        let params = request
            .get("params")
            .cloned()
            .unwrap_or(Value::Object(serde_json::Map::new()));

        let result = dispatch_rpc(method, &params);

        match result {
            Ok(res) => {
                let resp = json!({"jsonrpc": "2.0", "id": id, "result": res});
                writeln!(stdout, "{}", resp)?;
            }
            Err(e) => {
                let err_resp = json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": -32603, "message": e.to_string()}
                });
                writeln!(stdout, "{}", err_resp)?;
            }
        }
        stdout.flush()?;
    }

    Ok(())
}

fn dispatch_rpc(method: &str, params: &Value) -> Result<Value> {
    match method {
        "scan_code" => handle_scan_code(params),
        "execute_code" | "run" | "exec" => handle_execute_code(params),
        "tool_call" => {
            let call = decode_tool_call(params)?;
            let result = match call.name.as_str() {
                "scan_code" => handle_scan_code(&call.arguments),
                "execute_code" | "run" | "exec" => handle_execute_code(&call.arguments),
                other => Err(anyhow::anyhow!("unknown tool: {}", other)),
            };
            Ok(tool_call::format_tool_result(&call, &result))
        }
        _ => anyhow::bail!("Method not found: {}", method),
    }
}

fn handle_scan_code(params: &Value) -> Result<Value> {
    let p = params.as_object().context("params must be object")?;
    let path = p
        .get("script_path")
        .or_else(|| p.get("skill_dir"))
        .and_then(|v| v.as_str())
        .context("script_path or skill_dir required")?;
    let allow_network = p.get("allow_network").and_then(|v| v.as_bool()).unwrap_or(false);

    let scan_result = scan_single_path(path, allow_network)?;
    Ok(serde_json::from_str(&format_scan_result_json(&scan_result)).unwrap_or(Value::Null))
}

fn handle_execute_code(params: &Value) -> Result<Value> {
    let p = params.as_object().context("params must be object")?;
    let skill_dir = p.get("skill_dir").and_then(|v| v.as_str()).context("skill_dir required")?;
    let input_json = p.get("input_json").and_then(|v| v.as_str()).context("input_json required")?;
    let allow_network = p.get("allow_network").and_then(|v| v.as_bool()).unwrap_or(false);
    let cache_dir = p.get("cache_dir").and_then(|v| v.as_str());
    let max_memory = p.get("max_memory").and_then(|v| v.as_u64());
    let timeout = p.get("timeout").and_then(|v| v.as_u64());
    let sandbox_level = p.get("sandbox_level").and_then(|v| v.as_u64()).map(|u| u as u8);

    let sandbox_level = SandboxLevel::from_env_or_cli(sandbox_level);
    let limits = ResourceLimits::from_env().with_cli_overrides(max_memory, timeout);

    // The Service always returns a value rather than raising: a blocked scan,
    // a denied confirmation, a timeout, etc. are outcomes, not protocol errors,
    // so they come back as a normal RPC result with success=false.
    match run_skill(skill_dir, input_json, allow_network, cache_dir, limits, sandbox_level) {
        Ok(output) => Ok(json!({
            "success": true,
            "output": output,
            "exit_code": 0,
            "error_kind": "None",
            "error_message": null,
        })),
        Err(e) => Ok(json!({
            "success": false,
            "output": null,
            "exit_code": 1,
            "error_kind": classify_error_kind(&e),
            "error_message": e.to_string(),
        })),
    }
}

/// Map an execution failure to the error_kind taxonomy: InvalidInput,
/// ScanBlocked, UserDenied, Timeout, ResourceLimit, SandboxViolation,
/// NonZeroExit, or Internal.
fn classify_error_kind(err: &anyhow::Error) -> &'static str {
    let msg = err.to_string();
    if msg.starts_with("ScanBlocked:") {
        "ScanBlocked"
    } else if msg.starts_with("UserDenied:") {
        "UserDenied"
    } else if msg.contains("exceeded timeout of") {
        "Timeout"
    } else if msg.contains("peak memory (")
        || msg.contains("memory usage (")
        || msg.contains("exceeded limit of") && msg.contains("bytes")
    {
        "ResourceLimit"
    } else if msg.contains("no entry point")
        || msg.contains("Invalid input JSON")
        || msg.contains("Entry point not found")
        || msg.contains("No YAML front matter")
        || msg.contains("Skill name is required")
        || msg.contains("not found")
    {
        "InvalidInput"
    } else if msg.contains("sandbox-exec") || msg.contains("LOGTAG") || msg.contains("SIGSYS") {
        "SandboxViolation"
    } else if msg.contains("failed with exit code") {
        "NonZeroExit"
    } else {
        "Internal"
    }
}

/// Build a `SandboxConfig` from parsed skill metadata, applying CLI/RPC overrides.
///
/// When the caller didn't explicitly request network (CLI flag left at its
/// `false` default, RPC param omitted), `SKILLBOX_ALLOW_NETWORK` /
/// `SKILLLITE_ALLOW_NETWORK` is consulted as a fallback.
fn sandbox_config_from_metadata(meta: &SkillMetadata, allow_network: bool) -> SandboxConfig {
    let language = meta.language.clone().unwrap_or_else(|| "python".to_string());
    let env_allow_network =
        skilllite_core::config::ExecutionEnvConfig::from_env().allow_network.unwrap_or(false);
    SandboxConfig {
        name: meta.name.clone(),
        entry_point: meta.entry_point.clone(),
        language,
        network_enabled: meta.network.enabled || allow_network || env_allow_network,
        network_outbound: meta.network.outbound.clone(),
        uses_playwright: meta.uses_playwright(),
    }
}

fn run_skill(
    skill_dir: &str,
    input_json: &str,
    allow_network: bool,
    cache_dir: Option<&str>,
    limits: ResourceLimits,
    sandbox_level: SandboxLevel,
) -> Result<String> {
    let skill_path = validate_skill_path(skill_dir)?;

    let meta = metadata::parse_skill_metadata(&skill_path)?;
    if meta.entry_point.is_empty() {
        anyhow::bail!("This skill has no entry point and cannot be executed. It is a prompt-only skill.");
    }
    if meta.requires_elevated_permissions {
        skilllite_core::observability::security_elevated_permissions_declared(&meta.name);
    }

    let _input: serde_json::Value = serde_json::from_str(input_json)
        .map_err(|e| anyhow::anyhow!("Invalid input JSON: {}", e))?;

    let env_dir = env_builder::ensure_environment(&skill_path, &meta, cache_dir)?;
    let runtime: RuntimePaths = env_builder::build_runtime_paths(&env_dir);
    let config = sandbox_config_from_metadata(&meta, allow_network);

    skilllite_sandbox::runner::run_in_sandbox_with_limits_and_level(
        &skill_path,
        &runtime,
        &config,
        input_json,
        limits,
        sandbox_level,
    )
}

fn validate_skill(skill_dir: &str) -> Result<()> {
    let skill_path = validate_skill_path(skill_dir)?;
    let meta = metadata::parse_skill_metadata(&skill_path)?;

    if !meta.entry_point.is_empty() {
        let entry_path = skill_path.join(&meta.entry_point);
        if !entry_path.exists() {
            anyhow::bail!("Entry point not found: {}", meta.entry_point);
        }
    } else if meta.allowed_tools.is_none() {
        anyhow::bail!("Skill has neither an entry_point nor allowed-tools; nothing to run");
    }

    Ok(())
}

fn show_skill_info(skill_dir: &str) -> Result<()> {
    let skill_path = validate_skill_path(skill_dir)?;
    let meta = metadata::parse_skill_metadata(&skill_path)?;

    println!("Skill Information:");
    println!("  Name: {}", meta.name);
    if meta.entry_point.is_empty() {
        println!("  Entry Point: (none - prompt-only or bash-tool skill)");
    } else {
        println!("  Entry Point: {}", meta.entry_point);
    }
    println!("  Language: {}", meta.language.as_deref().unwrap_or("auto-detect"));
    println!("  Network Enabled: {}", meta.network.enabled);
    if !meta.network.outbound.is_empty() {
        println!("  Outbound Whitelist:");
        for host in &meta.network.outbound {
            println!("    - {}", host);
        }
    }
    if let Some(ref tools) = meta.allowed_tools {
        println!("  Allowed Tools: {}", tools);
    }

    Ok(())
}

/// `skillbox list [WORKSPACE]`: find every `SKILL.md`-bearing directory under
/// a workspace root and print its name and entry point. Skills that fail to
/// parse are listed with their error instead of being silently dropped.
fn list_skills(workspace: &str, json_output: bool) -> Result<()> {
    let root = Path::new(workspace);
    let found = discover_skills_in_workspace(root, None);

    if json_output {
        let entries: Vec<Value> = found
            .iter()
            .map(|dir| match metadata::parse_skill_metadata(dir) {
                Ok(meta) => json!({
                    "path": dir.to_string_lossy(),
                    "name": meta.name,
                    "entry_point": meta.entry_point,
                    "network_enabled": meta.network.enabled,
                }),
                Err(e) => json!({
                    "path": dir.to_string_lossy(),
                    "error": e.to_string(),
                }),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&json!({ "skills": entries }))?);
        return Ok(());
    }

    if found.is_empty() {
        println!("No skills found under {}", workspace);
        return Ok(());
    }

    println!("Found {} skill(s) under {}:", found.len(), workspace);
    for dir in &found {
        match metadata::parse_skill_metadata(dir) {
            Ok(meta) => {
                let entry = if meta.entry_point.is_empty() {
                    "(none)"
                } else {
                    &meta.entry_point
                };
                println!("  {} — {} [{}]", meta.name, dir.display(), entry);
            }
            Err(e) => println!("  {} — failed to parse: {}", dir.display(), e),
        }
    }

    Ok(())
}

/// Scan a single script file for security issues.
fn scan_single_path(path: &str, allow_network: bool) -> Result<skilllite_sandbox::security::ScanResult> {
    let resolved = validate_path_under_root(path, "Script path")?;
    let scanner = ScriptScanner::new()
        .allow_network(allow_network)
        .allow_file_ops(false)
        .allow_process_exec(false);
    scanner.scan_file(&resolved)
}

/// `skillbox scan PATH`: if `path` is a skill directory, scan its manifest's entry
/// point; if it's a file, scan the file directly.
fn scan_path(path: &str, json_output: bool) -> Result<String> {
    let resolved = validate_path_under_root(path, "Path")?;

    let script_path = if resolved.is_dir() {
        let meta = metadata::parse_skill_metadata(&resolved)?;
        if meta.entry_point.is_empty() {
            anyhow::bail!("Skill '{}' has no entry point to scan", meta.name);
        }
        resolved.join(&meta.entry_point)
    } else {
        resolved
    };

    let scanner = ScriptScanner::new();
    let scan_result = scanner.scan_file(&script_path)?;

    if json_output {
        Ok(format_scan_result_json(&scan_result))
    } else {
        Ok(format!(
            "Security Scan Results for: {}\n\n{}",
            script_path.display(),
            format_scan_result(&scan_result)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_scan_blocked_and_user_denied_distinctly() {
        let blocked = anyhow::anyhow!("ScanBlocked: no confirmation available for CRITICAL severity issues");
        let denied = anyhow::anyhow!("UserDenied: user rejected authorization for HIGH severity issues");
        assert_eq!(classify_error_kind(&blocked), "ScanBlocked");
        assert_eq!(classify_error_kind(&denied), "UserDenied");
    }

    #[test]
    fn classifies_timeout_and_resource_limit() {
        let timeout = anyhow::anyhow!("Process killed: exceeded timeout of 2 seconds");
        let memory = anyhow::anyhow!("Process rejected: peak memory (600 MB) exceeded limit (512 MB)");
        assert_eq!(classify_error_kind(&timeout), "Timeout");
        assert_eq!(classify_error_kind(&memory), "ResourceLimit");
    }

    #[test]
    fn unrecognized_failure_classifies_as_internal() {
        let mystery = anyhow::anyhow!("something unexpected happened");
        assert_eq!(classify_error_kind(&mystery), "Internal");
    }
}
