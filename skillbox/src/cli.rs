use clap::{Parser, Subcommand};

/// skillbox - secure execution core for untrusted agent skills
#[derive(Parser, Debug)]
#[command(name = "skillbox")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a skill: manifest read, static scan, confirmation gate, sandboxed execution
    Run {
        /// Path to the skill directory
        #[arg(value_name = "SKILL_DIR")]
        skill_dir: String,

        /// Input JSON string passed to the skill's entry point
        #[arg(value_name = "INPUT_JSON")]
        input_json: String,

        /// Allow network access (overrides SKILL.md policy)
        #[arg(long, default_value = "false")]
        allow_network: bool,

        /// Custom cache directory for resolved runtime environments
        #[arg(long, value_name = "DIR")]
        cache_dir: Option<String>,

        /// Maximum memory limit in MB (default: from env or 256)
        #[arg(long)]
        max_memory: Option<u64>,

        /// Execution timeout in seconds (default: from env or 30)
        #[arg(long)]
        timeout: Option<u64>,

        /// Sandbox level: 1=no sandbox, 2=sandbox only, 3=sandbox+scan (default: from env or 3)
        #[arg(long)]
        sandbox_level: Option<u8>,

        /// Skip the confirmation gate and auto-approve any High/Critical findings
        #[arg(long, default_value = "false")]
        auto_approve: bool,
    },

    /// Static-scan a script or skill directory, print a formatted or JSON report
    Scan {
        /// Path to the script file or skill directory
        #[arg(value_name = "PATH")]
        path: String,

        /// Output results as structured JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Validate a skill manifest and entry point without running it
    Validate {
        /// Path to the skill directory
        #[arg(value_name = "SKILL_DIR")]
        skill_dir: String,
    },

    /// Show parsed skill manifest information
    Info {
        /// Path to the skill directory
        #[arg(value_name = "SKILL_DIR")]
        skill_dir: String,
    },

    /// Run as a line-delimited JSON-RPC server over stdio
    Serve {
        /// Use stdio transport (the only transport currently supported)
        #[arg(long, default_value = "true")]
        stdio: bool,
    },

    /// Discover skill directories under a workspace
    List {
        /// Workspace root to search (default: current directory)
        #[arg(value_name = "WORKSPACE", default_value = ".")]
        workspace: String,

        /// Output results as structured JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },
}
