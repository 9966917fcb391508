//! Unified configuration layer.
//!
//! All environment variable reads are confined to this module; other
//! components consult the structured configs below instead of calling
//! `std::env::var` directly.
//!
//! - `loader`: `env_or`/`env_optional`/`env_bool` and friends
//! - `schema`: `PathsConfig`, `ObservabilityConfig`, `CacheConfig`
//! - `env_keys`: key constants, including deprecated aliases

pub mod env_keys;
pub mod loader;
pub mod schema;

pub use loader::{env_bool, env_optional, env_or, load_dotenv};
pub use loader::{ensure_default_output_dir, init_daemon_env, remove_env_var, set_env_var, ScopedEnvGuard};
pub use schema::{CacheConfig, ExecutionEnvConfig, ObservabilityConfig, PathsConfig};
