//! CLI command implementations

mod config;
mod search;
mod serve;

pub use config::cmd_config_show;
pub use search::{cmd_clear_cache, cmd_get, cmd_search};
pub use serve::cmd_serve;
