//! Echonet node daemon: configuration, built-in skills and the HTTP surface.

pub mod api;
pub mod config;
pub mod skills;

pub use api::{router, AppState};
pub use config::{ConfigError, NodeArgs, NodeConfig, UserTable};
