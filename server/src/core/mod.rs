//! Core application plumbing: CLI, config, constants, shutdown

pub mod cli;
pub mod config;
pub mod constants;
pub mod shutdown;

pub use config::AppConfig;
pub use shutdown::ShutdownService;
