pub mod cli;
pub mod load_config;
pub mod logging;
pub mod remote;
pub mod sheets;

pub use cli::{run, Cli, Commands};
