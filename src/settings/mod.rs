//! Layered settings: a TOML profile selected by build mode or `--settings`,
//! overridden by `MANGAHUB__*` environment variables.

mod cli;
pub use clap::Parser;
pub use cli::*;

mod settings;
pub use settings::*;
