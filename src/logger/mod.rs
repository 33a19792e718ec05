//! Process-wide tracing setup. The subscriber starts at `info` in plain text and
//! is reconfigured from `[log]` settings during startup.

mod logger;
pub use logger::*;

pub use tracing::{debug, error, info, trace, warn};
