//! Ambient helpers with no dependency on the rest of the agent: subprocess
//! running, tracing setup, path display.
mod path;
mod runner;
mod tracing_util;
pub use path::*;
pub use runner::*;
pub use tracing_util::*;
