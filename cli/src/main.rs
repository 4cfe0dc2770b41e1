// Good defaults
#![forbid(unused_must_use)]
#![deny(unsafe_code)]

use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    nodeagent_utils::initialize_tracing();
    tracing::trace!("starting");
    nodeagent_lib::cli::run_from_iter(std::env::args()).await
}
