//! The typed error taxonomy surfaced by every public operation.
//!
//! The CLI entry point matches on [`AgentError`] only to decide the
//! process exit code (always `1`, spec-wise, but we keep the variants
//! distinct so the message and the `tracing::error!` fields are
//! actionable); callers inside the crate otherwise just propagate with
//! `?` same as any other error type.

use std::net::IpAddr;

/// Every error this agent can return from a sub-command.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// A CLI precondition was violated: unknown daemon kind, missing
    /// `--fsid`, conflicting address flags, malformed CIDR, and so on.
    #[error("{0}")]
    Usage(String),

    /// A TCP port required by a daemon is already bound on this host.
    #[error("port {port} is already in use on {addr}")]
    PortOccupied {
        /// The offending port.
        port: u16,
        /// Which local address it was probed on.
        addr: IpAddr,
    },

    /// [`nodeagent_lock::FileLock::acquire`] did not succeed before the
    /// caller's deadline.
    #[error("timed out acquiring lock for cluster {fsid}")]
    LockTimeout {
        /// The cluster FSID the lock was keyed on.
        fsid: String,
    },

    /// An external command, run via `run_or_fail`, exited non-zero.
    #[error("command failed: {argv}\n{stderr}")]
    ExternalCommandFailed {
        /// The argument vector that was run.
        argv: String,
        /// Captured stderr.
        stderr: String,
    },

    /// A container pull failed with a retriable error and retries were
    /// exhausted.
    #[error("pulling image {image} failed after {attempts} attempts: {detail}")]
    TransientPullFailed {
        /// Image reference being pulled.
        image: String,
        /// Number of attempts made.
        attempts: u32,
        /// The last failure's detail.
        detail: String,
    },

    /// The pulled image's release does not match this agent's expected
    /// release, and `--allow-mismatched-release` was not given.
    #[error("image {image} release {found} does not match expected release {expected}")]
    ImageMismatch {
        /// Image reference.
        image: String,
        /// Release found in the image.
        found: String,
        /// Release this agent expected.
        expected: String,
    },

    /// A config-json payload was missing a key required for the daemon
    /// kind it targets.
    #[error("config-json for {kind} is missing required key {key:?}")]
    ConfigJsonMalformed {
        /// Daemon kind the payload targets.
        kind: String,
        /// The missing (or invalid) key.
        key: String,
    },

    /// A `wait_for_*` bootstrap state exceeded its retry budget.
    #[error("timed out waiting for {what} after {attempts} attempts")]
    StateMachineTimeout {
        /// What was being waited for (e.g. "mon quorum").
        what: String,
        /// How many attempts were made.
        attempts: u32,
    },

    /// No supported container engine could be located on this host.
    #[error("no supported container engine found (looked for podman, docker)")]
    NoContainerEngine,

    /// A container engine was found but its version is below the
    /// minimum this agent supports.
    #[error("{engine} version {found} is below the minimum supported version {minimum}")]
    UnsupportedEngineVersion {
        /// Engine name.
        engine: String,
        /// Version found.
        found: String,
        /// Minimum required version.
        minimum: String,
    },

    /// Wraps any I/O failure not covered by a more specific variant.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Construct a [`AgentError::Usage`] from a `format!`-style message.
    pub fn usage(msg: impl Into<String>) -> Self {
        AgentError::Usage(msg.into())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AgentError>;

impl From<nodeagent_lock::Error> for AgentError {
    fn from(e: nodeagent_lock::Error) -> Self {
        match e {
            nodeagent_lock::Error::Timeout(fsid) => AgentError::LockTimeout { fsid },
            nodeagent_lock::Error::Io { name, err } => AgentError::Usage(format!(
                "I/O error acquiring lock {name:?}: {err}"
            )),
        }
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::Usage(format!("JSON error: {e}"))
    }
}

impl From<nodeagent_utils::CommandFailed> for AgentError {
    fn from(e: nodeagent_utils::CommandFailed) -> Self {
        AgentError::ExternalCommandFailed {
            argv: e.argv,
            stderr: e.stderr,
        }
    }
}
