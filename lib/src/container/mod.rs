//! The container-engine capability: detection, version gating, and
//! argument-vector construction for every operation the agent performs
//! against a running or to-be-run container (spec.md §4.3).
//!
//! Nothing in this module executes anything; every `build_*_argv`
//! function returns a plain `Vec<String>` that the caller passes to
//! [`nodeagent_utils::Runner`].

mod docker;
mod podman;

use camino::Utf8PathBuf;

use crate::error::AgentError;

pub use docker::Docker;
pub use podman::Podman;

/// A semantic version triple, as reported by `<engine> version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EngineVersion {
    /// Major component.
    pub major: u32,
    /// Minor component.
    pub minor: u32,
    /// Patch component.
    pub patch: u32,
}

impl std::fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// A host-path to container-path volume mount, with an optional SELinux
/// relabel flag (`:z`/`:Z`).
#[derive(Debug, Clone)]
pub struct VolumeMount {
    /// Path on the host.
    pub host_path: Utf8PathBuf,
    /// Path inside the container.
    pub container_path: Utf8PathBuf,
    /// Mount read-only.
    pub read_only: bool,
    /// SELinux relabel mode, if any (`z` shared, `Z` private).
    pub relabel: Option<char>,
}

/// A structured bind mount (used for things like `/dev`, `/run/udev`
/// that need propagation flags volume mounts don't express).
#[derive(Debug, Clone)]
pub struct BindMount {
    /// Source path.
    pub source: Utf8PathBuf,
    /// Destination path inside the container.
    pub destination: Utf8PathBuf,
    /// Mount read-only.
    pub read_only: bool,
}

/// Pure data describing how to run one container, constructed per
/// daemon kind by the [`crate::daemon_specs`] table.
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    /// Image reference to run.
    pub image: String,
    /// Container-side name (`--name`).
    pub name: String,
    /// Entrypoint override, if the image default should not be used.
    pub entrypoint: Option<String>,
    /// Positional arguments passed to the entrypoint.
    pub args: Vec<String>,
    /// `KEY=VALUE` environment pairs.
    pub env: Vec<(String, String)>,
    /// Volume mounts.
    pub volumes: Vec<VolumeMount>,
    /// Structured bind mounts.
    pub binds: Vec<BindMount>,
    /// Run with `--privileged --group-add=disk`.
    pub privileged: bool,
    /// Add `SYS_PTRACE` unless already privileged.
    pub ptrace: bool,
    /// Run with `--network=host`.
    pub host_network: bool,
    /// Run with `--init`.
    pub init: bool,
    /// Memory request in bytes, if any.
    pub memory_request: Option<u64>,
    /// Memory limit in bytes, if any.
    pub memory_limit: Option<u64>,
    /// Extra `--cap-add` values beyond the ptrace/privileged handling.
    pub cap_adds: Vec<String>,
    /// Path to an auth file for registry pulls, if any.
    pub auth_file: Option<Utf8PathBuf>,
}

/// The container-engine capability. One implementation per supported
/// engine; detection prefers the rootless-capable engine.
pub trait ContainerRuntime: std::fmt::Debug + Send + Sync {
    /// The engine binary name (`podman` or `docker`).
    fn binary(&self) -> &'static str;

    /// Cached `(major, minor, patch)` as reported by the engine's
    /// `version` sub-command.
    fn version(&self) -> Result<EngineVersion, AgentError>;

    /// Build the argv that runs `spec` detached.
    fn build_run_argv(&self, spec: &ContainerSpec, run_dir: &camino::Utf8Path) -> Vec<String>;

    /// Build the argv for an interactive shell inside a one-off
    /// container using `spec`'s image and mounts but an overridden
    /// entrypoint of `/bin/sh` (or `/bin/bash`, if preferred by the
    /// caller via `shell`).
    fn build_shell_argv(&self, spec: &ContainerSpec, shell: &str) -> Vec<String>;

    /// Build the argv to exec into the already-running container named
    /// `spec.name`.
    fn build_exec_argv(&self, name: &str, args: &[String]) -> Vec<String>;

    /// Build the argv to force-remove a container by name.
    fn build_rm_argv(&self, name: &str) -> Vec<String>;

    /// Build the argv to stop a container by name with `TERM`.
    fn build_stop_argv(&self, name: &str) -> Vec<String>;

    /// Build the argv to inspect a container by name.
    fn build_inspect_argv(&self, name: &str) -> Vec<String>;
}

/// Detect an available container engine, preferring the rootless-capable
/// engine (podman) over docker. Returns [`AgentError::NoContainerEngine`]
/// if neither binary is found on `PATH`.
pub fn detect(prefer_docker: bool, runner: &nodeagent_utils::Runner) -> Result<Box<dyn ContainerRuntime>, AgentError> {
    let _ = runner;
    if prefer_docker {
        if which("docker") {
            return Ok(Box::new(Docker::new()));
        }
        if which("podman") {
            return Ok(Box::new(Podman::new()));
        }
    } else {
        if which("podman") {
            return Ok(Box::new(Podman::new()));
        }
        if which("docker") {
            return Ok(Box::new(Docker::new()));
        }
    }
    Err(AgentError::NoContainerEngine)
}

/// Parse a `major.minor[.patch]` version string as reported by either
/// engine's `version --format` output.
pub(crate) fn parse_version(s: &str) -> Result<EngineVersion, AgentError> {
    let mut parts = s.trim_start_matches('v').split('.');
    let mut next = || -> Result<u32, AgentError> {
        parts
            .next()
            .and_then(|p| p.trim().parse().ok())
            .ok_or_else(|| AgentError::usage(format!("could not parse engine version {s:?}")))
    };
    Ok(EngineVersion {
        major: next()?,
        minor: next()?,
        patch: next().unwrap_or(0),
    })
}

fn which(binary: &str) -> bool {
    std::env::var_os("PATH")
        .map(|paths| {
            std::env::split_paths(&paths).any(|dir| dir.join(binary).is_file())
        })
        .unwrap_or(false)
}

/// Shared argv-building helpers used by both engine implementations;
/// the two engines differ only in a handful of flags (see
/// [`podman`]/[`docker`]).
pub(crate) fn push_common_run_flags(argv: &mut Vec<String>, spec: &ContainerSpec) {
    if spec.host_network {
        argv.push("--network=host".to_string());
    }
    argv.push("--ipc=host".to_string());
    argv.push("--stop-signal=TERM".to_string());
    argv.push("--rm".to_string());
    if let Some(auth) = &spec.auth_file {
        argv.push(format!("--authfile={auth}"));
    }
    if let Some(entrypoint) = &spec.entrypoint {
        argv.push(format!("--entrypoint={entrypoint}"));
    }
    if let Some(limit) = spec.memory_limit {
        argv.push(format!("--memory={limit}"));
    }
    if spec.privileged {
        argv.push("--privileged".to_string());
        argv.push("--group-add=disk".to_string());
    } else if spec.ptrace {
        argv.push("--cap-add=SYS_PTRACE".to_string());
    }
    for cap in &spec.cap_adds {
        argv.push(format!("--cap-add={cap}"));
    }
    if spec.init {
        argv.push("--init".to_string());
    }
    argv.push(format!("--name={}", spec.name));
    for (k, v) in &spec.env {
        argv.push(format!("--env={k}={v}"));
    }
    for vol in &spec.volumes {
        let mut s = format!("{}:{}", vol.host_path, vol.container_path);
        if vol.read_only {
            s.push_str(":ro");
        }
        if let Some(relabel) = vol.relabel {
            s.push(':');
            s.push(relabel);
        }
        argv.push(format!("--volume={s}"));
    }
    for bind in &spec.binds {
        let readonly = if bind.read_only { ",readonly" } else { "" };
        argv.push(format!(
            "--mount=type=bind,src={},dst={}{readonly}",
            bind.source, bind.destination
        ));
    }
    argv.push(spec.image.clone());
    argv.extend(spec.args.iter().cloned());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_version_display() {
        let v = EngineVersion { major: 4, minor: 6, patch: 1 };
        assert_eq!(v.to_string(), "4.6.1");
    }

    #[test]
    fn test_version_ord() {
        let a = EngineVersion { major: 4, minor: 0, patch: 0 };
        let b = EngineVersion { major: 4, minor: 6, patch: 1 };
        assert!(a < b);
    }
}
