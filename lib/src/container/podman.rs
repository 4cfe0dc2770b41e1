//! The rootless-capable engine variant.

use camino::Utf8Path;
use std::sync::OnceLock;

use crate::error::AgentError;

use super::{parse_version, push_common_run_flags, ContainerRuntime, ContainerSpec, EngineVersion};

/// The minimum podman version this agent supports; lower versions fail
/// bootstrap with [`AgentError::UnsupportedEngineVersion`].
pub const MIN_VERSION: EngineVersion = EngineVersion { major: 3, minor: 0, patch: 0 };

/// Podman version at or above which `cgroups=split` is available and
/// used for the run-time cgroup.
const CGROUPS_SPLIT_VERSION: EngineVersion = EngineVersion { major: 4, minor: 0, patch: 0 };

#[derive(Debug)]
pub struct Podman {
    version: OnceLock<EngineVersion>,
}

impl Podman {
    pub fn new() -> Self {
        Self { version: OnceLock::new() }
    }

    fn supports_cgroups_split(&self) -> bool {
        self.version
            .get()
            .map(|v| *v >= CGROUPS_SPLIT_VERSION)
            .unwrap_or(false)
    }
}

impl Default for Podman {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerRuntime for Podman {
    fn binary(&self) -> &'static str {
        "podman"
    }

    fn version(&self) -> Result<EngineVersion, AgentError> {
        if let Some(v) = self.version.get() {
            return Ok(*v);
        }
        let runner = nodeagent_utils::Runner::new("podman", ["version", "--format", "{{.Client.Version}}"]);
        let out = runner.run_or_fail()?;
        let v = parse_version(out.stdout.trim())?;
        if v < MIN_VERSION {
            return Err(AgentError::UnsupportedEngineVersion {
                engine: "podman".to_string(),
                found: v.to_string(),
                minimum: MIN_VERSION.to_string(),
            });
        }
        let _ = self.version.set(v);
        Ok(v)
    }

    fn build_run_argv(&self, spec: &ContainerSpec, run_dir: &Utf8Path) -> Vec<String> {
        let mut argv = vec!["run".to_string(), "-d".to_string()];
        argv.push(format!("--conmon-pidfile={}", run_dir.join(format!("{}.pid", spec.name))));
        argv.push(format!("--cidfile={}", run_dir.join(format!("{}.cid", spec.name))));
        if self.supports_cgroups_split() {
            argv.push("--cgroups=split".to_string());
        }
        push_common_run_flags(&mut argv, spec);
        argv
    }

    fn build_shell_argv(&self, spec: &ContainerSpec, shell: &str) -> Vec<String> {
        vec![
            "run".to_string(),
            "--rm".to_string(),
            "-it".to_string(),
            format!("--entrypoint={shell}"),
            spec.image.clone(),
        ]
    }

    fn build_exec_argv(&self, name: &str, args: &[String]) -> Vec<String> {
        let mut argv = vec!["exec".to_string(), "-it".to_string(), name.to_string()];
        argv.extend(args.iter().cloned());
        argv
    }

    fn build_rm_argv(&self, name: &str) -> Vec<String> {
        vec!["rm".to_string(), "-f".to_string(), name.to_string()]
    }

    fn build_stop_argv(&self, name: &str) -> Vec<String> {
        vec!["stop".to_string(), name.to_string()]
    }

    fn build_inspect_argv(&self, name: &str) -> Vec<String> {
        vec!["inspect".to_string(), name.to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version() {
        assert_eq!(
            parse_version("4.6.1").unwrap(),
            EngineVersion { major: 4, minor: 6, patch: 1 }
        );
    }

    #[test]
    fn test_parse_version_rejects_garbage() {
        assert!(parse_version("not-a-version").is_err());
    }

    #[test]
    fn test_run_argv_includes_cidfile_and_pidfile() {
        let p = Podman::new();
        let spec = ContainerSpec {
            image: "quay.io/example/daemon".to_string(),
            name: "mon.a".to_string(),
            ..Default::default()
        };
        let argv = p.build_run_argv(&spec, Utf8Path::new("/run/nodeagent"));
        assert!(argv.iter().any(|a| a.starts_with("--cidfile=")));
        assert!(argv.iter().any(|a| a.starts_with("--conmon-pidfile=")));
    }
}
