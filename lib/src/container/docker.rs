//! The Docker engine variant, used only when the operator opts in via
//! `--docker` or podman is unavailable.

use camino::Utf8Path;
use std::sync::OnceLock;

use crate::error::AgentError;

use super::{parse_version, push_common_run_flags, ContainerRuntime, ContainerSpec, EngineVersion};

/// The minimum docker version this agent supports.
pub const MIN_VERSION: EngineVersion = EngineVersion { major: 20, minor: 10, patch: 0 };

#[derive(Debug)]
pub struct Docker {
    version: OnceLock<EngineVersion>,
}

impl Docker {
    pub fn new() -> Self {
        Self { version: OnceLock::new() }
    }
}

impl Default for Docker {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerRuntime for Docker {
    fn binary(&self) -> &'static str {
        "docker"
    }

    fn version(&self) -> Result<EngineVersion, AgentError> {
        if let Some(v) = self.version.get() {
            return Ok(*v);
        }
        let runner = nodeagent_utils::Runner::new("docker", ["version", "--format", "{{.Client.Version}}"]);
        let out = runner.run_or_fail()?;
        let v = parse_version(out.stdout.trim())?;
        if v < MIN_VERSION {
            return Err(AgentError::UnsupportedEngineVersion {
                engine: "docker".to_string(),
                found: v.to_string(),
                minimum: MIN_VERSION.to_string(),
            });
        }
        let _ = self.version.set(v);
        Ok(v)
    }

    fn build_run_argv(&self, spec: &ContainerSpec, run_dir: &Utf8Path) -> Vec<String> {
        let mut argv = vec!["run".to_string(), "-d".to_string()];
        argv.push(format!("--cidfile={}", run_dir.join(format!("{}.cid", spec.name))));
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
    fn test_run_argv_has_no_cgroups_split_flag() {
        let d = Docker::new();
        let spec = ContainerSpec {
            image: "quay.io/example/daemon".to_string(),
            name: "mgr.a".to_string(),
            ..Default::default()
        };
        let argv = d.build_run_argv(&spec, Utf8Path::new("/run/nodeagent"));
        assert!(!argv.iter().any(|a| a.contains("cgroups=split")));
    }
}
