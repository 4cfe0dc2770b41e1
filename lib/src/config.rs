//! Explicit nested configuration, replacing the attribute-fallthrough
//! context object of the source implementation (see design note in
//! `SPEC_FULL.md` §9): argument-parser flags live in [`RuntimeOpts`],
//! filesystem roots live in [`Paths`], and [`Context`] bundles both for
//! injection into the engine components.

use camino::Utf8PathBuf;
use std::time::Duration;

/// Unit/path prefix for everything this agent writes to the host: unit
/// names, sysctl fragment names, logrotate config names.
pub const PREFIX: &str = "nodeagent";

/// Default container image reference used when neither `--image` nor
/// `NODEAGENT_IMAGE` is set.
pub const DEFAULT_IMAGE: &str = "quay.io/example/storage-daemon:latest";

/// Environment variable that overrides the default image when `--image`
/// is absent.
pub const IMAGE_ENV_VAR: &str = "CEPHADM_IMAGE";

/// Filesystem roots under which this agent materializes all persistent
/// and transient state. All fields are configurable via CLI flags;
/// defaults mirror the canonical host layout from the specification.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Root for per-daemon data directories: `<data_root>/<fsid>/<kind>.<id>`.
    pub data_root: Utf8PathBuf,
    /// Root for per-cluster log directories: `<log_root>/<fsid>`.
    pub log_root: Utf8PathBuf,
    /// Root for systemd unit files.
    pub unit_root: Utf8PathBuf,
    /// Root for sysctl fragments.
    pub sysctl_root: Utf8PathBuf,
    /// Root for logrotate fragments.
    pub logrotate_root: Utf8PathBuf,
    /// Root for the FileLock coordinator's lock files.
    pub lock_root: Utf8PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            data_root: "/var/lib/nodeagent".into(),
            log_root: "/var/log/nodeagent".into(),
            unit_root: "/etc/systemd/system".into(),
            sysctl_root: "/etc/sysctl.d".into(),
            logrotate_root: "/etc/logrotate.d".into(),
            lock_root: "/run/nodeagent".into(),
        }
    }
}

/// Flags shared by every sub-command (spec.md §6's `CommonOpts`).
#[derive(Debug, Clone)]
pub struct RuntimeOpts {
    /// Explicit image reference; falls back to [`IMAGE_ENV_VAR`], then
    /// [`DEFAULT_IMAGE`].
    pub image: Option<String>,
    /// Force the Docker engine instead of autodetecting.
    pub docker: bool,
    /// Timeout applied to external command invocations.
    pub timeout: Duration,
    /// Retry ceiling for `wait_for_*` polling loops.
    pub retry: u32,
    /// Extra environment variables passed through to deployed containers.
    pub env: Vec<(String, String)>,
    /// Disable `--init` in container run invocations.
    pub no_container_init: bool,
    /// Verbose subprocess output.
    pub verbose: bool,
}

impl Default for RuntimeOpts {
    fn default() -> Self {
        Self {
            image: None,
            docker: false,
            timeout: Duration::from_secs(60),
            retry: 30,
            env: Vec::new(),
            no_container_init: false,
            verbose: false,
        }
    }
}

impl RuntimeOpts {
    /// Resolve the effective image reference: explicit flag, then
    /// [`IMAGE_ENV_VAR`], then [`DEFAULT_IMAGE`] — in that order, matching
    /// the "image before config before fsid" ordering from spec.md §9.
    pub fn resolve_image(&self) -> String {
        self.image_override().unwrap_or_else(|| DEFAULT_IMAGE.to_string())
    }

    /// An image the operator explicitly asked for, via `--image` or
    /// [`IMAGE_ENV_VAR`] — as opposed to [`DEFAULT_IMAGE`], which only
    /// applies once a kind's own default has also been ruled out.
    pub fn image_override(&self) -> Option<String> {
        self.image.clone().or_else(|| std::env::var(IMAGE_ENV_VAR).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_override_reflects_explicit_flag() {
        let opts = RuntimeOpts {
            image: Some("quay.io/example/custom:1".to_string()),
            ..RuntimeOpts::default()
        };
        assert_eq!(opts.image_override().as_deref(), Some("quay.io/example/custom:1"));
        assert_eq!(opts.resolve_image(), "quay.io/example/custom:1");
    }

    #[test]
    fn test_resolve_image_falls_back_to_default_without_override() {
        let opts = RuntimeOpts::default();
        assert_eq!(opts.image_override(), None);
        assert_eq!(opts.resolve_image(), DEFAULT_IMAGE);
    }
}

/// The full injected configuration bundle passed to engine components.
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// Filesystem roots.
    pub paths: Paths,
    /// Shared CLI flags.
    pub runtime: RuntimeOpts,
}
