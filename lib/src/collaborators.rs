//! External collaborators whose implementations live outside this
//! crate's scope (spec.md §1, SPEC_FULL.md AS-2..AS-4): the host package
//! installer, the legacy-daemon adoption path, and host-inventory
//! gathering. Only their interfaces are specified here.

use crate::daemon::DaemonKind;
use crate::error::AgentError;

/// The package-repository installer for whichever host distribution is
/// running. Not implemented in this crate; [`crate::bootstrap::Bootstrap`]
/// state 2 ("verify or prepare host") takes `&dyn HostPackager` and is
/// skippable.
pub trait HostPackager: std::fmt::Debug {
    /// Install the named packages.
    fn install(&self, packages: &[&str]) -> Result<(), AgentError>;
    /// True if this host's package repository is already configured.
    fn repo_is_configured(&self) -> Result<bool, AgentError>;
}

/// A `HostPackager` that refuses to do anything, for hosts that were
/// already prepared out of band, or for tests.
#[derive(Debug, Default)]
pub struct NullHostPackager;

impl HostPackager for NullHostPackager {
    fn install(&self, packages: &[&str]) -> Result<(), AgentError> {
        Err(AgentError::usage(format!(
            "no HostPackager configured; cannot install {packages:?}"
        )))
    }

    fn repo_is_configured(&self) -> Result<bool, AgentError> {
        Ok(true)
    }
}

/// The legacy-daemon adoption path: a migration utility layered over
/// [`crate::deploy::DeployEngine`] that takes an existing, non-agent-managed
/// daemon and brings it under this agent's management. Not implemented
/// here; `node-exporter` adoption is an explicit open question carried
/// forward from spec.md §9 (the source leaves `command_adopt` for
/// `node-exporter` unimplemented).
pub trait LegacyAdopter: std::fmt::Debug {
    /// Adopt the named legacy daemon.
    fn adopt(&self, kind: DaemonKind, id: &str) -> Result<(), AgentError>;
}

/// A `LegacyAdopter` that always reports the open-question gap rather
/// than guessing at semantics.
#[derive(Debug, Default)]
pub struct UnimplementedLegacyAdopter;

impl LegacyAdopter for UnimplementedLegacyAdopter {
    fn adopt(&self, kind: DaemonKind, id: &str) -> Result<(), AgentError> {
        if kind == DaemonKind::NodeExporter {
            tracing::warn!("adoption of node-exporter is not implemented upstream either; refusing");
        }
        Err(AgentError::usage(format!(
            "adopting {kind}.{id} is not implemented by this agent"
        )))
    }
}

/// Host-inventory gathering, consumed by the exporter's `host` scraper
/// slot. Out of scope as a full implementation (spec.md §1); a minimal
/// `uname`-based default is provided so the exporter is runnable
/// standalone (SPEC_FULL.md AS-4).
pub trait HostFacts: std::fmt::Debug + Send + Sync {
    /// Gather a JSON document describing this host.
    fn gather(&self) -> Result<serde_json::Value, AgentError>;
}

/// The minimal default [`HostFacts`] implementation: hostname, kernel
/// release, and architecture via `uname(2)`.
#[derive(Debug, Default)]
pub struct UnameHostFacts;

impl HostFacts for UnameHostFacts {
    fn gather(&self) -> Result<serde_json::Value, AgentError> {
        let info = rustix::system::uname();
        Ok(serde_json::json!({
            "hostname": info.nodename().to_string_lossy(),
            "kernel": info.release().to_string_lossy(),
            "arch": info.machine().to_string_lossy(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_packager_refuses_install() {
        assert!(NullHostPackager.install(&["foo"]).is_err());
        assert!(NullHostPackager.repo_is_configured().unwrap());
    }

    #[test]
    fn test_unimplemented_adopter_refuses() {
        assert!(UnimplementedLegacyAdopter
            .adopt(DaemonKind::NodeExporter, "a")
            .is_err());
    }

    #[test]
    fn test_uname_host_facts_gathers_something() {
        let v = UnameHostFacts.gather().unwrap();
        assert!(v.get("hostname").is_some());
    }
}
