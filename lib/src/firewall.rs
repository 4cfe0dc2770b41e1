//! Host firewall control (spec.md §4.4), grounded on the `firewall-cmd`
//! zone/service/port idiom: every mutation is queried first so the
//! batch stays idempotent, and a single `apply()` reloads once at the
//! end.

use nodeagent_utils::{Runner, Verbosity};

use crate::daemon::DaemonKind;
use crate::error::AgentError;

const FIREWALL_CMD: &str = "firewall-cmd";

/// Maps a daemon kind to the firewalld service name it should be
/// enabled under. Kinds with no entry are firewall-agnostic.
fn service_for(kind: DaemonKind) -> Option<&'static str> {
    match kind {
        DaemonKind::Mon => Some("ceph-mon"),
        DaemonKind::Mgr | DaemonKind::Mds | DaemonKind::Osd => Some("ceph"),
        DaemonKind::Nfs => Some("nfs"),
        _ => None,
    }
}

/// The firewall capability. Every method is a no-op if `firewall-cmd`
/// is absent or `firewalld.service` is not both enabled and running.
#[derive(Debug, Clone)]
pub struct Firewall {
    available: bool,
}

impl Firewall {
    /// Probe for firewalld. Never fails: an absent or disabled
    /// firewalld just yields an inert capability.
    pub fn detect(init_system: &crate::init_system::InitSystem) -> Self {
        let has_binary = which(FIREWALL_CMD);
        let service_ok = has_binary
            && init_system
                .is_enabled("firewalld.service")
                .unwrap_or(false)
            && matches!(
                init_system.state("firewalld.service"),
                Ok(crate::init_system::UnitState::Running)
            );
        if service_ok {
            tracing::info!("firewalld ready");
        } else {
            tracing::debug!("firewalld not available or not running");
        }
        Self { available: service_ok }
    }

    /// True if this capability will actually do anything.
    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Add `kind`'s mapped service to the current zone if it is not
    /// already present. A no-op for kinds with no mapped service.
    pub fn enable_service_for(&self, kind: DaemonKind) -> Result<(), AgentError> {
        if !self.available {
            return Ok(());
        }
        let Some(svc) = service_for(kind) else {
            return Ok(());
        };
        let present = query(&["--permanent", "--query-service", svc])?;
        if present {
            tracing::debug!("firewalld service {svc} already enabled in current zone");
            return Ok(());
        }
        tracing::info!("enabling firewalld service {svc} in current zone");
        mutate(&["--permanent", "--add-service", svc])
    }

    /// Open each port as `<n>/tcp`, idempotently.
    pub fn open_ports(&self, ports: &[u16]) -> Result<(), AgentError> {
        if !self.available {
            return Ok(());
        }
        for port in ports {
            let spec = format!("{port}/tcp");
            if query(&["--permanent", "--query-port", &spec])? {
                tracing::debug!("firewalld port {spec} already open");
                continue;
            }
            tracing::info!("opening firewalld port {spec}");
            mutate(&["--permanent", "--add-port", &spec])?;
        }
        Ok(())
    }

    /// Close each port as `<n>/tcp`, idempotently.
    pub fn close_ports(&self, ports: &[u16]) -> Result<(), AgentError> {
        if !self.available {
            return Ok(());
        }
        for port in ports {
            let spec = format!("{port}/tcp");
            if !query(&["--permanent", "--query-port", &spec])? {
                tracing::info!("firewalld port {spec} already closed");
                continue;
            }
            tracing::info!("closing firewalld port {spec}");
            mutate(&["--permanent", "--remove-port", &spec])?;
        }
        Ok(())
    }

    /// Reload the firewall once to pick up a batch of mutations.
    pub fn apply(&self) -> Result<(), AgentError> {
        if !self.available {
            return Ok(());
        }
        Runner::new(FIREWALL_CMD, ["--reload"])
            .verbosity(Verbosity::VerboseOnFailure)
            .run_or_fail()?;
        Ok(())
    }
}

fn query(args: &[&str]) -> Result<bool, AgentError> {
    let out = Runner::new(FIREWALL_CMD, args)
        .verbosity(Verbosity::Debug)
        .run()?;
    Ok(out.success())
}

fn mutate(args: &[&str]) -> Result<(), AgentError> {
    Runner::new(FIREWALL_CMD, args)
        .verbosity(Verbosity::VerboseOnFailure)
        .run_or_fail()?;
    Ok(())
}

fn which(binary: &str) -> bool {
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(binary).is_file()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_for_storage_plane() {
        assert_eq!(service_for(DaemonKind::Mon), Some("ceph-mon"));
        assert_eq!(service_for(DaemonKind::Mgr), Some("ceph"));
        assert_eq!(service_for(DaemonKind::Osd), Some("ceph"));
        assert_eq!(service_for(DaemonKind::Nfs), Some("nfs"));
        assert_eq!(service_for(DaemonKind::Grafana), None);
    }

    #[test]
    fn test_unavailable_firewall_is_inert() {
        let fw = Firewall { available: false };
        assert!(fw.enable_service_for(DaemonKind::Mon).is_ok());
        assert!(fw.open_ports(&[9100]).is_ok());
        assert!(fw.close_ports(&[9100]).is_ok());
        assert!(fw.apply().is_ok());
    }
}
