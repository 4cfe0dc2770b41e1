//! Daemon identity: the closed `(kind, id)` enumeration from spec.md §3.

use std::fmt;
use std::str::FromStr;

use crate::error::AgentError;

/// The closed enumeration of daemon kinds this agent knows how to deploy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, clap::ValueEnum)]
#[clap(rename_all = "kebab-case")]
pub enum DaemonKind {
    // storage plane
    /// Monitor.
    Mon,
    /// Manager.
    Mgr,
    /// Metadata server.
    Mds,
    /// Object storage daemon.
    Osd,
    /// Object gateway.
    Rgw,
    /// Block device mirroring agent.
    RbdMirror,
    /// Filesystem mirroring agent.
    CephfsMirror,
    /// Crash dump collector.
    Crash,
    // monitoring stack
    /// Prometheus.
    Prometheus,
    /// Alertmanager.
    Alertmanager,
    /// Grafana.
    Grafana,
    /// node_exporter.
    NodeExporter,
    // gateways
    /// NFS gateway.
    Nfs,
    /// iSCSI gateway.
    Iscsi,
    /// HAProxy load balancer.
    Haproxy,
    /// Keepalived VRRP agent.
    Keepalived,
    // extensions
    /// Arbitrary user-supplied container image.
    Container,
    /// This agent's own metadata exporter daemon.
    CephadmExporter,
}

impl DaemonKind {
    /// All kinds, for iteration (e.g. `ls` or `rm-cluster`).
    pub const ALL: &'static [DaemonKind] = &[
        DaemonKind::Mon,
        DaemonKind::Mgr,
        DaemonKind::Mds,
        DaemonKind::Osd,
        DaemonKind::Rgw,
        DaemonKind::RbdMirror,
        DaemonKind::CephfsMirror,
        DaemonKind::Crash,
        DaemonKind::Prometheus,
        DaemonKind::Alertmanager,
        DaemonKind::Grafana,
        DaemonKind::NodeExporter,
        DaemonKind::Nfs,
        DaemonKind::Iscsi,
        DaemonKind::Haproxy,
        DaemonKind::Keepalived,
        DaemonKind::Container,
        DaemonKind::CephadmExporter,
    ];

    /// The on-disk/unit-name token for this kind, e.g. `rbd-mirror`.
    pub fn as_str(&self) -> &'static str {
        match self {
            DaemonKind::Mon => "mon",
            DaemonKind::Mgr => "mgr",
            DaemonKind::Mds => "mds",
            DaemonKind::Osd => "osd",
            DaemonKind::Rgw => "rgw",
            DaemonKind::RbdMirror => "rbd-mirror",
            DaemonKind::CephfsMirror => "cephfs-mirror",
            DaemonKind::Crash => "crash",
            DaemonKind::Prometheus => "prometheus",
            DaemonKind::Alertmanager => "alertmanager",
            DaemonKind::Grafana => "grafana",
            DaemonKind::NodeExporter => "node-exporter",
            DaemonKind::Nfs => "nfs",
            DaemonKind::Iscsi => "iscsi",
            DaemonKind::Haproxy => "haproxy",
            DaemonKind::Keepalived => "keepalived",
            DaemonKind::Container => "container",
            DaemonKind::CephadmExporter => "cephadm-exporter",
        }
    }

    /// True for kinds whose data is moved (not deleted) on a default
    /// `rm-daemon`: `mon`, `osd`, `prometheus`.
    pub fn is_precious(&self) -> bool {
        matches!(self, DaemonKind::Mon | DaemonKind::Osd | DaemonKind::Prometheus)
    }

    /// True for the extension kind that is this agent's own exporter,
    /// whose unit is not a templated instance (spec.md §3's layout
    /// invariants call this out explicitly).
    pub fn is_non_templated_unit(&self) -> bool {
        matches!(self, DaemonKind::CephadmExporter)
    }
}

impl fmt::Display for DaemonKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DaemonKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DaemonKind::ALL
            .iter()
            .find(|k| k.as_str() == s)
            .copied()
            .ok_or_else(|| AgentError::usage(format!("unknown daemon kind {s:?}")))
    }
}

/// A concrete daemon identity: `(kind, id)`. `id` is a non-empty opaque
/// string unique within `(fsid, kind)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Daemon {
    /// The daemon kind.
    pub kind: DaemonKind,
    /// The daemon's id, unique within `(fsid, kind)`.
    pub id: String,
}

impl Daemon {
    /// Construct a daemon identity, rejecting an empty id.
    pub fn new(kind: DaemonKind, id: impl Into<String>) -> Result<Self, AgentError> {
        let id = id.into();
        if id.is_empty() {
            return Err(AgentError::usage("daemon id must not be empty"));
        }
        Ok(Self { kind, id })
    }

    /// The `<kind>.<id>` token used in directory and unit-instance names.
    pub fn name(&self) -> String {
        format!("{}.{}", self.kind, self.id)
    }
}

impl fmt::Display for Daemon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        for k in DaemonKind::ALL {
            let s = k.as_str();
            assert_eq!(DaemonKind::from_str(s).unwrap(), *k);
        }
    }

    #[test]
    fn test_precious_set() {
        assert!(DaemonKind::Mon.is_precious());
        assert!(DaemonKind::Osd.is_precious());
        assert!(DaemonKind::Prometheus.is_precious());
        assert!(!DaemonKind::Mgr.is_precious());
    }

    #[test]
    fn test_daemon_rejects_empty_id() {
        assert!(Daemon::new(DaemonKind::Mon, "").is_err());
    }

    #[test]
    fn test_daemon_name() {
        let d = Daemon::new(DaemonKind::Mon, "a").unwrap();
        assert_eq!(d.name(), "mon.a");
    }
}
