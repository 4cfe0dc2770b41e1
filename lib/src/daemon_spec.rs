//! Per-daemon-kind description (spec.md §4.6): the systems-language
//! encoding of the source's duck-typed daemon classes (design note in
//! `SPEC_FULL.md` §9, spec.md §9). One `DaemonSpec` trait, implemented by
//! a handful of family structs rather than eighteen near-identical ones;
//! each family matches on [`DaemonKind`] internally wherever a single
//! constant differs between its members.

use camino::Utf8PathBuf;

use crate::config::Context;
use crate::container::{BindMount, VolumeMount};
use crate::daemon::{Daemon, DaemonKind};
use crate::fsid::Fsid;
use crate::layout::Layout;

/// How a daemon kind's UID/GID is resolved.
#[derive(Debug, Clone, Copy)]
pub enum UidGidSource {
    /// A fixed, well-known pair (used for the monitoring stack, whose
    /// images run as a baked-in user).
    Fixed {
        /// Owning UID.
        uid: u32,
        /// Owning GID.
        gid: u32,
    },
    /// Stat a well-known path inside the image using a one-off
    /// container (used for the storage-plane daemons, whose images may
    /// be rebuilt against a different base).
    StatImagePath(&'static str),
}

/// Everything [`crate::deploy::DeployEngine`] needs to know about one
/// daemon kind to materialize its on-disk state and container spec.
pub trait DaemonSpec: std::fmt::Debug + Send + Sync {
    /// The kind this spec describes.
    fn kind(&self) -> DaemonKind;

    /// Default image reference when the caller did not override
    /// `--image`/`CEPHADM_IMAGE`; `None` means "use the agent-wide
    /// default/override, this kind has no image of its own".
    fn default_image(&self) -> Option<&'static str> {
        None
    }

    /// Entrypoint override, if the image's own default should not run.
    fn entrypoint(&self) -> Option<&'static str>;

    /// Positional arguments passed to the entrypoint.
    fn daemon_args(&self, daemon: &Daemon, layout: &Layout, fsid: &Fsid) -> Vec<String>;

    /// File names that MUST be present in `config-json.files` for this
    /// kind's `deploy` to proceed (beyond `config`/`keyring`).
    fn required_files(&self) -> &'static [&'static str] {
        &[]
    }

    /// `KEY=VALUE` environment pairs this kind's container always gets,
    /// in addition to any `--env` flags the caller passed.
    fn container_envs(&self, ctx: &Context) -> Vec<(String, String)> {
        let _ = ctx;
        Vec::new()
    }

    /// Declared TCP ports, used for the pre-deploy port probe and for
    /// `unit.meta.ports` (spec.md §4.7, I5).
    fn ports(&self) -> &'static [u16] {
        &[]
    }

    /// Run the container `--privileged --group-add=disk`.
    fn privileged(&self) -> bool {
        false
    }

    /// Add `--cap-add=SYS_PTRACE` unless already privileged.
    fn ptrace(&self) -> bool {
        false
    }

    /// How this kind's UID/GID is resolved.
    fn uid_gid_source(&self) -> UidGidSource;

    /// Volume mounts for this kind's container, built from the
    /// daemon's own data/log directories plus any kind-specific host
    /// paths.
    fn container_mounts(&self, daemon: &Daemon, layout: &Layout, fsid: &Fsid) -> Vec<VolumeMount> {
        let data_dir = layout.data_dir(fsid, daemon);
        vec![VolumeMount {
            host_path: data_dir,
            container_path: Utf8PathBuf::from("/var/lib/ceph/daemon"),
            read_only: false,
            relabel: Some('z'),
        }]
    }

    /// Structured bind mounts (propagation-sensitive host paths like
    /// `/dev`, `/run/udev` that a volume mount can't express).
    fn container_binds(&self, daemon: &Daemon, layout: &Layout, fsid: &Fsid) -> Vec<BindMount> {
        let _ = (daemon, layout, fsid);
        Vec::new()
    }

    /// Shell commands run from `unit.poststop` for host-level cleanup
    /// beyond stopping the container itself (spec.md §3).
    fn poststop_commands(&self, daemon: &Daemon, layout: &Layout, fsid: &Fsid) -> Vec<String> {
        let _ = (daemon, layout, fsid);
        Vec::new()
    }

    /// `<sysctl_root>/90-<prefix>-<FSID>-<kind>.conf` contents, if this
    /// kind has sysctl requirements.
    fn sysctl_fragment(&self) -> Option<&'static str> {
        None
    }

    /// For monitoring-stack kinds: file names that MUST be materialized
    /// from `config-json.files`.
    fn config_json_files(&self) -> &'static [&'static str] {
        &[]
    }

    /// For monitoring-stack kinds: command-line arguments whose value
    /// is drawn from the config-json payload rather than a fixed
    /// template.
    fn config_json_args(&self) -> &'static [&'static str] {
        &[]
    }
}

/// `mon`, `mgr`, `mds`, `osd`, `rgw`, `rbd-mirror`, `cephfs-mirror`,
/// `crash`: the storage plane. UID/GID is resolved by statting the
/// image; data directories hold `config`/`keyring` written from the
/// config-json payload.
#[derive(Debug)]
pub struct StorageDaemonSpec(pub DaemonKind);

impl DaemonSpec for StorageDaemonSpec {
    fn kind(&self) -> DaemonKind {
        self.0
    }

    fn entrypoint(&self) -> Option<&'static str> {
        match self.0 {
            DaemonKind::Mon => Some("/usr/bin/ceph-mon"),
            DaemonKind::Mgr => Some("/usr/bin/ceph-mgr"),
            DaemonKind::Mds => Some("/usr/bin/ceph-mds"),
            DaemonKind::Osd => Some("/usr/bin/ceph-osd"),
            DaemonKind::Rgw => Some("/usr/bin/radosgw"),
            DaemonKind::RbdMirror => Some("/usr/bin/rbd-mirror"),
            DaemonKind::CephfsMirror => Some("/usr/bin/cephfs-mirror"),
            DaemonKind::Crash => Some("/usr/bin/ceph-crash"),
            _ => None,
        }
    }

    fn daemon_args(&self, daemon: &Daemon, _layout: &Layout, fsid: &Fsid) -> Vec<String> {
        vec![
            "-n".to_string(),
            format!("{}.{}", self.0, daemon.id),
            "-f".to_string(),
            "--setuser".to_string(),
            "ceph".to_string(),
            "--setgroup".to_string(),
            "ceph".to_string(),
            "--default-log-to-file=false".to_string(),
            "--default-log-to-stderr=true".to_string(),
            format!("--fsid={fsid}"),
        ]
    }

    fn required_files(&self) -> &'static [&'static str] {
        match self.0 {
            DaemonKind::Mon => &["config", "keyring"],
            _ => &["config", "keyring"],
        }
    }

    fn ports(&self) -> &'static [u16] {
        match self.0 {
            DaemonKind::Mon => &[3300, 6789],
            DaemonKind::Mgr => &[8443, 9283],
            DaemonKind::Rgw => &[80],
            _ => &[],
        }
    }

    fn privileged(&self) -> bool {
        matches!(self.0, DaemonKind::Osd)
    }

    fn ptrace(&self) -> bool {
        matches!(self.0, DaemonKind::Osd)
    }

    fn uid_gid_source(&self) -> UidGidSource {
        UidGidSource::StatImagePath("/var/lib/ceph")
    }

    fn container_binds(&self, _daemon: &Daemon, _layout: &Layout, _fsid: &Fsid) -> Vec<BindMount> {
        if self.0 == DaemonKind::Osd {
            vec![
                BindMount {
                    source: "/dev".into(),
                    destination: "/dev".into(),
                    read_only: false,
                },
                BindMount {
                    source: "/run/udev".into(),
                    destination: "/run/udev".into(),
                    read_only: false,
                },
            ]
        } else {
            Vec::new()
        }
    }

    fn poststop_commands(&self, daemon: &Daemon, _layout: &Layout, _fsid: &Fsid) -> Vec<String> {
        if self.0 == DaemonKind::Osd {
            vec![format!(
                "/usr/sbin/lvm vgchange -an --select vg_name=ceph-{}_vg 2>/dev/null || true",
                daemon.id
            )]
        } else {
            Vec::new()
        }
    }

    fn sysctl_fragment(&self) -> Option<&'static str> {
        match self.0 {
            DaemonKind::Osd => Some(
                "kernel.pid_max = 4194304\n\
                 vm.min_free_kbytes = 1000000\n",
            ),
            _ => None,
        }
    }
}

/// `prometheus`, `alertmanager`, `grafana`, `node-exporter`: the
/// monitoring stack. UID/GID is a fixed baked-in pair; configuration is
/// delivered entirely through `config-json.files`/`config-json.args`.
#[derive(Debug)]
pub struct MonitoringDaemonSpec(pub DaemonKind);

impl DaemonSpec for MonitoringDaemonSpec {
    fn kind(&self) -> DaemonKind {
        self.0
    }

    fn default_image(&self) -> Option<&'static str> {
        match self.0 {
            DaemonKind::Prometheus => Some("quay.io/prometheus/prometheus:v2.51.0"),
            DaemonKind::Alertmanager => Some("quay.io/prometheus/alertmanager:v0.27.0"),
            DaemonKind::Grafana => Some("quay.io/example/grafana:10.4.0"),
            DaemonKind::NodeExporter => Some("quay.io/prometheus/node-exporter:v1.7.0"),
            _ => None,
        }
    }

    fn entrypoint(&self) -> Option<&'static str> {
        None
    }

    fn daemon_args(&self, _daemon: &Daemon, _layout: &Layout, _fsid: &Fsid) -> Vec<String> {
        match self.0 {
            DaemonKind::Prometheus => vec![
                "--config.file=/etc/prometheus/prometheus.yml".to_string(),
                "--storage.tsdb.path=/prometheus".to_string(),
            ],
            DaemonKind::Alertmanager => {
                vec!["--config.file=/etc/alertmanager/alertmanager.yml".to_string()]
            }
            DaemonKind::NodeExporter => vec![
                "--no-collector.timex".to_string(),
                "--web.listen-address=:9100".to_string(),
            ],
            _ => Vec::new(),
        }
    }

    fn ports(&self) -> &'static [u16] {
        match self.0 {
            DaemonKind::Prometheus => &[9095],
            DaemonKind::Alertmanager => &[9093, 9094],
            DaemonKind::Grafana => &[3000],
            DaemonKind::NodeExporter => &[9100],
            _ => &[],
        }
    }

    fn uid_gid_source(&self) -> UidGidSource {
        match self.0 {
            DaemonKind::Grafana => UidGidSource::Fixed { uid: 472, gid: 472 },
            _ => UidGidSource::Fixed { uid: 65534, gid: 65534 },
        }
    }

    fn config_json_files(&self) -> &'static [&'static str] {
        match self.0 {
            DaemonKind::Prometheus => &["prometheus.yml"],
            DaemonKind::Alertmanager => &["alertmanager.yml"],
            DaemonKind::Grafana => &["grafana.ini", "provisioning/datasources/ceph-dashboard.yml"],
            DaemonKind::NodeExporter => &[],
            _ => &[],
        }
    }

    fn config_json_args(&self) -> &'static [&'static str] {
        match self.0 {
            DaemonKind::Grafana => &["web.listen-address"],
            _ => &[],
        }
    }
}

/// `nfs`, `iscsi`, `haproxy`, `keepalived`: gateway kinds, each
/// privileged enough to manage the host-level resource it fronts
/// (NFS exports, iSCSI configfs, VRRP).
#[derive(Debug)]
pub struct GatewayDaemonSpec(pub DaemonKind);

impl DaemonSpec for GatewayDaemonSpec {
    fn kind(&self) -> DaemonKind {
        self.0
    }

    fn entrypoint(&self) -> Option<&'static str> {
        match self.0 {
            DaemonKind::Nfs => Some("/usr/bin/ganesha.nfsd"),
            DaemonKind::Iscsi => Some("/usr/bin/rbd-target-api"),
            DaemonKind::Haproxy => Some("/usr/sbin/haproxy"),
            DaemonKind::Keepalived => Some("/usr/sbin/keepalived"),
            _ => None,
        }
    }

    fn daemon_args(&self, _daemon: &Daemon, _layout: &Layout, _fsid: &Fsid) -> Vec<String> {
        match self.0 {
            DaemonKind::Nfs => vec!["-F".to_string(), "-L".to_string(), "STDERR".to_string()],
            DaemonKind::Haproxy => vec![
                "-f".to_string(),
                "/var/lib/ceph/haproxy/haproxy.cfg".to_string(),
                "-db".to_string(),
            ],
            _ => Vec::new(),
        }
    }

    fn ports(&self) -> &'static [u16] {
        match self.0 {
            DaemonKind::Nfs => &[2049],
            DaemonKind::Iscsi => &[3260, 5000],
            DaemonKind::Haproxy => &[80, 443],
            _ => &[],
        }
    }

    fn privileged(&self) -> bool {
        matches!(self.0, DaemonKind::Iscsi | DaemonKind::Keepalived)
    }

    fn uid_gid_source(&self) -> UidGidSource {
        UidGidSource::Fixed { uid: 0, gid: 0 }
    }

    fn container_binds(&self, _daemon: &Daemon, _layout: &Layout, _fsid: &Fsid) -> Vec<BindMount> {
        if self.0 == DaemonKind::Iscsi {
            vec![BindMount {
                source: "/sys/kernel/config".into(),
                destination: "/sys/kernel/config".into(),
                read_only: false,
            }]
        } else {
            Vec::new()
        }
    }

    fn poststop_commands(&self, _daemon: &Daemon, _layout: &Layout, _fsid: &Fsid) -> Vec<String> {
        if self.0 == DaemonKind::Iscsi {
            vec!["umount /sys/kernel/config 2>/dev/null || true".to_string()]
        } else {
            Vec::new()
        }
    }

    fn config_json_files(&self) -> &'static [&'static str] {
        match self.0 {
            DaemonKind::Haproxy => &["haproxy.cfg"],
            DaemonKind::Keepalived => &["keepalived.conf"],
            _ => &[],
        }
    }
}

/// `container`: an arbitrary user-supplied image, driven entirely by
/// the config-json payload (`entrypoint`, `uid`, `gid`, `privileged`,
/// `ports`, `volume_mounts`).
#[derive(Debug)]
pub struct ContainerDaemonSpec;

impl DaemonSpec for ContainerDaemonSpec {
    fn kind(&self) -> DaemonKind {
        DaemonKind::Container
    }

    fn entrypoint(&self) -> Option<&'static str> {
        None
    }

    fn daemon_args(&self, _daemon: &Daemon, _layout: &Layout, _fsid: &Fsid) -> Vec<String> {
        Vec::new()
    }

    fn uid_gid_source(&self) -> UidGidSource {
        UidGidSource::Fixed { uid: 0, gid: 0 }
    }

    fn config_json_args(&self) -> &'static [&'static str] {
        &["entrypoint", "uid", "gid", "privileged", "ports", "volume_mounts"]
    }
}

/// `cephadm-exporter`: this agent's own long-lived metadata exporter,
/// the one kind whose unit is non-templated (spec.md §3).
#[derive(Debug)]
pub struct ExporterDaemonSpec;

impl DaemonSpec for ExporterDaemonSpec {
    fn kind(&self) -> DaemonKind {
        DaemonKind::CephadmExporter
    }

    fn entrypoint(&self) -> Option<&'static str> {
        None
    }

    fn daemon_args(&self, _daemon: &Daemon, _layout: &Layout, _fsid: &Fsid) -> Vec<String> {
        vec!["exporter".to_string(), "--fsid".to_string()]
    }

    fn required_files(&self) -> &'static [&'static str] {
        &["crt", "key", "token"]
    }

    fn ports(&self) -> &'static [u16] {
        &[9443]
    }

    fn uid_gid_source(&self) -> UidGidSource {
        UidGidSource::StatImagePath("/var/lib/ceph")
    }
}

/// Look up the static [`DaemonSpec`] for `kind`, the non-duck-typed
/// replacement for the source's per-class dispatch (spec.md §9).
pub fn daemon_spec_for(kind: DaemonKind) -> Box<dyn DaemonSpec> {
    match kind {
        DaemonKind::Mon
        | DaemonKind::Mgr
        | DaemonKind::Mds
        | DaemonKind::Osd
        | DaemonKind::Rgw
        | DaemonKind::RbdMirror
        | DaemonKind::CephfsMirror
        | DaemonKind::Crash => Box::new(StorageDaemonSpec(kind)),
        DaemonKind::Prometheus
        | DaemonKind::Alertmanager
        | DaemonKind::Grafana
        | DaemonKind::NodeExporter => Box::new(MonitoringDaemonSpec(kind)),
        DaemonKind::Nfs | DaemonKind::Iscsi | DaemonKind::Haproxy | DaemonKind::Keepalived => {
            Box::new(GatewayDaemonSpec(kind))
        }
        DaemonKind::Container => Box::new(ContainerDaemonSpec),
        DaemonKind::CephadmExporter => Box::new(ExporterDaemonSpec),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_has_a_spec() {
        for kind in DaemonKind::ALL {
            let spec = daemon_spec_for(*kind);
            assert_eq!(spec.kind(), *kind);
        }
    }

    #[test]
    fn test_osd_is_privileged_with_ptrace() {
        let spec = daemon_spec_for(DaemonKind::Osd);
        assert!(spec.privileged());
        assert!(spec.ptrace());
        assert!(!spec.container_binds(
            &Daemon::new(DaemonKind::Osd, "0").unwrap(),
            &Layout::new(crate::config::Paths::default()),
            &Fsid::generate(),
        )
        .is_empty());
    }

    #[test]
    fn test_mgr_port_includes_9283() {
        assert!(daemon_spec_for(DaemonKind::Mgr).ports().contains(&9283));
    }

    #[test]
    fn test_monitoring_kinds_use_fixed_uid() {
        let spec = daemon_spec_for(DaemonKind::Prometheus);
        assert!(matches!(spec.uid_gid_source(), UidGidSource::Fixed { uid: 65534, gid: 65534 }));
    }

    #[test]
    fn test_exporter_required_files() {
        let spec = daemon_spec_for(DaemonKind::CephadmExporter);
        assert_eq!(spec.required_files(), &["crt", "key", "token"]);
    }

    #[test]
    fn test_monitoring_kinds_have_their_own_default_image() {
        assert_eq!(daemon_spec_for(DaemonKind::Prometheus).default_image(), Some("quay.io/prometheus/prometheus:v2.51.0"));
        assert_eq!(daemon_spec_for(DaemonKind::Alertmanager).default_image(), Some("quay.io/prometheus/alertmanager:v0.27.0"));
        assert_eq!(daemon_spec_for(DaemonKind::Grafana).default_image(), Some("quay.io/example/grafana:10.4.0"));
        assert_eq!(daemon_spec_for(DaemonKind::NodeExporter).default_image(), Some("quay.io/prometheus/node-exporter:v1.7.0"));
    }

    #[test]
    fn test_storage_plane_kinds_have_no_default_image() {
        assert_eq!(daemon_spec_for(DaemonKind::Mon).default_image(), None);
        assert_eq!(daemon_spec_for(DaemonKind::Osd).default_image(), None);
    }
}
