//! Deterministic path construction and directory/file materialization
//! under the configured filesystem roots (spec.md §3's layout
//! invariants). `Layout` is pure with respect to anything but the
//! filesystem: every path it returns is a function of `(roots, FSID,
//! kind, id)` alone.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;

use camino::{Utf8Path, Utf8PathBuf};
use rustix::fs::{Gid, Mode, Uid};

use crate::config::{Paths, PREFIX};
use crate::daemon::Daemon;
use crate::error::AgentError;
use crate::fsid::Fsid;

/// Mode applied to a daemon's data directory.
pub const DATA_DIR_MODE: u32 = 0o700;
/// Mode applied to a cluster's log directory.
pub const LOG_DIR_MODE: u32 = 0o770;
/// Mode applied to every daemon marker file.
pub const MARKER_FILE_MODE: u32 = 0o600;

/// `unit.run` — start script.
pub const UNIT_RUN: &str = "unit.run";
/// `unit.poststop` — cleanup script.
pub const UNIT_POSTSTOP: &str = "unit.poststop";
/// `unit.image` — exact image reference used.
pub const UNIT_IMAGE: &str = "unit.image";
/// `unit.meta` — orchestrator-facing JSON metadata.
pub const UNIT_META: &str = "unit.meta";
/// `unit.created` — mtime is first-deploy time, never rewritten.
pub const UNIT_CREATED: &str = "unit.created";
/// `unit.configured` — mtime is last-(re)configure time.
pub const UNIT_CONFIGURED: &str = "unit.configured";

/// The six marker files, in materialization order.
pub const MARKER_FILES: &[&str] = &[
    UNIT_RUN,
    UNIT_POSTSTOP,
    UNIT_IMAGE,
    UNIT_META,
    UNIT_CREATED,
    UNIT_CONFIGURED,
];

/// Owning UID/GID pair applied to a daemon's data directory and its
/// marker files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owner {
    /// Owning UID.
    pub uid: u32,
    /// Owning GID.
    pub gid: u32,
}

/// Path construction and atomic materialization under the configured
/// roots.
#[derive(Debug, Clone)]
pub struct Layout {
    paths: Paths,
}

impl Layout {
    /// Build a layout over the given roots.
    pub fn new(paths: Paths) -> Self {
        Self { paths }
    }

    /// The roots this layout was built from.
    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    /// `<data_root>/<FSID>/<kind>.<id>`.
    pub fn data_dir(&self, fsid: &Fsid, daemon: &Daemon) -> Utf8PathBuf {
        self.cluster_data_dir(fsid).join(daemon.name())
    }

    /// `<data_root>/<FSID>`.
    pub fn cluster_data_dir(&self, fsid: &Fsid) -> Utf8PathBuf {
        self.paths.data_root.join(fsid.to_string())
    }

    /// `<data_root>/<FSID>/removed`, where precious daemons' data is
    /// preserved rather than deleted on `rm-daemon`.
    pub fn removed_dir(&self, fsid: &Fsid) -> Utf8PathBuf {
        self.cluster_data_dir(fsid).join("removed")
    }

    /// `<data_root>/<FSID>/crash`, the host crash spool.
    pub fn crash_dir(&self, fsid: &Fsid) -> Utf8PathBuf {
        self.cluster_data_dir(fsid).join("crash")
    }

    /// `<data_root>/<FSID>/home`, used only by the `shell` sub-command.
    pub fn shell_home_dir(&self, fsid: &Fsid) -> Utf8PathBuf {
        self.cluster_data_dir(fsid).join("home")
    }

    /// `<log_root>/<FSID>`.
    pub fn log_dir(&self, fsid: &Fsid) -> Utf8PathBuf {
        self.paths.log_root.join(fsid.to_string())
    }

    /// `<sysctl_root>/90-<prefix>-<FSID>-<kind>.conf`.
    pub fn sysctl_fragment(&self, fsid: &Fsid, kind: &str) -> Utf8PathBuf {
        self.paths
            .sysctl_root
            .join(format!("90-{PREFIX}-{fsid}-{kind}.conf"))
    }

    /// `<logrotate_root>/<prefix>-<FSID>`.
    pub fn logrotate_fragment(&self, fsid: &Fsid) -> Utf8PathBuf {
        self.paths.logrotate_root.join(format!("{PREFIX}-{fsid}"))
    }

    /// The systemd unit instance name for a daemon: a templated
    /// `<prefix>-<FSID>@<kind>.<id>` for most kinds, or a non-templated
    /// `<prefix>-<FSID>-<kind>.<id>` for the exporter.
    pub fn unit_name(&self, fsid: &Fsid, daemon: &Daemon) -> String {
        if daemon.kind.is_non_templated_unit() {
            format!("{PREFIX}-{fsid}-{}", daemon.name())
        } else {
            format!("{PREFIX}-{fsid}@{}", daemon.name())
        }
    }

    /// `<prefix>-<FSID>@.service`, the per-cluster template unit.
    pub fn template_unit_name(&self, fsid: &Fsid) -> String {
        format!("{PREFIX}-{fsid}@")
    }

    /// `<prefix>-<FSID>.target`, the per-cluster aggregate unit.
    pub fn cluster_target_name(&self, fsid: &Fsid) -> String {
        format!("{PREFIX}-{fsid}")
    }

    /// `<prefix>.target`, the global aggregate unit all cluster targets
    /// declare membership in.
    pub fn global_target_name(&self) -> String {
        PREFIX.to_string()
    }

    /// `<unit_root>/<unit_name>.service`.
    pub fn unit_path(&self, unit_name: &str) -> Utf8PathBuf {
        self.paths.unit_root.join(format!("{unit_name}.service"))
    }

    /// `<unit_root>/<target_name>.target`.
    pub fn target_path(&self, target_name: &str) -> Utf8PathBuf {
        self.paths.unit_root.join(format!("{target_name}.target"))
    }

    /// Path of a marker file within a daemon's data directory.
    pub fn marker_path(&self, data_dir: &Utf8Path, marker: &str) -> Utf8PathBuf {
        data_dir.join(marker)
    }

    /// Create `dir` and any missing ancestors, then apply `mode` and,
    /// if given, `owner`. Idempotent: a directory that already exists
    /// only has its mode/owner refreshed.
    pub fn ensure_dir(
        &self,
        dir: &Utf8Path,
        mode: u32,
        owner: Option<Owner>,
    ) -> Result<(), AgentError> {
        fs::create_dir_all(dir)?;
        rustix::fs::chmod(dir.as_std_path(), Mode::from_raw_mode(mode))?;
        if let Some(owner) = owner {
            chown(dir, owner)?;
        }
        Ok(())
    }

    /// Atomically materialize `path` with `contents`: write `<path>.new`
    /// with `mode`, `fsync`, chown if `owner` is given, then rename over
    /// `path`. This is the only way a daemon marker file is ever
    /// written (spec.md §3's "new, rename" discipline).
    pub fn atomic_write(
        &self,
        path: &Utf8Path,
        contents: &[u8],
        mode: u32,
        owner: Option<Owner>,
    ) -> Result<(), AgentError> {
        let tmp = Utf8PathBuf::from(format!("{path}.new"));
        {
            let mut f = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(mode)
                .open(&tmp)?;
            f.write_all(contents)?;
            f.sync_all()?;
        }
        if let Some(owner) = owner {
            chown(&tmp, owner)?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Materialize `path` with `contents` only if it does not already
    /// exist, preserving its mtime (used for `unit.created`).
    pub fn touch_if_absent(
        &self,
        path: &Utf8Path,
        contents: &[u8],
        mode: u32,
        owner: Option<Owner>,
    ) -> Result<(), AgentError> {
        if path.try_exists()? {
            return Ok(());
        }
        self.atomic_write(path, contents, mode, owner)
    }
}

fn chown(path: &Utf8Path, owner: Owner) -> Result<(), AgentError> {
    rustix::fs::chown(
        path.as_std_path(),
        Some(Uid::from_raw(owner.uid)),
        Some(Gid::from_raw(owner.gid)),
    )?;
    Ok(())
}

impl From<rustix::io::Errno> for AgentError {
    fn from(e: rustix::io::Errno) -> Self {
        AgentError::Io(std::io::Error::from(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::DaemonKind;
    use std::os::unix::fs::PermissionsExt;

    fn layout(tmp: &tempfile::TempDir) -> Layout {
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        Layout::new(Paths {
            data_root: root.join("data"),
            log_root: root.join("log"),
            unit_root: root.join("unit"),
            sysctl_root: root.join("sysctl"),
            logrotate_root: root.join("logrotate"),
            lock_root: root.join("lock"),
        })
    }

    fn self_owner() -> Owner {
        Owner {
            uid: rustix::process::getuid().as_raw(),
            gid: rustix::process::getgid().as_raw(),
        }
    }

    #[test]
    fn test_data_dir_path() {
        let tmp = tempfile::tempdir().unwrap();
        let l = layout(&tmp);
        let fsid = Fsid::generate();
        let daemon = Daemon::new(DaemonKind::Mon, "a").unwrap();
        let dir = l.data_dir(&fsid, &daemon);
        assert_eq!(dir, l.cluster_data_dir(&fsid).join("mon.a"));
    }

    #[test]
    fn test_unit_name_templated_vs_exporter() {
        let tmp = tempfile::tempdir().unwrap();
        let l = layout(&tmp);
        let fsid = Fsid::generate();
        let mon = Daemon::new(DaemonKind::Mon, "a").unwrap();
        let exporter = Daemon::new(DaemonKind::CephadmExporter, "a").unwrap();
        assert!(l.unit_name(&fsid, &mon).contains('@'));
        assert!(!l.unit_name(&fsid, &exporter).contains('@'));
    }

    #[test]
    fn test_ensure_dir_creates_with_mode() {
        let tmp = tempfile::tempdir().unwrap();
        let l = layout(&tmp);
        let fsid = Fsid::generate();
        let dir = l.cluster_data_dir(&fsid);
        l.ensure_dir(&dir, DATA_DIR_MODE, Some(self_owner())).unwrap();
        let meta = fs::metadata(&dir).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, DATA_DIR_MODE);
    }

    #[test]
    fn test_atomic_write_leaves_no_tmp_file() {
        let tmp = tempfile::tempdir().unwrap();
        let l = layout(&tmp);
        let path = Utf8PathBuf::from_path_buf(tmp.path().join("marker")).unwrap();
        l.atomic_write(&path, b"hello", MARKER_FILE_MODE, None).unwrap();
        assert!(!Utf8PathBuf::from(format!("{path}.new")).exists());
        assert_eq!(fs::read(&path).unwrap(), b"hello");
        let meta = fs::metadata(&path).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, MARKER_FILE_MODE);
    }

    #[test]
    fn test_touch_if_absent_preserves_existing() {
        let tmp = tempfile::tempdir().unwrap();
        let l = layout(&tmp);
        let path = Utf8PathBuf::from_path_buf(tmp.path().join("unit.created")).unwrap();
        l.touch_if_absent(&path, b"first", MARKER_FILE_MODE, None).unwrap();
        l.touch_if_absent(&path, b"second", MARKER_FILE_MODE, None).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"first");
    }
}
