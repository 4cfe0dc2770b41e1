//! The daemon deploy/reconfigure/remove engine (spec.md §4.7), the
//! largest single component: orchestrates a `DaemonSpec` into on-disk
//! state, a container, a systemd unit, and firewall rules.

use camino::Utf8PathBuf;
use chrono::Utc;

use crate::config::Context;
use crate::config_json::ConfigJson;
use crate::container::{ContainerRuntime, ContainerSpec};
use crate::daemon::{Daemon, DaemonKind};
use crate::daemon_spec::{daemon_spec_for, UidGidSource};
use crate::error::AgentError;
use crate::firewall::Firewall;
use crate::fsid::Fsid;
use crate::init_system::{docker_extras, podman_extras, EngineUnitExtras, InitSystem};
use crate::layout::{Layout, Owner, DATA_DIR_MODE, LOG_DIR_MODE, MARKER_FILE_MODE, UNIT_CONFIGURED, UNIT_CREATED, UNIT_IMAGE, UNIT_META, UNIT_POSTSTOP, UNIT_RUN};
use nodeagent_utils::{Runner, Verbosity};

/// Parameters bundled into a single `deploy` call (spec.md §4.7).
#[derive(Debug, Clone, Default)]
pub struct DeployParams {
    /// Raw config-json payload text, if the orchestrator sent one.
    pub config_json: Option<String>,
    /// Explicit `osd_fsid`, for OSD daemons.
    pub osd_fsid: Option<String>,
    /// Declared TCP ports beyond the kind's own table, merged in.
    pub extra_ports: Vec<u16>,
    /// Memory request in bytes.
    pub memory_request: Option<u64>,
    /// Memory limit in bytes.
    pub memory_limit: Option<u64>,
    /// Reconfigure an existing deployment rather than deploying fresh.
    pub reconfig: bool,
}

/// Orchestrator-facing metadata written to `unit.meta` (spec.md §3).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct UnitMeta {
    /// Requested memory in bytes, if any.
    pub memory_request: Option<u64>,
    /// Memory limit in bytes, if any.
    pub memory_limit: Option<u64>,
    /// Declared TCP ports.
    pub ports: Vec<u16>,
    /// The systemd service name for this daemon.
    pub service_name: String,
}

/// The deploy/reconfigure/remove engine. Holds every injected
/// dependency (spec.md §2's control-flow note).
#[derive(Debug)]
pub struct DeployEngine<'a> {
    ctx: &'a Context,
    layout: Layout,
    init: InitSystem,
    firewall: Firewall,
    runtime: Box<dyn ContainerRuntime>,
}

impl<'a> DeployEngine<'a> {
    /// Build a deploy engine over the given injected dependencies.
    pub fn new(
        ctx: &'a Context,
        runtime: Box<dyn ContainerRuntime>,
        firewall: Firewall,
    ) -> Self {
        let layout = Layout::new(ctx.paths.clone());
        let init = InitSystem::new(layout.clone());
        Self {
            ctx,
            layout,
            init,
            firewall,
            runtime,
        }
    }

    /// The detected container engine's binary name (`"podman"` or
    /// `"docker"`), for callers outside this module that still need to
    /// shell out to the same engine (e.g. bootstrap's one-off
    /// containers).
    pub fn engine_binary(&self) -> &'static str {
        self.runtime.binary()
    }

    fn engine_extras(&self) -> Result<EngineUnitExtras, AgentError> {
        Ok(match self.runtime.binary() {
            "podman" => podman_extras(self.runtime.version()?),
            _ => docker_extras(),
        })
    }

    /// spec.md §4.7 `deploy`.
    pub fn deploy(
        &self,
        fsid: &Fsid,
        daemon: &Daemon,
        params: &DeployParams,
    ) -> Result<(), AgentError> {
        let spec = daemon_spec_for(daemon.kind);
        let config_json = params
            .config_json
            .as_deref()
            .map(ConfigJson::parse)
            .transpose()?
            .unwrap_or_default();
        config_json.validate_for(daemon.kind, spec.as_ref())?;

        let mut ports: Vec<u16> = spec.ports().to_vec();
        ports.extend(params.extra_ports.iter().copied());
        ports.sort_unstable();
        ports.dedup();

        // Preconditions: every declared port must be free on both IPv4
        // and IPv6, except `mgr`, whose standby-module config may
        // legitimately rebind a port another manager already holds.
        if !params.reconfig {
            for port in &ports {
                if let Some(addr) = crate::net::probe_port(*port) {
                    if daemon.kind == DaemonKind::Mgr {
                        tracing::warn!(
                            "port {port} is already in use on {addr}; proceeding anyway \
                             (mgr standby-module configuration may legitimately share it)"
                        );
                    } else {
                        return Err(AgentError::PortOccupied { port: *port, addr });
                    }
                }
            }
        }

        // 1. Resolve UID/GID.
        let owner = self.resolve_owner(spec.uid_gid_source())?;

        // 2. Create directories.
        let data_dir = self.layout.data_dir(fsid, daemon);
        let data_dir_existed = data_dir.try_exists()?;
        self.layout.ensure_dir(&data_dir, DATA_DIR_MODE, Some(owner))?;
        self.layout
            .ensure_dir(&self.layout.log_dir(fsid), LOG_DIR_MODE, Some(owner))?;

        // 3. First-time mon deploy: mkfs.
        if daemon.kind == DaemonKind::Mon && !params.reconfig && !data_dir_existed {
            self.mkfs_mon(fsid, daemon, &config_json, &owner)?;
        }

        // 4. Materialize kind-specific files (config, keyring, config-json files).
        self.write_payload_files(&data_dir, &config_json, owner)?;

        // Build the container spec once; used for unit.run, unit.image,
        // and the eventual `run` invocation itself. An explicit
        // `--image`/`NODEAGENT_IMAGE` always wins; otherwise a kind with
        // its own default (the monitoring stack) uses that instead of
        // the agent-wide storage image.
        let image = self
            .ctx
            .runtime
            .image_override()
            .or_else(|| spec.default_image().map(String::from))
            .unwrap_or_else(|| self.ctx.runtime.resolve_image());
        let container_spec = self.build_container_spec(fsid, daemon, spec.as_ref(), &config_json, params, &image)?;
        let extras = self.engine_extras()?;

        // 5. unit.run + unit.meta.
        let run_dir = self.ctx.paths.lock_root.clone();
        let argv = self.runtime.build_run_argv(&container_spec, &run_dir);
        let unit_run = render_unit_run(self.runtime.binary(), &container_spec.name, &argv);
        self.layout.atomic_write(
            &data_dir.join(UNIT_RUN),
            unit_run.as_bytes(),
            MARKER_FILE_MODE,
            Some(owner),
        )?;

        let meta = UnitMeta {
            memory_request: params.memory_request,
            memory_limit: params.memory_limit,
            ports: ports.clone(),
            service_name: self.layout.unit_name(fsid, daemon),
        };
        self.layout.atomic_write(
            &data_dir.join(UNIT_META),
            serde_json::to_vec_pretty(&meta)?.as_slice(),
            MARKER_FILE_MODE,
            Some(owner),
        )?;

        // 6. unit.poststop.
        let poststop = render_unit_poststop(&spec.poststop_commands(daemon, &self.layout, fsid));
        self.layout.atomic_write(
            &data_dir.join(UNIT_POSTSTOP),
            poststop.as_bytes(),
            MARKER_FILE_MODE,
            Some(owner),
        )?;

        // 7. unit.image.
        self.layout.atomic_write(
            &data_dir.join(UNIT_IMAGE),
            image.as_bytes(),
            MARKER_FILE_MODE,
            Some(owner),
        )?;

        // 8. sysctl fragment.
        if let Some(fragment) = spec.sysctl_fragment() {
            let path = self.layout.sysctl_fragment(fsid, daemon.kind.as_str());
            self.layout.atomic_write(&path, fragment.as_bytes(), 0o644, None)?;
            apply_sysctl(&path)?;
        }

        // 9. Base units + template unit.
        self.init.write_base_units(fsid)?;
        self.init.write_template_unit(fsid, &extras)?;
        self.init.reload()?;

        // 10. Restart the unit.
        let unit_name = self.layout.unit_name(fsid, daemon);
        let storage_plane_hup_only = params.reconfig && is_storage_plane(daemon.kind);
        if !storage_plane_hup_only {
            let _ = self.init.stop(&unit_name);
            let _ = self.init.reset_failed(&unit_name);
            self.init.enable(&unit_name)?;
            self.init.start(&unit_name)?;
        } else {
            // storage-plane kinds pick up config on HUP from their own
            // restart when mkfs/config changes; step 11 (firewall) is
            // also skipped for this case.
            self.init.start(&unit_name)?;
        }

        // 11. Firewall (skipped for storage-plane reconfigure).
        if !storage_plane_hup_only {
            self.firewall.enable_service_for(daemon.kind)?;
            self.firewall.open_ports(&ports)?;
            self.firewall.apply()?;
        }

        // 12. unit.created / unit.configured.
        let now = Utc::now().to_rfc3339();
        self.layout.touch_if_absent(
            &data_dir.join(UNIT_CREATED),
            now.as_bytes(),
            MARKER_FILE_MODE,
            Some(owner),
        )?;
        self.layout.atomic_write(
            &data_dir.join(UNIT_CONFIGURED),
            now.as_bytes(),
            MARKER_FILE_MODE,
            Some(owner),
        )?;

        Ok(())
    }

    /// spec.md §4.7 `remove`.
    pub fn remove(
        &self,
        fsid: &Fsid,
        daemon: &Daemon,
        force_delete_data: bool,
    ) -> Result<(), AgentError> {
        let unit_name = self.layout.unit_name(fsid, daemon);
        let _ = self.init.stop(&unit_name);
        let _ = self.init.reset_failed(&unit_name);
        let _ = self.init.disable(&unit_name);

        let data_dir = self.layout.data_dir(fsid, daemon);
        if !data_dir.try_exists()? {
            return Ok(());
        }
        if daemon.kind.is_precious() && !force_delete_data {
            let removed_dir = self.layout.removed_dir(fsid);
            std::fs::create_dir_all(&removed_dir)?;
            let dest = removed_dir.join(format!(
                "{}_{}",
                daemon.name(),
                Utc::now().format("%Y%m%d%H%M%S")
            ));
            std::fs::rename(&data_dir, &dest)?;
            tracing::info!("preserved precious daemon data at {dest}");
        } else {
            std::fs::remove_dir_all(&data_dir)?;
        }
        Ok(())
    }

    /// spec.md §4.7 `remove_cluster`.
    pub fn remove_cluster(
        &self,
        fsid: &Fsid,
        daemons: &[Daemon],
        zap_osds: bool,
        keep_logs: bool,
    ) -> Result<(), AgentError> {
        for daemon in daemons {
            let unit_name = self.layout.unit_name(fsid, daemon);
            let _ = self.init.stop(&unit_name);
            let _ = self.init.reset_failed(&unit_name);
            let _ = self.init.disable(&unit_name);
        }
        let cluster_target = self.layout.cluster_target_name(fsid);
        let _ = self.init.stop(&cluster_target);
        let _ = self.init.disable(&cluster_target);

        if zap_osds {
            // Open question carried forward from spec.md §9: the LV-to-
            // device mapping for multi-cluster LVs is not implemented
            // upstream either. Never destructively zap here; refuse.
            return Err(AgentError::usage(
                "zap_osds is not implemented: LV-to-device mapping for \
                 devices whose LVs span multiple clusters is an open \
                 question upstream (see cephadm.py::_zap_osds)",
            ));
        }

        let template = self.layout.template_unit_name(fsid);
        let _ = std::fs::remove_file(self.layout.unit_path(&template));
        let _ = std::fs::remove_file(self.layout.target_path(&cluster_target));

        for daemon in daemons {
            if let Some(fragment) = daemon_spec_for(daemon.kind).sysctl_fragment() {
                let _ = fragment;
                let path = self.layout.sysctl_fragment(fsid, daemon.kind.as_str());
                let _ = std::fs::remove_file(path);
            }
        }

        if !keep_logs {
            let _ = std::fs::remove_dir_all(self.layout.log_dir(fsid));
        }
        let _ = std::fs::remove_dir_all(self.layout.cluster_data_dir(fsid));
        Ok(())
    }

    fn resolve_owner(&self, source: UidGidSource) -> Result<Owner, AgentError> {
        match source {
            UidGidSource::Fixed { uid, gid } => Ok(Owner { uid, gid }),
            UidGidSource::StatImagePath(path) => self.stat_image_path(path),
        }
    }

    /// Resolve UID/GID by statting `path` inside the target image using a
    /// one-off container (spec.md §4.6).
    fn stat_image_path(&self, path: &str) -> Result<Owner, AgentError> {
        let image = self.ctx.runtime.resolve_image();
        let out = Runner::new(
            self.runtime.binary(),
            ["run", "--rm", "--entrypoint", "stat", &image, "-c", "%u %g", path],
        )
        .verbosity(Verbosity::VerboseOnFailure)
        .run_or_fail()?;
        let mut parts = out.stdout.split_whitespace();
        let uid: u32 = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| AgentError::usage(format!("could not stat uid for {path} in {image}")))?;
        let gid: u32 = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| AgentError::usage(format!("could not stat gid for {path} in {image}")))?;
        Ok(Owner { uid, gid })
    }

    fn mkfs_mon(
        &self,
        fsid: &Fsid,
        daemon: &Daemon,
        config_json: &ConfigJson,
        owner: &Owner,
    ) -> Result<(), AgentError> {
        let data_dir = self.layout.data_dir(fsid, daemon);
        let tmp = tempfile::tempdir()?;
        let tmp_config = Utf8PathBuf::from_path_buf(tmp.path().join("config")).unwrap();
        let tmp_keyring = Utf8PathBuf::from_path_buf(tmp.path().join("keyring")).unwrap();
        std::fs::write(&tmp_config, config_json.config.as_deref().unwrap_or_default())?;
        std::fs::write(&tmp_keyring, config_json.keyring.as_deref().unwrap_or_default())?;

        let image = self.ctx.runtime.resolve_image();
        Runner::new(
            self.runtime.binary(),
            [
                "run".to_string(),
                "--rm".to_string(),
                format!("--volume={data_dir}:/var/lib/ceph/mon/ceph-{}:z", daemon.id),
                format!("--volume={tmp_config}:/tmp/config:z"),
                format!("--volume={tmp_keyring}:/tmp/keyring:z"),
                "--entrypoint=ceph-mon".to_string(),
                image,
                "--mkfs".to_string(),
                "-i".to_string(),
                daemon.id.clone(),
                "--fsid".to_string(),
                fsid.to_string(),
                "-c".to_string(),
                "/tmp/config".to_string(),
                "--keyring".to_string(),
                "/tmp/keyring".to_string(),
            ],
        )
        .verbosity(Verbosity::VerboseOnFailure)
        .run_or_fail()?;
        let _ = owner;
        Ok(())
    }

    fn write_payload_files(
        &self,
        data_dir: &camino::Utf8Path,
        config_json: &ConfigJson,
        owner: Owner,
    ) -> Result<(), AgentError> {
        if let Some(config) = &config_json.config {
            self.layout
                .atomic_write(&data_dir.join("config"), config.as_bytes(), MARKER_FILE_MODE, Some(owner))?;
        }
        if let Some(keyring) = &config_json.keyring {
            self.layout
                .atomic_write(&data_dir.join("keyring"), keyring.as_bytes(), MARKER_FILE_MODE, Some(owner))?;
        }
        for (name, content) in &config_json.files {
            let path = data_dir.join(name);
            if let Some(parent) = path.parent() {
                self.layout.ensure_dir(parent, 0o750, Some(owner))?;
            }
            self.layout
                .atomic_write(&path, &content.clone().into_bytes(), MARKER_FILE_MODE, Some(owner))?;
        }
        Ok(())
    }

    fn build_container_spec(
        &self,
        fsid: &Fsid,
        daemon: &Daemon,
        spec: &dyn crate::daemon_spec::DaemonSpec,
        config_json: &ConfigJson,
        params: &DeployParams,
        image: &str,
    ) -> Result<ContainerSpec, AgentError> {
        let mut args = spec.daemon_args(daemon, &self.layout, fsid);
        for key in spec.config_json_args() {
            if let Some(val) = config_json.arg_value(key) {
                args.push(format!("--{key}={val}"));
            }
        }
        let mut env = spec.container_envs(self.ctx);
        env.extend(self.ctx.runtime.env.iter().cloned());

        Ok(ContainerSpec {
            image: image.to_string(),
            name: format!("{}-{fsid}-{}", crate::config::PREFIX, daemon.name()),
            entrypoint: spec.entrypoint().map(str::to_string),
            args,
            env,
            volumes: spec.container_mounts(daemon, &self.layout, fsid),
            binds: spec.container_binds(daemon, &self.layout, fsid),
            privileged: spec.privileged(),
            ptrace: spec.ptrace(),
            host_network: false,
            init: !self.ctx.runtime.no_container_init,
            memory_request: params.memory_request,
            memory_limit: params.memory_limit,
            cap_adds: Vec::new(),
            auth_file: None,
        })
    }
}

fn is_storage_plane(kind: DaemonKind) -> bool {
    matches!(
        kind,
        DaemonKind::Mon
            | DaemonKind::Mgr
            | DaemonKind::Mds
            | DaemonKind::Osd
            | DaemonKind::Rgw
            | DaemonKind::RbdMirror
            | DaemonKind::CephfsMirror
            | DaemonKind::Crash
    )
}

fn render_unit_run(engine: &str, name: &str, argv: &[String]) -> String {
    let quoted: Vec<String> = argv.iter().map(|a| shlex::try_quote(a).unwrap_or_default().into_owned()).collect();
    format!(
        "#!/bin/bash\n\
         set -e\n\
         {engine} rm -f {name} 2>/dev/null || true\n\
         exec {engine} {}\n",
        quoted.join(" ")
    )
}

fn render_unit_poststop(commands: &[String]) -> String {
    let mut s = String::from("#!/bin/bash\nset -e\n");
    for cmd in commands {
        s.push_str(cmd);
        s.push('\n');
    }
    s
}

fn apply_sysctl(path: &camino::Utf8Path) -> Result<(), AgentError> {
    Runner::new("sysctl", ["--system".to_string(), format!("--load={path}")])
        .verbosity(Verbosity::VerboseOnFailure)
        .run_or_fail()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_unit_run_removes_stale_then_starts() {
        let out = render_unit_run("podman", "mon.a", &["run".to_string(), "-d".to_string()]);
        assert!(out.contains("rm -f mon.a"));
        assert!(out.contains("exec podman run -d"));
    }

    #[test]
    fn test_render_unit_poststop_empty() {
        assert_eq!(render_unit_poststop(&[]), "#!/bin/bash\nset -e\n");
    }

    #[test]
    fn test_is_storage_plane() {
        assert!(is_storage_plane(DaemonKind::Osd));
        assert!(!is_storage_plane(DaemonKind::Prometheus));
    }
}
