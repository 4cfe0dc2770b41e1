//! systemd unit rendering and control (spec.md §4.5), grounded on the
//! global/per-cluster target and per-daemon template unit this agent's
//! predecessor wrote directly with `open()`/`rename()`.

use nodeagent_utils::{Runner, Verbosity};

use crate::config::PREFIX;
use crate::container::EngineVersion;
use crate::error::AgentError;
use crate::fsid::Fsid;
use crate::layout::Layout;

/// Observed state of a unit, as reported by `systemctl is-active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    /// `active`.
    Running,
    /// `inactive`.
    Stopped,
    /// `failed` or `auto-restart`.
    Error,
    /// Anything else, including a unit that does not exist.
    Unknown,
}

/// Extra per-engine fragments spliced into the per-daemon template
/// unit (`ExecStartPre`/`ExecStopPost` pidfile cleanup, `Type=forking`,
/// `Delegate=yes`).
#[derive(Debug, Clone, Default)]
pub struct EngineUnitExtras {
    /// The container engine's binary path/name, used in `ExecStop`.
    pub engine_binary: String,
    /// True for engines that run detached via a forking wrapper
    /// (podman's conmon) rather than attaching the container directly.
    pub forking: bool,
    /// True when the engine's running version supports
    /// `Delegate=yes` (cgroup-split mode).
    pub delegate_cgroups: bool,
    /// `docker.service` ordering/requirement, for the docker engine.
    pub depends_on_docker: bool,
}

/// Renders and controls systemd units under `<unit_root>`.
#[derive(Debug, Clone)]
pub struct InitSystem {
    layout: Layout,
}

impl InitSystem {
    /// Build an `InitSystem` over the given layout.
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    /// Write (or refresh) the global `<prefix>.target` and the
    /// per-cluster `<prefix>-<FSID>.target`, enabling and starting each
    /// the first time it is created.
    pub fn write_base_units(&self, fsid: &Fsid) -> Result<(), AgentError> {
        let global_name = self.layout.global_target_name();
        let global_path = self.layout.target_path(&global_name);
        let global_existed = global_path.try_exists()?;
        self.layout.atomic_write(
            &global_path,
            global_target_contents().as_bytes(),
            0o644,
            None,
        )?;
        if !global_existed {
            let _ = self.disable(&global_name);
            self.enable(&global_name)?;
            self.start(&global_name)?;
        }

        let cluster_name = self.layout.cluster_target_name(fsid);
        let cluster_path = self.layout.target_path(&cluster_name);
        let cluster_existed = cluster_path.try_exists()?;
        self.layout.atomic_write(
            &cluster_path,
            cluster_target_contents(fsid, &global_name).as_bytes(),
            0o644,
            None,
        )?;
        if !cluster_existed {
            self.enable(&cluster_name)?;
            self.start(&cluster_name)?;
        }
        Ok(())
    }

    /// Write (or refresh) the per-cluster templated unit, whose
    /// instance name is `<kind>.<id>` (spec.md §4.5).
    pub fn write_template_unit(
        &self,
        fsid: &Fsid,
        extras: &EngineUnitExtras,
    ) -> Result<(), AgentError> {
        let template_name = self.layout.template_unit_name(fsid);
        let path = self.layout.unit_path(&template_name);
        let contents = template_unit_contents(fsid, &self.layout, extras);
        self.layout.atomic_write(&path, contents.as_bytes(), 0o644, None)
    }

    /// `systemctl daemon-reload`.
    pub fn reload(&self) -> Result<(), AgentError> {
        systemctl(&["daemon-reload"], Verbosity::VerboseOnFailure)?;
        Ok(())
    }

    /// `systemctl enable <unit>`.
    pub fn enable(&self, unit: &str) -> Result<(), AgentError> {
        systemctl(&["enable", unit], Verbosity::VerboseOnFailure)?;
        Ok(())
    }

    /// `systemctl disable <unit>`.
    pub fn disable(&self, unit: &str) -> Result<(), AgentError> {
        systemctl(&["disable", unit], Verbosity::VerboseOnFailure)?;
        Ok(())
    }

    /// `systemctl start <unit>`.
    pub fn start(&self, unit: &str) -> Result<(), AgentError> {
        systemctl(&["start", unit], Verbosity::VerboseOnFailure)?;
        Ok(())
    }

    /// `systemctl stop <unit>`, errors ignored by callers that pass
    /// through `Ok` regardless per spec.md's deploy step 10.
    pub fn stop(&self, unit: &str) -> Result<(), AgentError> {
        let _ = Runner::new("systemctl", ["stop", unit])
            .verbosity(Verbosity::Debug)
            .run()?;
        Ok(())
    }

    /// `systemctl reset-failed <unit>`, errors ignored.
    pub fn reset_failed(&self, unit: &str) -> Result<(), AgentError> {
        let _ = Runner::new("systemctl", ["reset-failed", unit])
            .verbosity(Verbosity::Debug)
            .run()?;
        Ok(())
    }

    /// `systemctl is-enabled <unit>`. We key off the exit code rather
    /// than the printed string, which varies across systemd versions.
    pub fn is_enabled(&self, unit: &str) -> Result<bool, AgentError> {
        let out = Runner::new("systemctl", ["is-enabled", unit])
            .verbosity(Verbosity::Debug)
            .run()?;
        Ok(out.success())
    }

    /// `systemctl is-active <unit>`, mapped to [`UnitState`].
    pub fn state(&self, unit: &str) -> Result<UnitState, AgentError> {
        let out = Runner::new("systemctl", ["is-active", unit])
            .verbosity(Verbosity::Debug)
            .run()?;
        Ok(match out.stdout.trim() {
            "active" => UnitState::Running,
            "inactive" => UnitState::Stopped,
            "failed" | "auto-restart" => UnitState::Error,
            _ => UnitState::Unknown,
        })
    }

    /// True if `target` is enabled (used to check `<prefix>.target`
    /// before a redundant enable/start pass).
    pub fn is_target_enabled(&self, target: &str) -> Result<bool, AgentError> {
        self.is_enabled(target)
    }
}

fn systemctl(args: &[&str], verbosity: Verbosity) -> Result<nodeagent_utils::RunOutput, AgentError> {
    Ok(Runner::new("systemctl", args).verbosity(verbosity).run_or_fail()?)
}

fn global_target_contents() -> String {
    format!(
        "# generated by {PREFIX}\n\
[Unit]\n\
Description=All storage clusters and services\n\
\n\
[Install]\n\
WantedBy=multi-user.target\n"
    )
}

fn cluster_target_contents(fsid: &Fsid, global_name: &str) -> String {
    format!(
        "# generated by {PREFIX}\n\
[Unit]\n\
Description=Storage cluster {fsid}\n\
PartOf={global_name}.target\n\
Before={global_name}.target\n\
\n\
[Install]\n\
WantedBy=multi-user.target {global_name}.target\n"
    )
}

fn template_unit_contents(fsid: &Fsid, layout: &Layout, extras: &EngineUnitExtras) -> String {
    let cluster_name = layout.cluster_target_name(fsid);
    let data_root = &layout.paths().data_root;
    let mut extra_args = String::new();
    if extras.forking {
        extra_args.push_str("ExecStartPre=-/bin/rm -f %t/%n-pid %t/%n-cid\n");
        extra_args.push_str("ExecStopPost=-/bin/rm -f %t/%n-pid %t/%n-cid\n");
        extra_args.push_str("Type=forking\n");
        extra_args.push_str("PIDFile=%t/%n-pid\n");
    }
    if extras.delegate_cgroups {
        extra_args.push_str("Delegate=yes\n");
    }
    let docker_after = if extras.depends_on_docker { " docker.service" } else { "" };
    let docker_requires = if extras.depends_on_docker { "Requires=docker.service\n" } else { "" };
    format!(
        "# generated by {PREFIX}\n\
[Unit]\n\
Description={PREFIX} %i for {fsid}\n\
After=network-online.target local-fs.target time-sync.target{docker_after}\n\
Wants=network-online.target local-fs.target time-sync.target\n\
{docker_requires}\n\
PartOf={cluster_name}.target\n\
Before={cluster_name}.target\n\
\n\
[Service]\n\
LimitNOFILE=1048576\n\
LimitNPROC=1048576\n\
EnvironmentFile=-/etc/environment\n\
ExecStart=/bin/bash {data_root}/{fsid}/%i/unit.run\n\
ExecStop=-{engine} stop {PREFIX}-{fsid}-%i\n\
ExecStopPost=-/bin/bash {data_root}/{fsid}/%i/unit.poststop\n\
KillMode=none\n\
Restart=on-failure\n\
RestartSec=10s\n\
TimeoutStartSec=120\n\
TimeoutStopSec=120\n\
StartLimitInterval=30min\n\
StartLimitBurst=5\n\
{extra_args}\n\
[Install]\n\
WantedBy={cluster_name}.target\n",
        engine = extras.engine_binary,
    )
}

/// Build [`EngineUnitExtras`] for a podman engine at the given version.
pub fn podman_extras(version: EngineVersion) -> EngineUnitExtras {
    EngineUnitExtras {
        engine_binary: "podman".to_string(),
        forking: true,
        delegate_cgroups: version >= (EngineVersion { major: 4, minor: 0, patch: 0 }),
        depends_on_docker: false,
    }
}

/// Build [`EngineUnitExtras`] for a docker engine.
pub fn docker_extras() -> EngineUnitExtras {
    EngineUnitExtras {
        engine_binary: "docker".to_string(),
        forking: false,
        delegate_cgroups: false,
        depends_on_docker: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Paths;

    fn layout() -> Layout {
        Layout::new(Paths::default())
    }

    #[test]
    fn test_template_unit_contains_percent_i() {
        let fsid = Fsid::generate();
        let extras = podman_extras(EngineVersion { major: 4, minor: 6, patch: 1 });
        let contents = template_unit_contents(&fsid, &layout(), &extras);
        assert!(contents.contains("%i"));
        assert!(contents.contains("Delegate=yes"));
        assert!(contents.contains("Type=forking"));
    }

    #[test]
    fn test_docker_extras_has_no_forking() {
        let fsid = Fsid::generate();
        let extras = docker_extras();
        let contents = template_unit_contents(&fsid, &layout(), &extras);
        assert!(!contents.contains("Type=forking"));
        assert!(contents.contains("Requires=docker.service"));
    }

    #[test]
    fn test_global_target_contents_matches_exactly() {
        similar_asserts::assert_eq!(
            global_target_contents(),
            indoc::indoc! {"
                # generated by nodeagent
                [Unit]
                Description=All storage clusters and services

                [Install]
                WantedBy=multi-user.target
                "}
        );
    }
}
