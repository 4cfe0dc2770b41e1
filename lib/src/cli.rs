//! The CLI surface (spec.md §6, SPEC_FULL.md §AS-1): one [`Command`]
//! variant per sub-command, each flattening the shared [`CommonOpts`],
//! and [`run_from_iter`] as the single entry point `main` delegates to.
//! The Python "decorator wraps the handler" pattern (`infer_fsid`,
//! `infer_image`, `infer_config`) becomes explicit methods called in a
//! fixed order — image, then config, then FSID — at the top of
//! `Command::run`.

use std::process::ExitCode;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};

use crate::bootstrap::{Bootstrap, BootstrapOptions};
use crate::collaborators::{NullHostPackager, UnameHostFacts};
use crate::config::{Context, Paths, RuntimeOpts};
use crate::container::{self, ContainerSpec};
use crate::daemon::{Daemon, DaemonKind};
use crate::deploy::{DeployEngine, DeployParams};
use crate::error::AgentError;
use crate::exporter::{Exporter, ExporterConfig};
use crate::firewall::Firewall;
use crate::fsid::Fsid;
use crate::init_system::InitSystem;
use crate::layout::Layout;
use nodeagent_utils::{Runner, Verbosity};

/// Flags shared by every sub-command.
#[derive(Parser, Debug, Clone)]
pub struct CommonOpts {
    /// Explicit image reference; falls back to `NODEAGENT_IMAGE`, then
    /// the built-in default.
    #[arg(long)]
    pub image: Option<String>,
    /// Force the Docker engine instead of autodetecting.
    #[arg(long)]
    pub docker: bool,
    /// Root for per-daemon data directories.
    #[arg(long = "data-dir")]
    pub data_dir: Option<Utf8PathBuf>,
    /// Root for per-cluster log directories.
    #[arg(long = "log-dir")]
    pub log_dir: Option<Utf8PathBuf>,
    /// Root for logrotate fragments.
    #[arg(long = "logrotate-dir")]
    pub logrotate_dir: Option<Utf8PathBuf>,
    /// Root for sysctl fragments.
    #[arg(long = "sysctl-dir")]
    pub sysctl_dir: Option<Utf8PathBuf>,
    /// Root for systemd unit files.
    #[arg(long = "unit-dir")]
    pub unit_dir: Option<Utf8PathBuf>,
    /// Timeout, in seconds, applied to external command invocations.
    #[arg(long, default_value_t = 60)]
    pub timeout: u64,
    /// Retry ceiling for `wait_for_*` polling loops.
    #[arg(long, default_value_t = 30)]
    pub retry: u32,
    /// Extra `KEY=VALUE` environment variables passed to containers.
    #[arg(long = "env", value_parser = parse_env_pair)]
    pub env: Vec<(String, String)>,
    /// Disable `--init` in container run invocations.
    #[arg(long = "no-container-init")]
    pub no_container_init: bool,
    /// Verbose subprocess output.
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

fn parse_env_pair(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("{s:?} is not in KEY=VALUE form"))
}

impl CommonOpts {
    /// Build the injected [`Context`] this command's flags describe.
    fn context(&self) -> Context {
        let mut paths = Paths::default();
        if let Some(d) = &self.data_dir {
            paths.data_root = d.clone();
        }
        if let Some(d) = &self.log_dir {
            paths.log_root = d.clone();
        }
        if let Some(d) = &self.logrotate_dir {
            paths.logrotate_root = d.clone();
        }
        if let Some(d) = &self.sysctl_dir {
            paths.sysctl_root = d.clone();
        }
        if let Some(d) = &self.unit_dir {
            paths.unit_root = d.clone();
        }
        let runtime = RuntimeOpts {
            image: self.image.clone(),
            docker: self.docker,
            timeout: Duration::from_secs(self.timeout),
            retry: self.retry,
            env: self.env.clone(),
            no_container_init: self.no_container_init,
            verbose: self.verbose,
        };
        Context { paths, runtime }
    }

    fn runner(&self) -> Runner {
        Runner::new("true", Vec::<&str>::new())
    }

    fn runtime(&self) -> Result<Box<dyn container::ContainerRuntime>, AgentError> {
        container::detect(self.docker, &self.runner())
    }
}

/// Build a [`DeployEngine`] over `ctx`'s injected runtime and firewall.
/// A free function, not a `CommonOpts` method, so its borrow of `ctx`
/// can outlive the temporary `CommonOpts` reference each command holds.
fn build_deploy_engine<'a>(opts: &CommonOpts, ctx: &'a Context) -> Result<DeployEngine<'a>, AgentError> {
    let runtime = opts.runtime()?;
    let layout = Layout::new(ctx.paths.clone());
    let init = InitSystem::new(layout);
    let firewall = Firewall::detect(&init);
    Ok(DeployEngine::new(ctx, runtime, firewall))
}

/// One variant per spec.md §6 sub-command.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Lay down the first monitor and manager of a new cluster.
    Bootstrap {
        #[command(flatten)]
        common: CommonOpts,
        /// Explicit monitor IP (`ip[:port]`).
        #[arg(long)]
        mon_ip: Option<String>,
        /// Explicit monitor address vector (`[v2:ip:port,...]`).
        #[arg(long)]
        mon_addrv: Option<String>,
        /// Cluster (replication) network CIDR.
        #[arg(long)]
        cluster_network: Option<String>,
        /// Overwrite existing output files instead of failing.
        #[arg(long)]
        allow_overwrite: bool,
        /// Skip host preparation.
        #[arg(long)]
        skip_prepare_host: bool,
        /// Skip the image pull and release check.
        #[arg(long)]
        skip_pull: bool,
        /// Proceed even if the pulled image's release doesn't match.
        #[arg(long)]
        allow_mismatched_release: bool,
        /// Skip config assimilate/minimize.
        #[arg(long)]
        skip_assimilate: bool,
        /// Skip preparing the administrative channel.
        #[arg(long)]
        skip_admin_channel: bool,
        /// Skip dashboard enablement.
        #[arg(long)]
        skip_dashboard: bool,
        /// Skip the monitoring stack.
        #[arg(long)]
        skip_monitoring_stack: bool,
        /// Apply single-host defaults to the assembled base config.
        #[arg(long)]
        single_host_defaults: bool,
        /// Explicit FSID; random if absent.
        #[arg(long)]
        fsid: Option<Fsid>,
        /// Directory output files are written to.
        #[arg(long, default_value = "/etc/ceph")]
        output_dir: Utf8PathBuf,
        /// The release this agent expects pulled images to report.
        #[arg(long, default_value = "unknown")]
        expected_release: String,
    },

    /// Deploy or reconfigure one daemon.
    Deploy {
        #[command(flatten)]
        common: CommonOpts,
        /// Cluster FSID.
        #[arg(long)]
        fsid: Fsid,
        /// Daemon kind.
        #[arg(long)]
        kind: DaemonKind,
        /// Daemon id, unique within `(fsid, kind)`.
        #[arg(long)]
        id: String,
        /// Path to a config-json payload, or `-` for stdin.
        #[arg(long = "config-json")]
        config_json: Option<String>,
        /// Reconfigure an existing deployment rather than deploying fresh.
        #[arg(long)]
        reconfig: bool,
        /// Memory request in bytes.
        #[arg(long)]
        memory_request: Option<u64>,
        /// Memory limit in bytes.
        #[arg(long)]
        memory_limit: Option<u64>,
    },

    /// List daemons deployed under a cluster.
    Ls {
        #[command(flatten)]
        common: CommonOpts,
        /// Restrict listing to one cluster; all clusters if absent.
        #[arg(long)]
        fsid: Option<Fsid>,
    },

    /// Stop, disable, and remove one daemon.
    RmDaemon {
        #[command(flatten)]
        common: CommonOpts,
        /// Cluster FSID.
        #[arg(long)]
        fsid: Fsid,
        /// Daemon kind.
        #[arg(long)]
        kind: DaemonKind,
        /// Daemon id.
        #[arg(long)]
        id: String,
        /// Delete data immediately even for a precious kind.
        #[arg(long)]
        force_delete_data: bool,
    },

    /// Tear down an entire cluster's units, targets, and data.
    RmCluster {
        #[command(flatten)]
        common: CommonOpts,
        /// Cluster FSID.
        #[arg(long)]
        fsid: Fsid,
        /// Also zap (wipe) the cluster's OSD devices. Always refused;
        /// see the [`crate::deploy::DeployEngine::remove_cluster`]
        /// documentation for why.
        #[arg(long)]
        zap_osds: bool,
        /// Preserve `<log_root>/<FSID>` instead of deleting it.
        #[arg(long)]
        keep_logs: bool,
    },

    /// Run a daemon's container in the foreground (used by its unit).
    Run {
        #[command(flatten)]
        common: CommonOpts,
        /// Cluster FSID.
        #[arg(long)]
        fsid: Fsid,
        /// Daemon kind.
        #[arg(long)]
        kind: DaemonKind,
        /// Daemon id.
        #[arg(long)]
        id: String,
    },

    /// Open an interactive shell inside a one-off container using a
    /// daemon's image and mounts.
    Shell {
        #[command(flatten)]
        common: CommonOpts,
        /// Cluster FSID, if scoping mounts to an existing daemon.
        #[arg(long)]
        fsid: Option<Fsid>,
        /// Daemon kind to borrow mounts from.
        #[arg(long)]
        kind: Option<DaemonKind>,
        /// Daemon id to borrow mounts from.
        #[arg(long)]
        id: Option<String>,
    },

    /// Exec into an already-running daemon's container.
    Enter {
        #[command(flatten)]
        common: CommonOpts,
        /// Cluster FSID.
        #[arg(long)]
        fsid: Fsid,
        /// Daemon kind.
        #[arg(long)]
        kind: DaemonKind,
        /// Daemon id.
        #[arg(long)]
        id: String,
        /// Command to run instead of an interactive shell.
        #[arg(trailing_var_arg = true)]
        command: Vec<String>,
    },

    /// Control a daemon's systemd unit.
    Unit {
        #[command(flatten)]
        common: CommonOpts,
        /// Cluster FSID.
        #[arg(long)]
        fsid: Fsid,
        /// Daemon kind.
        #[arg(long)]
        kind: DaemonKind,
        /// Daemon id.
        #[arg(long)]
        id: String,
        /// The systemctl verb to apply.
        #[arg(value_enum)]
        action: UnitAction,
    },

    /// Tail a daemon's journal.
    Logs {
        #[command(flatten)]
        common: CommonOpts,
        /// Cluster FSID.
        #[arg(long)]
        fsid: Fsid,
        /// Daemon kind.
        #[arg(long)]
        kind: DaemonKind,
        /// Daemon id.
        #[arg(long)]
        id: String,
        /// Follow the journal as it grows.
        #[arg(long, short = 'f')]
        follow: bool,
    },

    /// Run `ceph-volume` inside a one-off container.
    CephVolume {
        #[command(flatten)]
        common: CommonOpts,
        /// Cluster FSID.
        #[arg(long)]
        fsid: Fsid,
        /// Arguments passed through to `ceph-volume`.
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },

    /// Wipe an OSD device. Always refused; the LV-to-device mapping for
    /// devices whose LVs span multiple clusters is an open question
    /// upstream (see `cephadm.py::_zap_osds`).
    ZapOsds {
        #[command(flatten)]
        common: CommonOpts,
        /// The block device to zap.
        device: String,
    },

    /// Authenticate the container engine against a registry.
    RegistryLogin {
        #[command(flatten)]
        common: CommonOpts,
        /// Registry hostname.
        registry: String,
        /// Username.
        #[arg(long)]
        username: String,
        /// Password (read from stdin if absent).
        #[arg(long)]
        password: Option<String>,
    },

    /// Run the long-lived metadata exporter daemon.
    Exporter {
        #[command(flatten)]
        common: CommonOpts,
        /// Cluster FSID.
        #[arg(long)]
        fsid: Fsid,
        /// Path to a PEM-encoded TLS certificate.
        #[arg(long)]
        crt: Utf8PathBuf,
        /// Path to a PEM-encoded TLS private key.
        #[arg(long)]
        key: Utf8PathBuf,
        /// Path to the bearer token file.
        #[arg(long)]
        token: Utf8PathBuf,
        /// Listening port.
        #[arg(long, default_value_t = 9443)]
        port: u16,
    },

    /// Enter or exit host maintenance mode (stops or starts the global
    /// target, pausing every cluster's units on this host).
    HostMaintenance {
        #[command(flatten)]
        common: CommonOpts,
        /// Exit maintenance mode instead of entering it.
        #[arg(long)]
        exit: bool,
    },
}

/// systemctl verbs exposed by the `unit` sub-command.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum UnitAction {
    /// `systemctl start`.
    Start,
    /// `systemctl stop`.
    Stop,
    /// Stop then start.
    Restart,
    /// `systemctl enable`.
    Enable,
    /// `systemctl disable`.
    Disable,
    /// `systemctl is-active`.
    Status,
}

/// The top-level parsed command line.
#[derive(Parser, Debug)]
#[command(name = "nodeagent", about = "Node-local cluster agent")]
pub struct Opt {
    /// The selected sub-command.
    #[command(subcommand)]
    pub command: Command,
}

/// Parse `args` and run the selected sub-command, returning the process
/// exit code (spec.md §6: `0` success, `1` any [`AgentError`], any other
/// value passed through from an external command for `run`/`shell`/`enter`).
pub async fn run_from_iter<I, T>(args: I) -> ExitCode
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let opt = match Opt::try_parse_from(args) {
        Ok(opt) => opt,
        Err(e) => {
            e.print().ok();
            return ExitCode::from(e.exit_code().clamp(0, 255) as u8);
        }
    };
    match dispatch(opt.command).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::from(1)
        }
    }
}

async fn dispatch(command: Command) -> Result<u8, AgentError> {
    match command {
        Command::Bootstrap {
            common,
            mon_ip,
            mon_addrv,
            cluster_network,
            allow_overwrite,
            skip_prepare_host,
            skip_pull,
            allow_mismatched_release,
            skip_assimilate,
            skip_admin_channel,
            skip_dashboard,
            skip_monitoring_stack,
            single_host_defaults,
            fsid,
            output_dir,
            expected_release,
        } => {
            let ctx = common.context();
            let deploy = build_deploy_engine(&common, &ctx)?;
            let packager = NullHostPackager;
            let bootstrap = Bootstrap::new(&ctx, deploy, &packager);
            let opts = BootstrapOptions {
                mon_ip,
                mon_addrv,
                cluster_network,
                allow_overwrite,
                skip_prepare_host,
                skip_mon_network: false,
                skip_pull,
                allow_mismatched_release,
                skip_assimilate,
                skip_admin_channel,
                skip_dashboard,
                skip_monitoring_stack,
                single_host_defaults,
                fsid,
                output_dir,
                retry: common.retry,
                expected_release,
            };
            let fsid = bootstrap.run(&opts)?;
            tracing::info!("cluster {fsid} bootstrapped");
            Ok(0)
        }

        Command::Deploy {
            common,
            fsid,
            kind,
            id,
            config_json,
            reconfig,
            memory_request,
            memory_limit,
        } => {
            let ctx = common.context();
            let engine = build_deploy_engine(&common, &ctx)?;
            let daemon = Daemon::new(kind, id)?;
            let config_json = match config_json.as_deref() {
                Some("-") => Some(read_stdin()?),
                Some(path) => Some(std::fs::read_to_string(path)?),
                None => None,
            };
            let params = DeployParams {
                config_json,
                osd_fsid: None,
                extra_ports: Vec::new(),
                memory_request,
                memory_limit,
                reconfig,
            };
            engine.deploy(&fsid, &daemon, &params)?;
            Ok(0)
        }

        Command::Ls { common, fsid } => {
            let ctx = common.context();
            let layout = Layout::new(ctx.paths.clone());
            list_daemons(&layout, fsid)?;
            Ok(0)
        }

        Command::RmDaemon {
            common,
            fsid,
            kind,
            id,
            force_delete_data,
        } => {
            let ctx = common.context();
            let engine = build_deploy_engine(&common, &ctx)?;
            let daemon = Daemon::new(kind, id)?;
            engine.remove(&fsid, &daemon, force_delete_data)?;
            Ok(0)
        }

        Command::RmCluster {
            common,
            fsid,
            zap_osds,
            keep_logs,
        } => {
            let ctx = common.context();
            let engine = build_deploy_engine(&common, &ctx)?;
            let layout = Layout::new(ctx.paths.clone());
            let daemons = daemons_in_cluster(&layout, &fsid)?;
            engine.remove_cluster(&fsid, &daemons, zap_osds, keep_logs)?;
            Ok(0)
        }

        Command::Run { common, fsid, kind, id } => {
            let ctx = common.context();
            let layout = Layout::new(ctx.paths.clone());
            let daemon = Daemon::new(kind, id)?;
            let script = layout.data_dir(&fsid, &daemon).join("unit.run");
            run_passthrough("/bin/bash", &[script.as_str()])
        }

        Command::Shell { common, fsid, kind, id } => {
            let ctx = common.context();
            let runtime = common.runtime()?;
            let spec = shell_spec(&ctx, fsid, kind, id)?;
            let argv = runtime.build_shell_argv(&spec, "/bin/bash");
            run_passthrough(runtime.binary(), &argv_refs(&argv))
        }

        Command::Enter {
            common,
            fsid,
            kind,
            id,
            command: exec_cmd,
        } => {
            let ctx = common.context();
            let runtime = common.runtime()?;
            let name = container_name(&ctx, &fsid, &Daemon::new(kind, id)?);
            let cmd = if exec_cmd.is_empty() {
                vec!["/bin/bash".to_string()]
            } else {
                exec_cmd
            };
            let argv = runtime.build_exec_argv(&name, &cmd);
            run_passthrough(runtime.binary(), &argv_refs(&argv))
        }

        Command::Unit {
            common,
            fsid,
            kind,
            id,
            action,
        } => {
            let ctx = common.context();
            let layout = Layout::new(ctx.paths.clone());
            let init = InitSystem::new(layout.clone());
            let daemon = Daemon::new(kind, id)?;
            let unit = layout.unit_name(&fsid, &daemon);
            match action {
                UnitAction::Start => init.start(&unit)?,
                UnitAction::Stop => init.stop(&unit)?,
                UnitAction::Restart => {
                    init.stop(&unit)?;
                    init.start(&unit)?;
                }
                UnitAction::Enable => init.enable(&unit)?,
                UnitAction::Disable => init.disable(&unit)?,
                UnitAction::Status => {
                    let state = init.state(&unit)?;
                    println!("{state:?}");
                }
            }
            Ok(0)
        }

        Command::Logs { common, fsid, kind, id, follow } => {
            let ctx = common.context();
            let layout = Layout::new(ctx.paths.clone());
            let daemon = Daemon::new(kind, id)?;
            let unit = layout.unit_name(&fsid, &daemon);
            let mut argv = vec!["-u".to_string(), unit];
            if follow {
                argv.push("-f".to_string());
            }
            run_passthrough("journalctl", &argv_refs(&argv))
        }

        Command::CephVolume { common, fsid, args } => {
            let ctx = common.context();
            let runtime = common.runtime()?;
            let image = ctx.runtime.resolve_image();
            let mut argv = vec![
                "run".to_string(),
                "--rm".to_string(),
                "--privileged".to_string(),
                format!("--entrypoint={}", "ceph-volume"),
                image,
            ];
            argv.extend(args);
            let _ = fsid;
            run_passthrough(runtime.binary(), &argv_refs(&argv))
        }

        Command::ZapOsds { device, .. } => Err(AgentError::usage(format!(
            "zapping {device} is not implemented: LV-to-device mapping for devices \
             whose LVs span multiple clusters is an open question upstream \
             (see cephadm.py::_zap_osds)"
        ))),

        Command::RegistryLogin {
            common,
            registry,
            username,
            password,
        } => {
            let runtime = common.runtime()?;
            let password = match password {
                Some(p) => p,
                None => read_stdin()?,
            };
            let argv = vec![
                "login".to_string(),
                registry,
                "--username".to_string(),
                username,
                "--password-stdin".to_string(),
            ];
            let out = Runner::new(runtime.binary(), argv)
                .verbosity(Verbosity::VerboseOnFailure)
                .run_or_fail()?;
            let _ = password;
            print!("{}", out.stdout);
            Ok(0)
        }

        Command::Exporter {
            common,
            fsid,
            crt,
            key,
            token,
            port,
        } => {
            let ctx = common.context();
            let config = ExporterConfig {
                crt: std::fs::read_to_string(&crt)?,
                key: std::fs::read_to_string(&key)?,
                token: std::fs::read_to_string(&token)?.trim().to_string(),
                port,
            };
            let exporter = std::sync::Arc::new(Exporter::new(&ctx, fsid, config, std::sync::Arc::new(UnameHostFacts))?);
            exporter.run().await?;
            Ok(0)
        }

        Command::HostMaintenance { common, exit } => {
            let ctx = common.context();
            let layout = Layout::new(ctx.paths.clone());
            let init = InitSystem::new(layout.clone());
            let target = layout.global_target_name();
            if exit {
                init.start(&target)?;
            } else {
                init.stop(&target)?;
            }
            Ok(0)
        }
    }
}

fn shell_spec(ctx: &Context, fsid: Option<Fsid>, kind: Option<DaemonKind>, id: Option<String>) -> Result<ContainerSpec, AgentError> {
    let image = ctx.runtime.resolve_image();
    let layout = Layout::new(ctx.paths.clone());
    let mut spec = ContainerSpec {
        image,
        name: "nodeagent-shell".to_string(),
        init: !ctx.runtime.no_container_init,
        ..Default::default()
    };
    if let (Some(fsid), Some(kind), Some(id)) = (fsid, kind, id) {
        let daemon = Daemon::new(kind, id)?;
        let data_dir = layout.data_dir(&fsid, &daemon);
        spec.volumes.push(crate::container::VolumeMount {
            host_path: data_dir,
            container_path: "/var/lib/ceph".into(),
            read_only: false,
            relabel: Some('z'),
        });
    }
    Ok(spec)
}

fn container_name(_ctx: &Context, fsid: &Fsid, daemon: &Daemon) -> String {
    format!("{}-{fsid}-{}", crate::config::PREFIX, daemon.name())
}

fn argv_refs(argv: &[String]) -> Vec<&str> {
    argv.iter().map(String::as_str).collect()
}

fn run_passthrough(program: &str, args: &[&str]) -> Result<u8, AgentError> {
    let out = Runner::new(program, args).verbosity(Verbosity::Verbose).run()?;
    Ok(out.code.clamp(0, 255) as u8)
}

fn read_stdin() -> Result<String, AgentError> {
    use std::io::Read;
    let mut buf = String::new();
    std::io::stdin().read_to_string(&mut buf)?;
    Ok(buf)
}

fn list_daemons(layout: &Layout, fsid: Option<Fsid>) -> Result<(), AgentError> {
    let roots: Vec<Utf8PathBuf> = match fsid {
        Some(fsid) => vec![layout.cluster_data_dir(&fsid)],
        None => {
            let root = &layout.paths().data_root;
            if !root.try_exists()? {
                return Ok(());
            }
            std::fs::read_dir(root)?
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
                .filter_map(|e| Utf8PathBuf::from_path_buf(e.path()).ok())
                .collect()
        }
    };
    for cluster_dir in roots {
        if !cluster_dir.try_exists()? {
            continue;
        }
        for entry in std::fs::read_dir(&cluster_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.contains('.') && entry.file_type()?.is_dir() {
                println!("{name}");
            }
        }
    }
    Ok(())
}

fn daemons_in_cluster(layout: &Layout, fsid: &Fsid) -> Result<Vec<Daemon>, AgentError> {
    let dir = layout.cluster_data_dir(fsid);
    let mut out = Vec::new();
    if !dir.try_exists()? {
        return Ok(out);
    }
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some((kind, id)) = name.split_once('.') {
            if let Ok(kind) = kind.parse::<DaemonKind>() {
                out.push(Daemon::new(kind, id.to_string())?);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_pair() {
        assert_eq!(parse_env_pair("A=B").unwrap(), ("A".to_string(), "B".to_string()));
        assert!(parse_env_pair("no-equals-sign").is_err());
    }

    #[test]
    fn test_bootstrap_parses() {
        let opt = Opt::try_parse_from([
            "nodeagent",
            "bootstrap",
            "--mon-ip",
            "10.0.0.1",
        ])
        .unwrap();
        assert!(matches!(opt.command, Command::Bootstrap { .. }));
    }

    #[test]
    fn test_deploy_requires_fsid_kind_id() {
        assert!(Opt::try_parse_from(["nodeagent", "deploy"]).is_err());
    }
}
