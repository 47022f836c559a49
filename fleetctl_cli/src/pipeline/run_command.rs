//! `fleetctl run-command` (spec §6): an ad hoc shell script run across
//! selected hosts, fanned out the same way `orchestrator::run_on_host_runner`
//! fans out its ssh calls. `--health_check` applies the same
//! retry-until-healthy gate `run_target`'s job-level health check uses to
//! the ad hoc command itself, rather than invoking a job's own
//! `health_check` hook (an ad hoc command has no job to carry one).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command as Process;
use std::sync::mpsc::channel;
use std::thread;
use std::time::Duration;

use threadpool::ThreadPool;

use fleetctl_definitions::ErrorKind as DefErrorKind;
use fleetctl_store::Store;

use crate::command::{self, HostMinimal, Invocation};
use crate::pipeline::{workspace_for, BucketLayout};
use crate::Result;

const HEALTH_CHECK_INTERVAL_SECS: u64 = 5;
const HEALTH_CHECK_ATTEMPTS: u32 = 10;

pub struct RunCommandOptions<'a> {
    pub agents: &'a [String],
    pub labels: &'a [String],
    pub cmd: Option<&'a str>,
    pub local: bool,
    pub health_check: bool,
    pub concurrency: usize,
    pub disable_cluster_check: bool,
}

pub fn run(workspace_root: &Path, opts: &RunCommandOptions) -> Result<()> {
    let layout = BucketLayout::new(workspace_root);
    let store = layout.open_store()?;
    let workspace = workspace_for(workspace_root);
    let config = workspace.load_controller_config()?;
    let bucket = store.bucket()?;

    let targets = resolve_targets(&store, opts)?;
    if targets.is_empty() {
        warn!("run-command matched no hosts, nothing to do");
        return Ok(());
    }

    let script = stage_script(workspace_root, &layout, opts.cmd)?;

    let pool = ThreadPool::new(opts.concurrency.max(1));
    let (tx, rx) = channel();
    for host_ip in &targets {
        let tx = tx.clone();
        let script = script.clone();
        let host_ip = host_ip.clone();
        let ssh_user = config.ssh_user.clone();
        let ssh_key = config.ssh_key.clone();
        let use_sudo = config.use_sudo;
        let bucket_id = bucket.bucket_id.clone();
        let update_seq = bucket.update_seq;
        let local = opts.local;
        let attempts = if opts.health_check { HEALTH_CHECK_ATTEMPTS } else { 1 };
        let staging_root = layout.staging_root.clone();

        pool.execute(move || {
            let env = assemble(&host_ip, &ssh_user, &ssh_key, use_sudo, &bucket_id, update_seq);
            let result = run_with_retries(&script, &staging_root, &host_ip, &ssh_user, &ssh_key, local, &env, attempts);
            if let Err(e) = &result {
                warn!("run-command on {} failed: {}", host_ip, e);
            }
            tx.send(result).expect("channel outlives every worker");
        });
    }
    drop(tx);

    let mut first_err = None;
    for result in rx.iter().take(targets.len()) {
        let result: Result<()> = result;
        if let Err(e) = result {
            if first_err.is_none() {
                first_err = Some(e);
            }
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn resolve_targets(store: &Store, opts: &RunCommandOptions) -> Result<Vec<String>> {
    if !opts.agents.is_empty() {
        if !opts.disable_cluster_check {
            let known: Vec<String> = store.list_hosts()?.into_iter().map(|h| h.host_ip).collect();
            for ip in opts.agents {
                if !known.contains(ip) {
                    let err: fleetctl_definitions::Error =
                        DefErrorKind::ResourceViolation(format!("run-command: unknown agent '{}'", ip)).into();
                    return Err(err.into());
                }
            }
        }
        return Ok(opts.agents.to_vec());
    }
    Ok(store.agents_with_labels(opts.labels)?)
}

/// Materializes the ad hoc script on disk: `--cmd` is written to a scratch
/// file under `.fleetctl/staging/_run_command`, otherwise `command.sh` at
/// the workspace root must already exist.
fn stage_script(workspace_root: &Path, layout: &BucketLayout, cmd: Option<&str>) -> Result<PathBuf> {
    match cmd {
        Some(body) => {
            let dir = layout.staging_root.join("_run_command");
            std::fs::create_dir_all(&dir)?;
            let path = dir.join("command.sh");
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body))?;
            restrict_executable(&path)?;
            Ok(path)
        }
        None => {
            let path = workspace_root.join("command.sh");
            if !path.exists() {
                let err: fleetctl_definitions::Error =
                    DefErrorKind::ResourceViolation("run-command: no --cmd given and no command.sh present".to_string()).into();
                return Err(err.into());
            }
            Ok(path)
        }
    }
}

#[cfg(unix)]
fn restrict_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_executable(_path: &Path) -> Result<()> {
    Ok(())
}

fn assemble(host_ip: &str, ssh_user: &str, ssh_key: &str, use_sudo: bool, bucket_id: &str, update_seq: i64) -> BTreeMap<String, String> {
    let agent_dir = format!("/opt/{}", bucket_id);
    let host_minimal = HostMinimal {
        agent_ip: host_ip,
        agent_dir: &agent_dir,
        ssh_user,
        ssh_key,
        use_sudo,
        bucket_id,
        update_seq,
    };
    let invocation = Invocation {
        job: "",
        command: "run-command",
        event: "direct",
        target: "run-command",
        allocation_ip: host_ip,
        allocation_id: host_ip,
        disabled: false,
    };
    command::assemble_env(&host_minimal, &BTreeMap::new(), &BTreeMap::new(), &invocation)
}

fn run_with_retries(
    script: &Path,
    staging_root: &Path,
    host_ip: &str,
    ssh_user: &str,
    ssh_key: &str,
    local: bool,
    env: &BTreeMap<String, String>,
    attempts: u32,
) -> Result<()> {
    for attempt in 1..=attempts {
        let result = if local {
            command::invoke(script, staging_root, env)
        } else {
            run_over_ssh(script, host_ip, ssh_user, ssh_key, env)
        };
        if result.is_ok() || attempt == attempts {
            return result;
        }
        thread::sleep(Duration::from_secs(HEALTH_CHECK_INTERVAL_SECS));
    }
    unreachable!("loop always returns on its final attempt")
}

fn run_over_ssh(script: &Path, host_ip: &str, ssh_user: &str, ssh_key: &str, env: &BTreeMap<String, String>) -> Result<()> {
    let remote_script = std::fs::read_to_string(script)?;
    let env_prefix: String = env.iter().map(|(k, v)| format!("{}={} ", k, shell_quote(v))).collect();
    let remote_cmd = format!("{}sh -c {}", env_prefix, shell_quote(&remote_script));

    let mut cmd = Process::new("ssh");
    cmd.args(&["-i", ssh_key, "-l", ssh_user, host_ip, &remote_cmd]);
    let output = crate::subprocess::output_with_timeout(&mut cmd)?;
    if !output.status.success() {
        let tail = String::from_utf8_lossy(&output.stderr).into_owned();
        let err: fleetctl_definitions::Error =
            DefErrorKind::SubprocessError(format!("ssh {}", host_ip), tail).into();
        return Err(err.into());
    }
    Ok(())
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}
