//! Component I: the Deployment Orchestrator (spec §4.I). Walks deployment
//! tiers strictly in order; within a tier, jobs are handled one at a time
//! (tier-to-tier sequencing and per-job Store mutations both need the one
//! connection `Store` wraps), but the per-allocation work inside a single
//! job's `run_target` — staging, hooks, rsync/ssh — fans out across a
//! `threadpool::ThreadPool`, same shape as `shipcat_cli::helm::parallel::reconcile`:
//! workers only touch owned data and the filesystem/subprocesses, never the
//! `Store` directly, and the first error wins once every worker has reported.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command as Process;
use std::sync::mpsc::channel;
use std::thread;
use std::time::Duration;

use threadpool::ThreadPool;

use fleetctl_definitions::model::{Allocation, Job, Transition};
use fleetctl_definitions::{ControllerConfig, ErrorKind as DefErrorKind};
use fleetctl_store::Store;

use crate::command::{self, HostMinimal, Invocation};
use crate::template;
use crate::Result;

const HEALTH_CHECK_INTERVAL_SECS: u64 = 5;
const HEALTH_CHECK_ATTEMPTS_DEFAULT: u32 = 10;
const HEALTH_CHECK_ATTEMPTS_DEPLOY: u32 = 20;

/// Everything a deploy run needs that doesn't come out of the `Store`
/// itself: where things are staged on disk, the controller's resolved
/// config, and how wide to fan out.
pub struct DeployContext<'a> {
    pub staging_root: &'a Path,
    pub bucket_id: &'a str,
    pub config: &'a ControllerConfig,
    pub concurrency: usize,
    pub host_vars: &'a BTreeMap<String, BTreeMap<String, String>>,
    pub job_vars: &'a BTreeMap<String, BTreeMap<String, String>>,
}

/// Runs the orchestrator over every deployment tier in order
/// (`0..=max_deployment_seq`), optionally restricted to `job_filter`.
/// Commits `update_seq` once at the end, matching spec §8's "`update_seq`
/// advances by exactly one per successful `deploy`".
pub fn deploy(store: &Store, ctx: &DeployContext, job_filter: Option<&[String]>) -> Result<()> {
    let max_seq = store.max_deployment_seq()?;
    for seq in 0..=max_seq {
        let mut names = store.job_names_at_deployment_seq(seq)?;
        if let Some(filter) = job_filter {
            names.retain(|n| filter.iter().any(|f| f == n));
        }
        for name in names {
            deploy_one_job(store, ctx, &name)?;
        }
    }
    store.increment_update_seq()?;
    Ok(())
}

fn deploy_one_job(store: &Store, ctx: &DeployContext, name: &str) -> Result<()> {
    let job = match store.get_job(name)? {
        Some(j) => j,
        None => return Ok(()),
    };
    let allocations = store.allocations_for_job(name)?;
    if allocations.is_empty() {
        return Ok(());
    }

    // Step 1: stage files, hydrate certs, render templates.
    for alloc in &allocations {
        stage_allocation(store, ctx, &job, alloc)?;
    }

    // Step 2: hash-diff.
    let mut new_hashes = BTreeMap::new();
    for alloc in &allocations {
        let dir = staging_dir(ctx, &alloc.host_ip, name);
        new_hashes.insert(alloc.host_id.clone(), content_hash_of_dir(&dir)?);
    }
    let transitions: BTreeMap<String, Transition> = allocations
        .iter()
        .map(|a| (a.host_id.clone(), transition_of(a, new_hashes.get(&a.host_id)))
        )
        .collect();

    let total = allocations.len();
    let (removed, disabled, new, changed) = route_allocations(&allocations, &transitions);

    // Step 3: stop withdrawn/disabled allocations first.
    if !removed.is_empty() {
        let owned: Vec<Allocation> = removed.iter().map(|a| (*a).clone()).collect();
        if removed.len() == total {
            run_target(store, ctx, &job, "stop", &owned, false, false)?;
        } else {
            run_target(store, ctx, &job, "stop", &owned, true, false)?;
        }
        for alloc in &removed {
            store.set_allocation_hash(&alloc.host_id, name, alloc.current_hash.as_deref(), None)?;
        }
    }
    // A disabled allocation stays live (still assigned, still staged/synced
    // below, still committed a hash at step 6) but never starts or restarts;
    // spec.md's disabled-job scenario only forbids the job-level gate, so
    // unlike a full withdrawal this still runs per-allocation health checks.
    if !disabled.is_empty() {
        let owned: Vec<Allocation> = disabled.iter().map(|a| (*a).clone()).collect();
        run_target(store, ctx, &job, "stop", &owned, true, false)?;
    }

    let live: Vec<Allocation> = allocations.iter().filter(|a| !a.removed).cloned().collect();

    // Step 4: upload the staged tree, write sidecars.
    if !live.is_empty() {
        sync_and_write_sidecars(store, ctx, &job, &live)?;
    }

    // Step 5: start/restart the surviving allocations.
    if !new.is_empty() {
        let owned: Vec<Allocation> = new.iter().map(|a| (*a).clone()).collect();
        run_target(store, ctx, &job, "start", &owned, false, true)?;
    } else if !changed.is_empty() && changed.len() < live.len() {
        let owned: Vec<Allocation> = changed.iter().map(|a| (*a).clone()).collect();
        run_target(store, ctx, &job, "restart", &owned, true, false)?;
    } else if !changed.is_empty() {
        // every live allocation changed together (e.g. a cluster-wide
        // variable or shared file bumped all hashes at once).
        run_target(store, ctx, &job, "restart", &live, false, false)?;
    }
    // else: everything's unchanged, nothing to start or restart.

    // Step 6: commit the new content hash, collapsing previous -> current.
    for alloc in &live {
        let new_hash = new_hashes.get(&alloc.host_id).cloned();
        store.set_allocation_hash(&alloc.host_id, name, alloc.current_hash.as_deref(), new_hash.as_deref())?;
    }
    Ok(())
}

/// Stages every job's current allocations onto local disk without
/// touching a remote host — the local half of step 1, reused by `build`
/// so `post_build` commands have a `_modules/<command>` script to find
/// before `deploy` ever runs (spec §6: "`build` — run the reconciliation
/// pipeline C→H plus `post_build` hook").
pub fn stage_all(store: &Store, ctx: &DeployContext) -> Result<()> {
    for name in store.job_names()? {
        let job = match store.get_job(&name)? {
            Some(j) => j,
            None => continue,
        };
        for alloc in store.allocations_for_job(&name)?.iter().filter(|a| !a.removed) {
            stage_allocation(store, ctx, &job, alloc)?;
        }
    }
    Ok(())
}

/// Runs the `post_build` hook for every job over its live allocations,
/// once everything is staged. Not wrapped in `run_target`: `post_build`
/// has no paired `pre_`/job_control/health-check steps, it's a bare pass
/// through K at the end of `build`.
pub fn run_post_build(store: &Store, ctx: &DeployContext) -> Result<()> {
    for name in store.job_names()? {
        let job = match store.get_job(&name)? {
            Some(j) => j,
            None => continue,
        };
        let live: Vec<Allocation> = store.allocations_for_job(&name)?.into_iter().filter(|a| !a.removed).collect();
        if live.is_empty() {
            continue;
        }
        run_event(store, ctx, &job, "post_build", &live)?;
    }
    Ok(())
}

fn transition_of(alloc: &Allocation, new_hash: Option<&String>) -> Transition {
    if alloc.removed {
        return Transition::Removed;
    }
    match (&alloc.current_hash, new_hash) {
        (None, _) => Transition::New,
        (Some(old), Some(new)) if old == new => Transition::Unchanged,
        _ => Transition::Changed,
    }
}

/// Pure routing decision for steps 3/5: which allocations are withdrawn,
/// disabled, newly starting, or changed, given each one's hash-diff
/// transition. A disabled allocation is excluded from `new`/`changed`
/// regardless of its transition — it is stopped in step 3 and never
/// started or restarted (spec.md's disabled-job scenario). Kept separate
/// from `deploy_one_job` so it has direct unit test coverage without a
/// `Store` or any subprocess.
fn route_allocations<'a>(
    allocations: &'a [Allocation],
    transitions: &BTreeMap<String, Transition>,
) -> (Vec<&'a Allocation>, Vec<&'a Allocation>, Vec<&'a Allocation>, Vec<&'a Allocation>) {
    let removed: Vec<&Allocation> = allocations.iter().filter(|a| a.removed).collect();
    let disabled: Vec<&Allocation> = allocations.iter().filter(|a| !a.removed && a.disabled).collect();
    let new: Vec<&Allocation> = allocations
        .iter()
        .filter(|a| !a.disabled && transitions.get(&a.host_id) == Some(&Transition::New))
        .collect();
    let changed: Vec<&Allocation> = allocations
        .iter()
        .filter(|a| !a.disabled && transitions.get(&a.host_id) == Some(&Transition::Changed))
        .collect();
    (removed, disabled, new, changed)
}

fn staging_dir(ctx: &DeployContext, host_ip: &str, job: &str) -> PathBuf {
    ctx.staging_root.join(host_ip).join("jobs").join(job)
}

/// Step 1: copies D's file blobs (skipping `_modules/`) into the host's
/// staging directory, hydrates any KV-archived certs for this host/job
/// from H, then renders every in-scope file through J.
fn stage_allocation(store: &Store, ctx: &DeployContext, job: &Job, alloc: &Allocation) -> Result<()> {
    let dir = staging_dir(ctx, &alloc.host_ip, &job.name);
    fs::create_dir_all(&dir)?;

    for file in store.job_files_excluding_modules(&job.name)? {
        let relative = file.path.splitn(2, '/').nth(1).unwrap_or(&file.path);
        let target = dir.join(relative);
        if file.is_dir {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&target, &file.content)?;
        }
    }

    // `_modules/` carries the command scripts `run_event` invokes
    // (`dir.join("_modules").join(&cmd.command)`); excluded above, staged here.
    for file in store.job_modules(&job.name)? {
        let relative = file.path.splitn(2, '/').nth(1).unwrap_or(&file.path);
        let target = dir.join(relative);
        if file.is_dir {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&target, &file.content)?;
        }
    }

    hydrate_certs(store, ctx, job, alloc, &dir)?;

    let mut variables = ctx.host_vars.get(&alloc.host_ip).cloned().unwrap_or_default();
    if let Some(job_vars) = ctx.job_vars.get(&job.name) {
        for (k, v) in job_vars {
            variables.insert(k.clone(), v.clone());
        }
    }

    for entry in walkdir::WalkDir::new(&dir).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_file() {
            template::render_file_in_place(entry.path(), &variables)?;
        }
    }
    Ok(())
}

fn hydrate_certs(store: &Store, ctx: &DeployContext, job: &Job, alloc: &Allocation, dir: &Path) -> Result<()> {
    let host_ns = format!("certs/host/{}", alloc.host_ip);
    if let (Some(key), Some(crt)) = (store.kv_get(&host_ns, "key")?, store.kv_get(&host_ns, "crt")?) {
        let certs_dir = ctx.staging_root.join(&alloc.host_ip).join("certs");
        fs::create_dir_all(&certs_dir)?;
        fs::write(certs_dir.join("host.key"), base64::decode(&key).unwrap_or_default())?;
        fs::write(certs_dir.join("host.crt"), base64::decode(&crt).unwrap_or_default())?;
    }

    for cert in &job.certs {
        let ns = format!("certs/job/{}/{}/certs/{}", alloc.host_ip, job.name, cert.name);
        if let Some(key) = store.kv_get(&ns, "key")? {
            let crt = store.kv_get(&ns, "crt")?.unwrap_or_default();
            let out_dir = dir.join("certs");
            fs::create_dir_all(&out_dir)?;
            fs::write(out_dir.join(format!("{}.key", cert.name)), base64::decode(&key).unwrap_or_default())?;
            fs::write(out_dir.join(format!("{}.crt", cert.name)), base64::decode(&crt).unwrap_or_default())?;
            if let Some(pkcs8) = store.kv_get(&ns, "pkcs8")? {
                fs::write(out_dir.join(format!("{}.pkcs8", cert.name)), base64::decode(&pkcs8).unwrap_or_default())?;
            }
        }
    }
    Ok(())
}

fn content_hash_of_dir(dir: &Path) -> Result<String> {
    if !dir.exists() {
        return Ok(format!("{:x}", md5::compute(b"")));
    }
    let mut entries: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().to_path_buf())
        .collect();
    entries.sort();

    let mut buf = Vec::new();
    for path in entries {
        buf.extend_from_slice(path.to_string_lossy().as_bytes());
        buf.extend_from_slice(&fs::read(&path)?);
    }
    Ok(format!("{:x}", md5::compute(&buf)))
}

/// The atomic unit spec §4.I names `run_target`: `pre_<action>` hooks on
/// the full allocation set, then `job_control` hooks (falling back to the
/// on-host runner via ssh when the job declares none), gated per
/// allocation if `alloc_gate`; then the job-level health check if
/// `job_gate`; then `post_<action>` hooks.
fn run_target(
    store: &Store,
    ctx: &DeployContext,
    job: &Job,
    action: &str,
    allocations: &[Allocation],
    alloc_gate: bool,
    job_gate: bool,
) -> Result<()> {
    run_event(store, ctx, job, &format!("pre_{}", action), allocations)?;

    let has_job_control = job.commands.iter().any(|c| c.executed_on.iter().any(|e| e == "job_control"));
    if has_job_control {
        run_event(store, ctx, job, "job_control", allocations)?;
    } else {
        run_on_host_runner(ctx, job, action, allocations)?;
    }
    if alloc_gate {
        for alloc in allocations {
            health_check_one(store, ctx, job, alloc, HEALTH_CHECK_ATTEMPTS_DEFAULT)?;
        }
    }

    if job_gate {
        for alloc in allocations {
            health_check_one(store, ctx, job, alloc, HEALTH_CHECK_ATTEMPTS_DEPLOY)?;
        }
    }

    run_event(store, ctx, job, &format!("post_{}", action), allocations)?;
    Ok(())
}

/// Standalone `fleetctl health-check [--jobs …] [--wait]` (spec §6): runs
/// only the `health_check` hook, optionally restricted to `job_filter`.
/// Without `--wait` a single failed attempt is fatal immediately; with it,
/// the same retry budget `run_target`'s deploy-time gate uses applies.
pub fn health_check(store: &Store, ctx: &DeployContext, job_filter: Option<&[String]>, wait: bool) -> Result<()> {
    let attempts = if wait { HEALTH_CHECK_ATTEMPTS_DEFAULT } else { 1 };
    for name in store.job_names()? {
        if let Some(filter) = job_filter {
            if !filter.iter().any(|f| f == &name) {
                continue;
            }
        }
        let job = match store.get_job(&name)? {
            Some(j) => j,
            None => continue,
        };
        for alloc in store.allocations_for_job(&name)?.into_iter().filter(|a| !a.removed) {
            health_check_one(store, ctx, &job, &alloc, attempts)?;
        }
    }
    Ok(())
}

fn health_check_one(store: &Store, ctx: &DeployContext, job: &Job, alloc: &Allocation, attempts: u32) -> Result<()> {
    for attempt in 1..=attempts {
        if run_event(store, ctx, job, "health_check", std::slice::from_ref(alloc)).is_ok() {
            return Ok(());
        }
        if attempt < attempts {
            thread::sleep(Duration::from_secs(HEALTH_CHECK_INTERVAL_SECS));
        }
    }
    warn!("job '{}' permanently failed its health check on {}", job.name, alloc.host_ip);
    let err: fleetctl_definitions::Error = DefErrorKind::HealthCheckFailure(job.name.clone()).into();
    Err(err.into())
}

/// Runs every command whose `executed_on` names `event`, across
/// `allocations`, in parallel via a fixed-size pool. Workers touch only
/// owned data and the filesystem/subprocess; the first failure (after
/// every worker reports) is returned. Exposed beyond this module so the
/// `pipeline` glue can drive the fleet-wide `post_build` hook the same
/// way `run_target` drives `pre_<action>`/`post_<action>`.
pub fn run_event(store: &Store, ctx: &DeployContext, job: &Job, event: &str, allocations: &[Allocation]) -> Result<()> {
    let commands: Vec<_> = job.commands.iter().filter(|c| c.executed_on.iter().any(|e| e == event)).collect();
    if commands.is_empty() || allocations.is_empty() {
        return Ok(());
    }

    let pool = ThreadPool::new(ctx.concurrency.max(1));
    let (tx, rx) = channel();
    let mut n_jobs = 0;
    for cmd in &commands {
        let demands = command::demands_for(store, &job.name, &cmd.command)?;
        for alloc in allocations {
            let dir = staging_dir(ctx, &alloc.host_ip, &job.name);
            let script = dir.join("_modules").join(&cmd.command);
            if !script.exists() {
                continue;
            }
            let host_vars = ctx.host_vars.get(&alloc.host_ip).cloned().unwrap_or_default();
            let job_vars = ctx.job_vars.get(&job.name).cloned().unwrap_or_default();
            let agent_dir = format!("/opt/{}", ctx.bucket_id);
            let host_minimal = HostMinimal {
                agent_ip: &alloc.host_ip,
                agent_dir: &agent_dir,
                ssh_user: &ctx.config.ssh_user,
                ssh_key: &ctx.config.ssh_key,
                use_sudo: ctx.config.use_sudo,
                bucket_id: ctx.bucket_id,
                update_seq: 0,
            };
            let allocation_id = format!("{}:{}", alloc.host_id, job.name);
            let invocation = Invocation {
                job: &job.name,
                command: &cmd.command,
                event,
                target: event,
                allocation_ip: &alloc.host_ip,
                allocation_id: &allocation_id,
                disabled: alloc.disabled,
            };
            let env = command::assemble_env(&host_minimal, &host_vars, &job_vars, &invocation);
            command::write_demands(&dir, &demands)?;

            let tx = tx.clone();
            let job_name = job.name.clone();
            let host_ip = alloc.host_ip.clone();
            pool.execute(move || {
                let result = command::invoke(&script, &dir, &env);
                if let Err(e) = &result {
                    warn!("'{}' on {} failed: {}", job_name, host_ip, e);
                }
                tx.send(result).expect("channel outlives every worker");
            });
            n_jobs += 1;
        }
    }
    drop(tx);

    let mut first_err = None;
    for result in rx.iter().take(n_jobs) {
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

/// Falls back to the out-of-scope on-host runner over ssh when a job
/// declares no `job_control` hook, per the on-host layout contract in
/// spec §6: `/opt/<bucket_id>/bin/runner <bucket_id> <action> --jobs <job>`.
fn run_on_host_runner(ctx: &DeployContext, job: &Job, action: &str, allocations: &[Allocation]) -> Result<()> {
    let pool = ThreadPool::new(ctx.concurrency.max(1));
    let (tx, rx) = channel();
    for alloc in allocations {
        let tx = tx.clone();
        let ssh_user = ctx.config.ssh_user.clone();
        let ssh_key = ctx.config.ssh_key.clone();
        let bucket_id = ctx.bucket_id.to_string();
        let action = action.to_string();
        let job_name = job.name.clone();
        let host_ip = alloc.host_ip.clone();
        pool.execute(move || {
            let remote_cmd = format!("/opt/{}/bin/runner {} {} --jobs {}", bucket_id, bucket_id, action, job_name);
            let mut cmd = Process::new("ssh");
            cmd.args(&["-i", &ssh_key, "-l", &ssh_user, &host_ip, &remote_cmd]);
            let result: Result<()> = crate::subprocess::output_with_timeout(&mut cmd)
                .and_then(|output| {
                    if output.status.success() {
                        Ok(())
                    } else {
                        let tail = String::from_utf8_lossy(&output.stderr).into_owned();
                        let err: fleetctl_definitions::Error =
                            DefErrorKind::SubprocessError(format!("ssh {}", host_ip), tail).into();
                        Err(err.into())
                    }
                });
            tx.send(result).expect("channel outlives every worker");
        });
    }
    drop(tx);

    let mut first_err = None;
    for result in rx.iter().take(allocations.len()) {
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

/// Step 4: uploads the staged tree via rsync (filtering to the jobs in
/// scope, so a removed job can still finish stopping on the target) and
/// writes the per-host sidecar files.
fn sync_and_write_sidecars(store: &Store, ctx: &DeployContext, job: &Job, allocations: &[Allocation]) -> Result<()> {
    let bucket = store.bucket()?;
    for alloc in allocations {
        let host_root = ctx.staging_root.join(&alloc.host_ip);
        fs::write(host_root.join("agent.txt"), &alloc.host_id)?;
        fs::write(host_root.join("bucket.txt"), &bucket.bucket_id)?;
        fs::write(host_root.join("update_seq.txt"), bucket.update_seq.to_string())?;
        if let Some(host) = store.get_host_by_ip(&alloc.host_ip)? {
            fs::write(host_root.join("labels.txt"), host.labels.join("\n"))?;
        }

        let mut jobs_json = serde_json::Map::new();
        for other in store.list_allocations()?.into_iter().filter(|a| a.host_id == alloc.host_id && !a.removed) {
            let mut entry = serde_json::Map::new();
            entry.insert("disabled".to_string(), serde_json::Value::Bool(other.disabled));
            jobs_json.insert(other.job, serde_json::Value::Object(entry));
        }
        fs::write(host_root.join("jobs.json"), serde_json::to_string_pretty(&jobs_json)?)?;

        let remote = format!("{}@{}:/opt/{}/", ctx.config.ssh_user, alloc.host_ip, ctx.bucket_id);
        let mut cmd = Process::new("rsync");
        cmd.args(&[
                "-az",
                "--delete",
                "--include=jobs/",
                &format!("--include=jobs/{}/**", job.name),
                "--exclude=jobs/*",
                "-e",
            ])
            .arg(format!("ssh -i {}", ctx.config.ssh_key))
            .arg(format!("{}/", host_root.display()))
            .arg(&remote);
        let output = crate::subprocess::output_with_timeout(&mut cmd)?;
        if !output.status.success() {
            let tail = String::from_utf8_lossy(&output.stderr).into_owned();
            let err: fleetctl_definitions::Error =
                DefErrorKind::SubprocessError(format!("rsync {}", alloc.host_ip), tail).into();
            return Err(err.into());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alloc(host_id: &str, host_ip: &str, job: &str, current: Option<&str>, removed: bool) -> Allocation {
        Allocation {
            host_id: host_id.to_string(),
            host_ip: host_ip.to_string(),
            job: job.to_string(),
            disabled: false,
            removed,
            current_hash: current.map(|s| s.to_string()),
            previous_hash: None,
        }
    }

    #[test]
    fn removed_allocation_transitions_to_removed_regardless_of_hash() {
        let a = alloc("h1", "10.0.0.1", "api", Some("abc"), true);
        assert_eq!(transition_of(&a, Some(&"abc".to_string())), Transition::Removed);
    }

    #[test]
    fn missing_current_hash_is_new() {
        let a = alloc("h1", "10.0.0.1", "api", None, false);
        assert_eq!(transition_of(&a, Some(&"abc".to_string())), Transition::New);
    }

    #[test]
    fn matching_hash_is_unchanged() {
        let a = alloc("h1", "10.0.0.1", "api", Some("abc"), false);
        assert_eq!(transition_of(&a, Some(&"abc".to_string())), Transition::Unchanged);
    }

    #[test]
    fn differing_hash_is_changed() {
        let a = alloc("h1", "10.0.0.1", "api", Some("abc"), false);
        assert_eq!(transition_of(&a, Some(&"xyz".to_string())), Transition::Changed);
    }

    #[test]
    fn content_hash_is_stable_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        let h1 = content_hash_of_dir(dir.path()).unwrap();
        let h2 = content_hash_of_dir(dir.path()).unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn content_hash_changes_with_content() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        let h1 = content_hash_of_dir(dir.path()).unwrap();
        fs::write(dir.path().join("a.txt"), b"goodbye").unwrap();
        let h2 = content_hash_of_dir(dir.path()).unwrap();
        assert_ne!(h1, h2);
    }

    fn disabled_alloc(host_id: &str, host_ip: &str, job: &str, current: Option<&str>) -> Allocation {
        Allocation { disabled: true, ..alloc(host_id, host_ip, job, current, false) }
    }

    #[test]
    fn disabled_allocation_with_no_prior_hash_is_routed_to_disabled_not_new() {
        let a = disabled_alloc("h1", "10.0.0.1", "api", None);
        let allocations = vec![a];
        let mut transitions = BTreeMap::new();
        transitions.insert("h1".to_string(), Transition::New);

        let (removed, disabled, new, changed) = route_allocations(&allocations, &transitions);
        assert!(removed.is_empty());
        assert_eq!(disabled.len(), 1);
        assert!(new.is_empty());
        assert!(changed.is_empty());
    }

    #[test]
    fn disabled_allocation_with_changed_hash_is_routed_to_disabled_not_changed() {
        let a = disabled_alloc("h1", "10.0.0.1", "api", Some("abc"));
        let allocations = vec![a];
        let mut transitions = BTreeMap::new();
        transitions.insert("h1".to_string(), Transition::Changed);

        let (_, disabled, new, changed) = route_allocations(&allocations, &transitions);
        assert_eq!(disabled.len(), 1);
        assert!(new.is_empty());
        assert!(changed.is_empty());
    }

    #[test]
    fn removed_allocation_is_never_also_counted_disabled() {
        let mut a = alloc("h1", "10.0.0.1", "api", Some("abc"), true);
        a.disabled = true;
        let allocations = vec![a];
        let mut transitions = BTreeMap::new();
        transitions.insert("h1".to_string(), Transition::Removed);

        let (removed, disabled, _, _) = route_allocations(&allocations, &transitions);
        assert_eq!(removed.len(), 1);
        assert!(disabled.is_empty());
    }

    #[test]
    fn stage_allocation_copies_modules_subtree_where_run_event_expects_it() {
        let store = Store::open_in_memory().unwrap();
        let job = Job {
            job_id: fleetctl_definitions::model::job_id_for("api"),
            name: "api".to_string(),
            version: "1.0.0".to_string(),
            min_memory_mb: 0,
            max_memory_mb: 0,
            min_cpu_mhz: 0,
            max_cpu_mhz: 0,
            certs_md5_hash: String::new(),
            deployment_seq: 0,
            labels: vec!["worker".to_string()],
            ports: Default::default(),
            certs: Vec::new(),
            commands: Vec::new(),
            files: vec![
                fleetctl_definitions::model::JobFile {
                    path: "api/config.json".to_string(),
                    content: b"{}".to_vec(),
                    is_dir: false,
                },
                fleetctl_definitions::model::JobFile {
                    path: "api/_modules/pre_deploy.sh".to_string(),
                    content: b"#!/bin/sh\necho hi".to_vec(),
                    is_dir: false,
                },
            ],
        };
        store.replace_job(&job).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let config = ControllerConfig::default();
        let host_vars = BTreeMap::new();
        let job_vars = BTreeMap::new();
        let ctx = DeployContext {
            staging_root: dir.path(),
            bucket_id: "bucket",
            config: &config,
            concurrency: 1,
            host_vars: &host_vars,
            job_vars: &job_vars,
        };
        let a = alloc("h1", "10.0.0.1", "api", None, false);

        stage_allocation(&store, &ctx, &job, &a).unwrap();

        let staged = staging_dir(&ctx, "10.0.0.1", "api");
        assert!(staged.join("config.json").exists());
        assert!(staged.join("_modules").join("pre_deploy.sh").exists());
    }

    #[test]
    fn enabled_unchanged_allocation_is_routed_nowhere() {
        let a = alloc("h1", "10.0.0.1", "api", Some("abc"), false);
        let allocations = vec![a];
        let mut transitions = BTreeMap::new();
        transitions.insert("h1".to_string(), Transition::Unchanged);

        let (removed, disabled, new, changed) = route_allocations(&allocations, &transitions);
        assert!(removed.is_empty());
        assert!(disabled.is_empty());
        assert!(new.is_empty());
        assert!(changed.is_empty());
    }
}
