//! Component K: the Command Executor (spec §4.K). A per-job command is a
//! user-authored script staged into a scratch module root and run as its
//! own subprocess; this module assembles its environment, writes its
//! `demands.json` sibling, invokes it, and enforces the narrow KV surface
//! it's allowed to call back through.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command as Process;
use fleetctl_definitions::ErrorKind as DefErrorKind;
use fleetctl_store::Store;
use crate::Result;

/// A downstream dependent of a command, as written to its `demands.json`.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct Demand {
    pub job: String,
    pub command: Option<String>,
    pub config: Option<String>,
}

/// What's being run and why, threaded through env assembly and the
/// narrow KV gate below.
pub struct Invocation<'a> {
    pub job: &'a str,
    pub command: &'a str,
    pub event: &'a str,
    pub target: &'a str,
    pub allocation_ip: &'a str,
    pub allocation_id: &'a str,
    pub disabled: bool,
}

/// host IP/dir/ssh/sudo/bucket — present on every invocation regardless
/// of job or event.
pub struct HostMinimal<'a> {
    pub agent_ip: &'a str,
    pub agent_dir: &'a str,
    pub ssh_user: &'a str,
    pub ssh_key: &'a str,
    pub use_sudo: bool,
    pub bucket_id: &'a str,
    pub update_seq: i64,
}

/// Assembles the subprocess environment per spec §4.K's precedence: host
/// minimal env, then the computed host env, then the per-job env, then
/// any ambient `MAAND_*` variable, then the invocation's own identity
/// keys (which always win — a user variable named `JOB` can't shadow it,
/// since `reserved.rs` already rejects that key at write time, but the
/// precedence is kept explicit here regardless).
pub fn assemble_env(
    host_minimal: &HostMinimal,
    host_vars: &BTreeMap<String, String>,
    job_vars: &BTreeMap<String, String>,
    invocation: &Invocation,
) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert("AGENT_IP".to_string(), host_minimal.agent_ip.to_string());
    env.insert("AGENT_DIR".to_string(), host_minimal.agent_dir.to_string());
    env.insert("SSH_USER".to_string(), host_minimal.ssh_user.to_string());
    env.insert("SSH_KEY".to_string(), host_minimal.ssh_key.to_string());
    env.insert("USE_SUDO".to_string(), if host_minimal.use_sudo { "1" } else { "0" }.to_string());
    env.insert("BUCKET".to_string(), host_minimal.bucket_id.to_string());
    env.insert("UPDATE_SEQ".to_string(), host_minimal.update_seq.to_string());

    for (k, v) in host_vars {
        env.insert(k.clone(), v.clone());
    }
    for (k, v) in job_vars {
        env.insert(k.clone(), v.clone());
    }
    for (k, v) in std::env::vars() {
        if k.starts_with("MAAND_") {
            env.insert(k, v);
        }
    }

    env.insert("JOB".to_string(), invocation.job.to_string());
    env.insert("COMMAND".to_string(), invocation.command.to_string());
    env.insert("EVENT".to_string(), invocation.event.to_string());
    env.insert("TARGET".to_string(), invocation.target.to_string());
    env.insert("ALLOCATION_IP".to_string(), invocation.allocation_ip.to_string());
    env.insert("ALLOCATION_ID".to_string(), invocation.allocation_id.to_string());
    env.insert("DISABLED".to_string(), if invocation.disabled { "1" } else { "0" }.to_string());
    env
}

/// The jobs/commands/config that declared `depend_on` pointing at
/// `(target_job, target_command)` — either naming that exact command, or
/// naming the job with no specific command (meaning "whenever this job's
/// dependency is satisfied at all").
pub fn demands_for(store: &Store, target_job: &str, target_command: &str) -> Result<Vec<Demand>> {
    let mut demands = Vec::new();
    for name in store.job_names()? {
        let job = match store.get_job(&name)? {
            Some(j) => j,
            None => continue,
        };
        for cmd in &job.commands {
            if let Some(dep) = &cmd.depend_on {
                let job_matches = dep.job.as_deref() == Some(target_job);
                let command_matches = dep.command.is_none() || dep.command.as_deref() == Some(target_command);
                if job_matches && command_matches {
                    demands.push(Demand { job: name.clone(), command: Some(cmd.command.clone()), config: dep.config.clone() });
                }
            }
        }
    }
    Ok(demands)
}

/// Writes `demands.json` next to the command's scratch module root.
pub fn write_demands(scratch_root: &Path, demands: &[Demand]) -> Result<()> {
    let path = scratch_root.join("demands.json");
    let body = serde_json::to_string_pretty(demands)?;
    std::fs::write(path, body)?;
    Ok(())
}

/// Reads any KV namespace/key — reads are unrestricted per spec §4.K.
pub fn kv_get(store: &Store, namespace: &str, key: &str) -> Result<Option<String>> {
    Ok(store.kv_get(namespace, key)?)
}

/// Writes `job/<self>/<key>`, gated exactly as spec §4.K requires: only
/// into the invoking job's own namespace, only outside the `health_check`
/// event, and only when `key` is already in its own lowercase form.
pub fn kv_put(store: &Store, job: &str, event: &str, key: &str, value: &str) -> Result<()> {
    if event == "health_check" {
        let err: fleetctl_definitions::Error =
            DefErrorKind::ReservedKey(format!("{} (writes are not permitted during health_check)", key)).into();
        return Err(err.into());
    }
    if key != key.to_lowercase() {
        let err: fleetctl_definitions::Error = DefErrorKind::ReservedKey(key.to_string()).into();
        return Err(err.into());
    }
    store.kv_put(&format!("job/{}", job), key, value, None)?;
    Ok(())
}

/// Runs the staged script as its own subprocess with `scratch_root` as
/// its working directory, propagating a non-zero exit as a
/// `SubprocessError` carrying its captured stderr tail.
pub fn invoke(script: &Path, scratch_root: &Path, env: &BTreeMap<String, String>) -> Result<()> {
    let mut cmd = Process::new(script);
    cmd.current_dir(scratch_root).envs(env.iter());
    let output = crate::subprocess::output_with_timeout(&mut cmd)?;
    if !output.status.success() {
        let tail = String::from_utf8_lossy(&output.stderr);
        let tail: String = tail.chars().rev().take(2000).collect::<String>().chars().rev().collect();
        let err: fleetctl_definitions::Error =
            DefErrorKind::SubprocessError(script.display().to_string(), format!("{}: {}", output.status, tail)).into();
        return Err(err.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_minimal() -> HostMinimal<'static> {
        HostMinimal {
            agent_ip: "10.0.0.1",
            agent_dir: "/opt/bucket",
            ssh_user: "root",
            ssh_key: "id_rsa",
            use_sudo: false,
            bucket_id: "bucket-1",
            update_seq: 7,
        }
    }

    fn invocation() -> Invocation<'static> {
        Invocation {
            job: "api",
            command: "start",
            event: "direct",
            target: "start",
            allocation_ip: "10.0.0.1",
            allocation_id: "alloc-1",
            disabled: false,
        }
    }

    #[test]
    fn identity_keys_are_always_present() {
        let env = assemble_env(&host_minimal(), &BTreeMap::new(), &BTreeMap::new(), &invocation());
        assert_eq!(env.get("JOB"), Some(&"api".to_string()));
        assert_eq!(env.get("AGENT_IP"), Some(&"10.0.0.1".to_string()));
        assert_eq!(env.get("UPDATE_SEQ"), Some(&"7".to_string()));
    }

    #[test]
    fn job_vars_override_host_vars_on_conflict() {
        let mut host_vars = BTreeMap::new();
        host_vars.insert("region".to_string(), "eu".to_string());
        host_vars.insert("memory".to_string(), "512".to_string());
        let mut job_vars = BTreeMap::new();
        job_vars.insert("memory".to_string(), "1024".to_string());

        let env = assemble_env(&host_minimal(), &host_vars, &job_vars, &invocation());
        assert_eq!(env.get("region"), Some(&"eu".to_string()));
        assert_eq!(env.get("memory"), Some(&"1024".to_string()));
    }

    #[test]
    fn demands_match_job_with_no_specific_command() {
        let store = Store::open_in_memory().unwrap();
        let mut job = fleetctl_definitions::model::Job {
            job_id: fleetctl_definitions::model::job_id_for("consumer"),
            name: "consumer".to_string(),
            version: "1.0.0".to_string(),
            min_memory_mb: 0,
            max_memory_mb: 0,
            min_cpu_mhz: 0,
            max_cpu_mhz: 0,
            certs_md5_hash: String::new(),
            deployment_seq: 0,
            labels: Vec::new(),
            ports: BTreeMap::new(),
            certs: Vec::new(),
            commands: Vec::new(),
            files: Vec::new(),
        };
        job.commands.push(fleetctl_definitions::model::JobCommand {
            command: "wait_for_api".to_string(),
            executed_on: vec!["pre_deploy".to_string()],
            depend_on: Some(fleetctl_definitions::model::DependOn {
                job: Some("api".to_string()),
                command: None,
                config: None,
            }),
        });
        store.replace_job(&job).unwrap();

        let demands = demands_for(&store, "api", "migrate").unwrap();
        assert_eq!(demands.len(), 1);
        assert_eq!(demands[0].job, "consumer");
    }

    #[test]
    fn kv_put_rejects_write_during_health_check() {
        let store = Store::open_in_memory().unwrap();
        assert!(kv_put(&store, "api", "health_check", "color", "blue").is_err());
    }

    #[test]
    fn kv_put_rejects_non_lowercase_key() {
        let store = Store::open_in_memory().unwrap();
        assert!(kv_put(&store, "api", "direct", "Color", "blue").is_err());
    }

    #[test]
    fn kv_put_writes_to_own_job_namespace() {
        let store = Store::open_in_memory().unwrap();
        kv_put(&store, "api", "direct", "color", "blue").unwrap();
        assert_eq!(kv_get(&store, "job/api", "color").unwrap(), Some("blue".to_string()));
    }
}
