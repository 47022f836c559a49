//! Component F: the Validator (spec §4.F). Runs after assignment; any
//! violation fails the whole build transactionally, so callers should run
//! this before committing anything component G/H derive from it.

use std::collections::{BTreeMap, HashMap};
use fleetctl_definitions::{units, ErrorKind as DefErrorKind};
use fleetctl_store::Store;
use crate::Result;

/// `job -> variable name -> value`, as loaded by `Workspace::load_job_variables`.
pub type JobVariables = BTreeMap<String, BTreeMap<String, String>>;

pub fn validate(store: &Store, job_vars: &JobVariables) -> Result<()> {
    check_resources(store, job_vars)?;
    check_port_uniqueness(store)?;
    Ok(())
}

fn requested(job_vars: &JobVariables, job: &str, key: &str, default: u64, parse: impl Fn(&str) -> fleetctl_definitions::Result<u64>) -> Result<u64> {
    match job_vars.get(job).and_then(|v| v.get(key)) {
        Some(v) => Ok(parse(v)?),
        None => Ok(default),
    }
}

fn check_resources(store: &Store, job_vars: &JobVariables) -> Result<()> {
    let mut host_memory: HashMap<String, u64> = HashMap::new();
    let mut host_cpu: HashMap<String, u64> = HashMap::new();

    for name in store.job_names()? {
        let job = match store.get_job(&name)? {
            Some(j) => j,
            None => continue,
        };

        if job.min_memory_mb > job.max_memory_mb && job.max_memory_mb > 0 {
            return violation(format!("job '{}': min_memory_mb {} > max_memory_mb {}", name, job.min_memory_mb, job.max_memory_mb));
        }
        if job.min_cpu_mhz > job.max_cpu_mhz && job.max_cpu_mhz > 0 {
            return violation(format!("job '{}': min_cpu_mhz {} > max_cpu_mhz {}", name, job.min_cpu_mhz, job.max_cpu_mhz));
        }

        let req_memory = requested(job_vars, &name, "memory", job.max_memory_mb, units::parse_memory_mb)?;
        let req_cpu = requested(job_vars, &name, "cpu", job.max_cpu_mhz, units::parse_cpu_mhz)?;

        if (job.min_memory_mb > 0 || job.max_memory_mb > 0) && !job.requested_memory_in_range(req_memory) {
            return violation(format!(
                "job '{}': requested memory {}MB outside [{}, {}]",
                name, req_memory, job.min_memory_mb, job.max_memory_mb
            ));
        }
        if (job.min_cpu_mhz > 0 || job.max_cpu_mhz > 0) && !job.requested_cpu_in_range(req_cpu) {
            return violation(format!(
                "job '{}': requested cpu {}MHz outside [{}, {}]",
                name, req_cpu, job.min_cpu_mhz, job.max_cpu_mhz
            ));
        }

        for alloc in store.allocations_for_job(&name)? {
            if alloc.removed {
                continue;
            }
            *host_memory.entry(alloc.host_id.clone()).or_insert(0) += req_memory;
            *host_cpu.entry(alloc.host_id.clone()).or_insert(0) += req_cpu;
        }
    }

    for host in store.list_hosts()? {
        if host.memory_mb > 0 {
            if let Some(&sum) = host_memory.get(&host.host_id) {
                if sum > host.memory_mb {
                    return violation(format!("host '{}': allocated memory {}MB exceeds capacity {}MB", host.host_ip, sum, host.memory_mb));
                }
            }
        }
        if host.cpu_mhz > 0 {
            if let Some(&sum) = host_cpu.get(&host.host_id) {
                if sum > host.cpu_mhz {
                    return violation(format!("host '{}': allocated cpu {}MHz exceeds capacity {}MHz", host.host_ip, sum, host.cpu_mhz));
                }
            }
        }
    }
    Ok(())
}

fn check_port_uniqueness(store: &Store) -> Result<()> {
    let mut by_port: BTreeMap<u32, Vec<String>> = BTreeMap::new();
    for name in store.job_names()? {
        let job = match store.get_job(&name)? {
            Some(j) => j,
            None => continue,
        };
        for &port in job.ports.values() {
            by_port.entry(port).or_default().push(name.clone());
        }
    }
    for (port, jobs) in by_port {
        if jobs.len() > 1 {
            let err: fleetctl_definitions::Error = DefErrorKind::PortCollision(jobs.join(","), port).into();
            return Err(err.into());
        }
    }
    Ok(())
}

fn violation(detail: String) -> Result<()> {
    let err: fleetctl_definitions::Error = DefErrorKind::ResourceViolation(detail).into();
    Err(err.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use fleetctl_definitions::model::{Job, JobCommand};

    fn job(name: &str, min_mem: u64, max_mem: u64, ports: &[(&str, u32)]) -> Job {
        Job {
            job_id: fleetctl_definitions::model::job_id_for(name),
            name: name.to_string(),
            version: "1.0.0".to_string(),
            min_memory_mb: min_mem,
            max_memory_mb: max_mem,
            min_cpu_mhz: 0,
            max_cpu_mhz: 0,
            certs_md5_hash: String::new(),
            deployment_seq: 0,
            labels: vec!["worker".to_string()],
            ports: ports.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            certs: Vec::new(),
            commands: Vec::<JobCommand>::new(),
            files: Vec::new(),
        }
    }

    #[test]
    fn passes_with_no_jobs() {
        let store = Store::open_in_memory().unwrap();
        validate(&store, &JobVariables::new()).unwrap();
    }

    #[test]
    fn min_greater_than_max_is_a_violation() {
        let store = Store::open_in_memory().unwrap();
        store.replace_job(&job("api", 2048, 1024, &[])).unwrap();
        assert!(validate(&store, &JobVariables::new()).is_err());
    }

    #[test]
    fn port_collision_across_two_jobs_is_a_violation() {
        let store = Store::open_in_memory().unwrap();
        store.replace_job(&job("api", 0, 0, &[("http", 8080)])).unwrap();
        store.replace_job(&job("metrics", 0, 0, &[("http", 8080)])).unwrap();
        assert!(validate(&store, &JobVariables::new()).is_err());
    }

    #[test]
    fn host_capacity_exceeded_is_a_violation() {
        let store = Store::open_in_memory().unwrap();
        let host = store.upsert_host("10.0.0.1", 0, &["worker".to_string()], &BTreeMap::new()).unwrap();
        store.set_host_resources("10.0.0.1", 1024, 0).unwrap();
        store.replace_job(&job("api", 0, 2048, &[])).unwrap();
        store.upsert_allocation(&host.host_id, "api", false).unwrap();
        assert!(validate(&store, &JobVariables::new()).is_err());
    }

    #[test]
    fn requested_override_outside_range_is_a_violation() {
        let store = Store::open_in_memory().unwrap();
        store.replace_job(&job("api", 512, 1024, &[])).unwrap();
        let mut vars = JobVariables::new();
        let mut overrides = BTreeMap::new();
        overrides.insert("memory".to_string(), "2 GB".to_string());
        vars.insert("api".to_string(), overrides);
        assert!(validate(&store, &vars).is_err());
    }
}
