//! Component G: the Variable Composer (spec §4.G).

use std::collections::BTreeMap;
use merge::Merge;
use uuid::Uuid;
use fleetctl_definitions::{reserved, units, ErrorKind as DefErrorKind};
use fleetctl_store::Store;
use crate::validator::JobVariables;
use crate::Result;

/// Fixed namespace for `<label>_label_id = UUIDv5(label)`.
const LABEL_ID_NAMESPACE: Uuid = Uuid::from_bytes([
    0x2b, 0x1e, 0x4a, 0x7c, 0x9d, 0x3f, 0x4b, 0x61, 0x8a, 0x05, 0x6e, 0x2f, 0x91, 0xc3, 0x4d, 0x77,
]);

/// Layers cluster-wide variables (`maand.vars`) under each job's own
/// overrides (`maand.jobs.conf`'s `<job>.variables` section), overrides
/// winning, via `merge::Merge`'s `BTreeMap` union.
pub fn effective_job_vars(job_names: &[String], cluster_vars: &BTreeMap<String, String>, overrides: &JobVariables) -> JobVariables {
    let mut out = JobVariables::new();
    for name in job_names {
        let merged = match overrides.get(name) {
            Some(o) => cluster_vars.clone().merge(o.clone()),
            None => cluster_vars.clone(),
        };
        out.insert(name.clone(), merged);
    }
    out
}

/// Derives every host's `<label>_nodes/_length/_<i>/_peers/_allocation_index/_label_id`
/// family, its `labels`/tags/`agent_memory`/`agent_cpu` keys, and writes them
/// to `host/<ip>`, deleting whatever keys the previous run left that this
/// run no longer produces.
pub fn compose_host_variables(store: &Store) -> Result<()> {
    let hosts: Vec<_> = store.list_hosts()?.into_iter().filter(|h| !h.detained).collect();

    let mut label_members: BTreeMap<String, Vec<&fleetctl_definitions::Host>> = BTreeMap::new();
    for host in &hosts {
        for label in &host.labels {
            label_members.entry(label.clone()).or_default().push(host);
        }
    }

    let mut shared = BTreeMap::new();
    for (label, members) in &label_members {
        let nodes: Vec<&str> = members.iter().map(|h| h.host_ip.as_str()).collect();
        shared.insert(format!("{}_nodes", label), nodes.join(","));
        shared.insert(format!("{}_length", label), members.len().to_string());
        for (i, member) in members.iter().enumerate() {
            shared.insert(format!("{}_{}", label, i), member.host_ip.clone());
        }
        shared.insert(format!("{}_label_id", label), Uuid::new_v5(&LABEL_ID_NAMESPACE, label.as_bytes()).to_string());
    }

    for host in &hosts {
        let mut keys = shared.clone();

        let mut sorted_labels = host.labels.clone();
        sorted_labels.sort();
        keys.insert("labels".to_string(), sorted_labels.join(","));

        for (k, v) in &host.tags {
            keys.insert(k.clone(), v.clone());
        }
        if host.memory_mb > 0 {
            keys.insert("agent_memory".to_string(), host.memory_mb.to_string());
        }
        if host.cpu_mhz > 0 {
            keys.insert("agent_cpu".to_string(), host.cpu_mhz.to_string());
        }

        for label in &host.labels {
            if let Some(members) = label_members.get(label) {
                let index = members.iter().position(|h| h.host_ip == host.host_ip).unwrap_or(0);
                keys.insert(format!("{}_allocation_index", label), index.to_string());
                let peers: Vec<&str> = members
                    .iter()
                    .filter(|h| h.host_ip != host.host_ip)
                    .map(|h| h.host_ip.as_str())
                    .collect();
                keys.insert(format!("{}_peers", label), peers.join(","));
            }
        }

        write_namespace(store, &format!("host/{}", host.host_ip), &keys)?;
    }
    Ok(())
}

/// Derives each job's `min_memory_limit`/`max_memory_limit`/`memory`
/// (symmetrically for cpu), its `port_<name>` keys, and whatever effective
/// variables (§9: cluster vars layered under per-job overrides) apply to
/// it, writing the result to `job/<name>`. A resource family is entirely
/// suppressed when neither its min/max nor its override sets a nonzero
/// value, so no placeholder zero ever reaches a template.
pub fn compose_job_variables(store: &Store, job_vars: &JobVariables) -> Result<()> {
    for name in store.job_names()? {
        let job = match store.get_job(&name)? {
            Some(j) => j,
            None => continue,
        };

        let mut keys = BTreeMap::new();
        if let Some(overrides) = job_vars.get(&name) {
            for (k, v) in overrides {
                if reserved::is_reserved(&k.to_uppercase()) {
                    let err: fleetctl_definitions::Error = DefErrorKind::ReservedKey(k.clone()).into();
                    return Err(err.into());
                }
                // `memory`/`cpu` overrides carry unit strings (e.g. "1 GB"),
                // the same as resources.{memory,cpu}.{min,max}; normalize them
                // to the bare MB/MHz numbers the validator already checked
                // them against, rather than passing the raw string through.
                let normalized = match k.as_str() {
                    "memory" => units::parse_memory_mb(v)?.to_string(),
                    "cpu" => units::parse_cpu_mhz(v)?.to_string(),
                    _ => v.clone(),
                };
                keys.insert(k.clone(), normalized);
            }
        }

        if job.min_memory_mb > 0 || job.max_memory_mb > 0 || keys.contains_key("memory") {
            if job.min_memory_mb > 0 {
                keys.insert("min_memory_limit".to_string(), job.min_memory_mb.to_string());
            }
            if job.max_memory_mb > 0 {
                keys.insert("max_memory_limit".to_string(), job.max_memory_mb.to_string());
            }
            keys.entry("memory".to_string()).or_insert_with(|| job.max_memory_mb.to_string());
        }
        if job.min_cpu_mhz > 0 || job.max_cpu_mhz > 0 || keys.contains_key("cpu") {
            if job.min_cpu_mhz > 0 {
                keys.insert("min_cpu_limit".to_string(), job.min_cpu_mhz.to_string());
            }
            if job.max_cpu_mhz > 0 {
                keys.insert("max_cpu_limit".to_string(), job.max_cpu_mhz.to_string());
            }
            keys.entry("cpu".to_string()).or_insert_with(|| job.max_cpu_mhz.to_string());
        }

        for (port_name, port) in &job.ports {
            keys.insert(format!("port_{}", port_name), port.to_string());
        }

        write_namespace(store, &format!("job/{}", name), &keys)?;
    }
    Ok(())
}

fn write_namespace(store: &Store, namespace: &str, keys: &BTreeMap<String, String>) -> Result<()> {
    let existing = store.kv_list_keys(namespace)?;
    for (key, value) in keys {
        store.kv_put(namespace, key, value, None)?;
    }
    for key in existing {
        if !keys.contains_key(&key) {
            store.kv_delete(namespace, &key)?;
        }
    }
    Ok(())
}
