//! Component D: the Job Builder (spec §4.D).

use std::collections::HashMap;
use std::fs;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use fleetctl_definitions::model::{job_id_for, Job, JobFile};
use fleetctl_definitions::{units, ErrorKind as DefErrorKind, JobManifest};
use fleetctl_filebacked::Workspace;
use fleetctl_store::Store;
use crate::{Error, Result};

/// Rebuilds every job row from its manifest: deletes the prior row and its
/// children, stores the manifest tree as blob rows, and recomputes
/// `deployment_seq` over the full `pre_deploy` graph. Jobs whose directory
/// disappeared from the workspace are deleted outright.
pub fn build(store: &Store, workspace: &Workspace) -> Result<()> {
    let names = workspace.job_names()?;

    let mut manifests = HashMap::new();
    for name in &names {
        let manifest = workspace.load_job_manifest(name)?;
        check_command_files(workspace, name, &manifest)?;
        manifests.insert(name.clone(), manifest);
    }

    let seqs = deployment_seqs(&manifests)?;

    for name in &names {
        let manifest = &manifests[name];
        let seq = seqs[name];
        let files = stage_files(workspace, name)?;
        let job = build_job(name, manifest, seq, files)?;
        debug!("Storing job '{}' at deployment tier {}", name, seq);
        store.replace_job(&job)?;
    }

    for existing in store.job_names()? {
        if !names.contains(&existing) {
            info!("Job '{}' removed from workspace, deleting", existing);
            store.delete_job(&existing)?;
            store.kv_delete_namespace(&format!("job/{}", existing))?;
        }
    }
    Ok(())
}

fn check_command_files(workspace: &Workspace, name: &str, manifest: &JobManifest) -> Result<()> {
    for command in manifest.job_commands()? {
        if let Some(dep) = &command.depend_on {
            if let Some(dep_command) = &dep.command {
                let dep_job = dep.job.as_deref().unwrap_or(name);
                if !workspace.command_file_exists(dep_job, dep_command) {
                    let err: fleetctl_definitions::Error =
                        DefErrorKind::MissingCommandFile(dep_job.to_string(), dep_command.to_string()).into();
                    return Err(err.into());
                }
            }
        }
    }
    Ok(())
}

/// Longest path from any root (tier 0) through the `pre_deploy` `depend_on`
/// edges, via a topological sort with cycle detection (spec §9: "Kahn's
/// algorithm with cycle detection" satisfies the longest-path invariant).
fn deployment_seqs(manifests: &HashMap<String, JobManifest>) -> Result<HashMap<String, i64>> {
    let mut graph = DiGraph::<String, ()>::new();
    let mut index_of = HashMap::new();
    for name in manifests.keys() {
        let idx = graph.add_node(name.clone());
        index_of.insert(name.clone(), idx);
    }

    for (name, manifest) in manifests {
        for command in manifest.job_commands()? {
            if !command.executed_on.iter().any(|e| e == "pre_deploy") {
                continue;
            }
            if let Some(dep) = &command.depend_on {
                if let Some(dep_job) = &dep.job {
                    if let (Some(&from), Some(&to)) = (index_of.get(dep_job), index_of.get(name)) {
                        graph.add_edge(from, to, ());
                    }
                }
            }
        }
    }

    let order: Vec<NodeIndex> = toposort(&graph, None).map_err(|cycle| {
        let name = &graph[cycle.node_id()];
        let err: fleetctl_definitions::Error =
            DefErrorKind::DependencyCycle(format!("cycle detected at job '{}'", name)).into();
        Error::from(err)
    })?;

    let mut seq: HashMap<NodeIndex, i64> = HashMap::new();
    for idx in order {
        let level = graph
            .neighbors_directed(idx, petgraph::Direction::Incoming)
            .map(|pred| seq.get(&pred).copied().unwrap_or(0) + 1)
            .max()
            .unwrap_or(0);
        seq.insert(idx, level);
    }

    Ok(seq.into_iter().map(|(idx, level)| (graph[idx].clone(), level)).collect())
}

fn build_job(name: &str, manifest: &JobManifest, deployment_seq: i64, files: Vec<JobFile>) -> Result<Job> {
    let memory_min = parse_min_max(&manifest.resources.memory.min, units::parse_memory_mb)?;
    let memory_max = parse_min_max(&manifest.resources.memory.max, units::parse_memory_mb)?;
    let cpu_min = parse_min_max(&manifest.resources.cpu.min, units::parse_cpu_mhz)?;
    let cpu_max = parse_min_max(&manifest.resources.cpu.max, units::parse_cpu_mhz)?;

    let certs = manifest.job_certs()?;
    let certs_md5_hash = {
        let mut names: Vec<&str> = certs.iter().map(|c| c.name.as_str()).collect();
        names.sort();
        format!("{:x}", md5::compute(names.join(",")))
    };

    Ok(Job {
        job_id: job_id_for(name),
        name: name.to_string(),
        version: manifest.version.clone(),
        min_memory_mb: memory_min,
        max_memory_mb: memory_max,
        min_cpu_mhz: cpu_min,
        max_cpu_mhz: cpu_max,
        certs_md5_hash,
        deployment_seq,
        labels: manifest.labels.clone(),
        ports: manifest.ports()?,
        certs,
        commands: manifest.job_commands()?,
        files,
    })
}

fn parse_min_max(
    value: &Option<fleetctl_definitions::deserializers::RelaxedString>,
    parse: impl Fn(&str) -> fleetctl_definitions::Result<u64>,
) -> Result<u64> {
    match value {
        None => Ok(0),
        Some(v) => Ok(parse(&v.to_string())?),
    }
}

/// Reads every file under the job's directory into blob rows, prefixing
/// paths with the job name (matching `job_files_excluding_modules`'s
/// `<name>/_modules%` exclusion pattern) and recording directories with
/// `is_dir=true`.
fn stage_files(workspace: &Workspace, name: &str) -> Result<Vec<JobFile>> {
    let job_dir = workspace.job_dir(name);
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(&job_dir) {
        let entry = entry.map_err(|e| Error::from(format!("walking job directory '{}': {}", name, e)))?;
        if entry.path() == job_dir {
            continue;
        }
        let relative = entry.path().strip_prefix(&job_dir).unwrap();
        let path = format!("{}/{}", name, relative.to_string_lossy().replace('\\', "/"));
        if entry.file_type().is_dir() {
            files.push(JobFile { path, content: Vec::new(), is_dir: true });
        } else if entry.path().file_name().map(|n| n != "manifest.json").unwrap_or(true) {
            let content = fs::read(entry.path())?;
            files.push(JobFile { path, content, is_dir: false });
        }
    }
    Ok(files)
}
