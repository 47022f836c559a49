//! `fleetctl deploy [--jobs a,b,c]` (spec §6): runs the deployment
//! orchestrator I over all or selected jobs, committing `update_seq`
//! exactly once per run (spec §8).

use std::path::Path;

use crate::orchestrator;
use crate::pipeline::{all_host_ips, deploy_context, load_variable_namespaces, workspace_for, BucketLayout};
use crate::Result;

pub fn run(workspace_root: &Path, job_filter: Option<&[String]>, concurrency: usize) -> Result<()> {
    let layout = BucketLayout::new(workspace_root);
    let store = layout.open_store()?;
    let workspace = workspace_for(workspace_root);

    let config = workspace.load_controller_config()?;
    let bucket_id = store.bucket()?.bucket_id;
    let job_names = store.job_names()?;
    let host_ips = all_host_ips(&store)?;
    let (host_vars, job_vars) = load_variable_namespaces(&store, &host_ips, &job_names)?;
    let ctx = deploy_context(&layout, &bucket_id, &config, concurrency, &host_vars, &job_vars);

    match job_filter {
        Some(jobs) => info!("Deploying jobs: {}", jobs.join(",")),
        None => info!("Deploying all jobs"),
    }
    orchestrator::deploy(&store, &ctx, job_filter)
}
