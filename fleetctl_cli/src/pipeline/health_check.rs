//! `fleetctl health-check [--jobs …] [--wait]` (spec §6): runs only the
//! `health_check` hook, optionally retrying per the deploy-time budget
//! when `--wait` is given.

use std::path::Path;

use crate::orchestrator;
use crate::pipeline::{all_host_ips, deploy_context, load_variable_namespaces, workspace_for, BucketLayout};
use crate::Result;

pub fn run(workspace_root: &Path, job_filter: Option<&[String]>, wait: bool, concurrency: usize) -> Result<()> {
    let layout = BucketLayout::new(workspace_root);
    let store = layout.open_store()?;
    let workspace = workspace_for(workspace_root);

    let config = workspace.load_controller_config()?;
    let bucket_id = store.bucket()?.bucket_id;
    let job_names = store.job_names()?;
    let host_ips = all_host_ips(&store)?;
    let (host_vars, job_vars) = load_variable_namespaces(&store, &host_ips, &job_names)?;
    let ctx = deploy_context(&layout, &bucket_id, &config, concurrency, &host_vars, &job_vars);

    orchestrator::health_check(&store, &ctx, job_filter, wait)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn bootstrap(root: &Path) {
        let layout = BucketLayout::new(root);
        fs::create_dir_all(&layout.staging_root).unwrap();
        let store = layout.open_store().unwrap();
        store.init_bucket("bucket-1").unwrap();
    }

    #[test]
    fn health_check_with_no_jobs_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        bootstrap(dir.path());
        run(dir.path(), None, false, 4).unwrap();
    }

    #[test]
    fn job_filter_skipping_every_job_is_still_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        bootstrap(dir.path());
        run(dir.path(), Some(&["api".to_string()]), true, 4).unwrap();
    }
}
