//! `fleetctl build` (spec §6): drives the reconciliation pipeline C→H —
//! inventory reconciler, job builder, assigner, validator, variable
//! composer, certificate engine — then a bare `post_build` pass through
//! K, matching spec.md line 35's "the `build` pipeline drives C→D→E→F→G→H,
//! then a `post_build` pass through K."
//!
//! Rollback: `fleetctl_store::Store` owns its `rusqlite::Connection`
//! outright and exposes no transaction handle to callers, so this
//! function cannot offer the literal "nothing is committed until the
//! entire build succeeds" semantics spec §7 describes. It is fail-fast at
//! step granularity instead: the first error aborts immediately and
//! whatever earlier steps already wrote stays written. This deviation is
//! recorded as an explicit Open Question decision in DESIGN.md rather
//! than silently accepted.

use std::path::Path;

use fleetctl_definitions::ControllerConfig;
use fleetctl_filebacked::Workspace;
use fleetctl_store::Store;

use crate::pipeline::{all_host_ips, deploy_context, load_variable_namespaces, workspace_for, BucketLayout};
use crate::validator::JobVariables;
use crate::{assigner, certs, job_builder, orchestrator, reconciler, validator, variables};
use crate::Result;

pub fn run(workspace_root: &Path, concurrency: usize) -> Result<()> {
    let layout = BucketLayout::new(workspace_root);
    let store = layout.open_store()?;
    let workspace = workspace_for(workspace_root);

    let (config, _effective_vars) = reconcile_assign_validate(&store, &workspace)?;

    info!("Ensuring cluster CA and leaf certificates");
    let bucket_id = store.bucket()?.bucket_id;
    let ca_changed = certs::ensure_ca(&store, &layout.ca_dir, &bucket_id)?;
    certs::renew_host_certs(&store, &layout.ca_dir, &bucket_id, ca_changed)?;
    certs::renew_job_certs(&store, &layout.ca_dir, &config, ca_changed)?;

    let job_names = store.job_names()?;
    let host_ips = all_host_ips(&store)?;
    let (host_vars, job_vars) = load_variable_namespaces(&store, &host_ips, &job_names)?;
    let ctx = deploy_context(&layout, &bucket_id, &config, concurrency, &host_vars, &job_vars);

    info!("Staging job files locally for the post_build hook");
    orchestrator::stage_all(&store, &ctx)?;
    orchestrator::run_post_build(&store, &ctx)?;

    Ok(())
}

/// Everything `build` does short of touching certificates: C (reconciler)
/// through G (variable composer). Kept separate from `run` so it can be
/// unit-tested on its own — `run`'s remaining steps shell out to the real
/// `openssl` binary via `certs.rs`, which this crate's tests deliberately
/// never depend on.
fn reconcile_assign_validate(store: &Store, workspace: &Workspace) -> Result<(ControllerConfig, JobVariables)> {
    info!("Reconciling host inventory");
    let inventory = workspace.load_inventory()?;
    reconciler::reconcile(store, &inventory)?;

    info!("Rebuilding job definitions");
    job_builder::build(store, workspace)?;

    info!("Assigning jobs to hosts");
    let disabled = workspace.load_disabled()?;
    assigner::assign(store, &disabled)?;

    let config = workspace.load_controller_config()?;
    let cluster_vars = workspace.load_cluster_vars()?;
    let job_overrides = workspace.load_job_variables(&config.jobs_conf_path)?;
    let job_names = store.job_names()?;
    let effective_vars = variables::effective_job_vars(&job_names, &cluster_vars, &job_overrides);

    info!("Validating resource and port constraints");
    validator::validate(store, &effective_vars)?;

    info!("Composing host and job variables");
    variables::compose_host_variables(store)?;
    variables::compose_job_variables(store, &effective_vars)?;

    Ok((config, effective_vars))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_manifest(root: &Path, job: &str, body: &str) {
        let dir = root.join("jobs").join(job);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("manifest.json"), body).unwrap();
    }

    #[test]
    fn reconcile_assign_validate_with_no_hosts_and_no_jobs_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("agents.json"), "[]").unwrap();
        let workspace = workspace_for(dir.path());
        let store = Store::open_in_memory().unwrap();
        reconcile_assign_validate(&store, &workspace).unwrap();
    }

    #[test]
    fn reconcile_assign_validate_composes_variables_for_an_allocated_job() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("agents.json"),
            r#"[{"host": "10.0.0.1", "labels": ["worker"]}]"#,
        )
        .unwrap();
        write_manifest(
            dir.path(),
            "api",
            r#"{"version": "1.0.0", "labels": ["worker"], "resources": {"ports": {"port_http": 8080}}}"#,
        );
        let workspace = workspace_for(dir.path());
        let store = Store::open_in_memory().unwrap();

        reconcile_assign_validate(&store, &workspace).unwrap();

        assert_eq!(store.kv_get("job/api", "port_http").unwrap(), Some("8080".to_string()));
        assert_eq!(store.list_allocations().unwrap().len(), 1);
    }

    #[test]
    fn port_collision_aborts_before_certs_are_ever_touched() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("agents.json"),
            r#"[{"host": "10.0.0.1", "labels": ["worker"]}]"#,
        )
        .unwrap();
        write_manifest(
            dir.path(),
            "api",
            r#"{"version": "1.0.0", "labels": ["worker"], "resources": {"ports": {"port_http": 8080}}}"#,
        );
        write_manifest(
            dir.path(),
            "metrics",
            r#"{"version": "1.0.0", "labels": ["worker"], "resources": {"ports": {"port_http": 8080}}}"#,
        );
        let workspace = workspace_for(dir.path());
        let store = Store::open_in_memory().unwrap();

        assert!(reconcile_assign_validate(&store, &workspace).is_err());
    }
}
