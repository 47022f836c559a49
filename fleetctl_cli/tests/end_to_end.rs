//! End-to-end fixture-workspace coverage of spec §8's concrete scenarios,
//! grounded on `shipcat_cli/tests/validate.rs`'s style of driving real
//! library entry points against files written to a temp directory rather
//! than mocking the loader layer. Deliberately stops at component G
//! (the variable composer): component H shells out to the real `openssl`
//! binary and the orchestrator falls back to a real `ssh` call for any
//! job without its own `job_control` command, neither of which this
//! suite depends on (see `certs.rs`/`pipeline::build`'s own test split).

use std::fs;
use std::path::Path;

use fleetctl::{assigner, job_builder, reconciler, validator, variables, Store, Workspace};

fn write_file(path: &Path, body: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, body).unwrap();
}

fn write_manifest(root: &Path, job: &str, body: &str) {
    write_file(&root.join("jobs").join(job).join("manifest.json"), body);
}

/// Runs components C through G (reconciler, job builder, assigner,
/// validator, variable composer) over whatever the workspace root
/// currently has on disk.
fn run_pipeline(store: &Store, workspace: &Workspace) -> fleetctl::Result<()> {
    let inventory = workspace.load_inventory()?;
    reconciler::reconcile(store, &inventory)?;

    job_builder::build(store, workspace)?;

    let disabled = workspace.load_disabled()?;
    assigner::assign(store, &disabled)?;

    let cluster_vars = workspace.load_cluster_vars()?;
    let config = workspace.load_controller_config()?;
    let job_overrides = workspace.load_job_variables(&config.jobs_conf_path)?;
    let job_names = store.job_names()?;
    let effective_vars = variables::effective_job_vars(&job_names, &cluster_vars, &job_overrides);

    validator::validate(store, &effective_vars)?;

    variables::compose_host_variables(store)?;
    variables::compose_job_variables(store, &effective_vars)?;
    Ok(())
}

/// Scenario 1: fresh build with one job (spec §8).
#[test]
fn fresh_build_with_one_job() {
    let dir = tempfile::tempdir().unwrap();
    write_file(
        &dir.path().join("agents.json"),
        r#"[{"host": "10.0.0.1", "labels": ["worker"], "memory": "4 GB", "cpu": "2 GHZ"}]"#,
    );
    write_manifest(
        dir.path(),
        "api",
        r#"{
            "version": "1.0.0",
            "labels": ["worker"],
            "resources": {
                "memory": {"min": "512MB", "max": "2GB"},
                "cpu": {"min": "500MHZ", "max": "1500MHZ"},
                "ports": {"port_http": 8080}
            }
        }"#,
    );
    write_file(&dir.path().join("maand.jobs.conf"), "[api]\nmemory=1GB\ncpu=1000MHZ\n");

    let store = Store::open_in_memory().unwrap();
    let workspace = Workspace::new(dir.path());
    run_pipeline(&store, &workspace).unwrap();

    let allocs = store.list_allocations().unwrap();
    assert_eq!(allocs.len(), 1);
    assert_eq!(allocs[0].host_ip, "10.0.0.1");
    assert!(!allocs[0].disabled);
    assert!(!allocs[0].removed);

    assert_eq!(store.kv_get("job/api", "min_memory_limit").unwrap(), Some("512".to_string()));
    assert_eq!(store.kv_get("job/api", "max_memory_limit").unwrap(), Some("2048".to_string()));
    assert_eq!(store.kv_get("job/api", "port_http").unwrap(), Some("8080".to_string()));
    assert_eq!(store.kv_get("job/api", "memory").unwrap(), Some("1024".to_string()));
    assert_eq!(store.kv_get("job/api", "cpu").unwrap(), Some("1000".to_string()));

    assert_eq!(store.kv_get("host/10.0.0.1", "worker_nodes").unwrap(), Some("10.0.0.1".to_string()));
    assert_eq!(store.kv_get("host/10.0.0.1", "worker_length").unwrap(), Some("1".to_string()));
    assert_eq!(store.kv_get("host/10.0.0.1", "agent_memory").unwrap(), Some("4096".to_string()));
    assert_eq!(store.kv_get("host/10.0.0.1", "agent_cpu").unwrap(), Some("2000".to_string()));
}

/// Scenario 2: port collision between two jobs (spec §8).
#[test]
fn port_collision_between_two_jobs_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write_file(&dir.path().join("agents.json"), r#"[{"host": "10.0.0.1", "labels": ["worker"]}]"#);
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

    let store = Store::open_in_memory().unwrap();
    let workspace = Workspace::new(dir.path());
    let err = run_pipeline(&store, &workspace).unwrap_err();
    assert!(err.to_string().contains("8080"));

    // nothing past the validator should have landed in the KV store.
    assert!(store.kv_get("job/api", "port_http").unwrap().is_none());
}

/// Scenario 4: a host drops out of the inventory; its allocation is
/// marked removed rather than deleted, the surviving host's is untouched.
#[test]
fn partial_removal_marks_only_the_vanished_hosts_allocation() {
    let dir = tempfile::tempdir().unwrap();
    write_file(
        &dir.path().join("agents.json"),
        r#"[{"host": "10.0.0.1", "labels": ["worker"]}, {"host": "10.0.0.2", "labels": ["worker"]}]"#,
    );
    write_manifest(dir.path(), "api", r#"{"version": "1.0.0", "labels": ["worker"]}"#);

    let store = Store::open_in_memory().unwrap();
    let workspace = Workspace::new(dir.path());
    run_pipeline(&store, &workspace).unwrap();
    assert_eq!(store.list_allocations().unwrap().len(), 2);

    write_file(&dir.path().join("agents.json"), r#"[{"host": "10.0.0.1", "labels": ["worker"]}]"#);
    run_pipeline(&store, &workspace).unwrap();

    let allocs = store.list_allocations().unwrap();
    assert_eq!(allocs.len(), 2);
    let h1 = allocs.iter().find(|a| a.host_ip == "10.0.0.1").unwrap();
    let h2 = allocs.iter().find(|a| a.host_ip == "10.0.0.2").unwrap();
    assert!(!h1.removed);
    assert!(h2.removed);
}

/// Scenario 5: a fleet-wide `disabled.json` entry disables every
/// allocation of a job across all hosts.
#[test]
fn fleet_wide_disabled_job_disables_every_allocation() {
    let dir = tempfile::tempdir().unwrap();
    write_file(
        &dir.path().join("agents.json"),
        r#"[{"host": "10.0.0.1", "labels": ["worker"]}, {"host": "10.0.0.2", "labels": ["worker"]}]"#,
    );
    write_manifest(dir.path(), "api", r#"{"version": "1.0.0", "labels": ["worker"]}"#);
    write_file(&dir.path().join("disabled.json"), r#"{"jobs": {"api": {}}}"#);

    let store = Store::open_in_memory().unwrap();
    let workspace = Workspace::new(dir.path());
    run_pipeline(&store, &workspace).unwrap();

    let allocs = store.list_allocations().unwrap();
    assert_eq!(allocs.len(), 2);
    assert!(allocs.iter().all(|a| a.disabled));
}

/// Boundary behavior (spec §8): an empty inventory detains every
/// previously known host and empties its KV namespaces.
#[test]
fn empty_inventory_detains_every_previously_known_host() {
    let dir = tempfile::tempdir().unwrap();
    write_file(&dir.path().join("agents.json"), r#"[{"host": "10.0.0.1", "labels": ["worker"]}]"#);
    write_manifest(dir.path(), "api", r#"{"version": "1.0.0", "labels": ["worker"]}"#);

    let store = Store::open_in_memory().unwrap();
    let workspace = Workspace::new(dir.path());
    run_pipeline(&store, &workspace).unwrap();
    assert!(store.kv_list_keys("host/10.0.0.1").unwrap().contains(&"worker_nodes".to_string()));

    write_file(&dir.path().join("agents.json"), "[]");
    run_pipeline(&store, &workspace).unwrap();

    let host = store.get_host_by_ip("10.0.0.1").unwrap().unwrap();
    assert!(host.detained);
    assert!(store.kv_list_keys("host/10.0.0.1").unwrap().is_empty());
}

// Not covered here:
// - Scenario 3 (cert renewal on CA change) exercises `certs.rs`, which
//   shells out to the real `openssl` binary; see that module's own doc
//   comment for why its tests stop at `needs_renewal`/hash comparisons.
// - Scenario 6 (health-check failure) exercises `orchestrator::deploy`'s
//   retry loop at its real 5-second interval/10-attempt budget, which
//   would make this suite take the better part of a minute to run;
//   `health_check_one`'s retry/failure logic is grounded directly against
//   spec §8's wording in `orchestrator.rs` instead of re-run here.
