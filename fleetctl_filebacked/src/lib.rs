//! The Workspace Loader (spec §4.B): reads the host inventory, job
//! manifests, disabled-jobs overrides, cluster/per-job variables and the
//! controller config off disk, validating each against its schema before
//! handing a typed representation to the reconciler/builder/assigner.

#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate log;
extern crate serde;
extern crate serde_json;
extern crate fleetctl_definitions;
extern crate merge;
extern crate merge_derive;
extern crate walkdir;
extern crate jsonschema;
extern crate dotenvy;
extern crate ini;

mod schema;
mod inventory;
mod manifest;
mod disabled;
mod vars;
mod config;

use std::path::{Path, PathBuf};
use fleetctl_definitions::{ControllerConfig, DisabledOverrides, HostInventoryEntry, JobManifest};

error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }
    links {
        Definitions(fleetctl_definitions::Error, fleetctl_definitions::ErrorKind);
    }
    foreign_links {
        Io(::std::io::Error);
        SerdeJ(serde_json::Error);
        Ini(ini::Error);
        Dotenv(dotenvy::Error);
    }
}

/// A workspace directory: `agents.json`, `jobs/<job>/manifest.json`,
/// `disabled.json`, `maand.vars`, `maand.jobs.conf`, `maand.conf`.
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Workspace { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn load_inventory(&self) -> Result<Vec<HostInventoryEntry>> {
        inventory::load(&self.root)
    }

    pub fn load_disabled(&self) -> Result<DisabledOverrides> {
        disabled::load(&self.root)
    }

    pub fn load_controller_config(&self) -> Result<ControllerConfig> {
        config::load(&self.root)
    }

    pub fn load_cluster_vars(&self) -> Result<std::collections::BTreeMap<String, String>> {
        vars::load_cluster_vars(&self.root)
    }

    pub fn load_job_variables(&self, jobs_conf_path: &str) -> Result<std::collections::BTreeMap<String, std::collections::BTreeMap<String, String>>> {
        vars::load_job_variables(&self.root, jobs_conf_path)
    }

    /// Job directory names under `jobs/`, sorted.
    pub fn job_names(&self) -> Result<Vec<String>> {
        manifest::job_names(&self.root)
    }

    pub fn job_dir(&self, job: &str) -> PathBuf {
        self.root.join("jobs").join(job)
    }

    pub fn load_job_manifest(&self, job: &str) -> Result<JobManifest> {
        manifest::load(&self.root, job)
    }

    /// True if `job`'s directory carries a file (or directory) literally
    /// named `command`, searched recursively (commands may live a few
    /// levels under the job's tree alongside its Makefile).
    pub fn command_file_exists(&self, job: &str, command: &str) -> bool {
        manifest::command_file_exists(&self.job_dir(job), command)
    }
}
