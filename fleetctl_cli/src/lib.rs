#![recursion_limit = "1024"]
#![allow(renamed_and_removed_lints)]

#[macro_use]
extern crate serde_derive;
extern crate serde;
#[macro_use]
extern crate serde_json;

extern crate walkdir;
extern crate tera;

#[macro_use]
extern crate log;

extern crate regex;
extern crate semver;
extern crate threadpool;
extern crate base64;
extern crate md5;
extern crate chrono;
extern crate uuid;
extern crate petgraph;
extern crate merge;

#[macro_use]
extern crate error_chain;
error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }
    links {
        Definitions(fleetctl_definitions::Error, fleetctl_definitions::ErrorKind);
        Store(fleetctl_store::Error, fleetctl_store::ErrorKind);
        Filebacked(fleetctl_filebacked::Error, fleetctl_filebacked::ErrorKind);
    }
    foreign_links {
        Io(::std::io::Error);
        SerdeJ(serde_json::Error);
        Tmpl(tera::Error);
        Time(::std::time::SystemTimeError);
    }
}

extern crate fleetctl_definitions;
extern crate fleetctl_filebacked;
extern crate fleetctl_store;

pub use fleetctl_definitions::{ControllerConfig, DisabledOverrides, HostInventoryEntry, JobManifest};
pub use fleetctl_filebacked::Workspace;
pub use fleetctl_store::Store;

/// Component C: upserts hosts/labels/tags, detains vanished hosts, purges
/// their owned KV namespaces, records live resource numbers.
pub mod reconciler;

/// Component D: stores job manifests as blob trees, computes deployment
/// tiers over the `pre_deploy` dependency graph.
pub mod job_builder;

/// Component E: label-match host/job allocation, disablement tiers.
pub mod assigner;

/// Component F: resource budget and port-uniqueness validation.
pub mod validator;

/// Component G: per-host and per-job variable namespace derivation.
pub mod variables;

/// Component H: CA tracking, per-host/per-job leaf issuance and renewal.
pub mod certs;

/// Component J: textual template substitution over the composed variables.
pub mod template;

/// Component K: command plugin environment assembly and invocation.
pub mod command;

/// Component I: tiered rollout, hash-diffing, `run_target`'s hook sequencing.
pub mod orchestrator;

/// The `build`/`deploy`/`health-check`/`run-command`/`gc`/`init` pipeline
/// entry points dispatched by `main`.
pub mod pipeline;

/// Kills and errors on any subprocess still running past
/// `SUBPROCESS_TIMEOUT_SECS`; every call site that shells out routes
/// through `subprocess::output_with_timeout`.
mod subprocess;

/// Concurrency knobs shared by every fan-out point (§5: default 4).
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Health-check gate defaults (§5): 5-second interval, 10 attempts outside
/// a deploy, 20 inside one.
pub const HEALTH_CHECK_INTERVAL_SECS: u64 = 5;
pub const HEALTH_CHECK_ATTEMPTS_DEFAULT: u32 = 10;
pub const HEALTH_CHECK_ATTEMPTS_DEPLOY: u32 = 20;

/// Per-subprocess-invocation wall clock (§5), enforced by
/// `subprocess::output_with_timeout` at every ssh/rsync/script call site.
pub const SUBPROCESS_TIMEOUT_SECS: u64 = 300;
