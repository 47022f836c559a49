#![recursion_limit = "1024"]
#![allow(renamed_and_removed_lints)]

#[macro_use]
extern crate serde_derive;
extern crate serde;
extern crate serde_json;

#[macro_use]
extern crate log;

extern crate regex;

extern crate semver;
extern crate base64;
extern crate chrono;
extern crate uuid;

#[macro_use]
extern crate error_chain;
error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }
    links {}
    foreign_links {
        Fmt(::std::fmt::Error);
        Io(::std::io::Error) #[cfg(unix)];
        Float(::std::num::ParseFloatError);
        Int(::std::num::ParseIntError);
        SerdeJ(serde_json::Error);
        Time(::std::time::SystemTimeError);
    }
    errors {
        SchemaValidationError(doc: String, detail: String) {
            description("document violates its schema")
            display("'{}' does not validate: {}", doc, detail)
        }
        MissingCommandFile(job: String, command: String) {
            description("command has no backing script")
            display("job '{}' declares command '{}' with no backing script", job, command)
        }
        ResourceViolation(detail: String) {
            description("resource allocation violation")
            display("resource violation: {}", detail)
        }
        PortCollision(jobs: String, port: u32) {
            description("port declared by more than one job")
            display("jobs: {}, on port: {}", jobs, port)
        }
        CertError(subject: String, detail: String) {
            description("certificate issuance failed")
            display("certificate for '{}' failed: {}", subject, detail)
        }
        SubprocessError(command: String, status: String) {
            description("subprocess exited non-zero")
            display("'{}' exited with {}", command, status)
        }
        HealthCheckFailure(job: String) {
            description("health check did not pass within its retry budget")
            display("job '{}' permanently failed its health check", job)
        }
        BucketMismatch(expected: String, observed: String) {
            description("on-host bucket identity disagrees with the controller")
            display("expected bucket '{}', observed '{}'", expected, observed)
        }
        ReservedKey(key: String) {
            description("variable name collides with a reserved key pattern")
            display("'{}' collides with a reserved key pattern", key)
        }
        DependencyCycle(detail: String) {
            description("dependency graph contains a cycle")
            display("dependency cycle detected: {}", detail)
        }
    }
}

/// Relaxed deserialization helpers shared by the document shapes below.
pub mod deserializers;

/// Memory and CPU frequency unit parsing (`"2 GB"`, `"1500 MHZ"`, ...).
pub mod units;

/// The core data model: Bucket, Host, Job, Allocation, KvEntry.
pub mod model;
pub use model::{Allocation, Bucket, Host, Job, JobCert, JobCommand, JobPorts, KvEntry};

/// On-disk document shapes: host inventory, job manifest, disabled overrides.
pub mod documents;
pub use documents::{DisabledOverrides, HostInventoryEntry, JobManifest};

/// `maand.conf` controller configuration.
pub mod config;
pub use config::ControllerConfig;

/// Reserved key patterns enforced by the Variable Composer at write time.
pub mod reserved;

/// Base64 archive encoding for minted certificate material.
pub mod certs;
pub use certs::{ArchivedCert, CertMaterial};
