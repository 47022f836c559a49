//! The core data model persisted by `fleetctl_store`: Bucket, Host, Job,
//! Allocation and KvEntry, plus the attribute-set types each of them owns.

mod bucket;
mod host;
mod job;
mod allocation;
mod kv;

pub use bucket::{new_bucket_id, Bucket};
pub use host::{new_host_id, Host};
pub use job::{job_id_for, DependOn, Job, JobCert, JobCommand, JobFile, JobPorts};
pub use allocation::{Allocation, Transition};
pub use kv::KvEntry;
