use std::collections::BTreeMap;
use uuid::Uuid;
use crate::Result;

/// name -> port number, as declared by `resources.ports.port_<name>`.
pub type JobPorts = BTreeMap<String, u32>;

/// Fixed namespace used to derive `job_id = UUIDv5(name)`, so the same job
/// name always yields the same id across processes and rebuilds.
const JOB_ID_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6f, 0xf1, 0xce, 0x22, 0x3b, 0x4a, 0x4f, 0x5e, 0x9c, 0x0b, 0x4a, 0x9d, 0x1e, 0x7a, 0x2d, 0x01,
]);

/// Stable job id: `UUIDv5(name)`.
pub fn job_id_for(name: &str) -> String {
    Uuid::new_v5(&JOB_ID_NAMESPACE, name.as_bytes()).to_string()
}

/// A single `certs` entry from the manifest.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct JobCert {
    pub name: String,
    pub pkcs8: bool,
    pub subject: String,
    pub subject_alt_name: Option<String>,
}

/// A single `commands.command_<name>` entry, flattened out of the manifest's
/// `executed_on`/`depend_on` shape.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct JobCommand {
    pub command: String,
    /// Events this command fires on: a subset of `direct`, `health_check`,
    /// `post_build`, `pre_deploy`, `post_deploy`, `job_control`.
    pub executed_on: Vec<String>,
    /// Optional upstream dependency: a job, another command, or a config key.
    pub depend_on: Option<DependOn>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DependOn {
    pub job: Option<String>,
    pub command: Option<String>,
    pub config: Option<String>,
}

/// A (path, content, is-directory) row from the manifest's file tree blob copy.
#[derive(Clone, Debug, PartialEq)]
pub struct JobFile {
    pub path: String,
    pub content: Vec<u8>,
    pub is_dir: bool,
}

/// A job row. `job_id` is UUIDv5 of `name`, so it is stable across rebuilds
/// even though the row itself is deleted and reinserted on every build.
#[derive(Clone, Debug, PartialEq)]
pub struct Job {
    pub job_id: String,
    pub name: String,
    pub version: String,
    pub min_memory_mb: u64,
    pub max_memory_mb: u64,
    pub min_cpu_mhz: u64,
    pub max_cpu_mhz: u64,
    /// MD5 fingerprint of the `certs` declaration, used to detect manifest
    /// changes that should force leaf re-issuance independent of CA changes.
    pub certs_md5_hash: String,
    /// 0 for roots; `1 + max(deployment_seq(dep))` over `pre_deploy` targets.
    pub deployment_seq: i64,
    pub labels: Vec<String>,
    pub ports: JobPorts,
    pub certs: Vec<JobCert>,
    pub commands: Vec<JobCommand>,
    pub files: Vec<JobFile>,
}

impl Job {
    pub fn requested_memory_in_range(&self, requested: u64) -> bool {
        if self.min_memory_mb == 0 && self.max_memory_mb == 0 {
            return true;
        }
        requested >= self.min_memory_mb && requested <= self.max_memory_mb
    }

    pub fn requested_cpu_in_range(&self, requested: u64) -> bool {
        if self.min_cpu_mhz == 0 && self.max_cpu_mhz == 0 {
            return true;
        }
        requested >= self.min_cpu_mhz && requested <= self.max_cpu_mhz
    }

    pub fn dependency_commands(&self) -> impl Iterator<Item = &JobCommand> {
        self.commands.iter().filter(|c| c.depend_on.is_some())
    }

    /// Parses `version` as semver, surfacing a schema error on malformed input.
    pub fn parse_version(&self) -> Result<semver::Version> {
        semver::Version::parse(&self.version).map_err(|e| {
            crate::Error::from(crate::ErrorKind::SchemaValidationError(
                self.name.clone(),
                format!("version '{}' is not valid semver: {}", self.version, e),
            ))
        })
    }
}
