use std::collections::BTreeMap;
use crate::deserializers::RelaxedString;
use crate::model::{JobCert, JobCommand, DependOn};
use crate::{Error, ErrorKind, Result};

/// `workspace/jobs/<job>/manifest.json`, in its raw on-disk shape. The
/// `resources.ports.port_<name>` and `commands.command_<name>` key
/// conventions are resolved by `ports()`/`job_commands()` below rather than
/// at deserialization time, so a malformed key surfaces as a normal
/// `SchemaValidationError` instead of a serde parse failure.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct JobManifest {
    pub version: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub resources: ManifestResources,
    #[serde(default)]
    pub certs: Vec<BTreeMap<String, ManifestCert>>,
    #[serde(default)]
    pub commands: BTreeMap<String, ManifestCommand>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ManifestResources {
    #[serde(default)]
    pub memory: ManifestMinMax,
    #[serde(default)]
    pub cpu: ManifestMinMax,
    #[serde(default)]
    pub ports: BTreeMap<String, u32>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ManifestMinMax {
    pub min: Option<RelaxedString>,
    pub max: Option<RelaxedString>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ManifestCert {
    #[serde(default)]
    pub pkcs8: bool,
    pub subject: String,
    pub subject_alt_name: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ManifestCommand {
    #[serde(default)]
    pub executed_on: Vec<String>,
    pub depend_on: Option<ManifestDependOn>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ManifestDependOn {
    pub job: Option<String>,
    pub command: Option<String>,
    pub config: Option<String>,
}

const PORT_PREFIX: &str = "port_";
const COMMAND_PREFIX: &str = "command_";

impl JobManifest {
    /// Strips the `port_` prefix off each declared port key.
    pub fn ports(&self) -> Result<BTreeMap<String, u32>> {
        let mut out = BTreeMap::new();
        for (k, v) in &self.resources.ports {
            let name = k.strip_prefix(PORT_PREFIX).ok_or_else(|| {
                Error::from(ErrorKind::SchemaValidationError(
                    "resources.ports".into(),
                    format!("key '{}' is missing the 'port_' prefix", k),
                ))
            })?;
            out.insert(name.to_string(), *v);
        }
        Ok(out)
    }

    /// Flattens the `certs` array of single-key maps into `(name, JobCert)`.
    pub fn job_certs(&self) -> Result<Vec<JobCert>> {
        let mut out = Vec::new();
        for entry in &self.certs {
            if entry.len() != 1 {
                return Err(Error::from(ErrorKind::SchemaValidationError(
                    "certs".into(),
                    "each certs entry must declare exactly one name".into(),
                )));
            }
            let (name, props) = entry.iter().next().unwrap();
            out.push(JobCert {
                name: name.clone(),
                pkcs8: props.pkcs8,
                subject: props.subject.clone(),
                subject_alt_name: props.subject_alt_name.clone(),
            });
        }
        Ok(out)
    }

    /// Strips the `command_` prefix and resolves each command's `depend_on`.
    pub fn job_commands(&self) -> Result<Vec<JobCommand>> {
        let mut out = Vec::new();
        for (k, v) in &self.commands {
            let name = k.strip_prefix(COMMAND_PREFIX).ok_or_else(|| {
                Error::from(ErrorKind::SchemaValidationError(
                    "commands".into(),
                    format!("key '{}' is missing the 'command_' prefix", k),
                ))
            })?;
            out.push(JobCommand {
                command: name.to_string(),
                executed_on: v.executed_on.clone(),
                depend_on: v.depend_on.as_ref().map(|d| DependOn {
                    job: d.job.clone(),
                    command: d.command.clone(),
                    config: d.config.clone(),
                }),
            });
        }
        Ok(out)
    }
}
