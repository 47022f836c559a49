use std::collections::BTreeMap;

/// `workspace/disabled.json`. Absence of the file means nothing is disabled.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct DisabledOverrides {
    #[serde(default)]
    pub jobs: BTreeMap<String, DisabledJobOverride>,
    #[serde(default)]
    pub agents: Vec<String>,
}

/// An empty `agents` list (or its absence) disables the job fleet-wide.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct DisabledJobOverride {
    #[serde(default)]
    pub agents: Vec<String>,
}

impl DisabledOverrides {
    pub fn host_disabled(&self, host_ip: &str) -> bool {
        self.agents.iter().any(|a| a == host_ip)
    }

    /// Three-tiered disablement per job: host-wide, job+host, or job-wide
    /// (job present with an empty `agents` list).
    pub fn job_disabled_for_host(&self, job: &str, host_ip: &str) -> bool {
        if self.host_disabled(host_ip) {
            return true;
        }
        match self.jobs.get(job) {
            None => false,
            Some(o) if o.agents.is_empty() => true,
            Some(o) => o.agents.iter().any(|a| a == host_ip),
        }
    }
}
