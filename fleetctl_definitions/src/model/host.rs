use std::collections::BTreeMap;
use uuid::Uuid;

/// A fleet member. `host_ip` is the stable external reference used in
/// KV namespaces and rsync targets; `host_id` is an internal UUID preserved
/// across runs so re-reconciling inventory doesn't churn identity.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Host {
    pub host_id: String,
    pub host_ip: String,
    pub memory_mb: u64,
    pub cpu_mhz: u64,
    /// Stable sort order within the inventory, used for broadcast ordering.
    pub position: i64,
    /// True once the host has vanished from the workspace inventory.
    pub detained: bool,
    /// `agent` is always present alongside whatever inventory declares.
    pub labels: Vec<String>,
    pub tags: BTreeMap<String, String>,
}

impl Host {
    pub fn new(host_id: String, host_ip: String, position: i64) -> Self {
        Host {
            host_id,
            host_ip,
            memory_mb: 0,
            cpu_mhz: 0,
            position,
            detained: false,
            labels: vec!["agent".to_string()],
            tags: BTreeMap::new(),
        }
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

/// Freshly generated id for a host seen for the first time.
pub fn new_host_id() -> String {
    Uuid::new_v4().to_string()
}
