//! Loads `agents.json`: the host inventory, in array order (array index is
//! `Host::position`, per spec §3).

use std::fs;
use std::path::Path;
use fleetctl_definitions::HostInventoryEntry;
use crate::{schema, Result};

pub fn load(root: &Path) -> Result<Vec<HostInventoryEntry>> {
    let path = root.join("agents.json");
    debug!("Loading host inventory from {:?}", path);
    let raw = fs::read_to_string(&path)?;
    let value: serde_json::Value = serde_json::from_str(&raw)?;
    schema::validate_inventory(&value)?;
    let entries: Vec<HostInventoryEntry> = serde_json::from_value(value)?;
    for entry in &entries {
        entry.validate()?;
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn workspace_with_agents(body: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let mut f = fs::File::create(dir.path().join("agents.json")).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        dir
    }

    #[test]
    fn loads_in_array_order() {
        let dir = workspace_with_agents(
            r#"[{"host": "10.0.0.2"}, {"host": "10.0.0.1"}]"#,
        );
        let entries = load(dir.path()).unwrap();
        assert_eq!(entries[0].host, "10.0.0.2");
        assert_eq!(entries[1].host, "10.0.0.1");
    }

    #[test]
    fn rejects_bad_ip_after_schema_passes() {
        let dir = workspace_with_agents(r#"[{"host": "not-an-ip"}]"#);
        assert!(load(dir.path()).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(dir.path()).is_err());
    }
}
