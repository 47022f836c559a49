//! Loads `disabled.json`. The file is optional: its absence means nothing
//! is disabled fleet-wide.

use std::fs;
use std::path::Path;
use fleetctl_definitions::DisabledOverrides;
use crate::{schema, Result};

pub fn load(root: &Path) -> Result<DisabledOverrides> {
    let path = root.join("disabled.json");
    if !path.exists() {
        return Ok(DisabledOverrides::default());
    }
    let raw = fs::read_to_string(&path)?;
    let value: serde_json::Value = serde_json::from_str(&raw)?;
    schema::validate_disabled(&value)?;
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_means_nothing_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let overrides = load(dir.path()).unwrap();
        assert!(overrides.jobs.is_empty());
        assert!(overrides.agents.is_empty());
    }

    #[test]
    fn parses_job_and_host_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = fs::File::create(dir.path().join("disabled.json")).unwrap();
        f.write_all(br#"{"jobs": {"api": {"agents": ["10.0.0.1"]}}, "agents": ["10.0.0.2"]}"#)
            .unwrap();
        let overrides = load(dir.path()).unwrap();
        assert!(overrides.host_disabled("10.0.0.2"));
        assert!(overrides.job_disabled_for_host("api", "10.0.0.1"));
        assert!(!overrides.job_disabled_for_host("api", "10.0.0.3"));
    }
}
