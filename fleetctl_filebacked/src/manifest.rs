//! Loads `jobs/<job>/manifest.json` and scans the `jobs/` directory.

use std::fs;
use std::path::Path;
use walkdir::WalkDir;
use fleetctl_definitions::JobManifest;
use crate::{schema, Result};

/// Job directory names under `jobs/`, sorted. A workspace with no `jobs/`
/// directory at all has no jobs.
pub fn job_names(root: &Path) -> Result<Vec<String>> {
    let jobs_dir = root.join("jobs");
    if !jobs_dir.exists() {
        return Ok(Vec::new());
    }
    let mut names: Vec<String> = fs::read_dir(&jobs_dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();
    names.sort();
    Ok(names)
}

pub fn load(root: &Path, job: &str) -> Result<JobManifest> {
    let path = root.join("jobs").join(job).join("manifest.json");
    debug!("Loading job manifest from {:?}", path);
    let raw = fs::read_to_string(&path)?;
    let value: serde_json::Value = serde_json::from_str(&raw)?;
    schema::validate_manifest(job, &value)?;
    Ok(serde_json::from_value(value)?)
}

/// Recursively checks `job_dir` for a file or directory literally named
/// `command`, since `depend_on`'s referenced command must exist on disk
/// (spec's `MissingCommandFile` fatal error) wherever in the job's tree it
/// happens to live alongside its build files.
pub fn command_file_exists(job_dir: &Path, command: &str) -> bool {
    WalkDir::new(job_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .any(|e| e.file_name() == command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_manifest(dir: &Path, job: &str, body: &str) {
        let job_dir = dir.join("jobs").join(job);
        fs::create_dir_all(&job_dir).unwrap();
        let mut f = fs::File::create(job_dir.join("manifest.json")).unwrap();
        f.write_all(body.as_bytes()).unwrap();
    }

    #[test]
    fn job_names_sorted() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), "web", r#"{"version": "1.0.0"}"#);
        write_manifest(dir.path(), "api", r#"{"version": "1.0.0"}"#);
        assert_eq!(job_names(dir.path()).unwrap(), vec!["api".to_string(), "web".to_string()]);
    }

    #[test]
    fn no_jobs_dir_is_empty_not_error() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(job_names(dir.path()).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn loads_and_validates_manifest() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(
            dir.path(),
            "api",
            r#"{"version": "1.2.3", "resources": {"ports": {"port_http": 8080}}}"#,
        );
        let manifest = load(dir.path(), "api").unwrap();
        assert_eq!(manifest.version, "1.2.3");
        assert_eq!(manifest.ports().unwrap().get("http"), Some(&8080));
    }

    #[test]
    fn command_file_found_recursively() {
        let dir = tempfile::tempdir().unwrap();
        let job_dir = dir.path().join("jobs").join("api");
        fs::create_dir_all(job_dir.join("bin")).unwrap();
        fs::File::create(job_dir.join("bin").join("start.sh")).unwrap();
        assert!(command_file_exists(&job_dir, "start.sh"));
        assert!(!command_file_exists(&job_dir, "stop.sh"));
    }
}
