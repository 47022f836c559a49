//! Cluster-wide (`maand.vars`) and per-job (`maand.jobs.conf`) variable
//! files. Neither file is a manifest that gets schema-validated; both are
//! plain key/value stores consumed by the Variable Composer (component G),
//! which is responsible for rejecting reserved keys at write time.

use std::collections::BTreeMap;
use std::path::Path;
use ini::Ini;
use crate::Result;

/// Parses `maand.vars` as a flat `KEY=value` file, the same shape `.env`
/// files take, without mutating the process environment (unlike
/// `dotenvy::dotenv()`, which loads into `std::env`).
pub fn load_cluster_vars(root: &Path) -> Result<BTreeMap<String, String>> {
    let path = root.join("maand.vars");
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let mut vars = BTreeMap::new();
    for item in dotenvy::from_path_iter(&path)? {
        let (key, value) = item?;
        vars.insert(key, value);
    }
    Ok(vars)
}

/// Parses the INI file named by `jobs_conf_path` (relative to the
/// workspace root), one section per job, each key/value pair a variable
/// scoped to that job.
pub fn load_job_variables(
    root: &Path,
    jobs_conf_path: &str,
) -> Result<BTreeMap<String, BTreeMap<String, String>>> {
    let path = root.join(jobs_conf_path);
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let conf = Ini::load_from_file(&path)?;
    let mut out = BTreeMap::new();
    for (section, props) in conf.iter() {
        let job = match section {
            Some(name) => name.to_string(),
            None => continue,
        };
        let mut vars = BTreeMap::new();
        for (k, v) in props.iter() {
            vars.insert(k.to_string(), v.to_string());
        }
        out.insert(job, vars);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;

    #[test]
    fn missing_vars_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_cluster_vars(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn parses_cluster_vars() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = fs::File::create(dir.path().join("maand.vars")).unwrap();
        f.write_all(b"CLUSTER_NAME=prod\nREGION=us-east\n").unwrap();
        let vars = load_cluster_vars(dir.path()).unwrap();
        assert_eq!(vars.get("CLUSTER_NAME"), Some(&"prod".to_string()));
        assert_eq!(vars.get("REGION"), Some(&"us-east".to_string()));
    }

    #[test]
    fn parses_job_variables_per_section() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = fs::File::create(dir.path().join("maand.jobs.conf")).unwrap();
        f.write_all(b"[api]\nthreads=4\n\n[web]\nport=8080\n").unwrap();
        let vars = load_job_variables(dir.path(), "maand.jobs.conf").unwrap();
        assert_eq!(vars.get("api").unwrap().get("threads"), Some(&"4".to_string()));
        assert_eq!(vars.get("web").unwrap().get("port"), Some(&"8080".to_string()));
    }

    #[test]
    fn missing_jobs_conf_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_job_variables(dir.path(), "maand.jobs.conf").unwrap().is_empty());
    }
}
