//! Job rows and their attribute sets, grounded on `job_data.py`'s
//! `job`/`job_labels`/`job_ports`/`job_certs`/`job_files`/`job_commands`
//! tables and the `get_max_deployment_seq`/`copy_job`/`copy_job_modules`
//! accessors.

use rusqlite::params;
use fleetctl_definitions::model::{job_id_for, DependOn, Job, JobCert, JobCommand, JobFile};
use crate::{Result, Store};

impl Store {
    /// Deletes the prior row (and its owned children) for `job.name`, then
    /// inserts the fresh one with its attribute sets. `job_id` is always
    /// `UUIDv5(name)`, so this is stable across rebuilds despite the
    /// delete-then-reinsert.
    pub fn replace_job(&self, job: &Job) -> Result<()> {
        self.delete_job(&job.name)?;

        self.conn.execute(
            "INSERT INTO job (job_id, name, version, min_memory_mb, max_memory_mb, min_cpu_mhz, max_cpu_mhz, certs_md5_hash, deployment_seq) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                job.job_id,
                job.name,
                job.version,
                job.min_memory_mb as i64,
                job.max_memory_mb as i64,
                job.min_cpu_mhz as i64,
                job.max_cpu_mhz as i64,
                job.certs_md5_hash,
                job.deployment_seq,
            ],
        )?;

        for label in &job.labels {
            self.conn
                .execute("INSERT INTO job_labels (job_id, label) VALUES (?1, ?2)", params![job.job_id, label])?;
        }
        for (name, port) in &job.ports {
            self.conn.execute(
                "INSERT INTO job_ports (job_id, name, port) VALUES (?1, ?2, ?3)",
                params![job.job_id, name, *port as i64],
            )?;
        }
        for cert in &job.certs {
            self.conn.execute(
                "INSERT INTO job_certs (job_id, name, pkcs8, subject, subject_alt_name) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![job.job_id, cert.name, cert.pkcs8 as i64, cert.subject, cert.subject_alt_name],
            )?;
        }
        for file in &job.files {
            self.conn.execute(
                "INSERT INTO job_files (job_id, path, content, isdir) VALUES (?1, ?2, ?3, ?4)",
                params![job.job_id, file.path, file.content, file.is_dir as i64],
            )?;
        }
        for command in &job.commands {
            let (dep_job, dep_command, dep_config) = match &command.depend_on {
                None => (None, None, None),
                Some(d) => (d.job.clone(), d.command.clone(), d.config.clone()),
            };
            self.conn.execute(
                "INSERT INTO job_commands (job_id, job_name, name, executed_on, depend_on_job, depend_on_command, depend_on_config) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![job.job_id, job.name, command.command, command.executed_on.join(","), dep_job, dep_command, dep_config],
            )?;
        }
        Ok(())
    }

    /// Deletes a job row and every table that hangs off `job_id`.
    pub fn delete_job(&self, name: &str) -> Result<()> {
        let job_id = job_id_for(name);
        self.conn.execute("DELETE FROM job WHERE job_id = ?1", params![job_id])?;
        self.conn.execute("DELETE FROM job_labels WHERE job_id = ?1", params![job_id])?;
        self.conn.execute("DELETE FROM job_ports WHERE job_id = ?1", params![job_id])?;
        self.conn.execute("DELETE FROM job_certs WHERE job_id = ?1", params![job_id])?;
        self.conn.execute("DELETE FROM job_files WHERE job_id = ?1", params![job_id])?;
        self.conn.execute("DELETE FROM job_commands WHERE job_id = ?1", params![job_id])?;
        Ok(())
    }

    pub fn job_names(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT name FROM job ORDER BY name")?;
        Ok(stmt.query_map(rusqlite::NO_PARAMS, |r| r.get(0))?.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn job_names_at_deployment_seq(&self, seq: i64) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT name FROM job WHERE deployment_seq = ?1 ORDER BY name")?;
        Ok(stmt
            .query_map(params![seq], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Spec §9: returns `0` (never `NULL`) when the job table is empty.
    pub fn max_deployment_seq(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COALESCE(MAX(deployment_seq), 0) FROM job", rusqlite::NO_PARAMS, |r| r.get(0))?)
    }

    pub fn get_job(&self, name: &str) -> Result<Option<Job>> {
        let row: Option<(String, String, String, i64, i64, i64, i64, String, i64)> = self
            .conn
            .query_row(
                "SELECT job_id, name, version, min_memory_mb, max_memory_mb, min_cpu_mhz, max_cpu_mhz, certs_md5_hash, deployment_seq \
                 FROM job WHERE name = ?1",
                params![name],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?, r.get(6)?, r.get(7)?, r.get(8)?)),
            )
            .ok();
        let (job_id, name, version, min_mem, max_mem, min_cpu, max_cpu, certs_hash, seq) = match row {
            None => return Ok(None),
            Some(r) => r,
        };

        let labels = self.job_labels(&job_id)?;
        let ports = self.job_ports(&job_id)?;
        let certs = self.job_certs(&job_id)?;
        let commands = self.job_commands(&job_id)?;
        let files = self.job_files(&job_id)?;

        Ok(Some(Job {
            job_id,
            name,
            version,
            min_memory_mb: min_mem as u64,
            max_memory_mb: max_mem as u64,
            min_cpu_mhz: min_cpu as u64,
            max_cpu_mhz: max_cpu as u64,
            certs_md5_hash: certs_hash,
            deployment_seq: seq,
            labels,
            ports,
            certs,
            commands,
            files,
        }))
    }

    /// The file tree for `name`, excluding the `_modules/` subtree (the
    /// blob copy staged onto the host; `_modules/` is staged separately
    /// into the command scratch root instead).
    pub fn job_files_excluding_modules(&self, name: &str) -> Result<Vec<JobFile>> {
        let job_id = job_id_for(name);
        let prefix = format!("{}/_modules%", name);
        let mut stmt = self.conn.prepare(
            "SELECT path, content, isdir FROM job_files WHERE job_id = ?1 AND path NOT LIKE ?2 ORDER BY isdir DESC",
        )?;
        let rows = stmt
            .query_map(params![job_id, prefix], |r| {
                Ok(JobFile { path: r.get(0)?, content: r.get(1)?, is_dir: r.get::<_, i64>(2)? != 0 })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// The `_modules/` subtree for `name`, staged into the command scratch root.
    pub fn job_modules(&self, name: &str) -> Result<Vec<JobFile>> {
        let job_id = job_id_for(name);
        let prefix = format!("{}/_modules%", name);
        let mut stmt = self.conn.prepare(
            "SELECT path, content, isdir FROM job_files WHERE job_id = ?1 AND path LIKE ?2 ORDER BY isdir DESC",
        )?;
        let rows = stmt
            .query_map(params![job_id, prefix], |r| {
                Ok(JobFile { path: r.get(0)?, content: r.get(1)?, is_dir: r.get::<_, i64>(2)? != 0 })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn set_deployment_seq(&self, name: &str, seq: i64) -> Result<()> {
        self.conn
            .execute("UPDATE job SET deployment_seq = ?1 WHERE name = ?2", params![seq, name])?;
        Ok(())
    }

    fn job_labels(&self, job_id: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT label FROM job_labels WHERE job_id = ?1 ORDER BY label")?;
        Ok(stmt.query_map(params![job_id], |r| r.get(0))?.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn job_ports(&self, job_id: &str) -> Result<std::collections::BTreeMap<String, u32>> {
        let mut stmt = self.conn.prepare("SELECT name, port FROM job_ports WHERE job_id = ?1")?;
        let rows = stmt
            .query_map(params![job_id], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)? as u32)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows.into_iter().collect())
    }

    fn job_certs(&self, job_id: &str) -> Result<Vec<JobCert>> {
        let mut stmt = self.conn.prepare("SELECT name, pkcs8, subject, subject_alt_name FROM job_certs WHERE job_id = ?1")?;
        let rows = stmt
            .query_map(params![job_id], |r| {
                Ok(JobCert {
                    name: r.get(0)?,
                    pkcs8: r.get::<_, i64>(1)? != 0,
                    subject: r.get(2)?,
                    subject_alt_name: r.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn job_files(&self, job_id: &str) -> Result<Vec<JobFile>> {
        let mut stmt = self.conn.prepare("SELECT path, content, isdir FROM job_files WHERE job_id = ?1")?;
        let rows = stmt
            .query_map(params![job_id], |r| {
                Ok(JobFile { path: r.get(0)?, content: r.get(1)?, is_dir: r.get::<_, i64>(2)? != 0 })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn job_commands(&self, job_id: &str) -> Result<Vec<JobCommand>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, executed_on, depend_on_job, depend_on_command, depend_on_config FROM job_commands WHERE job_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![job_id], |r| {
                let executed_on: String = r.get(1)?;
                let dep_job: Option<String> = r.get(2)?;
                let dep_command: Option<String> = r.get(3)?;
                let dep_config: Option<String> = r.get(4)?;
                let depend_on = if dep_job.is_none() && dep_command.is_none() && dep_config.is_none() {
                    None
                } else {
                    Some(DependOn { job: dep_job, command: dep_command, config: dep_config })
                };
                Ok(JobCommand {
                    command: r.get(0)?,
                    executed_on: executed_on.split(',').filter(|s| !s.is_empty()).map(String::from).collect(),
                    depend_on,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job(name: &str) -> Job {
        let mut ports = std::collections::BTreeMap::new();
        ports.insert("http".to_string(), 8080);
        Job {
            job_id: job_id_for(name),
            name: name.to_string(),
            version: "1.0.0".to_string(),
            min_memory_mb: 512,
            max_memory_mb: 2048,
            min_cpu_mhz: 500,
            max_cpu_mhz: 1500,
            certs_md5_hash: "abc".to_string(),
            deployment_seq: 0,
            labels: vec!["worker".to_string()],
            ports,
            certs: vec![],
            commands: vec![],
            files: vec![JobFile { path: format!("{}/Makefile", name), content: b"all:\n".to_vec(), is_dir: false }],
        }
    }

    #[test]
    fn replace_job_then_get_round_trips() {
        let store = Store::open_in_memory().unwrap();
        store.replace_job(&sample_job("api")).unwrap();
        let job = store.get_job("api").unwrap().unwrap();
        assert_eq!(job.ports.get("http"), Some(&8080));
        assert_eq!(job.labels, vec!["worker".to_string()]);
    }

    #[test]
    fn replace_job_is_idempotent_on_job_id() {
        let store = Store::open_in_memory().unwrap();
        let job = sample_job("api");
        store.replace_job(&job).unwrap();
        let first_id = store.get_job("api").unwrap().unwrap().job_id;
        store.replace_job(&job).unwrap();
        let second_id = store.get_job("api").unwrap().unwrap().job_id;
        assert_eq!(first_id, second_id);
    }

    #[test]
    fn max_deployment_seq_is_zero_on_empty_table() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.max_deployment_seq().unwrap(), 0);
    }

    #[test]
    fn job_files_excluding_modules_skips_modules_subtree() {
        let store = Store::open_in_memory().unwrap();
        let mut job = sample_job("api");
        job.files.push(JobFile { path: "api/_modules/run.sh".to_string(), content: vec![], is_dir: false });
        store.replace_job(&job).unwrap();
        let staged = store.job_files_excluding_modules("api").unwrap();
        assert!(staged.iter().all(|f| !f.path.contains("_modules")));
        let modules = store.job_modules("api").unwrap();
        assert_eq!(modules.len(), 1);
    }

    #[test]
    fn delete_job_removes_children() {
        let store = Store::open_in_memory().unwrap();
        store.replace_job(&sample_job("api")).unwrap();
        store.delete_job("api").unwrap();
        assert!(store.get_job("api").unwrap().is_none());
    }
}
