//! Host rows and their label/tag attribute sets, grounded on `maand_data.py`'s
//! `agent`/`agent_labels`/`agent_tags` tables and accessors.

use std::collections::BTreeMap;
use rusqlite::params;
use fleetctl_definitions::{model::new_host_id, Host};
use crate::{Result, Store};

impl Store {
    /// Upserts a host by IP, preserving `host_id` across runs. Replaces the
    /// label/tag sets atomically (delete-then-reinsert within the caller's
    /// transaction).
    pub fn upsert_host(&self, host_ip: &str, position: i64, labels: &[String], tags: &BTreeMap<String, String>) -> Result<Host> {
        let host_id: Option<String> = self
            .conn
            .query_row("SELECT host_id FROM host WHERE host_ip = ?1", params![host_ip], |r| r.get(0))
            .ok();
        let host_id = host_id.unwrap_or_else(new_host_id);

        self.conn.execute(
            "INSERT INTO host (host_id, host_ip, position, detained, detained_at) VALUES (?1, ?2, ?3, 0, NULL) \
             ON CONFLICT(host_ip) DO UPDATE SET position = excluded.position, detained = 0, detained_at = NULL",
            params![host_id, host_ip, position],
        )?;

        self.conn.execute("DELETE FROM host_labels WHERE host_id = ?1", params![host_id])?;
        let mut all_labels: Vec<String> = labels.to_vec();
        if !all_labels.iter().any(|l| l == "agent") {
            all_labels.push("agent".to_string());
        }
        for label in &all_labels {
            self.conn
                .execute("INSERT INTO host_labels (host_id, label) VALUES (?1, ?2)", params![host_id, label])?;
        }

        self.conn.execute("DELETE FROM host_tags WHERE host_id = ?1", params![host_id])?;
        for (k, v) in tags {
            self.conn
                .execute("INSERT INTO host_tags (host_id, key, value) VALUES (?1, ?2, ?3)", params![host_id, k, v])?;
        }

        self.get_host_by_ip(host_ip)?.ok_or_else(|| crate::Error::from(crate::ErrorKind::HostNotFound(host_ip.to_string())))
    }

    /// Records available resources unless zero (spec §4.C).
    pub fn set_host_resources(&self, host_ip: &str, memory_mb: u64, cpu_mhz: u64) -> Result<()> {
        if memory_mb == 0 && cpu_mhz == 0 {
            return Ok(());
        }
        if memory_mb > 0 {
            self.conn
                .execute("UPDATE host SET memory_mb = ?1 WHERE host_ip = ?2", params![memory_mb as i64, host_ip])?;
        }
        if cpu_mhz > 0 {
            self.conn
                .execute("UPDATE host SET cpu_mhz = ?1 WHERE host_ip = ?2", params![cpu_mhz as i64, host_ip])?;
        }
        Ok(())
    }

    /// Marks every host not present in `current_ips` as detained and
    /// returns them, so the caller can purge their owned KV namespaces.
    pub fn detain_missing_hosts(&self, current_ips: &[String]) -> Result<Vec<Host>> {
        let all = self.list_hosts()?;
        let mut detained = Vec::new();
        for host in all {
            if host.detained {
                continue;
            }
            if !current_ips.iter().any(|ip| ip == &host.host_ip) {
                self.conn.execute(
                    "UPDATE host SET detained = 1, detained_at = ?1 WHERE host_id = ?2",
                    params![self.session_epoch, host.host_id],
                )?;
                let mut h = host;
                h.detained = true;
                detained.push(h);
            }
        }
        Ok(detained)
    }

    /// Physically removes hosts that have been `detained` for longer than
    /// `max_days`, along with their label/tag rows — the host-side half of
    /// `gc` (spec §6: "physically expire soft-deleted KV rows and detained
    /// hosts"). Returns how many were removed.
    pub fn expire_detained_hosts(&self, max_days: i64) -> Result<usize> {
        let cutoff = self.session_epoch - max_days * 86_400;
        let mut stmt = self
            .conn
            .prepare("SELECT host_id FROM host WHERE detained = 1 AND detained_at IS NOT NULL AND detained_at < ?1")?;
        let ids: Vec<String> = stmt
            .query_map(params![cutoff], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for id in &ids {
            self.conn.execute("DELETE FROM host_labels WHERE host_id = ?1", params![id])?;
            self.conn.execute("DELETE FROM host_tags WHERE host_id = ?1", params![id])?;
            self.conn.execute("DELETE FROM host WHERE host_id = ?1", params![id])?;
        }
        Ok(ids.len())
    }

    pub fn get_host_by_ip(&self, host_ip: &str) -> Result<Option<Host>> {
        let row: Option<(String, String, i64, i64, i64, i64)> = self
            .conn
            .query_row(
                "SELECT host_id, host_ip, memory_mb, cpu_mhz, position, detained FROM host WHERE host_ip = ?1",
                params![host_ip],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?)),
            )
            .ok();
        match row {
            None => Ok(None),
            Some((host_id, host_ip, memory_mb, cpu_mhz, position, detained)) => {
                let labels = self.host_labels(&host_id)?;
                let tags = self.host_tags(&host_id)?;
                Ok(Some(Host {
                    host_id,
                    host_ip,
                    memory_mb: memory_mb as u64,
                    cpu_mhz: cpu_mhz as u64,
                    position,
                    detained: detained != 0,
                    labels,
                    tags,
                }))
            }
        }
    }

    pub fn list_hosts(&self) -> Result<Vec<Host>> {
        let mut stmt = self
            .conn
            .prepare("SELECT host_ip FROM host ORDER BY position")?;
        let ips: Vec<String> = stmt
            .query_map(rusqlite::NO_PARAMS, |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let mut hosts = Vec::with_capacity(ips.len());
        for ip in ips {
            if let Some(h) = self.get_host_by_ip(&ip)? {
                hosts.push(h);
            }
        }
        Ok(hosts)
    }

    /// Non-detained hosts ordered by position, restricted to hosts carrying
    /// any of `labels` (an empty filter means `["agent"]`, i.e. all hosts).
    pub fn agents_with_labels(&self, labels: &[String]) -> Result<Vec<String>> {
        let filter: Vec<String> = if labels.is_empty() {
            vec!["agent".to_string()]
        } else {
            labels.to_vec()
        };
        let placeholders = filter.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT DISTINCT h.host_ip FROM host h JOIN host_labels hl ON h.host_id = hl.host_id \
             WHERE h.detained = 0 AND hl.label IN ({}) ORDER BY h.position",
            placeholders
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let params: Vec<&dyn rusqlite::ToSql> = filter.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
        let ips = stmt
            .query_map(params.as_slice(), |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ips)
    }

    fn host_labels(&self, host_id: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT label FROM host_labels WHERE host_id = ?1 ORDER BY label")?;
        Ok(stmt
            .query_map(params![host_id], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn host_tags(&self, host_id: &str) -> Result<BTreeMap<String, String>> {
        let mut stmt = self.conn.prepare("SELECT key, value FROM host_tags WHERE host_id = ?1")?;
        let rows = stmt
            .query_map(params![host_id], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows.into_iter().collect())
    }
}
