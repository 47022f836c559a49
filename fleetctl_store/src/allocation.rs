//! (host, job) allocation edges, grounded on `maand_data.py`'s `agent_jobs`
//! table and its `get_agent_jobs`/`get_agent_removed_jobs`/
//! `get_agent_disabled_jobs`/`get_allocations` accessors.

use rusqlite::params;
use fleetctl_definitions::Allocation;
use crate::{Result, Store};

impl Store {
    /// Upserts the (host, job) edge in place, recording whether it's
    /// disabled per the workspace's `disabled.json` overrides.
    pub fn upsert_allocation(&self, host_id: &str, job: &str, disabled: bool) -> Result<()> {
        self.conn.execute(
            "INSERT INTO allocation (host_id, job, disabled, removed) VALUES (?1, ?2, ?3, 0) \
             ON CONFLICT(host_id, job) DO UPDATE SET disabled = excluded.disabled, removed = 0",
            params![host_id, job, disabled as i64],
        )?;
        Ok(())
    }

    /// Marks every allocation not present in `keep` (a set of `(host_id, job)`
    /// pairs still matching the label rule) as `removed=1` instead of
    /// deleting it outright, so one more deploy cycle can stop it first.
    pub fn mark_stale_allocations_removed(&self, keep: &[(String, String)]) -> Result<()> {
        let existing = self.list_allocations()?;
        for alloc in existing {
            if alloc.removed {
                continue;
            }
            let still_valid = keep.iter().any(|(h, j)| h == &alloc.host_id && j == &alloc.job);
            if !still_valid {
                self.conn.execute(
                    "UPDATE allocation SET removed = 1 WHERE host_id = ?1 AND job = ?2",
                    params![alloc.host_id, alloc.job],
                )?;
            }
        }
        Ok(())
    }

    pub fn disable_allocations_for_host(&self, host_id: &str) -> Result<()> {
        self.conn
            .execute("UPDATE allocation SET disabled = 1 WHERE host_id = ?1", params![host_id])?;
        Ok(())
    }

    pub fn set_allocation_hash(&self, host_id: &str, job: &str, previous: Option<&str>, current: Option<&str>) -> Result<()> {
        self.conn.execute(
            "UPDATE allocation SET previous_hash = ?1, current_hash = ?2 WHERE host_id = ?3 AND job = ?4",
            params![previous, current, host_id, job],
        )?;
        Ok(())
    }

    pub fn list_allocations(&self) -> Result<Vec<Allocation>> {
        let mut stmt = self.conn.prepare(
            "SELECT a.host_id, h.host_ip, a.job, a.disabled, a.removed, a.current_hash, a.previous_hash \
             FROM allocation a JOIN host h ON h.host_id = a.host_id ORDER BY h.host_ip, a.job",
        )?;
        let rows = stmt
            .query_map(rusqlite::NO_PARAMS, |r| {
                Ok(Allocation {
                    host_id: r.get(0)?,
                    host_ip: r.get(1)?,
                    job: r.get(2)?,
                    disabled: r.get::<_, i64>(3)? != 0,
                    removed: r.get::<_, i64>(4)? != 0,
                    current_hash: r.get(5)?,
                    previous_hash: r.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn allocations_for_job(&self, job: &str) -> Result<Vec<Allocation>> {
        Ok(self.list_allocations()?.into_iter().filter(|a| a.job == job).collect())
    }
}
