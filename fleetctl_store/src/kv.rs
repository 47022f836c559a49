//! The KV store (spec §4.A), grounded directly on `kv_manager.py`'s
//! `put`/`get`/`get_metadata`/`delete`/`get_keys`/`gc`, with the GC pruning
//! depth corrected per spec §9 ("more than seven versions behind", not
//! exactly seven behind as the Python `version - 7` single-row delete did).

use rusqlite::params;
use crate::{Result, Store};

/// `(value, version)`, as returned by `get_metadata`.
pub struct KvMetadata {
    pub value: String,
    pub version: i64,
}

impl Store {
    /// Writes a new version unless the latest non-deleted value already
    /// equals `value`, in which case this is a no-op (keeps monotonic
    /// versions small and makes the hash-diff machinery in the
    /// orchestrator meaningful).
    pub fn kv_put(&self, namespace: &str, key: &str, value: &str, ttl: Option<i64>) -> Result<()> {
        let existing: Option<(i64, String, i64)> = self
            .conn
            .query_row(
                "SELECT max(version), value, deleted FROM key_value WHERE namespace = ?1 AND key = ?2 GROUP BY key, namespace",
                params![namespace, key],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .ok();

        let next_version = match &existing {
            None => 1,
            Some((version, current_value, deleted)) => {
                if *deleted == 0 && current_value == value {
                    return Ok(());
                }
                version + 1
            }
        };

        self.conn.execute(
            "INSERT INTO key_value (namespace, key, value, version, ttl, created_at, deleted) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
            params![namespace, key, value, next_version, ttl, self.session_epoch],
        )?;
        Ok(())
    }

    /// Highest non-deleted version of `(namespace, key)`, if any.
    pub fn kv_get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM key_value WHERE namespace = ?1 AND key = ?2 \
                 AND version = (SELECT max(version) FROM key_value WHERE namespace = ?1 AND key = ?2) \
                 AND deleted = 0",
                params![namespace, key],
                |r| r.get(0),
            )
            .ok();
        Ok(value)
    }

    pub fn kv_get_metadata(&self, namespace: &str, key: &str) -> Result<Option<KvMetadata>> {
        let row: Option<(String, i64)> = self
            .conn
            .query_row(
                "SELECT value, version FROM key_value WHERE namespace = ?1 AND key = ?2 \
                 AND version = (SELECT max(version) FROM key_value WHERE namespace = ?1 AND key = ?2) \
                 AND deleted = 0",
                params![namespace, key],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .ok();
        Ok(row.map(|(value, version)| KvMetadata { value, version }))
    }

    /// Inserts a tombstone at `version + 1`; a no-op if the key has no rows.
    pub fn kv_delete(&self, namespace: &str, key: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO key_value (namespace, key, value, version, ttl, created_at, deleted) \
             SELECT namespace, key, value, max(version) + 1, ttl, ?3, 1 \
             FROM key_value WHERE namespace = ?1 AND key = ?2 GROUP BY key, namespace",
            params![namespace, key, self.session_epoch],
        )?;
        Ok(())
    }

    /// Deletes every KV entry in `namespace` (used when a host is detained
    /// or a job is removed, to purge its owned namespaces outright).
    pub fn kv_delete_namespace(&self, namespace: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM key_value WHERE namespace = ?1", params![namespace])?;
        Ok(())
    }

    pub fn kv_list_keys(&self, namespace: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT key FROM (SELECT namespace, key, max(version) AS version, deleted FROM key_value GROUP BY key, namespace) t \
             WHERE namespace = ?1 AND deleted = 0 ORDER BY key",
        )?;
        let rows = stmt
            .query_map(params![namespace], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(rows)
    }

    /// Physically removes (i) every row of a key whose latest version is a
    /// tombstone older than `max_days`, and (ii) historical rows more than
    /// seven versions behind that key's current maximum.
    pub fn kv_gc(&self, max_days: i64) -> Result<()> {
        let mut stmt = self.conn.prepare(
            "SELECT namespace, key, max(CAST(version AS INTEGER)) AS version, deleted, created_at \
             FROM key_value GROUP BY key, namespace",
        )?;
        let rows: Vec<(String, String, i64, i64, i64)> = stmt
            .query_map(rusqlite::NO_PARAMS, |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let now = chrono::Utc::now().timestamp();
        let max_age_secs = max_days * 24 * 60 * 60;

        for (namespace, key, version, deleted, created_at) in rows {
            if deleted == 1 && now - created_at >= max_age_secs {
                self.conn.execute(
                    "DELETE FROM key_value WHERE namespace = ?1 AND key = ?2",
                    params![namespace, key],
                )?;
                continue;
            }
            let floor = version - 7;
            if floor < 1 {
                continue;
            }
            self.conn.execute(
                "DELETE FROM key_value WHERE namespace = ?1 AND key = ?2 AND version < ?3",
                params![namespace, key, floor],
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let store = Store::open_in_memory().unwrap();
        store.kv_put("host/10.0.0.1", "memory_mb", "4096", None).unwrap();
        assert_eq!(store.kv_get("host/10.0.0.1", "memory_mb").unwrap(), Some("4096".to_string()));
    }

    #[test]
    fn put_identical_value_does_not_advance_version() {
        let store = Store::open_in_memory().unwrap();
        store.kv_put("job/api", "memory", "1024", None).unwrap();
        let v1 = store.kv_get_metadata("job/api", "memory").unwrap().unwrap().version;
        store.kv_put("job/api", "memory", "1024", None).unwrap();
        let v2 = store.kv_get_metadata("job/api", "memory").unwrap().unwrap().version;
        assert_eq!(v1, v2);
    }

    #[test]
    fn put_changed_value_advances_version() {
        let store = Store::open_in_memory().unwrap();
        store.kv_put("job/api", "memory", "1024", None).unwrap();
        store.kv_put("job/api", "memory", "2048", None).unwrap();
        let meta = store.kv_get_metadata("job/api", "memory").unwrap().unwrap();
        assert_eq!(meta.version, 2);
        assert_eq!(meta.value, "2048");
    }

    #[test]
    fn delete_inserts_tombstone_and_excludes_from_reads() {
        let store = Store::open_in_memory().unwrap();
        store.kv_put("job/api", "memory", "1024", None).unwrap();
        store.kv_delete("job/api", "memory").unwrap();
        assert_eq!(store.kv_get("job/api", "memory").unwrap(), None);
        assert!(!store.kv_list_keys("job/api").unwrap().contains(&"memory".to_string()));
    }

    #[test]
    fn list_keys_excludes_deleted() {
        let store = Store::open_in_memory().unwrap();
        store.kv_put("job/api", "a", "1", None).unwrap();
        store.kv_put("job/api", "b", "2", None).unwrap();
        store.kv_delete("job/api", "b").unwrap();
        let keys = store.kv_list_keys("job/api").unwrap();
        assert_eq!(keys, vec!["a".to_string()]);
    }

    #[test]
    fn gc_prunes_versions_more_than_seven_behind() {
        let store = Store::open_in_memory().unwrap();
        for i in 0..12 {
            store.kv_put("job/api", "memory", &i.to_string(), None).unwrap();
        }
        store.kv_gc(60).unwrap();
        let mut stmt = store.conn.prepare("SELECT min(version) FROM key_value WHERE namespace='job/api' AND key='memory'").unwrap();
        let min_version: i64 = stmt.query_row(rusqlite::NO_PARAMS, |r| r.get(0)).unwrap();
        assert!(min_version >= 12 - 7);
    }

    #[test]
    fn gc_removes_old_tombstones_entirely() {
        let store = Store::open_in_memory().unwrap();
        store.kv_put("job/api", "memory", "1024", None).unwrap();
        store.kv_delete("job/api", "memory").unwrap();
        store.conn.execute(
            "UPDATE key_value SET created_at = ?1 WHERE namespace='job/api' AND key='memory'",
            params![store.session_epoch - 100 * 24 * 60 * 60],
        ).unwrap();
        store.kv_gc(60).unwrap();
        let count: i64 = store.conn.query_row(
            "SELECT count(*) FROM key_value WHERE namespace='job/api' AND key='memory'",
            rusqlite::NO_PARAMS,
            |r| r.get(0),
        ).unwrap();
        assert_eq!(count, 0);
    }
}
