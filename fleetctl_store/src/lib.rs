//! Embedded relational store backing `fleetctl`'s reconciliation state.
//!
//! One SQLite file lives inside the bucket directory; `Store` owns the
//! connection and the process-lifetime session epoch used as `created_at`
//! for every KV write this run makes (spec §4.A/§9: "all writes in one run
//! share an epoch").

#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate log;
extern crate rusqlite;
extern crate chrono;
extern crate serde_json;
extern crate fleetctl_definitions;

error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }
    links {}
    foreign_links {
        Io(::std::io::Error);
        Sqlite(rusqlite::Error);
        SerdeJ(serde_json::Error);
    }
    errors {
        BucketNotInitialized {
            description("bucket row is missing; run `init` first")
            display("bucket row is missing; run `init` first")
        }
        BucketAlreadyInitialized {
            description("bucket is already initialized")
            display("bucket is already initialized")
        }
        HostNotFound(ip: String) {
            description("host not found")
            display("no host with ip '{}'", ip)
        }
        JobNotFound(name: String) {
            description("job not found")
            display("no job named '{}'", name)
        }
    }
}

pub mod kv;
pub mod bucket;
pub mod host;
pub mod job;
pub mod allocation;

use rusqlite::Connection;
use std::path::Path;

/// Owns the SQLite connection and the session epoch. All of `Store`'s
/// methods are spread across sibling modules (`kv`, `bucket`, `host`, `job`,
/// `allocation`) as separate `impl Store` blocks, one per spec §3 entity.
pub struct Store {
    conn: Connection,
    session_epoch: i64,
}

impl Store {
    /// Opens (creating if absent) the store at `path` and ensures schema.
    pub fn open(path: &Path) -> Result<Store> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")?;
        let store = Store {
            conn,
            session_epoch: chrono::Utc::now().timestamp(),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Store> {
        let conn = Connection::open_in_memory()?;
        let store = Store {
            conn,
            session_epoch: chrono::Utc::now().timestamp(),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    /// The unix timestamp established once at `Store::open` and reused for
    /// every KV write this process makes.
    pub fn session_epoch(&self) -> i64 {
        self.session_epoch
    }

    fn ensure_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS bucket (
                bucket_id TEXT NOT NULL,
                update_seq INTEGER NOT NULL,
                ca_md5_hash TEXT NOT NULL DEFAULT ''
            );

            CREATE TABLE IF NOT EXISTS host (
                host_id TEXT PRIMARY KEY,
                host_ip TEXT NOT NULL UNIQUE,
                memory_mb INTEGER NOT NULL DEFAULT 0,
                cpu_mhz INTEGER NOT NULL DEFAULT 0,
                position INTEGER NOT NULL,
                detained INTEGER NOT NULL DEFAULT 0,
                detained_at INTEGER
            );
            CREATE TABLE IF NOT EXISTS host_labels (host_id TEXT NOT NULL, label TEXT NOT NULL);
            CREATE TABLE IF NOT EXISTS host_tags (host_id TEXT NOT NULL, key TEXT NOT NULL, value TEXT NOT NULL);

            CREATE TABLE IF NOT EXISTS job (
                job_id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                version TEXT NOT NULL,
                min_memory_mb INTEGER NOT NULL DEFAULT 0,
                max_memory_mb INTEGER NOT NULL DEFAULT 0,
                min_cpu_mhz INTEGER NOT NULL DEFAULT 0,
                max_cpu_mhz INTEGER NOT NULL DEFAULT 0,
                certs_md5_hash TEXT NOT NULL DEFAULT '',
                deployment_seq INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS job_labels (job_id TEXT NOT NULL, label TEXT NOT NULL);
            CREATE TABLE IF NOT EXISTS job_ports (job_id TEXT NOT NULL, name TEXT NOT NULL, port INTEGER NOT NULL);
            CREATE TABLE IF NOT EXISTS job_certs (
                job_id TEXT NOT NULL,
                name TEXT NOT NULL,
                pkcs8 INTEGER NOT NULL DEFAULT 0,
                subject TEXT NOT NULL,
                subject_alt_name TEXT
            );
            CREATE TABLE IF NOT EXISTS job_files (job_id TEXT NOT NULL, path TEXT NOT NULL, content BLOB NOT NULL, isdir INTEGER NOT NULL DEFAULT 0);
            CREATE TABLE IF NOT EXISTS job_commands (
                job_id TEXT NOT NULL,
                job_name TEXT NOT NULL,
                name TEXT NOT NULL,
                executed_on TEXT NOT NULL,
                depend_on_job TEXT,
                depend_on_command TEXT,
                depend_on_config TEXT
            );

            CREATE TABLE IF NOT EXISTS allocation (
                host_id TEXT NOT NULL,
                job TEXT NOT NULL,
                disabled INTEGER NOT NULL DEFAULT 0,
                removed INTEGER NOT NULL DEFAULT 0,
                current_hash TEXT,
                previous_hash TEXT,
                PRIMARY KEY (host_id, job)
            );

            CREATE TABLE IF NOT EXISTS key_value (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                version INTEGER NOT NULL,
                ttl INTEGER,
                created_at INTEGER NOT NULL,
                deleted INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS key_value_ns_key ON key_value (namespace, key);
            ",
        )?;
        Ok(())
    }
}
