//! The singleton `bucket` row, grounded on `maand_data.py`'s
//! `setup_maand_database`/`get_bucket_id`/`get_ca_md5_hash`/`get_update_seq`.

use rusqlite::params;
use fleetctl_definitions::Bucket;
use crate::{Error, ErrorKind, Result, Store};

impl Store {
    /// Inserts the singleton bucket row. Fails if one already exists.
    pub fn init_bucket(&self, bucket_id: &str) -> Result<()> {
        let exists: i64 = self
            .conn
            .query_row("SELECT count(*) FROM bucket", rusqlite::NO_PARAMS, |r| r.get(0))?;
        if exists > 0 {
            return Err(Error::from(ErrorKind::BucketAlreadyInitialized));
        }
        self.conn.execute(
            "INSERT INTO bucket (bucket_id, update_seq, ca_md5_hash) VALUES (?1, 0, '')",
            params![bucket_id],
        )?;
        Ok(())
    }

    pub fn bucket(&self) -> Result<Bucket> {
        self.conn
            .query_row(
                "SELECT bucket_id, update_seq, ca_md5_hash FROM bucket",
                rusqlite::NO_PARAMS,
                |r| {
                    Ok(Bucket {
                        bucket_id: r.get(0)?,
                        update_seq: r.get(1)?,
                        ca_md5_hash: r.get(2)?,
                    })
                },
            )
            .map_err(|_| Error::from(ErrorKind::BucketNotInitialized))
    }

    /// Bumped once per successful `deploy`.
    pub fn increment_update_seq(&self) -> Result<i64> {
        self.conn.execute("UPDATE bucket SET update_seq = update_seq + 1", rusqlite::NO_PARAMS)?;
        let seq: i64 = self
            .conn
            .query_row("SELECT update_seq FROM bucket", rusqlite::NO_PARAMS, |r| r.get(0))?;
        Ok(seq)
    }

    pub fn set_ca_md5_hash(&self, hash: &str) -> Result<()> {
        self.conn
            .execute("UPDATE bucket SET ca_md5_hash = ?1", params![hash])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_then_read_back() {
        let store = Store::open_in_memory().unwrap();
        store.init_bucket("bucket-123").unwrap();
        let bucket = store.bucket().unwrap();
        assert_eq!(bucket.bucket_id, "bucket-123");
        assert_eq!(bucket.update_seq, 0);
    }

    #[test]
    fn double_init_fails() {
        let store = Store::open_in_memory().unwrap();
        store.init_bucket("bucket-123").unwrap();
        assert!(store.init_bucket("bucket-456").is_err());
    }

    #[test]
    fn update_seq_increments() {
        let store = Store::open_in_memory().unwrap();
        store.init_bucket("bucket-123").unwrap();
        assert_eq!(store.increment_update_seq().unwrap(), 1);
        assert_eq!(store.increment_update_seq().unwrap(), 2);
    }
}
