use uuid::Uuid;

/// The singleton cluster identity row.
///
/// `bucket_id` doubles as the CA's CN, so it is fixed at `init` time and
/// never regenerated; `update_seq` is bumped once per successful `deploy`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Bucket {
    pub bucket_id: String,
    pub update_seq: i64,
    /// MD5 fingerprint of the CA certificate file last observed on disk.
    pub ca_md5_hash: String,
}

impl Bucket {
    pub fn new(bucket_id: String) -> Self {
        Bucket {
            bucket_id,
            update_seq: 0,
            ca_md5_hash: String::new(),
        }
    }

    /// True when the on-disk CA no longer matches the last-recorded fingerprint,
    /// which forces re-issuance of every leaf certificate.
    pub fn ca_changed(&self, observed_md5: &str) -> bool {
        self.ca_md5_hash != observed_md5
    }
}

/// Freshly generated id for a bucket created by `init`; also the CA's CN.
pub fn new_bucket_id() -> String {
    Uuid::new_v4().to_string()
}
