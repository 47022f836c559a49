use chrono::Utc;

/// A single version of a key in the KV store. `get` surfaces the highest
/// non-deleted version; older or tombstoned versions remain until `gc`.
#[derive(Clone, Debug, PartialEq)]
pub struct KvEntry {
    pub namespace: String,
    pub key: String,
    pub value: String,
    pub version: i64,
    /// Seconds; `None` means the entry never expires on its own.
    pub ttl: Option<i64>,
    pub created_at: i64,
    pub deleted: bool,
}

impl KvEntry {
    /// True once `now` is past `created_at + ttl`. Entries without a TTL
    /// are only ever removed as tombstones via `gc`.
    pub fn ttl_expired(&self) -> bool {
        match self.ttl {
            None => false,
            Some(ttl) => Utc::now().timestamp() >= self.created_at + ttl,
        }
    }
}
