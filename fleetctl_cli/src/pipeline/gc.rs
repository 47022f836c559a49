//! `fleetctl gc` (spec §6): physically expires soft-deleted KV rows and
//! detained hosts, the only subcommand that prunes rather than builds.

use std::path::Path;

use crate::pipeline::BucketLayout;
use crate::Result;

pub fn run(workspace_root: &Path, max_days: i64) -> Result<()> {
    let layout = BucketLayout::new(workspace_root);
    let store = layout.open_store()?;

    info!("Pruning KV rows tombstoned more than {} days ago", max_days);
    store.kv_gc(max_days)?;

    let removed = store.expire_detained_hosts(max_days)?;
    info!("Expired {} detained host(s)", removed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::fs;

    #[test]
    fn gc_on_a_fresh_store_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let layout = BucketLayout::new(dir.path());
        fs::create_dir_all(&layout.staging_root).unwrap();
        layout.open_store().unwrap();

        run(dir.path(), 30).unwrap();
    }

    #[test]
    fn gc_expires_a_long_detained_host() {
        let dir = tempfile::tempdir().unwrap();
        let layout = BucketLayout::new(dir.path());
        fs::create_dir_all(&layout.staging_root).unwrap();
        {
            let store = layout.open_store().unwrap();
            store.upsert_host("10.0.0.1", 0, &[], &BTreeMap::new()).unwrap();
            store.detain_missing_hosts(&[]).unwrap();
        }

        run(dir.path(), -1).unwrap();

        let store = layout.open_store().unwrap();
        assert!(store.get_host_by_ip("10.0.0.1").unwrap().is_none());
    }
}
