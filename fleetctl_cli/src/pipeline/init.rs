//! `fleetctl init` (spec §6): first-time bootstrap of a workspace's local
//! state — directory skeleton, the embedded store, the cluster CA and a
//! fresh `bucket_id`.

use std::fs;
use std::path::Path;

use crate::certs;
use crate::pipeline::{new_bucket_id, BucketLayout};
use crate::Result;

pub fn run(workspace_root: &Path) -> Result<()> {
    let layout = BucketLayout::new(workspace_root);
    fs::create_dir_all(&layout.staging_root)?;

    let fresh = !layout.store_path.exists();
    let store = layout.open_store()?;

    let bucket_id = if fresh {
        let id = new_bucket_id();
        info!("Initializing new bucket '{}' at {:?}", id, layout.workspace_root);
        store.init_bucket(&id)?;
        id
    } else {
        info!("Store already present at {:?}, reusing its bucket_id", layout.store_path);
        store.bucket()?.bucket_id
    };

    certs::ensure_ca(&store, &layout.ca_dir, &bucket_id)?;
    Ok(())
}
