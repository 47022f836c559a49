//! Component C: the Inventory Reconciler (spec §4.C).

use fleetctl_definitions::{units, HostInventoryEntry};
use fleetctl_store::Store;
use crate::Result;

/// Upserts every host in the inventory (preserving `host_id`, replacing its
/// label/tag sets), detains hosts no longer present, purges their owned KV
/// namespaces, and records live resource numbers unless zero.
pub fn reconcile(store: &Store, inventory: &[HostInventoryEntry]) -> Result<()> {
    let mut current_ips = Vec::with_capacity(inventory.len());
    for (position, entry) in inventory.iter().enumerate() {
        entry.validate()?;
        debug!("Upserting host {}", entry.host);
        store.upsert_host(&entry.host, position as i64, &entry.labels, &entry.tags)?;

        let memory_mb = match &entry.memory {
            Some(m) => units::parse_memory_mb(&m.to_string())?,
            None => 0,
        };
        let cpu_mhz = match &entry.cpu {
            Some(c) => units::parse_cpu_mhz(&c.to_string())?,
            None => 0,
        };
        store.set_host_resources(&entry.host, memory_mb, cpu_mhz)?;
        current_ips.push(entry.host.clone());
    }

    let detained = store.detain_missing_hosts(&current_ips)?;
    for host in detained {
        info!("Detaining vanished host {}", host.host_ip);
        store.kv_delete_namespace(&format!("certs/host/{}", host.host_ip))?;
        store.kv_delete_namespace(&format!("host/{}", host.host_ip))?;
        store.kv_delete_namespace(&format!("vars/host/{}", host.host_ip))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use fleetctl_definitions::deserializers::RelaxedString;

    fn entry(host: &str, memory: Option<&str>, cpu: Option<&str>) -> HostInventoryEntry {
        HostInventoryEntry {
            host: host.to_string(),
            labels: vec!["worker".to_string()],
            tags: BTreeMap::new(),
            memory: memory.map(RelaxedString::from),
            cpu: cpu.map(RelaxedString::from),
        }
    }

    #[test]
    fn upserts_and_records_resources() {
        let store = Store::open_in_memory().unwrap();
        reconcile(&store, &[entry("10.0.0.1", Some("4 GB"), Some("2 GHZ"))]).unwrap();
        let host = store.get_host_by_ip("10.0.0.1").unwrap().unwrap();
        assert_eq!(host.memory_mb, 4096);
        assert_eq!(host.cpu_mhz, 2000);
        assert!(!host.detained);
    }

    #[test]
    fn vanished_host_is_detained_and_purged() {
        let store = Store::open_in_memory().unwrap();
        reconcile(&store, &[entry("10.0.0.1", None, None)]).unwrap();
        store.kv_put("host/10.0.0.1", "memory_mb", "4096", None).unwrap();
        reconcile(&store, &[]).unwrap();
        let host = store.get_host_by_ip("10.0.0.1").unwrap().unwrap();
        assert!(host.detained);
        assert!(store.kv_list_keys("host/10.0.0.1").unwrap().is_empty());
    }
}
