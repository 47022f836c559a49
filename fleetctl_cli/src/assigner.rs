//! Component E: the Assigner (spec §4.E).

use fleetctl_definitions::DisabledOverrides;
use fleetctl_store::Store;
use crate::Result;

/// Emits a (host, job) allocation for every non-detained host whose label
/// set is a superset of the job's (a job with no labels gets no
/// allocations at all), reconciling against whatever allocations already
/// exist: survivors are upserted in place, everything else is marked
/// `removed` rather than deleted so the orchestrator can stop it cleanly
/// on the next deploy. Allocations owned by a detained host are forced
/// disabled, on top of whatever `disabled.json` already says.
pub fn assign(store: &Store, disabled: &DisabledOverrides) -> Result<()> {
    let hosts = store.list_hosts()?;
    let job_names = store.job_names()?;

    let mut keep = Vec::new();
    for name in &job_names {
        let job = match store.get_job(name)? {
            Some(j) => j,
            None => continue,
        };
        if job.labels.is_empty() {
            continue;
        }
        for host in &hosts {
            if host.detained {
                continue;
            }
            if job.labels.iter().all(|l| host.has_label(l)) {
                let job_disabled = disabled.job_disabled_for_host(name, &host.host_ip);
                debug!("Allocating '{}' to {} (disabled={})", name, host.host_ip, job_disabled);
                store.upsert_allocation(&host.host_id, name, job_disabled)?;
                keep.push((host.host_id.clone(), name.clone()));
            }
        }
    }

    store.mark_stale_allocations_removed(&keep)?;

    for host in hosts.iter().filter(|h| h.detained) {
        info!("Disabling allocations on detained host {}", host.host_ip);
        store.disable_allocations_for_host(&host.host_id)?;
    }
    Ok(())
}
