//! Loads `maand.conf`'s `[default]` section, layering it over
//! `ControllerConfig::default()` with the `merge` crate the same way
//! `shipcat_filebacked` layers service-manifest overrides onto region
//! defaults.

use std::path::Path;
use ini::Ini;
use merge::Merge;
use fleetctl_definitions::ControllerConfig;
use crate::Result;

#[derive(Clone, Default, Merge)]
struct ControllerConfigOverrides {
    use_sudo: Option<bool>,
    ssh_user: Option<String>,
    ssh_key: Option<String>,
    certs_ttl_days: Option<u32>,
    jobs_conf_path: Option<String>,
}

impl ControllerConfigOverrides {
    fn defaults() -> Self {
        let d = ControllerConfig::default();
        ControllerConfigOverrides {
            use_sudo: Some(d.use_sudo),
            ssh_user: Some(d.ssh_user),
            ssh_key: Some(d.ssh_key),
            certs_ttl_days: Some(d.certs_ttl_days),
            jobs_conf_path: Some(d.jobs_conf_path),
        }
    }

    fn into_config(self) -> ControllerConfig {
        let d = ControllerConfig::default();
        ControllerConfig {
            use_sudo: self.use_sudo.unwrap_or(d.use_sudo),
            ssh_user: self.ssh_user.unwrap_or(d.ssh_user),
            ssh_key: self.ssh_key.unwrap_or(d.ssh_key),
            certs_ttl_days: self.certs_ttl_days.unwrap_or(d.certs_ttl_days),
            jobs_conf_path: self.jobs_conf_path.unwrap_or(d.jobs_conf_path),
        }
    }
}

pub fn load(root: &Path) -> Result<ControllerConfig> {
    let path = root.join("maand.conf");
    if !path.exists() {
        debug!("No maand.conf at {:?}, using built-in defaults", path);
        return Ok(ControllerConfig::default());
    }
    debug!("Loading controller config from {:?}", path);
    let conf = Ini::load_from_file(&path)?;
    let parsed = match conf.section(Some("default")) {
        None => ControllerConfigOverrides::default(),
        Some(props) => ControllerConfigOverrides {
            use_sudo: props.get("use_sudo").map(|v| v == "true"),
            ssh_user: props.get("ssh_user").map(|s| s.to_string()),
            ssh_key: props.get("ssh_key").map(|s| s.to_string()),
            certs_ttl_days: props.get("certs_ttl_days").and_then(|s| s.parse().ok()),
            jobs_conf_path: props.get("jobs_conf_path").map(|s| s.to_string()),
        },
    };
    Ok(ControllerConfigOverrides::defaults().merge(parsed).into_config())
}
