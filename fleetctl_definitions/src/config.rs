/// `maand.conf`'s `[default]` section. Parsing lives in `fleetctl_filebacked`;
/// this only carries the resolved shape and its defaults.
#[derive(Clone, Debug, PartialEq)]
pub struct ControllerConfig {
    pub use_sudo: bool,
    pub ssh_user: String,
    /// Filename relative to the bucket directory.
    pub ssh_key: String,
    pub certs_ttl_days: u32,
    pub jobs_conf_path: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            use_sudo: false,
            ssh_user: "root".to_string(),
            ssh_key: "id_rsa".to_string(),
            certs_ttl_days: 60,
            jobs_conf_path: "maand.jobs.conf".to_string(),
        }
    }
}
