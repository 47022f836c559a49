use std::collections::BTreeMap;
use regex::Regex;
use crate::deserializers::RelaxedString;
use crate::{Error, ErrorKind, Result};

/// One element of `workspace/agents.json`. Array order defines `position`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct HostInventoryEntry {
    pub host: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    pub cpu: Option<RelaxedString>,
    pub memory: Option<RelaxedString>,
}

impl HostInventoryEntry {
    pub fn validate(&self) -> Result<()> {
        let re = Regex::new(r"^(\d{1,3})\.(\d{1,3})\.(\d{1,3})\.(\d{1,3})$").unwrap();
        let caps = re.captures(&self.host).ok_or_else(|| {
            Error::from(ErrorKind::SchemaValidationError(
                "agents.json".into(),
                format!("'{}' is not a valid IPv4 address", self.host),
            ))
        })?;
        for octet in caps.iter().skip(1) {
            let n: u16 = octet.unwrap().as_str().parse().unwrap();
            if n > 255 {
                return Err(Error::from(ErrorKind::SchemaValidationError(
                    "agents.json".into(),
                    format!("'{}' is not a valid IPv4 address", self.host),
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(host: &str) -> HostInventoryEntry {
        HostInventoryEntry {
            host: host.to_string(),
            labels: vec![],
            tags: BTreeMap::new(),
            cpu: None,
            memory: None,
        }
    }

    #[test]
    fn accepts_valid_ipv4() {
        assert!(entry("10.0.0.1").validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_octet() {
        assert!(entry("10.0.0.999").validate().is_err());
    }

    #[test]
    fn rejects_non_ipv4() {
        assert!(entry("not-an-ip").validate().is_err());
    }
}
