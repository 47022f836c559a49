//! Component H: the Certificate Engine (spec §4.H). `openssl` invocations
//! are deliberately kept behind the small `openssl_cmd` module so the
//! renewal policy above it stays a pure, unit-testable decision.

use std::fs;
use std::path::Path;
use std::process::Command;
use chrono::{DateTime, Duration, Utc};
use fleetctl_definitions::{ArchivedCert, CertMaterial, ControllerConfig, ErrorKind as DefErrorKind, JobCert};
use fleetctl_store::Store;
use crate::Result;

const CA_TTL_DAYS: i64 = 3650;
const HOST_CERT_TTL_DAYS: i64 = 60;
const RENEWAL_WINDOW_DAYS: i64 = 15;

/// Ensures `<ca_dir>/ca.key`/`ca.crt` exist (minting them on first run),
/// compares the CA's fingerprint against the bucket row, and records any
/// change. Returns whether the CA changed this pass (forcing every leaf to
/// renew regardless of its own expiry).
pub fn ensure_ca(store: &Store, ca_dir: &Path, bucket_id: &str) -> Result<bool> {
    fs::create_dir_all(ca_dir)?;
    let key_path = ca_dir.join("ca.key");
    let crt_path = ca_dir.join("ca.crt");

    if !key_path.exists() || !crt_path.exists() {
        info!("Minting cluster CA at {:?}", ca_dir);
        let key_pem = openssl_cmd::genrsa(4096)?;
        fs::write(&key_path, &key_pem)?;
        openssl_cmd::restrict_permissions(&key_path)?;
        let crt_pem = openssl_cmd::self_signed(&key_path, &format!("/CN={}", bucket_id), CA_TTL_DAYS)?;
        fs::write(&crt_path, &crt_pem)?;
    }

    let observed = format!("{:x}", md5::compute(fs::read(&crt_path)?));
    let bucket = store.bucket()?;
    let changed = bucket.ca_changed(&observed);
    if changed {
        warn!("CA fingerprint changed ({} -> {}), forcing leaf renewal", bucket.ca_md5_hash, observed);
        store.set_ca_md5_hash(&observed)?;
    }
    Ok(changed)
}

/// True when the cert named by `existing` should be (re)minted: it's
/// missing, the CA changed, the cert's own declaration changed (job certs
/// only), or it expires within `RENEWAL_WINDOW_DAYS`.
fn needs_renewal(existing: Option<&ArchivedCert>, ca_changed: bool, declaration_changed: bool, not_after: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    if existing.is_none() {
        return true;
    }
    if ca_changed || declaration_changed {
        return true;
    }
    match not_after {
        None => true,
        Some(exp) => exp - now < Duration::days(RENEWAL_WINDOW_DAYS),
    }
}

fn load_archived(store: &Store, namespace: &str) -> Result<Option<ArchivedCert>> {
    let key_b64 = store.kv_get(namespace, "key")?;
    let crt_b64 = store.kv_get(namespace, "crt")?;
    let pkcs8_b64 = store.kv_get(namespace, "pkcs8")?;
    match (key_b64, crt_b64) {
        (Some(key_b64), Some(crt_b64)) => Ok(Some(ArchivedCert { key_b64, crt_b64, pkcs8_b64 })),
        _ => Ok(None),
    }
}

fn store_archived(store: &Store, namespace: &str, archived: &ArchivedCert) -> Result<()> {
    store.kv_put(namespace, "key", &archived.key_b64, None)?;
    store.kv_put(namespace, "crt", &archived.crt_b64, None)?;
    if let Some(pkcs8) = &archived.pkcs8_b64 {
        store.kv_put(namespace, "pkcs8", pkcs8, None)?;
    }
    Ok(())
}

fn expiry_of(archived: &ArchivedCert) -> Option<DateTime<Utc>> {
    let material = archived.to_material().ok()?;
    openssl_cmd::not_after(&material.crt_pem).ok()
}

/// Mints/renews `host.key/.crt/.pem` for every non-detained host: subject
/// `/CN=<bucket_id>`, SAN `DNS:localhost,IP:127.0.0.1,IP:<host_ip>`, 60-day
/// TTL. Archives the result to `certs/host/<ip>`.
pub fn renew_host_certs(store: &Store, ca_dir: &Path, bucket_id: &str, ca_changed: bool) -> Result<()> {
    let ca_key = fs::read(ca_dir.join("ca.key"))?;
    let ca_crt = fs::read(ca_dir.join("ca.crt"))?;

    for host in store.list_hosts()?.into_iter().filter(|h| !h.detained) {
        let namespace = format!("certs/host/{}", host.host_ip);
        let existing = load_archived(store, &namespace)?;
        let not_after = existing.as_ref().and_then(expiry_of);
        if !needs_renewal(existing.as_ref(), ca_changed, false, not_after, Utc::now()) {
            continue;
        }

        info!("Minting host certificate for {}", host.host_ip);
        let subject = format!("/CN={}", bucket_id);
        let san = format!("DNS:localhost,IP:127.0.0.1,IP:{}", host.host_ip);
        let material = mint_leaf(&ca_key, &ca_crt, &subject, &san, HOST_CERT_TTL_DAYS, false)?;
        store_archived(store, &namespace, &material.to_archive())?;
    }
    Ok(())
}

/// Mints/renews every `job.certs` entry for every (host, job) allocation.
pub fn renew_job_certs(store: &Store, ca_dir: &Path, config: &ControllerConfig, ca_changed: bool) -> Result<()> {
    let ca_key = fs::read(ca_dir.join("ca.key"))?;
    let ca_crt = fs::read(ca_dir.join("ca.crt"))?;

    for name in store.job_names()? {
        let job = match store.get_job(&name)? {
            Some(j) => j,
            None => continue,
        };
        if job.certs.is_empty() {
            continue;
        }
        for alloc in store.allocations_for_job(&name)? {
            if alloc.removed {
                continue;
            }
            let decl_namespace = format!("certs/job/{}/{}", alloc.host_ip, name);
            let previous_hash = store.kv_get(&decl_namespace, "certs_md5_hash")?;
            let declaration_changed = previous_hash.as_deref() != Some(job.certs_md5_hash.as_str());
            if declaration_changed {
                store.kv_put(&decl_namespace, "certs_md5_hash", &job.certs_md5_hash, None)?;
            }

            for cert in &job.certs {
                renew_one_job_cert(store, &ca_key, &ca_crt, config, &alloc.host_ip, &name, cert, ca_changed, declaration_changed)?;
            }
        }
    }
    Ok(())
}

fn renew_one_job_cert(
    store: &Store,
    ca_key: &[u8],
    ca_crt: &[u8],
    config: &ControllerConfig,
    host_ip: &str,
    job: &str,
    cert: &JobCert,
    ca_changed: bool,
    declaration_changed: bool,
) -> Result<()> {
    let namespace = format!("certs/job/{}/{}/certs/{}", host_ip, job, cert.name);
    let existing = load_archived(store, &namespace)?;
    let not_after = existing.as_ref().and_then(expiry_of);
    if !needs_renewal(existing.as_ref(), ca_changed, declaration_changed, not_after, Utc::now()) {
        return Ok(());
    }

    info!("Minting job certificate '{}' for {}@{}", cert.name, job, host_ip);
    let san = cert
        .subject_alt_name
        .clone()
        .unwrap_or_else(|| format!("IP:{}", host_ip));
    let material = mint_leaf(ca_key, ca_crt, &cert.subject, &san, config.certs_ttl_days as i64, cert.pkcs8)?;
    store_archived(store, &namespace, &material.to_archive())
}

fn mint_leaf(ca_key: &[u8], ca_crt: &[u8], subject: &str, san: &str, ttl_days: i64, pkcs8: bool) -> Result<CertMaterial> {
    let key_pem = openssl_cmd::genrsa(4096)?;
    let csr_pem = openssl_cmd::csr(&key_pem, subject, san)?;
    let crt_pem = openssl_cmd::sign(&csr_pem, ca_key, ca_crt, san, ttl_days)?;
    let pkcs8_pem = if pkcs8 { Some(openssl_cmd::to_pkcs8(&key_pem)?) } else { None };
    Ok(CertMaterial { key_pem, crt_pem, pkcs8_pem })
}

/// Thin wrappers around the `openssl` CLI. Each writes its inputs to a
/// scratch file under the system temp directory (named with a random
/// UUID to avoid collisions across concurrent invocations) and cleans up
/// after itself.
mod openssl_cmd {
    use std::fs;
    use std::path::PathBuf;
    use chrono::{DateTime, TimeZone, Utc};
    use crate::{Error, Result};

    fn scratch_path(suffix: &str) -> PathBuf {
        std::env::temp_dir().join(format!("fleetctl-{}{}", uuid::Uuid::new_v4(), suffix))
    }

    fn run(cmd: &mut std::process::Command) -> Result<Vec<u8>> {
        let output = crate::subprocess::output_with_timeout(cmd)?;
        if !output.status.success() {
            let err: fleetctl_definitions::Error = super::DefErrorKind::CertError(
                format!("{:?}", cmd),
                String::from_utf8_lossy(&output.stderr).into_owned(),
            )
            .into();
            return Err(err.into());
        }
        Ok(output.stdout)
    }

    pub fn genrsa(bits: u32) -> Result<Vec<u8>> {
        run(std::process::Command::new("openssl").args(&["genrsa", &bits.to_string()]))
    }

    pub fn to_pkcs8(key_pem: &[u8]) -> Result<Vec<u8>> {
        let key_path = scratch_path(".key");
        fs::write(&key_path, key_pem)?;
        let out = run(std::process::Command::new("openssl").args(&[
            "pkcs8",
            "-topk8",
            "-nocrypt",
            "-in",
        ]).arg(&key_path));
        let _ = fs::remove_file(&key_path);
        out
    }

    pub fn self_signed(key_path: &std::path::Path, subject: &str, days: i64) -> Result<Vec<u8>> {
        run(std::process::Command::new("openssl").args(&[
            "req", "-x509", "-new", "-key",
        ])
        .arg(key_path)
        .args(&["-days", &days.to_string(), "-subj", subject]))
    }

    pub fn csr(key_pem: &[u8], subject: &str, san: &str) -> Result<Vec<u8>> {
        let key_path = scratch_path(".key");
        fs::write(&key_path, key_pem)?;
        let out = run(std::process::Command::new("openssl")
            .args(&["req", "-new", "-key"])
            .arg(&key_path)
            .args(&["-subj", subject, "-addext", &format!("subjectAltName={}", san)]));
        let _ = fs::remove_file(&key_path);
        out
    }

    pub fn sign(csr_pem: &[u8], ca_key: &[u8], ca_crt: &[u8], san: &str, days: i64) -> Result<Vec<u8>> {
        let csr_path = scratch_path(".csr");
        let ca_key_path = scratch_path(".ca.key");
        let ca_crt_path = scratch_path(".ca.crt");
        let ext_path = scratch_path(".ext");
        fs::write(&csr_path, csr_pem)?;
        fs::write(&ca_key_path, ca_key)?;
        fs::write(&ca_crt_path, ca_crt)?;
        fs::write(&ext_path, format!("subjectAltName={}\n", san))?;

        let out = run(std::process::Command::new("openssl")
            .args(&["x509", "-req", "-in"])
            .arg(&csr_path)
            .args(&["-CA"])
            .arg(&ca_crt_path)
            .args(&["-CAkey"])
            .arg(&ca_key_path)
            .args(&["-CAcreateserial", "-days", &days.to_string(), "-extfile"])
            .arg(&ext_path));

        let _ = fs::remove_file(&csr_path);
        let _ = fs::remove_file(&ca_key_path);
        let _ = fs::remove_file(&ca_crt_path);
        let _ = fs::remove_file(&ext_path);
        out
    }

    pub fn restrict_permissions(path: &std::path::Path) -> Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(path)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(path, perms)?;
        }
        Ok(())
    }

    /// Parses `openssl x509 -enddate -noout`'s `notAfter=<date>` line.
    pub fn not_after(crt_pem: &[u8]) -> Result<DateTime<Utc>> {
        let crt_path = scratch_path(".crt");
        fs::write(&crt_path, crt_pem)?;
        let out = run(std::process::Command::new("openssl")
            .args(&["x509", "-enddate", "-noout", "-in"])
            .arg(&crt_path));
        let _ = fs::remove_file(&crt_path);
        let line = String::from_utf8_lossy(&out?);
        let raw = line.trim().trim_start_matches("notAfter=");
        let naive = chrono::NaiveDateTime::parse_from_str(raw, "%b %e %H:%M:%S %Y GMT")
            .map_err(|e| Error::from(format!("unparseable certificate notAfter '{}': {}", raw, e)))?;
        Ok(Utc.from_utc_datetime(&naive))
    }
}
