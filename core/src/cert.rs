//! Self-signed ECDSA P-256 certificate generation for the server's TLS
//! listener. Host list and validity period are caller-controlled so a
//! fresh cert can be minted per `--listen` address without touching disk
//! until the caller asks to save it.

use std::net::IpAddr;
use std::path::Path;

use rcgen::{CertificateParams, DnType, Ia5String, KeyPair, SanType};
use time::{Duration, OffsetDateTime};

use crate::error::CertError;

const VALID_DAYS: i64 = 365;

pub struct GeneratedCert {
    pub cert_pem: String,
    pub key_pem: String,
}

/// Generate a self-signed cert valid for `hosts`, splitting each entry
/// between `SanType::IpAddress` and `SanType::DnsName` by whether it parses
/// as an IP address.
pub fn generate(hosts: &[String], organization: &str) -> Result<GeneratedCert, CertError> {
    let key_pair = KeyPair::generate().map_err(|e| CertError::KeyGeneration(e.to_string()))?;

    let mut params = CertificateParams::default();
    params.distinguished_name.push(DnType::CommonName, organization);
    params.distinguished_name.push(DnType::OrganizationName, organization);

    let now = OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + Duration::days(VALID_DAYS);

    let mut sans = Vec::with_capacity(hosts.len());
    for host in hosts {
        if let Ok(ip) = host.parse::<IpAddr>() {
            sans.push(SanType::IpAddress(ip));
        } else {
            let name = Ia5String::try_from(host.as_str()).map_err(|_| CertError::InvalidHost(host.clone()))?;
            sans.push(SanType::DnsName(name));
        }
    }
    params.subject_alt_names = sans;

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| CertError::CertGeneration(e.to_string()))?;

    Ok(GeneratedCert {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
    })
}

/// Write `cert.pem`/`key.pem` beneath `dir`, creating it if needed.
pub fn save(cert: &GeneratedCert, dir: &Path) -> Result<(std::path::PathBuf, std::path::PathBuf), CertError> {
    std::fs::create_dir_all(dir)?;
    let cert_path = dir.join("cert.pem");
    let key_path = dir.join("key.pem");
    std::fs::write(&cert_path, &cert.cert_pem)?;
    std::fs::write(&key_path, &cert.key_pem)?;
    Ok((cert_path, key_path))
}

pub fn load(cert_path: &Path, key_path: &Path) -> Result<GeneratedCert, CertError> {
    let cert_pem = std::fs::read_to_string(cert_path)?;
    let key_pem = std::fs::read_to_string(key_path)?;
    Ok(GeneratedCert { cert_pem, key_pem })
}

pub fn exists(dir: &Path) -> bool {
    dir.join("cert.pem").exists() && dir.join("key.pem").exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_pem_with_requested_sans() {
        let cert = generate(&["127.0.0.1".to_string(), "tunnel.example".to_string()], "wavesocks").unwrap();
        assert!(cert.cert_pem.starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(cert.key_pem.contains("PRIVATE KEY"));
    }

    #[test]
    fn save_then_load_round_trips() {
        let cert = generate(&["localhost".to_string()], "wavesocks").unwrap();
        let dir = std::env::temp_dir().join(format!("wavesocks-cert-test-{}", fastrand::u64(..)));
        save(&cert, &dir).unwrap();
        assert!(exists(&dir));
        let loaded = load(&dir.join("cert.pem"), &dir.join("key.pem")).unwrap();
        assert_eq!(loaded.cert_pem, cert.cert_pem);
        std::fs::remove_dir_all(&dir).ok();
    }
}
