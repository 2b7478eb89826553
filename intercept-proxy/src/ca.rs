use crate::error::ProxyError;
use crate::Result;
use hudsucker::{certificate_authority::RcgenAuthority, rustls};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    KeyUsagePurpose, PKCS_ECDSA_P256_SHA256,
};
use std::fs;
use std::path::{Path, PathBuf};
use time::{Duration, OffsetDateTime};
use tracing::info;

const CA_COMMON_NAME: &str = "Intercept Proxy CA";
const CA_ORGANIZATION: &str = "Intercept Proxy";

/// Root CA used to mint per-host certificates for TLS interception.
///
/// Stored as `ca.pem` + `ca.key` in the configured directory, with a copy of
/// the certificate as `ca.crt` for clients that want that extension.
pub struct CertificateAuthority {
    ca_cert: Certificate,
    cert_path: PathBuf,
}

impl CertificateAuthority {
    /// Load the CA stored under `ca_dir`, generating one on first use.
    pub fn new(ca_dir: &Path) -> Result<Self> {
        let cert_path = ca_dir.join("ca.pem");
        let key_path = ca_dir.join("ca.key");

        if cert_path.exists() && key_path.exists() {
            let key_pem = fs::read_to_string(&key_path)?;
            let ca_cert = Self::from_key_pem(&key_pem)?;
            info!("Loaded CA from {}", cert_path.display());
            return Ok(Self { ca_cert, cert_path });
        }

        fs::create_dir_all(ca_dir)?;
        let ca_cert = Self::generate()?;
        let cert_pem = ca_cert
            .serialize_pem()
            .map_err(|e| ProxyError::Certificate(format!("Failed to serialize CA cert: {}", e)))?;
        fs::write(&cert_path, &cert_pem)?;
        fs::write(&key_path, ca_cert.serialize_private_key_pem())?;
        fs::write(cert_path.with_extension("crt"), &cert_pem)?;
        info!("Generated new CA at {}", cert_path.display());

        Ok(Self { ca_cert, cert_path })
    }

    fn params() -> CertificateParams {
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, CA_COMMON_NAME);
        dn.push(DnType::OrganizationName, CA_ORGANIZATION);
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        params
    }

    // rcgen cannot sign with a parsed certificate, so the CA is rebuilt
    // around the stored key. Same subject and key, so leaves still chain to
    // the certificate on disk.
    fn from_key_pem(key_pem: &str) -> Result<Certificate> {
        let key_pair = KeyPair::from_pem(key_pem)
            .map_err(|e| ProxyError::Certificate(format!("Failed to parse CA key: {}", e)))?;
        let mut params = Self::params();
        params.key_pair = Some(key_pair);
        Certificate::from_params(params)
            .map_err(|e| ProxyError::Certificate(format!("Failed to rebuild CA cert: {}", e)))
    }

    fn generate() -> Result<Certificate> {
        let mut params = Self::params();
        let not_before = OffsetDateTime::now_utc();
        params.not_before = not_before;
        params.not_after = not_before + Duration::days(365 * 10);

        let key_pair = KeyPair::generate(&PKCS_ECDSA_P256_SHA256)
            .map_err(|e| ProxyError::Certificate(format!("Failed to generate CA key: {}", e)))?;
        params.key_pair = Some(key_pair);

        Certificate::from_params(params)
            .map_err(|e| ProxyError::Certificate(format!("Failed to generate CA cert: {}", e)))
    }

    /// Where the CA certificate lives; install this in the client trust store.
    pub fn cert_path(&self) -> &Path {
        &self.cert_path
    }

    /// Build the MITM authority handed to the proxy engine.
    pub fn authority(&self, cache_size: u64) -> Result<RcgenAuthority> {
        let cert_der = self
            .ca_cert
            .serialize_der()
            .map_err(|e| ProxyError::Certificate(format!("Failed to serialize CA cert DER: {}", e)))?;
        let key_der = self.ca_cert.serialize_private_key_der();

        RcgenAuthority::new(rustls::PrivateKey(key_der), rustls::Certificate(cert_der), cache_size)
            .map_err(|e| ProxyError::Certificate(format!("Failed to create CA authority: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_ca_generated_then_reloaded() {
        let dir = tempdir().unwrap();
        let ca_dir = dir.path().join("certs");

        let ca = CertificateAuthority::new(&ca_dir).expect("generate CA");
        assert!(ca_dir.join("ca.pem").exists());
        assert!(ca_dir.join("ca.key").exists());
        assert!(ca_dir.join("ca.crt").exists());
        assert_eq!(ca.cert_path(), ca_dir.join("ca.pem"));

        let key_before = fs::read_to_string(ca_dir.join("ca.key")).unwrap();
        let reloaded = CertificateAuthority::new(&ca_dir).expect("load CA");
        let key_after = fs::read_to_string(ca_dir.join("ca.key")).unwrap();
        assert_eq!(key_before, key_after);

        assert!(reloaded.authority(100).is_ok());
    }

    #[test]
    fn test_corrupt_key_is_reported() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("ca.pem"), "not a cert").unwrap();
        fs::write(dir.path().join("ca.key"), "not a key").unwrap();
        assert!(matches!(
            CertificateAuthority::new(dir.path()),
            Err(ProxyError::Certificate(_))
        ));
    }
}
