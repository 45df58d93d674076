//! Certificate resolution.
//!
//! Certificates are issued elsewhere; the engine only needs to know where the
//! chain and key of an already-issued certificate live so the renderer can
//! emit a TLS block.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Who issued a certificate, which decides where its files live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateProvider {
    Letsencrypt,
    Custom,
}

/// File locations of an issued certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedCertificate {
    pub id: u64,
    pub provider: CertificateProvider,
    pub certificate_path: PathBuf,
    pub key_path: PathBuf,
}

/// Maps a host's certificate reference to its files.
pub trait CertificateResolver: Send + Sync {
    /// Returns `None` when the certificate is unknown or unusable.
    fn resolve(&self, certificate_id: u64) -> Option<ResolvedCertificate>;
}

impl<F> CertificateResolver for F
where
    F: Fn(u64) -> Option<ResolvedCertificate> + Send + Sync,
{
    fn resolve(&self, certificate_id: u64) -> Option<ResolvedCertificate> {
        self(certificate_id)
    }
}

/// Resolves certificates from the on-disk layout the certificate issuer uses:
/// `<dir>/npm-<id>/fullchain.pem` and `<dir>/npm-<id>/privkey.pem`, looking
/// in the Let's Encrypt directory first and the custom directory second.
#[derive(Debug, Clone)]
pub struct FileCertificateResolver {
    letsencrypt_dir: PathBuf,
    custom_dir: PathBuf,
}

impl FileCertificateResolver {
    pub fn new(letsencrypt_dir: impl Into<PathBuf>, custom_dir: impl Into<PathBuf>) -> Self {
        Self {
            letsencrypt_dir: letsencrypt_dir.into(),
            custom_dir: custom_dir.into(),
        }
    }

    fn probe(&self, dir: &Path, provider: CertificateProvider, id: u64) -> Option<ResolvedCertificate> {
        let base = dir.join(format!("npm-{}", id));
        let certificate_path = base.join("fullchain.pem");
        let key_path = base.join("privkey.pem");

        if !certificate_path.is_file() || !key_path.is_file() {
            return None;
        }

        match count_certificates(&certificate_path) {
            Ok(0) => {
                tracing::warn!(path = ?certificate_path, "Certificate chain contains no certificates");
                None
            }
            Ok(_) => Some(ResolvedCertificate {
                id,
                provider,
                certificate_path,
                key_path,
            }),
            Err(e) => {
                tracing::warn!(path = ?certificate_path, error = %e, "Failed to read certificate chain");
                None
            }
        }
    }
}

impl CertificateResolver for FileCertificateResolver {
    fn resolve(&self, certificate_id: u64) -> Option<ResolvedCertificate> {
        self.probe(&self.letsencrypt_dir, CertificateProvider::Letsencrypt, certificate_id)
            .or_else(|| self.probe(&self.custom_dir, CertificateProvider::Custom, certificate_id))
    }
}

/// Number of PEM certificates in a chain file.
fn count_certificates(path: &Path) -> std::io::Result<usize> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut count = 0;
    for cert in rustls_pemfile::certs(&mut reader) {
        cert?;
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    // Structurally valid PEM; rustls-pemfile only decodes base64, it does not
    // parse the DER.
    const FAKE_CHAIN: &str = "-----BEGIN CERTIFICATE-----\nMIIBszCCAVmgAwIBAgIUZm9vYmFy\n-----END CERTIFICATE-----\n";

    fn write_cert(dir: &Path, id: u64, chain: &str) {
        let base = dir.join(format!("npm-{}", id));
        fs::create_dir_all(&base).unwrap();
        fs::write(base.join("fullchain.pem"), chain).unwrap();
        fs::write(base.join("privkey.pem"), "key").unwrap();
    }

    #[test]
    fn test_resolves_letsencrypt_before_custom() {
        let le = tempfile::tempdir().unwrap();
        let custom = tempfile::tempdir().unwrap();
        write_cert(le.path(), 5, FAKE_CHAIN);
        write_cert(custom.path(), 5, FAKE_CHAIN);
        write_cert(custom.path(), 6, FAKE_CHAIN);

        let resolver = FileCertificateResolver::new(le.path(), custom.path());

        let five = resolver.resolve(5).unwrap();
        assert_eq!(five.provider, CertificateProvider::Letsencrypt);
        assert_eq!(five.certificate_path, le.path().join("npm-5/fullchain.pem"));

        let six = resolver.resolve(6).unwrap();
        assert_eq!(six.provider, CertificateProvider::Custom);
        assert_eq!(six.key_path, custom.path().join("npm-6/privkey.pem"));

        assert!(resolver.resolve(7).is_none());
    }

    #[test]
    fn test_rejects_chain_without_certificates() {
        let le = tempfile::tempdir().unwrap();
        write_cert(le.path(), 1, "not a pem file\n");
        let resolver = FileCertificateResolver::new(le.path(), le.path().join("custom"));
        assert!(resolver.resolve(1).is_none());
    }

    #[test]
    fn test_closure_resolver() {
        let resolver = |id: u64| {
            (id == 9).then(|| ResolvedCertificate {
                id,
                provider: CertificateProvider::Custom,
                certificate_path: PathBuf::from("/certs/chain.pem"),
                key_path: PathBuf::from("/certs/key.pem"),
            })
        };
        assert!(resolver.resolve(9).is_some());
        assert!(resolver.resolve(1).is_none());
    }
}
