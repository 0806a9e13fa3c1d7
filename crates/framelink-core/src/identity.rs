//! Certificate identities and PEM loading.

use std::{fmt, fs, io::BufReader, path::Path};

use rustls::pki_types::{
    CertificateDer, CertificateRevocationListDer, PrivateKeyDer, PrivatePkcs8KeyDer,
};

use crate::error::ConfigError;

/// A certificate chain plus the private key for its leaf.
pub struct CertificateIdentity {
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

impl CertificateIdentity {
    /// Build from DER values. The chain is leaf first.
    ///
    /// # Errors
    ///
    /// [`ConfigError::NoCertificates`] if `chain` is empty.
    pub fn from_der(
        chain: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
    ) -> Result<Self, ConfigError> {
        if chain.is_empty() {
            return Err(ConfigError::NoCertificates("certificate chain".into()));
        }
        Ok(Self { chain, key })
    }

    /// Parse a PEM certificate chain and a PEM private key.
    ///
    /// # Errors
    ///
    /// [`ConfigError::NoCertificates`] or [`ConfigError::NoPrivateKey`] when
    /// the input holds no usable item.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, ConfigError> {
        let chain = parse_certificates(cert_pem, "certificate PEM")?;
        let key = parse_private_key(key_pem, "key PEM")?;
        Ok(Self { chain, key })
    }

    /// Load a PEM certificate chain and private key from disk.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if a file cannot be read, otherwise as
    /// [`CertificateIdentity::from_pem`].
    pub fn from_pem_files(
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> Result<Self, ConfigError> {
        let cert_path = cert_path.as_ref();
        let key_path = key_path.as_ref();

        let chain = parse_certificates(&read_file(cert_path)?, &cert_path.display().to_string())?;
        let key = parse_private_key(&read_file(key_path)?, &key_path.display().to_string())?;
        Ok(Self { chain, key })
    }

    /// Generate a self-signed certificate valid for `names`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::SelfSigned`] if a name is not a valid DNS name or IP
    /// address.
    pub fn self_signed(names: impl Into<Vec<String>>) -> Result<Self, ConfigError> {
        let generated = rcgen::generate_simple_self_signed(names)?;
        let key =
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(generated.key_pair.serialize_der()));
        Ok(Self { chain: vec![generated.cert.der().clone()], key })
    }

    /// Certificate chain, leaf first.
    #[must_use]
    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }

    /// Leaf certificate.
    #[must_use]
    pub fn end_entity(&self) -> Option<&CertificateDer<'static>> {
        self.chain.first()
    }

    /// Private key of the leaf.
    #[must_use]
    pub fn key(&self) -> &PrivateKeyDer<'static> {
        &self.key
    }

    /// Owned chain and key, as rustls builders want them.
    #[must_use]
    pub fn to_parts(&self) -> (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>) {
        (self.chain.clone(), self.key.clone_key())
    }
}

impl Clone for CertificateIdentity {
    fn clone(&self) -> Self {
        Self { chain: self.chain.clone(), key: self.key.clone_key() }
    }
}

impl fmt::Debug for CertificateIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateIdentity")
            .field("chain", &self.chain.len())
            .finish_non_exhaustive()
    }
}

/// Load every certificate in a PEM file, e.g. a trust anchor bundle.
///
/// # Errors
///
/// [`ConfigError::Io`] or [`ConfigError::NoCertificates`].
pub fn load_certificates(
    path: impl AsRef<Path>,
) -> Result<Vec<CertificateDer<'static>>, ConfigError> {
    let path = path.as_ref();
    parse_certificates(&read_file(path)?, &path.display().to_string())
}

/// Load every certificate revocation list in a PEM file.
///
/// # Errors
///
/// [`ConfigError::Io`] if the file cannot be read or holds a malformed item.
pub fn load_revocation_lists(
    path: impl AsRef<Path>,
) -> Result<Vec<CertificateRevocationListDer<'static>>, ConfigError> {
    let path = path.as_ref();
    let pem = read_file(path)?;
    rustls_pemfile::crls(&mut BufReader::new(pem.as_slice()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| ConfigError::Io { path: path.display().to_string(), source })
}

fn read_file(path: &Path) -> Result<Vec<u8>, ConfigError> {
    fs::read(path).map_err(|source| ConfigError::Io { path: path.display().to_string(), source })
}

fn parse_certificates(
    pem: &[u8],
    origin: &str,
) -> Result<Vec<CertificateDer<'static>>, ConfigError> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(pem))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| ConfigError::Io { path: origin.to_owned(), source })?;

    if certs.is_empty() {
        return Err(ConfigError::NoCertificates(origin.to_owned()));
    }
    Ok(certs)
}

fn parse_private_key(pem: &[u8], origin: &str) -> Result<PrivateKeyDer<'static>, ConfigError> {
    rustls_pemfile::private_key(&mut BufReader::new(pem))
        .map_err(|source| ConfigError::Io { path: origin.to_owned(), source })?
        .ok_or_else(|| ConfigError::NoPrivateKey(origin.to_owned()))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn pem_pair() -> (String, String) {
        let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_owned()]).unwrap();
        (generated.cert.pem(), generated.key_pair.serialize_pem())
    }

    #[test]
    fn self_signed_has_one_certificate() {
        let identity = CertificateIdentity::self_signed(vec!["localhost".to_owned()]).unwrap();
        assert_eq!(identity.chain().len(), 1);
        assert!(identity.end_entity().is_some());
        assert!(matches!(identity.key(), PrivateKeyDer::Pkcs8(_)));
    }

    #[test]
    fn parses_pem_pair() {
        let (cert, key) = pem_pair();
        let identity = CertificateIdentity::from_pem(cert.as_bytes(), key.as_bytes()).unwrap();
        assert_eq!(identity.chain().len(), 1);

        let copy = identity.clone();
        assert_eq!(copy.chain(), identity.chain());
    }

    #[test]
    fn loads_pem_files() {
        let (cert, key) = pem_pair();
        let mut cert_file = tempfile::NamedTempFile::new().unwrap();
        let mut key_file = tempfile::NamedTempFile::new().unwrap();
        cert_file.write_all(cert.as_bytes()).unwrap();
        key_file.write_all(key.as_bytes()).unwrap();

        let identity =
            CertificateIdentity::from_pem_files(cert_file.path(), key_file.path()).unwrap();
        assert_eq!(identity.chain().len(), 1);
        assert_eq!(load_certificates(cert_file.path()).unwrap().len(), 1);
    }

    #[test]
    fn missing_items_are_reported() {
        let (cert, key) = pem_pair();

        let err = CertificateIdentity::from_pem(key.as_bytes(), key.as_bytes()).unwrap_err();
        assert!(matches!(err, ConfigError::NoCertificates(_)));

        let err = CertificateIdentity::from_pem(cert.as_bytes(), cert.as_bytes()).unwrap_err();
        assert!(matches!(err, ConfigError::NoPrivateKey(_)));

        let err = CertificateIdentity::from_der(Vec::new(), PrivateKeyDer::Pkcs8(Vec::new().into()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::NoCertificates(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err =
            CertificateIdentity::from_pem_files("/nonexistent/cert.pem", "/nonexistent/key.pem")
                .unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
