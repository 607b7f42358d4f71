//! Certificate generation for site-to-site mTLS
//!
//! Every site owns a self-signed CA. Leaf certificates are issued by that CA
//! for a subject and host list and are handed to peer sites inside
//! connection tokens. The rest of the crate treats this module as the
//! certificate-signing collaborator: it only ever sees PEM strings.

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue, IsCa, Issuer,
    KeyPair, KeyUsagePurpose,
};
use thiserror::Error;
use x509_parser::prelude::*;

/// PKI errors
#[derive(Debug, Error)]
pub enum PkiError {
    /// Certificate generation failed
    #[error("certificate generation failed: {0}")]
    CertificateGenerationFailed(String),

    /// Key generation failed
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// Certificate parsing error
    #[error("certificate parsing error: {0}")]
    ParseError(String),
}

/// Result type for PKI operations
pub type Result<T> = std::result::Result<T, PkiError>;

const ORGANIZATION: &str = "vanlink";

/// Parse PEM-encoded data and return the DER bytes
pub fn parse_pem(pem_data: &str) -> Result<Vec<u8>> {
    let pem_obj = ::pem::parse(pem_data.as_bytes())
        .map_err(|e| PkiError::ParseError(format!("failed to parse PEM: {}", e)))?;
    Ok(pem_obj.contents().to_vec())
}

fn distinguished_name(common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(
        DnType::CommonName,
        DnValue::Utf8String(common_name.to_string()),
    );
    dn.push(
        DnType::OrganizationName,
        DnValue::Utf8String(ORGANIZATION.to_string()),
    );
    dn
}

/// Split a comma-joined host list into SAN entries
pub fn split_hosts(hosts: &str) -> Vec<String> {
    hosts
        .split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .collect()
}

/// A self-signed certificate authority
pub struct CertificateAuthority {
    /// CA key pair serialized as PEM (KeyPair isn't Clone)
    ca_key_pem: String,
    /// PEM-encoded CA certificate
    ca_cert_pem: String,
}

impl CertificateAuthority {
    /// Create a new self-signed CA
    pub fn new(common_name: &str) -> Result<Self> {
        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name(common_name);

        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];

        // 10 year validity
        params.not_before = rcgen::date_time_ymd(2025, 1, 1);
        params.not_after = rcgen::date_time_ymd(2035, 1, 1);

        let key_pair = KeyPair::generate().map_err(|e| {
            PkiError::KeyGenerationFailed(format!("failed to generate CA key: {}", e))
        })?;

        let cert = params.self_signed(&key_pair).map_err(|e| {
            PkiError::CertificateGenerationFailed(format!("failed to create CA cert: {}", e))
        })?;

        Ok(Self {
            ca_key_pem: key_pair.serialize_pem(),
            ca_cert_pem: cert.pem(),
        })
    }

    /// Load CA from stored PEM material
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self> {
        let _ = KeyPair::from_pem(key_pem)
            .map_err(|e| PkiError::ParseError(format!("failed to parse CA key: {}", e)))?;
        let _ = parse_pem(cert_pem)?;

        Ok(Self {
            ca_key_pem: key_pem.to_string(),
            ca_cert_pem: cert_pem.to_string(),
        })
    }

    /// CA certificate in PEM format
    pub fn ca_cert_pem(&self) -> &str {
        &self.ca_cert_pem
    }

    /// CA private key in PEM format
    pub fn ca_key_pem(&self) -> &str {
        &self.ca_key_pem
    }

    fn load_key_pair(&self) -> Result<KeyPair> {
        KeyPair::from_pem(&self.ca_key_pem)
            .map_err(|e| PkiError::ParseError(format!("failed to load CA key: {}", e)))
    }

    /// Issue a leaf certificate for `subject` covering a comma-joined host list
    ///
    /// The leaf is usable for both ends of an inter-router link, so it carries
    /// client and server auth.
    pub fn issue(&self, subject: &str, hosts: &str) -> Result<LeafCertificate> {
        let mut params = CertificateParams::new(split_hosts(hosts)).map_err(|e| {
            PkiError::CertificateGenerationFailed(format!("invalid host list {:?}: {}", hosts, e))
        })?;
        params.distinguished_name = distinguished_name(subject);
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![
            rcgen::ExtendedKeyUsagePurpose::ClientAuth,
            rcgen::ExtendedKeyUsagePurpose::ServerAuth,
        ];

        // 5 year validity
        params.not_before = rcgen::date_time_ymd(2025, 1, 1);
        params.not_after = rcgen::date_time_ymd(2030, 1, 1);

        let key_pair = KeyPair::generate().map_err(|e| {
            PkiError::KeyGenerationFailed(format!("failed to generate leaf key: {}", e))
        })?;

        let ca_key = self.load_key_pair()?;
        let issuer = Issuer::from_ca_cert_pem(&self.ca_cert_pem, &ca_key)
            .map_err(|e| PkiError::ParseError(format!("failed to create issuer: {}", e)))?;

        let cert = params.signed_by(&key_pair, &issuer).map_err(|e| {
            PkiError::CertificateGenerationFailed(format!("failed to sign certificate: {}", e))
        })?;

        Ok(LeafCertificate {
            cert_pem: cert.pem(),
            key_pem: key_pair.serialize_pem(),
        })
    }
}

/// A CA-signed certificate together with its private key
#[derive(Clone)]
pub struct LeafCertificate {
    /// PEM-encoded certificate
    pub cert_pem: String,
    /// PEM-encoded private key
    pub key_pem: String,
}

impl std::fmt::Debug for LeafCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeafCertificate")
            .field("cert_pem", &self.cert_pem)
            .finish_non_exhaustive()
    }
}

/// Check that a PEM certificate was signed by the given CA
///
/// Returns `Ok(false)` on a signature mismatch and `Err` only when either
/// input cannot be parsed.
pub fn verify_signed_by(cert_pem: &str, ca_cert_pem: &str) -> Result<bool> {
    let cert_der = parse_pem(cert_pem)?;
    let (_, cert) = X509Certificate::from_der(&cert_der)
        .map_err(|e| PkiError::ParseError(format!("failed to parse certificate: {}", e)))?;

    let ca_der = parse_pem(ca_cert_pem)?;
    let (_, ca_cert) = X509Certificate::from_der(&ca_der)
        .map_err(|e| PkiError::ParseError(format!("failed to parse CA cert: {}", e)))?;

    Ok(cert.verify_signature(Some(ca_cert.public_key())).is_ok())
}

/// Common name of a PEM certificate's subject
pub fn subject_common_name(cert_pem: &str) -> Result<String> {
    let der = parse_pem(cert_pem)?;
    let (_, cert) = X509Certificate::from_der(&der)
        .map_err(|e| PkiError::ParseError(format!("failed to parse certificate: {}", e)))?;
    let cn = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or_default();
    Ok(cn.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ca_can_be_created() {
        let ca = CertificateAuthority::new("site-ca").unwrap();
        assert!(ca.ca_cert_pem().contains("BEGIN CERTIFICATE"));
        assert!(ca.ca_key_pem().contains("PRIVATE KEY"));
        assert_eq!(subject_common_name(ca.ca_cert_pem()).unwrap(), "site-ca");
    }

    #[test]
    fn leaf_is_signed_by_its_ca() {
        let ca = CertificateAuthority::new("site-ca").unwrap();
        let leaf = ca
            .issue("vanlink-router", "vanlink-router,vanlink-router.public-1")
            .unwrap();

        assert!(verify_signed_by(&leaf.cert_pem, ca.ca_cert_pem()).unwrap());
        assert_eq!(
            subject_common_name(&leaf.cert_pem).unwrap(),
            "vanlink-router"
        );
    }

    #[test]
    fn leaf_from_other_ca_is_rejected() {
        let ours = CertificateAuthority::new("ours").unwrap();
        let theirs = CertificateAuthority::new("theirs").unwrap();
        let leaf = theirs.issue("intruder", "intruder").unwrap();

        assert!(!verify_signed_by(&leaf.cert_pem, ours.ca_cert_pem()).unwrap());
    }

    #[test]
    fn restored_ca_keeps_signing() {
        let original = CertificateAuthority::new("persistent").unwrap();
        let restored =
            CertificateAuthority::from_pem(original.ca_cert_pem(), original.ca_key_pem()).unwrap();

        let leaf = restored.issue("after-restart", "a.example").unwrap();
        assert!(verify_signed_by(&leaf.cert_pem, original.ca_cert_pem()).unwrap());
    }

    #[test]
    fn corrupted_ca_material_is_rejected() {
        let good = CertificateAuthority::new("good").unwrap();
        assert!(CertificateAuthority::from_pem(good.ca_cert_pem(), "invalid key pem").is_err());
        assert!(CertificateAuthority::from_pem("invalid cert pem", good.ca_key_pem()).is_err());
    }

    #[test]
    fn host_list_is_split_and_trimmed() {
        assert_eq!(
            split_hosts("a, b.example ,,c"),
            vec!["a".to_string(), "b.example".to_string(), "c".to_string()]
        );
        assert!(split_hosts("").is_empty());
    }

    #[test]
    fn pem_parsing_errors_are_reported() {
        match parse_pem("this is not valid PEM data at all") {
            Err(PkiError::ParseError(msg)) => assert!(msg.contains("parse PEM")),
            _ => panic!("Expected ParseError"),
        }
    }

    #[test]
    fn leaf_debug_hides_private_key() {
        let ca = CertificateAuthority::new("debug-ca").unwrap();
        let leaf = ca.issue("leaf", "leaf").unwrap();
        assert!(!format!("{:?}", leaf).contains("PRIVATE KEY"));
    }
}
