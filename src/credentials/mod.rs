//! Credential store: CA and leaf secret provisioning
//!
//! CA secrets are get-or-create: an existing secret is authoritative and is
//! returned untouched. Leaf and opaque credentials are create-only; a name
//! conflict is handled according to [`ConflictPolicy`]. Nothing here retries,
//! every failure is returned to the caller with the entity name attached.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::ByteString;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use crate::pki::{CertificateAuthority, PkiError};
use crate::platform::{
    kind_labels, secret_string, SecretClient, SecretKind, CA_CERT_KEY, CONNECT_JSON_KEY,
    TLS_CERT_KEY, TLS_KEY_KEY,
};
use crate::{Error, Result};

/// Host advertised in the embedded connect descriptor
pub const MESSAGING_HOST: &str = "vanlink-messaging";

/// Port advertised in the embedded connect descriptor
pub const MESSAGING_PORT: &str = "5671";

/// A certificate authority to provision
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertAuthority {
    /// Secret name, unique within a namespace
    pub name: String,
}

impl CertAuthority {
    /// Create a CA description
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A credential to issue
///
/// With `ca` set, the credential is a leaf certificate signed by that CA
/// secret. Without it, the secret is built from `data` verbatim.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Credential {
    /// Secret name
    pub name: String,
    /// Name of the CA secret that signs this credential
    pub ca: Option<String>,
    /// Certificate subject (common name)
    pub subject: String,
    /// Subject alternative names
    pub hosts: Vec<String>,
    /// Data for an opaque secret
    pub data: Option<BTreeMap<String, Vec<u8>>>,
    /// Embed a connect descriptor under `connect.json`
    pub connect_json: bool,
}

impl Credential {
    /// A leaf credential signed by `ca`
    pub fn leaf(
        name: impl Into<String>,
        ca: impl Into<String>,
        subject: impl Into<String>,
        hosts: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            ca: Some(ca.into()),
            subject: subject.into(),
            hosts,
            ..Default::default()
        }
    }

    /// An opaque credential carrying caller-supplied data
    pub fn opaque(name: impl Into<String>, data: BTreeMap<String, Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: Some(data),
            ..Default::default()
        }
    }

    fn ca_ref(&self) -> Option<&str> {
        self.ca.as_deref().filter(|ca| !ca.is_empty())
    }
}

/// What [`CredentialStore::issue_credential`] does when the secret already exists
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Log and return the already-exists error
    #[default]
    Fail,
    /// Log and return the stored secret unchanged
    ReturnExisting,
}

/// Idempotent CA and credential provisioning on top of a [`SecretClient`]
#[derive(Clone)]
pub struct CredentialStore {
    client: Arc<dyn SecretClient>,
    conflict_policy: ConflictPolicy,
}

impl CredentialStore {
    /// Create a store that fails on credential name conflicts
    pub fn new(client: Arc<dyn SecretClient>) -> Self {
        Self {
            client,
            conflict_policy: ConflictPolicy::default(),
        }
    }

    /// Override the conflict policy
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Return the CA secret named `ca.name`, creating it if it does not exist
    ///
    /// Only a not-found response leads to creation. Any other lookup failure
    /// is returned wrapped with the CA name.
    #[instrument(skip(self, ca, owner), fields(ca = %ca.name))]
    pub async fn ensure_cert_authority(
        &self,
        ca: &CertAuthority,
        owner: Option<&OwnerReference>,
        namespace: &str,
    ) -> Result<Secret> {
        match self.client.get_secret(namespace, &ca.name).await {
            Ok(existing) => {
                debug!("CA already exists");
                Ok(existing)
            }
            Err(e) if e.is_not_found() => {
                let mut secret = generate_ca_secret(&ca.name, &ca.name)?;
                attach_owner(&mut secret, owner);
                let created = self
                    .client
                    .create_secret(namespace, &secret)
                    .await
                    .map_err(|e| Error::cert_authority(&ca.name, "create", e))?;
                info!("created CA");
                Ok(created)
            }
            Err(e) => Err(Error::cert_authority(&ca.name, "check", e)),
        }
    }

    /// Create a leaf or opaque credential secret
    #[instrument(skip(self, cred, owner), fields(credential = %cred.name))]
    pub async fn issue_credential(
        &self,
        cred: &Credential,
        owner: Option<&OwnerReference>,
        namespace: &str,
    ) -> Result<Secret> {
        let mut secret = match cred.ca_ref() {
            Some(ca_name) => {
                let ca_secret = self
                    .client
                    .get_secret(namespace, ca_name)
                    .await
                    .map_err(|e| Error::cert_authority(ca_name, "retrieve", e))?;
                let mut secret = generate_leaf_secret(
                    &cred.name,
                    &cred.subject,
                    &cred.hosts.join(","),
                    &ca_secret,
                )
                .map_err(|e| Error::credential(&cred.name, "create", e))?;
                if cred.connect_json {
                    secret
                        .data
                        .get_or_insert_with(BTreeMap::new)
                        .insert(CONNECT_JSON_KEY.to_string(), ByteString(connect_descriptor()));
                }
                secret
            }
            None => opaque_secret(&cred.name, cred.data.clone().unwrap_or_default()),
        };
        attach_owner(&mut secret, owner);

        match self.client.create_secret(namespace, &secret).await {
            Ok(created) => {
                info!("created credential");
                Ok(created)
            }
            Err(e) if e.is_already_exists() => {
                warn!(policy = ?self.conflict_policy, "credential secret already exists");
                match self.conflict_policy {
                    ConflictPolicy::Fail => Err(e),
                    ConflictPolicy::ReturnExisting => self
                        .client
                        .get_secret(namespace, &cred.name)
                        .await
                        .map_err(|e| Error::credential(&cred.name, "retrieve", e)),
                }
            }
            Err(e) => {
                error!(error = %e, "could not create credential secret");
                Err(Error::credential(&cred.name, "create", e))
            }
        }
    }

    /// Delete a credential secret
    ///
    /// Deleting a secret that does not exist is an error so callers can
    /// detect drift.
    #[instrument(skip(self))]
    pub async fn delete_credential(&self, name: &str, namespace: &str) -> Result<()> {
        self.client
            .delete_secret(namespace, name)
            .await
            .map_err(|e| Error::credential(name, "delete", e))?;
        info!("deleted credential");
        Ok(())
    }
}

fn attach_owner(secret: &mut Secret, owner: Option<&OwnerReference>) {
    if let Some(owner) = owner {
        secret.metadata.owner_references = Some(vec![owner.clone()]);
    }
}

fn secret_with(name: &str, kind: SecretKind, data: BTreeMap<String, ByteString>) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(kind_labels(kind)),
            ..Default::default()
        },
        type_: Some(kind.secret_type().to_string()),
        data: Some(data),
        ..Default::default()
    }
}

fn pem_entry(key: &str, pem: &str) -> (String, ByteString) {
    (key.to_string(), ByteString(pem.as_bytes().to_vec()))
}

/// Generate a self-signed CA secret
pub fn generate_ca_secret(name: &str, common_name: &str) -> Result<Secret> {
    let ca = CertificateAuthority::new(common_name)?;
    Ok(secret_with(
        name,
        SecretKind::Ca,
        BTreeMap::from([
            pem_entry(TLS_CERT_KEY, ca.ca_cert_pem()),
            pem_entry(TLS_KEY_KEY, ca.ca_key_pem()),
        ]),
    ))
}

/// Load the signing CA out of a CA secret
pub fn load_ca(ca_secret: &Secret) -> Result<CertificateAuthority> {
    let ca_name = ca_secret.metadata.name.clone().unwrap_or_default();
    let missing = |key: &str| {
        Error::Pki(PkiError::ParseError(format!(
            "CA secret {} has no {}",
            ca_name, key
        )))
    };
    let cert = secret_string(ca_secret, TLS_CERT_KEY).ok_or_else(|| missing(TLS_CERT_KEY))?;
    let key = secret_string(ca_secret, TLS_KEY_KEY).ok_or_else(|| missing(TLS_KEY_KEY))?;
    Ok(CertificateAuthority::from_pem(&cert, &key)?)
}

/// Generate a leaf secret signed by the CA held in `ca_secret`
///
/// `hosts` is a comma-joined SAN list.
pub fn generate_leaf_secret(
    name: &str,
    subject: &str,
    hosts: &str,
    ca_secret: &Secret,
) -> Result<Secret> {
    let ca = load_ca(ca_secret)?;
    let leaf = ca.issue(subject, hosts)?;
    Ok(secret_with(
        name,
        SecretKind::Leaf,
        BTreeMap::from([
            pem_entry(CA_CERT_KEY, ca.ca_cert_pem()),
            pem_entry(TLS_CERT_KEY, &leaf.cert_pem),
            pem_entry(TLS_KEY_KEY, &leaf.key_pem),
        ]),
    ))
}

fn opaque_secret(name: &str, data: BTreeMap<String, Vec<u8>>) -> Secret {
    secret_with(
        name,
        SecretKind::Opaque,
        data.into_iter().map(|(k, v)| (k, ByteString(v))).collect(),
    )
}

/// Connect descriptor pointing a client at the site's messaging endpoint
pub fn connect_descriptor() -> Vec<u8> {
    let descriptor = json!({
        "scheme": "amqps",
        "host": MESSAGING_HOST,
        "port": MESSAGING_PORT,
        "tls": {
            "ca": "/etc/messaging/ca.crt",
            "cert": "/etc/messaging/tls.crt",
            "key": "/etc/messaging/tls.key",
            "verify": true,
        }
    });
    descriptor.to_string().into_bytes()
}
