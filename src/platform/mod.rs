//! Platform seams consumed by the core
//!
//! Everything that touches cluster state goes through two traits:
//! [`SecretClient`] for secret CRUD and [`SitePlatform`] for namespaces,
//! site configuration, routers, connectors and router inspection. The core
//! never talks to a cluster client directly, so provisioning and convergence
//! logic can be exercised against mocks or the in-memory [`memory`] platform.

pub mod cluster;
pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use serde::{Deserialize, Serialize};

#[cfg(test)]
use mockall::automock;

use crate::Result;

/// Label recording which kind of credential a secret holds
pub const KIND_LABEL: &str = "vanlink.io/kind";

/// Label marking token and connector secrets
pub const TYPE_LABEL: &str = "vanlink.io/type";

/// Data key for the CA certificate inside leaf and token secrets
pub const CA_CERT_KEY: &str = "ca.crt";

/// Data key for a certificate
pub const TLS_CERT_KEY: &str = "tls.crt";

/// Data key for a private key
pub const TLS_KEY_KEY: &str = "tls.key";

/// Data key for the embedded connect descriptor
pub const CONNECT_JSON_KEY: &str = "connect.json";

/// Name of the CA every site owns for its inter-router listener
pub const SITE_CA_NAME: &str = "vanlink-site-ca";

/// Name of the router deployment and its service
pub const ROUTER_NAME: &str = "vanlink-router";

/// Name of the stored site configuration
pub const SITE_CONFIG_NAME: &str = "vanlink-site";

/// Kind of material a secret carries
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SecretKind {
    /// Self-signed CA certificate and key
    Ca,
    /// Certificate and key signed by a CA secret
    Leaf,
    /// Caller-supplied data with no cryptographic material
    Opaque,
}

impl SecretKind {
    /// Value stored under [`KIND_LABEL`]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ca => "ca",
            Self::Leaf => "leaf",
            Self::Opaque => "opaque",
        }
    }

    /// Kubernetes secret type for this kind
    pub fn secret_type(&self) -> &'static str {
        match self {
            Self::Ca | Self::Leaf => "kubernetes.io/tls",
            Self::Opaque => "Opaque",
        }
    }

    /// Read the kind back from a secret's labels
    pub fn of(secret: &Secret) -> Option<Self> {
        let value = secret.metadata.labels.as_ref()?.get(KIND_LABEL)?;
        match value.as_str() {
            "ca" => Some(Self::Ca),
            "leaf" => Some(Self::Leaf),
            "opaque" => Some(Self::Opaque),
            _ => None,
        }
    }
}

/// Console authentication mode passed to the router bootstrap
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// No console authentication
    #[default]
    Unsecured,
    /// Username/password from the site config
    Internal,
    /// Delegated to the OpenShift OAuth proxy
    Openshift,
}

/// Site configuration consumed by the router bootstrap
///
/// The core only sets `namespace` and `is_edge`; everything else is passed
/// through untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SiteConfigSpec {
    /// Site name advertised to peers (empty = namespace name)
    pub site_name: String,
    /// Namespace the site lives in
    pub namespace: String,
    /// Whether the router runs in edge mode
    pub is_edge: bool,
    /// Deploy the service controller
    pub enable_controller: bool,
    /// Synchronize services across the network
    pub enable_service_sync: bool,
    /// Deploy the console
    pub enable_console: bool,
    /// Console authentication mode
    pub auth_mode: AuthMode,
    /// Console user for [`AuthMode::Internal`]
    pub user: String,
    /// Console password for [`AuthMode::Internal`]
    pub password: String,
    /// Only expose the router inside the cluster
    pub cluster_local: bool,
    /// Router replica count
    pub replicas: i32,
}

/// A site configuration as stored by the platform
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteConfig {
    /// Name of the stored configuration object
    pub name: String,
    /// Namespace of the site
    pub namespace: String,
    /// The configuration itself
    pub spec: SiteConfigSpec,
}

/// Input for creating a connector
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectorCreateOptions {
    /// Namespace of the site that dials out
    pub namespace: String,
    /// Connector name
    pub name: String,
    /// Routing cost (0 = default/cheapest)
    pub cost: u32,
}

/// Connected-site counts reported by a router
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedSites {
    /// All reachable sites
    pub total: u32,
    /// Sites reachable over one hop
    pub direct: u32,
    /// Sites reachable only through an intermediary
    pub indirect: u32,
}

impl ConnectedSites {
    /// Build a snapshot from direct/indirect counts
    pub fn new(direct: u32, indirect: u32) -> Self {
        Self {
            total: direct + indirect,
            direct,
            indirect,
        }
    }
}

/// Router inspection result
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterStatus {
    /// Connected-site counts
    pub connected_sites: ConnectedSites,
}

/// Secret CRUD against the platform
///
/// Implementations must report a missing object as
/// [`Error::NotFound`](crate::Error::NotFound) and a create conflict as
/// [`Error::AlreadyExists`](crate::Error::AlreadyExists).
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretClient: Send + Sync {
    /// Fetch a secret by name
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret>;

    /// Create a secret; fails with `AlreadyExists` if the name is taken
    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret>;

    /// Delete a secret; fails with `NotFound` if it is absent
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()>;
}

/// Site lifecycle operations against the platform
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SitePlatform: Send + Sync {
    /// Create a namespace
    async fn create_namespace(&self, namespace: &str) -> Result<()>;

    /// Delete a namespace and everything in it
    async fn delete_namespace(&self, namespace: &str) -> Result<()>;

    /// Store the site configuration for a namespace
    async fn create_site_config(&self, spec: &SiteConfigSpec) -> Result<SiteConfig>;

    /// Start the router described by a stored site configuration
    async fn create_router(&self, config: &SiteConfig) -> Result<()>;

    /// Register a connector that dials the identity in `token`
    async fn create_connector(&self, options: &ConnectorCreateOptions, token: &Secret)
        -> Result<()>;

    /// Inspect the router in a namespace
    async fn router_status(&self, namespace: &str) -> Result<RouterStatus>;
}

/// Labels for a secret of the given kind
pub fn kind_labels(kind: SecretKind) -> BTreeMap<String, String> {
    BTreeMap::from([(KIND_LABEL.to_string(), kind.label().to_string())])
}

/// Read a UTF-8 data entry from a secret
pub fn secret_string(secret: &Secret, key: &str) -> Option<String> {
    let bytes = secret.data.as_ref()?.get(key)?;
    String::from_utf8(bytes.0.clone()).ok()
}
