//! Connection tokens: portable trust material for site-to-site links
//!
//! An interior site exports one token: its CA certificate plus a fresh leaf
//! certificate/key signed by that CA, wrapped in a `v1/Secret` and written to
//! a YAML file. Any number of peers may import the same file; each import
//! registers a connector on the importing site that dials the exporting
//! site's router.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use k8s_openapi::api::core::v1::Secret;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

use crate::credentials::generate_leaf_secret;
use crate::pki::{subject_common_name, verify_signed_by};
use crate::platform::{
    secret_string, ConnectorCreateOptions, SecretClient, SitePlatform, CA_CERT_KEY, ROUTER_NAME,
    SITE_CA_NAME, TLS_CERT_KEY, TLS_KEY_KEY, TYPE_LABEL,
};
use crate::topology::Site;
use crate::{Error, Result};

/// [`TYPE_LABEL`] value on an exported token
pub const TOKEN_TYPE: &str = "connection-token";

/// [`TYPE_LABEL`] value on a token stored as a connector
pub const CONNECTOR_TYPE: &str = "connector";

/// Annotation carrying the exporting site's id
pub const SITE_ID_ANNOTATION: &str = "vanlink.io/site-id";

/// Annotation carrying the inter-router listener host
pub const INTER_ROUTER_HOST_ANNOTATION: &str = "vanlink.io/inter-router-host";

/// Annotation carrying the inter-router listener port
pub const INTER_ROUTER_PORT_ANNOTATION: &str = "vanlink.io/inter-router-port";

/// Annotation carrying the edge listener host
pub const EDGE_HOST_ANNOTATION: &str = "vanlink.io/edge-host";

/// Annotation carrying the edge listener port
pub const EDGE_PORT_ANNOTATION: &str = "vanlink.io/edge-port";

/// Annotation carrying a connector's routing cost
pub const COST_ANNOTATION: &str = "vanlink.io/cost";

/// Port interior routers accept inter-router links on
pub const INTER_ROUTER_PORT: u16 = 55671;

/// Port interior routers accept edge links on
pub const EDGE_PORT: u16 = 45671;

/// Address peers use to reach a site's router
pub fn router_host(site: &Site) -> String {
    if site.config.cluster_local {
        format!("{}.{}", ROUTER_NAME, site.namespace)
    } else {
        format!("{}.{}.svc.cluster.local", ROUTER_NAME, site.namespace)
    }
}

/// Default connector name for a link to `peer_site_id`
pub fn default_connector_name(peer_site_id: &str) -> String {
    format!("link-{}", peer_site_id)
}

/// A parsed and validated connection token
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectionToken {
    secret: Secret,
}

impl ConnectionToken {
    /// Wrap a token secret, checking it carries usable trust material
    pub fn new(secret: Secret) -> Result<Self> {
        let labels = secret.metadata.labels.clone().unwrap_or_default();
        if labels.get(TYPE_LABEL).map(String::as_str) != Some(TOKEN_TYPE) {
            return Err(Error::token(format!(
                "secret is not labelled {}={}",
                TYPE_LABEL, TOKEN_TYPE
            )));
        }

        let entry = |key: &str| {
            secret_string(&secret, key)
                .ok_or_else(|| Error::token(format!("token has no {} entry", key)))
        };
        let ca = entry(CA_CERT_KEY)?;
        let cert = entry(TLS_CERT_KEY)?;
        entry(TLS_KEY_KEY)?;

        if !verify_signed_by(&cert, &ca)? {
            return Err(Error::token("token certificate is not signed by its CA"));
        }

        let token = Self { secret };
        if token.site_id().is_none() {
            return Err(Error::token(format!(
                "token has no {} annotation",
                SITE_ID_ANNOTATION
            )));
        }
        Ok(token)
    }

    /// Parse a token from its YAML serialization
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let secret: Secret = serde_yaml::from_str(yaml)
            .map_err(|e| Error::token(format!("failed to parse token: {}", e)))?;
        Self::new(secret)
    }

    /// Serialize the token as YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(&self.secret)
            .map_err(|e| Error::serialization(format!("failed to serialize token: {}", e)))
    }

    /// Id of the site that exported this token
    pub fn site_id(&self) -> Option<&str> {
        self.annotation(SITE_ID_ANNOTATION)
    }

    /// Inter-router host the importing site should dial
    pub fn inter_router_host(&self) -> Option<&str> {
        self.annotation(INTER_ROUTER_HOST_ANNOTATION)
    }

    /// Common name of the token's leaf certificate
    pub fn subject(&self) -> Result<String> {
        let cert = secret_string(&self.secret, TLS_CERT_KEY)
            .ok_or_else(|| Error::token(format!("token has no {} entry", TLS_CERT_KEY)))?;
        Ok(subject_common_name(&cert)?)
    }

    /// The underlying secret
    pub fn secret(&self) -> &Secret {
        &self.secret
    }

    fn annotation(&self, key: &str) -> Option<&str> {
        self.secret
            .metadata
            .annotations
            .as_ref()?
            .get(key)
            .map(String::as_str)
    }

    /// Convert into the secret stored on the importing site
    fn into_connector_secret(self, name: &str, cost: u32) -> Secret {
        let mut secret = self.secret;
        secret.metadata.name = Some(name.to_string());
        secret.metadata.namespace = None;
        secret
            .metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert(TYPE_LABEL.to_string(), CONNECTOR_TYPE.to_string());
        secret
            .metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(COST_ANNOTATION.to_string(), cost.to_string());
        secret
    }
}

/// A token written to the filesystem
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenArtifact {
    /// Site that exported the token
    pub site_id: String,
    /// File holding the serialized token
    pub path: PathBuf,
}

impl TokenArtifact {
    /// Refer to an existing token file
    pub fn from_path(site_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            site_id: site_id.into(),
            path: path.into(),
        }
    }

    /// Read and validate the token file
    pub async fn read(&self) -> Result<ConnectionToken> {
        let yaml = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| Error::io(&self.path, e))?;
        ConnectionToken::from_yaml(&yaml)
    }
}

/// A connector registered on a site
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Connector {
    /// Site that dials out
    pub owner_site_id: String,
    /// Site the connector dials
    pub peer_site_id: String,
    /// Token file the connector was created from
    pub token_source: PathBuf,
    /// Connector name
    pub name: String,
    /// Routing cost
    pub cost: u32,
}

/// Exports and imports connection tokens
#[derive(Clone)]
pub struct TokenExchange {
    secrets: Arc<dyn SecretClient>,
    platform: Arc<dyn SitePlatform>,
    token_dir: PathBuf,
}

impl TokenExchange {
    /// Create an exchange writing token files under `token_dir`
    pub fn new(
        secrets: Arc<dyn SecretClient>,
        platform: Arc<dyn SitePlatform>,
        token_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            secrets,
            platform,
            token_dir: token_dir.into(),
        }
    }

    /// Directory token files are written to
    pub fn token_dir(&self) -> &Path {
        &self.token_dir
    }

    /// Serialize the site's CA and a fresh leaf into a token file
    ///
    /// The site must already own its CA secret. Only interior sites export;
    /// edge sites accept no inbound links.
    #[instrument(skip(self, site), fields(site = %site.id))]
    pub async fn export_token(&self, site: &Site) -> Result<TokenArtifact> {
        if site.is_edge() {
            return Err(Error::topology(format!(
                "edge site {} cannot export a connection token",
                site.id
            )));
        }

        let ca_secret = self
            .secrets
            .get_secret(&site.namespace, SITE_CA_NAME)
            .await
            .map_err(|e| Error::cert_authority(SITE_CA_NAME, "retrieve", e))?;

        let host = router_host(site);
        let mut secret = generate_leaf_secret(
            &default_connector_name(&site.id),
            ROUTER_NAME,
            &format!("{},{}", ROUTER_NAME, host),
            &ca_secret,
        )?;
        secret.metadata.labels = Some(BTreeMap::from([(
            TYPE_LABEL.to_string(),
            TOKEN_TYPE.to_string(),
        )]));
        secret.metadata.annotations = Some(BTreeMap::from([
            (SITE_ID_ANNOTATION.to_string(), site.id.clone()),
            (INTER_ROUTER_HOST_ANNOTATION.to_string(), host.clone()),
            (
                INTER_ROUTER_PORT_ANNOTATION.to_string(),
                INTER_ROUTER_PORT.to_string(),
            ),
            (EDGE_HOST_ANNOTATION.to_string(), host),
            (EDGE_PORT_ANNOTATION.to_string(), EDGE_PORT.to_string()),
        ]));
        let token = ConnectionToken::new(secret)?;

        tokio::fs::create_dir_all(&self.token_dir)
            .await
            .map_err(|e| Error::io(&self.token_dir, e))?;
        let path = self.token_dir.join(format!("{}-token.yaml", site.id));
        write_private(&path, token.to_yaml()?.as_bytes())
            .await
            .map_err(|e| Error::io(&path, e))?;

        info!(path = %path.display(), "exported connection token");
        Ok(TokenArtifact {
            site_id: site.id.clone(),
            path,
        })
    }

    /// Register a connector on `target` that dials the site in `artifact`
    ///
    /// An empty `name` defaults to `link-{peer}`.
    #[instrument(skip(self, artifact, target), fields(site = %target.id, peer = %artifact.site_id))]
    pub async fn import_token(
        &self,
        artifact: &TokenArtifact,
        target: &Site,
        name: &str,
        cost: u32,
    ) -> Result<Connector> {
        let token = artifact.read().await?;
        let subject = token.subject()?;
        debug!(%subject, "read connection token");
        let peer_site_id = token.site_id().unwrap_or_default().to_string();
        if peer_site_id == target.id {
            return Err(Error::topology(format!(
                "site {} cannot link to itself",
                target.id
            )));
        }

        let name = if name.is_empty() {
            default_connector_name(&peer_site_id)
        } else {
            name.to_string()
        };
        let options = ConnectorCreateOptions {
            namespace: target.namespace.clone(),
            name: name.clone(),
            cost,
        };
        let secret = token.into_connector_secret(&name, cost);
        self.platform.create_connector(&options, &secret).await?;

        info!(connector = %name, cost, "created connector");
        Ok(Connector {
            owner_site_id: target.id.clone(),
            peer_site_id,
            token_source: artifact.path.clone(),
            name,
            cost,
        })
    }
}

/// Write `contents` to `path`, readable by the owner only
async fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);
    let mut file = options.open(path).await?;
    // mode only applies to newly created files
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))
            .await?;
    }
    file.write_all(contents).await?;
    file.flush().await
}
