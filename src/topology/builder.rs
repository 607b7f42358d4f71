//! Realizes a [`TopologySpec`] on the platform
//!
//! Interior sites are provisioned first and each exports exactly one token.
//! Edge sites follow, then every link imports its target's token. The
//! sequence is fail-fast: the first error aborts the run and nothing is
//! rolled back here, cleanup belongs to [`Teardown`](super::Teardown).

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, instrument};

use super::{Site, TopologySpec};
use crate::credentials::{CertAuthority, CredentialStore};
use crate::platform::{SiteConfig, SitePlatform, SITE_CA_NAME};
use crate::token::{Connector, TokenArtifact, TokenExchange};
use crate::{Error, Result};

/// What a successful build produced
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProvisionedTopology {
    /// One token per interior site, keyed by site id
    pub tokens: BTreeMap<String, TokenArtifact>,
    /// Connectors in link order
    pub connectors: Vec<Connector>,
}

/// Drives per-site provisioning and link wiring
pub struct TopologyBuilder {
    platform: Arc<dyn SitePlatform>,
    credentials: CredentialStore,
    exchange: TokenExchange,
}

impl TopologyBuilder {
    /// Create a builder from its collaborators
    pub fn new(
        platform: Arc<dyn SitePlatform>,
        credentials: CredentialStore,
        exchange: TokenExchange,
    ) -> Self {
        Self {
            platform,
            credentials,
            exchange,
        }
    }

    /// Provision every site and link in `spec`
    #[instrument(skip_all, fields(sites = spec.sites.len(), links = spec.links.len()))]
    pub async fn build(&self, spec: &TopologySpec) -> Result<ProvisionedTopology> {
        spec.validate()?;
        let mut provisioned = ProvisionedTopology::default();

        for site in spec.interior_sites() {
            self.provision_site(site).await?;
            let artifact = self.exchange.export_token(site).await?;
            provisioned.tokens.insert(site.id.clone(), artifact);
        }

        for site in spec.edge_sites() {
            self.provision_site(site).await?;
        }

        for link in &spec.links {
            let from = spec
                .site(&link.from)
                .ok_or_else(|| Error::topology(format!("unknown site {}", link.from)))?;
            let artifact = provisioned.tokens.get(&link.to).ok_or_else(|| {
                Error::topology(format!("site {} exported no token", link.to))
            })?;
            let connector = self
                .exchange
                .import_token(artifact, from, "", link.cost)
                .await?;
            provisioned.connectors.push(connector);
        }

        info!(
            tokens = provisioned.tokens.len(),
            connectors = provisioned.connectors.len(),
            "topology provisioned"
        );
        Ok(provisioned)
    }

    /// Namespace, site configuration, CA (interior only) and router
    #[instrument(skip_all, fields(site = %site.id, namespace = %site.namespace))]
    async fn provision_site(&self, site: &Site) -> Result<SiteConfig> {
        self.platform.create_namespace(&site.namespace).await?;

        let mut spec = site.config.clone();
        spec.namespace = site.namespace.clone();
        spec.is_edge = site.is_edge();
        let config = self.platform.create_site_config(&spec).await?;

        if !site.is_edge() {
            self.credentials
                .ensure_cert_authority(&CertAuthority::new(SITE_CA_NAME), None, &site.namespace)
                .await?;
        }

        self.platform.create_router(&config).await?;
        info!(edge = site.is_edge(), "site provisioned");
        Ok(config)
    }
}
