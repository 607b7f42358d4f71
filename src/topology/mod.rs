//! Declared multi-site topologies
//!
//! A [`TopologySpec`] lists sites and the directed links between them. A
//! link `from -> to` means `from` dials `to` using the token `to` exported,
//! so `to` must be an interior site.

pub mod builder;
pub mod teardown;

use std::collections::HashSet;

use crate::platform::SiteConfigSpec;
use crate::{Error, Result};

pub use builder::{ProvisionedTopology, TopologyBuilder};
pub use teardown::Teardown;

/// Whether a site accepts inbound links
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SiteRole {
    /// Accepts inbound links and exports a token
    #[default]
    Interior,
    /// Only originates links
    Edge,
}

/// A site in a topology
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Site {
    /// Unique site id
    pub id: String,
    /// Namespace the site is provisioned in
    pub namespace: String,
    /// Interior or edge
    pub role: SiteRole,
    /// Configuration passed through to the router bootstrap
    pub config: SiteConfigSpec,
}

impl Site {
    /// Create a site
    pub fn new(
        id: impl Into<String>,
        namespace: impl Into<String>,
        role: SiteRole,
        config: SiteConfigSpec,
    ) -> Self {
        Self {
            id: id.into(),
            namespace: namespace.into(),
            role,
            config,
        }
    }

    /// Whether this is an edge site
    pub fn is_edge(&self) -> bool {
        self.role == SiteRole::Edge
    }
}

/// A directed link: `from` dials `to`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Link {
    /// Site that owns the connector
    pub from: String,
    /// Site whose token is imported
    pub to: String,
    /// Routing cost (0 = default/cheapest)
    pub cost: u32,
}

impl Link {
    /// A link with the default cost
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            cost: 0,
        }
    }
}

/// Sites plus adjacency
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TopologySpec {
    /// All sites
    pub sites: Vec<Site>,
    /// Directed links between sites
    pub links: Vec<Link>,
}

impl TopologySpec {
    /// Create a topology
    pub fn new(sites: Vec<Site>, links: Vec<Link>) -> Self {
        Self { sites, links }
    }

    /// Look up a site by id
    pub fn site(&self, id: &str) -> Option<&Site> {
        self.sites.iter().find(|s| s.id == id)
    }

    /// Interior sites in declaration order
    pub fn interior_sites(&self) -> impl Iterator<Item = &Site> {
        self.sites.iter().filter(|s| !s.is_edge())
    }

    /// Edge sites in declaration order
    pub fn edge_sites(&self) -> impl Iterator<Item = &Site> {
        self.sites.iter().filter(|s| s.is_edge())
    }

    /// Check ids, namespaces and links are consistent
    pub fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        let mut namespaces = HashSet::new();
        for site in &self.sites {
            if site.id.is_empty() {
                return Err(Error::topology("site id must not be empty"));
            }
            if !ids.insert(site.id.as_str()) {
                return Err(Error::topology(format!("duplicate site id {}", site.id)));
            }
            if !namespaces.insert(site.namespace.as_str()) {
                return Err(Error::topology(format!(
                    "namespace {} is used by more than one site",
                    site.namespace
                )));
            }
        }

        let mut links = HashSet::new();
        for link in &self.links {
            if self.site(&link.from).is_none() {
                return Err(Error::topology(format!(
                    "link source {} is not a declared site",
                    link.from
                )));
            }
            let to = self.site(&link.to).ok_or_else(|| {
                Error::topology(format!("link target {} is not a declared site", link.to))
            })?;
            if link.from == link.to {
                return Err(Error::topology(format!("site {} links to itself", link.from)));
            }
            if to.is_edge() {
                return Err(Error::topology(format!(
                    "edge site {} cannot accept a link from {}",
                    link.to, link.from
                )));
            }
            if !links.insert((link.from.as_str(), link.to.as_str())) {
                return Err(Error::topology(format!(
                    "duplicate link {} -> {}",
                    link.from, link.to
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(id: &str, role: SiteRole) -> Site {
        Site::new(id, format!("ns-{}", id), role, SiteConfigSpec::default())
    }

    fn edge_and_public() -> TopologySpec {
        TopologySpec::new(
            vec![site("public-1", SiteRole::Interior), site("edge-1", SiteRole::Edge)],
            vec![Link::new("edge-1", "public-1")],
        )
    }

    #[test]
    fn edge_to_public_is_valid() {
        let spec = edge_and_public();
        spec.validate().unwrap();
        assert_eq!(spec.interior_sites().count(), 1);
        assert_eq!(spec.edge_sites().next().unwrap().id, "edge-1");
    }

    #[test]
    fn links_into_edge_sites_are_rejected() {
        let mut spec = edge_and_public();
        spec.links = vec![Link::new("public-1", "edge-1")];
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("cannot accept a link"));
    }

    #[test]
    fn unknown_sites_are_rejected() {
        let mut spec = edge_and_public();
        spec.links.push(Link::new("edge-1", "public-7"));
        assert!(spec.validate().is_err());

        let mut spec = edge_and_public();
        spec.links.push(Link::new("edge-7", "public-1"));
        assert!(spec.validate().is_err());
    }

    #[test]
    fn duplicates_are_rejected() {
        let mut spec = edge_and_public();
        spec.links.push(Link::new("edge-1", "public-1"));
        assert!(spec.validate().unwrap_err().to_string().contains("duplicate link"));

        let mut spec = edge_and_public();
        spec.sites.push(site("public-1", SiteRole::Interior));
        assert!(spec.validate().is_err());

        let mut spec = edge_and_public();
        spec.sites.push(Site::new(
            "public-2",
            "ns-public-1",
            SiteRole::Interior,
            SiteConfigSpec::default(),
        ));
        assert!(spec.validate().unwrap_err().to_string().contains("namespace"));
    }

    #[test]
    fn self_links_are_rejected() {
        let mut spec = edge_and_public();
        spec.links = vec![Link::new("public-1", "public-1")];
        assert!(spec.validate().unwrap_err().to_string().contains("itself"));
    }
}
