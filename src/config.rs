//! Topology file loading
//!
//! A topology file declares sites, links and convergence targets in YAML:
//!
//! ```yaml
//! namespacePrefix: vanlink
//! tickSeconds: 5
//! timeoutSeconds: 600
//! sites:
//!   - id: public
//!   - id: edge
//!     edge: true
//! links:
//!   - from: edge
//!     to: public
//! targets:
//!   - site: edge
//!     direct: 1
//!     indirect: 0
//!   - site: public
//! ```
//!
//! An entry with `replicas: N` above one expands into sites `{id}-1` through
//! `{id}-N`. Links and targets naming such an entry apply to every replica.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::convergence::{
    ConvergenceTarget, Expectation, WatchSettings, DEFAULT_TICK, DEFAULT_TIMEOUT, MAX_WAIT,
};
use crate::platform::SiteConfigSpec;
use crate::topology::{Link, Site, SiteRole, TopologySpec};
use crate::{Error, Result};

/// Default namespace prefix for provisioned sites
pub const DEFAULT_NAMESPACE_PREFIX: &str = "vanlink";

/// A topology file as written on disk
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TopologyFile {
    /// Prefix for site namespaces
    #[serde(default = "default_prefix")]
    pub namespace_prefix: String,
    /// Where exported tokens are written; defaults to a per-run temp dir
    #[serde(default)]
    pub token_dir: Option<PathBuf>,
    /// Seconds between router inspections
    #[serde(default = "default_tick_seconds")]
    pub tick_seconds: u64,
    /// Seconds the whole verification may take
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Declared sites
    pub sites: Vec<SiteEntry>,
    /// Declared links
    #[serde(default)]
    pub links: Vec<LinkEntry>,
    /// Sites to verify after provisioning
    #[serde(default)]
    pub targets: Vec<TargetEntry>,
}

/// Where a run writes its token files
#[derive(Debug)]
pub enum TokenDir {
    /// Directory named in the topology file
    Fixed(PathBuf),
    /// Per-run directory deleted on drop
    Scratch(tempfile::TempDir),
}

impl TokenDir {
    /// Directory path
    pub fn path(&self) -> &Path {
        match self {
            Self::Fixed(dir) => dir,
            Self::Scratch(dir) => dir.path(),
        }
    }
}

/// A site declaration
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SiteEntry {
    /// Site id, or id stem when replicated
    pub id: String,
    /// Edge sites only originate links
    #[serde(default)]
    pub edge: bool,
    /// Number of sites this entry expands to
    ///
    /// Unrelated to `siteConfig.replicas`, which is the router replica count
    /// inside each expanded site.
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    /// Router configuration passed through to the platform
    #[serde(default)]
    pub site_config: SiteConfigSpec,
}

/// A link declaration
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LinkEntry {
    /// Dialing site
    pub from: String,
    /// Dialed site
    pub to: String,
    /// Routing cost
    #[serde(default)]
    pub cost: u32,
}

/// A convergence target declaration
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TargetEntry {
    /// Site to watch
    pub site: String,
    /// Expected one-hop sites
    #[serde(default)]
    pub direct: Option<u32>,
    /// Expected multi-hop sites
    #[serde(default)]
    pub indirect: Option<u32>,
}

impl TargetEntry {
    fn expectation(&self) -> Result<Expectation> {
        match (self.direct, self.indirect) {
            (None, None) => Ok(Expectation::Presence),
            (Some(direct), Some(indirect)) => Ok(Expectation::Exact { direct, indirect }),
            _ => Err(Error::config(format!(
                "target {} must set both direct and indirect, or neither",
                self.site
            ))),
        }
    }
}

fn default_prefix() -> String {
    DEFAULT_NAMESPACE_PREFIX.to_string()
}

fn default_tick_seconds() -> u64 {
    DEFAULT_TICK.as_secs()
}

fn default_timeout_seconds() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

fn default_replicas() -> u32 {
    1
}

impl TopologyFile {
    /// Read and parse a topology file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_yaml(&yaml)
    }

    /// Parse a topology file from YAML text
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| Error::config(format!("invalid topology file: {}", e)))
    }

    /// Directory exported tokens are written to
    ///
    /// Without `tokenDir` each call creates a fresh private directory under
    /// the system temp dir, removed when the returned value is dropped.
    pub fn token_dir(&self) -> Result<TokenDir> {
        match &self.token_dir {
            Some(dir) => Ok(TokenDir::Fixed(dir.clone())),
            None => tempfile::Builder::new()
                .prefix("vanlink-tokens-")
                .tempdir()
                .map(TokenDir::Scratch)
                .map_err(|e| Error::io(std::env::temp_dir(), e)),
        }
    }

    /// Namespace for a site id
    pub fn namespace_for(&self, site_id: &str) -> String {
        format!("{}-{}", self.namespace_prefix, site_id)
    }

    /// Expand into the topology, the convergence targets and watch settings
    pub fn into_plan(self) -> Result<(TopologySpec, Vec<ConvergenceTarget>, WatchSettings)> {
        if self.tick_seconds == 0 {
            return Err(Error::config("tickSeconds must be at least 1"));
        }
        if self.timeout_seconds == 0 {
            return Err(Error::config("timeoutSeconds must be at least 1"));
        }
        let max = MAX_WAIT.as_secs();
        if self.tick_seconds > max || self.timeout_seconds > max {
            return Err(Error::config(format!(
                "tickSeconds and timeoutSeconds must not exceed {}",
                max
            )));
        }

        let mut sites = Vec::new();
        for entry in &self.sites {
            if entry.replicas == 0 {
                return Err(Error::config(format!("site {} has zero replicas", entry.id)));
            }
            let role = if entry.edge {
                SiteRole::Edge
            } else {
                SiteRole::Interior
            };
            for id in self.expand(&entry.id)? {
                let namespace = self.namespace_for(&id);
                sites.push(Site::new(id, namespace, role, entry.site_config.clone()));
            }
        }

        let mut links = Vec::new();
        for entry in &self.links {
            for from in self.expand(&entry.from)? {
                for to in self.expand(&entry.to)? {
                    links.push(Link {
                        from: from.clone(),
                        to,
                        cost: entry.cost,
                    });
                }
            }
        }

        let mut targets = Vec::new();
        for entry in &self.targets {
            let expectation = entry.expectation()?;
            for id in self.expand(&entry.site)? {
                let namespace = self.namespace_for(&id);
                targets.push(ConvergenceTarget::new(id, namespace, expectation));
            }
        }

        let topology = TopologySpec::new(sites, links);
        topology.validate()?;

        let settings = WatchSettings {
            tick: Duration::from_secs(self.tick_seconds),
            timeout: Duration::from_secs(self.timeout_seconds),
        };
        Ok((topology, targets, settings))
    }

    /// Site ids an entry name refers to
    fn expand(&self, name: &str) -> Result<Vec<String>> {
        let entry = self
            .sites
            .iter()
            .find(|s| s.id == name)
            .ok_or_else(|| Error::config(format!("unknown site {}", name)))?;
        if entry.replicas <= 1 {
            return Ok(vec![entry.id.clone()]);
        }
        Ok((1..=entry.replicas)
            .map(|n| format!("{}-{}", entry.id, n))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EDGE_CONNECTIVITY: &str = r#"
sites:
  - id: public
    siteConfig:
      enableController: true
      enableServiceSync: true
  - id: edge
    edge: true
links:
  - from: edge
    to: public
targets:
  - site: edge
    direct: 1
    indirect: 0
  - site: public
"#;

    #[test]
    fn edge_connectivity_file_expands_to_plan() {
        let file = TopologyFile::from_yaml(EDGE_CONNECTIVITY).unwrap();
        let (topology, targets, settings) = file.into_plan().unwrap();

        assert_eq!(topology.sites.len(), 2);
        let public = topology.site("public").unwrap();
        assert_eq!(public.namespace, "vanlink-public");
        assert!(public.config.enable_service_sync);
        assert!(topology.site("edge").unwrap().is_edge());
        assert_eq!(topology.links, vec![Link::new("edge", "public")]);

        assert_eq!(
            targets[0].expectation,
            Expectation::Exact { direct: 1, indirect: 0 }
        );
        assert_eq!(targets[1].expectation, Expectation::Presence);
        assert_eq!(settings, WatchSettings::default());
    }

    #[test]
    fn replicas_expand_sites_links_and_targets() {
        let file = TopologyFile::from_yaml(
            r#"
namespacePrefix: it
sites:
  - id: public
  - id: edge
    edge: true
    replicas: 2
    siteConfig:
      replicas: 3
links:
  - from: edge
    to: public
    cost: 3
targets:
  - site: edge
"#,
        )
        .unwrap();
        let (topology, targets, _) = file.into_plan().unwrap();

        let ids: Vec<_> = topology.sites.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["public", "edge-1", "edge-2"]);
        assert_eq!(topology.sites[1].namespace, "it-edge-1");
        // entry replicas expand sites; siteConfig replicas size each router
        assert!(topology.sites[1..].iter().all(|s| s.config.replicas == 3));
        assert_eq!(topology.sites[0].config.replicas, SiteConfigSpec::default().replicas);
        assert_eq!(topology.links.len(), 2);
        assert!(topology.links.iter().all(|l| l.to == "public" && l.cost == 3));
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[1].namespace, "it-edge-2");
    }

    #[test]
    fn half_specified_target_is_rejected() {
        let file = TopologyFile::from_yaml(
            "sites:\n  - id: a\ntargets:\n  - site: a\n    direct: 1\n",
        )
        .unwrap();
        let err = file.into_plan().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn unknown_names_are_rejected() {
        let file = TopologyFile::from_yaml(
            "sites:\n  - id: a\nlinks:\n  - from: a\n    to: b\n",
        )
        .unwrap();
        assert!(file.into_plan().unwrap_err().to_string().contains("unknown site b"));

        assert!(TopologyFile::from_yaml("sites: []\nbogus: 1\n").is_err());
    }

    #[test]
    fn zero_tick_is_rejected() {
        let file = TopologyFile::from_yaml("tickSeconds: 0\nsites:\n  - id: a\n").unwrap();
        assert!(file.into_plan().is_err());
    }

    #[test]
    fn oversized_wait_is_rejected() {
        let file = TopologyFile::from_yaml(
            "timeoutSeconds: 18446744073709551615\nsites:\n  - id: a\n",
        )
        .unwrap();
        assert!(matches!(file.into_plan().unwrap_err(), Error::Config(_)));

        let file = TopologyFile::from_yaml(&format!(
            "tickSeconds: {}\nsites:\n  - id: a\n",
            MAX_WAIT.as_secs() + 1
        ))
        .unwrap();
        assert!(matches!(file.into_plan().unwrap_err(), Error::Config(_)));

        let file = TopologyFile::from_yaml(&format!(
            "timeoutSeconds: {}\nsites:\n  - id: a\n",
            MAX_WAIT.as_secs()
        ))
        .unwrap();
        let (_, _, settings) = file.into_plan().unwrap();
        assert_eq!(settings.timeout, MAX_WAIT);
    }

    #[test]
    fn links_into_edges_fail_validation() {
        let file = TopologyFile::from_yaml(
            "sites:\n  - id: a\n  - id: e\n    edge: true\nlinks:\n  - from: a\n    to: e\n",
        )
        .unwrap();
        assert!(matches!(file.into_plan().unwrap_err(), Error::Topology(_)));
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topology.yaml");
        std::fs::write(&path, EDGE_CONNECTIVITY).unwrap();
        let file = TopologyFile::load(&path).unwrap();
        assert_eq!(file.namespace_prefix, DEFAULT_NAMESPACE_PREFIX);
        assert!(file.token_dir.is_none());

        let err = TopologyFile::load(dir.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn token_dir_is_private_per_run_unless_named() {
        let file = TopologyFile::from_yaml(EDGE_CONNECTIVITY).unwrap();
        let first = file.token_dir().unwrap();
        let second = file.token_dir().unwrap();
        assert!(matches!(first, TokenDir::Scratch(_)));
        assert!(first.path().is_dir());
        assert_ne!(first.path(), second.path());

        let scratch = first.path().to_path_buf();
        drop(first);
        assert!(!scratch.exists());

        let file =
            TopologyFile::from_yaml("tokenDir: /var/tmp/vanlink\nsites:\n  - id: a\n").unwrap();
        let named = file.token_dir().unwrap();
        assert_eq!(named.path(), Path::new("/var/tmp/vanlink"));
        assert!(matches!(named, TokenDir::Fixed(_)));
    }
}
