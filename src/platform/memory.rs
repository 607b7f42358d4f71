//! In-process platform
//!
//! Keeps namespaces, secrets, site configurations, routers and connectors in
//! memory behind a single lock. Router status is derived from the connector
//! graph: sites joined by a connector in either direction see each other as
//! direct, and anything further along the graph counts as indirect. Only
//! sites whose router has been created take part.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use parking_lot::Mutex;

use super::{
    ConnectedSites, ConnectorCreateOptions, RouterStatus, SecretClient, SiteConfig,
    SiteConfigSpec, SitePlatform, ROUTER_NAME, SITE_CONFIG_NAME, TYPE_LABEL,
};
use crate::token::{CONNECTOR_TYPE, INTER_ROUTER_HOST_ANNOTATION};
use crate::{Error, Result};

#[derive(Default)]
struct State {
    namespaces: BTreeSet<String>,
    secrets: BTreeMap<(String, String), Secret>,
    site_configs: BTreeMap<String, SiteConfig>,
    routers: BTreeSet<String>,
    /// (namespace, connector name) -> dialed namespace
    connectors: BTreeMap<(String, String), String>,
    status_failures: BTreeMap<String, u32>,
}

impl State {
    fn require_namespace(&self, namespace: &str) -> Result<()> {
        if self.namespaces.contains(namespace) {
            Ok(())
        } else {
            Err(Error::not_found("Namespace", "", namespace))
        }
    }

    /// Undirected adjacency between namespaces that run a router
    fn neighbours(&self, namespace: &str) -> BTreeSet<&str> {
        self.connectors
            .iter()
            .filter_map(|((owner, _), peer)| {
                if owner == namespace {
                    Some(peer.as_str())
                } else if peer == namespace {
                    Some(owner.as_str())
                } else {
                    None
                }
            })
            .filter(|ns| *ns != namespace && self.routers.contains(*ns))
            .collect()
    }

    fn connected_sites(&self, namespace: &str) -> ConnectedSites {
        let direct = self.neighbours(namespace);
        let mut seen = BTreeSet::from([namespace]);
        let mut queue = VecDeque::from([namespace]);
        while let Some(current) = queue.pop_front() {
            for next in self.neighbours(current) {
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        let reachable = seen.len() as u32 - 1;
        let direct = direct.len() as u32;
        ConnectedSites::new(direct, reachable - direct)
    }
}

/// Namespace a router host such as `vanlink-router.ns.svc.cluster.local` points at
fn host_namespace(host: &str) -> Option<&str> {
    host.strip_prefix(ROUTER_NAME)?
        .strip_prefix('.')?
        .split('.')
        .next()
        .filter(|ns| !ns.is_empty())
}

/// In-memory implementation of [`SecretClient`] and [`SitePlatform`]
#[derive(Default)]
pub struct MemoryPlatform {
    state: Mutex<State>,
}

impl MemoryPlatform {
    /// Create an empty platform
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `times` router inspections in `namespace` fail
    pub fn fail_router_status(&self, namespace: &str, times: u32) {
        self.state
            .lock()
            .status_failures
            .insert(namespace.to_string(), times);
    }

    /// Namespaces that currently exist
    pub fn namespaces(&self) -> Vec<String> {
        self.state.lock().namespaces.iter().cloned().collect()
    }

    /// A stored secret, if present
    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.state
            .lock()
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Names of the connectors registered in `namespace`
    pub fn connectors(&self, namespace: &str) -> Vec<String> {
        self.state
            .lock()
            .connectors
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Stored site configuration for `namespace`
    pub fn site_config(&self, namespace: &str) -> Option<SiteConfig> {
        self.state.lock().site_configs.get(namespace).cloned()
    }

    /// Whether a router was created in `namespace`
    pub fn has_router(&self, namespace: &str) -> bool {
        self.state.lock().routers.contains(namespace)
    }
}

#[async_trait]
impl SecretClient for MemoryPlatform {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret> {
        self.secret(namespace, name)
            .ok_or_else(|| Error::not_found("Secret", namespace, name))
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret> {
        let name = secret
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::serialization("secret has no name"))?;
        let mut state = self.state.lock();
        state.require_namespace(namespace)?;
        let key = (namespace.to_string(), name.clone());
        if state.secrets.contains_key(&key) {
            return Err(Error::already_exists("Secret", namespace, &name));
        }
        let mut stored = secret.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        state.secrets.insert(key, stored.clone());
        Ok(stored)
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        let key = (namespace.to_string(), name.to_string());
        if state.secrets.remove(&key).is_none() {
            return Err(Error::not_found("Secret", namespace, name));
        }
        state.connectors.remove(&key);
        Ok(())
    }
}

#[async_trait]
impl SitePlatform for MemoryPlatform {
    async fn create_namespace(&self, namespace: &str) -> Result<()> {
        self.state.lock().namespaces.insert(namespace.to_string());
        Ok(())
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<()> {
        let mut state = self.state.lock();
        if !state.namespaces.remove(namespace) {
            return Err(Error::not_found("Namespace", "", namespace));
        }
        state.secrets.retain(|(ns, _), _| ns != namespace);
        state.connectors.retain(|(ns, _), _| ns != namespace);
        state.site_configs.remove(namespace);
        state.routers.remove(namespace);
        state.status_failures.remove(namespace);
        Ok(())
    }

    async fn create_site_config(&self, spec: &SiteConfigSpec) -> Result<SiteConfig> {
        let mut state = self.state.lock();
        state.require_namespace(&spec.namespace)?;
        if state.site_configs.contains_key(&spec.namespace) {
            return Err(Error::already_exists(
                "ConfigMap",
                &spec.namespace,
                SITE_CONFIG_NAME,
            ));
        }
        let config = SiteConfig {
            name: SITE_CONFIG_NAME.to_string(),
            namespace: spec.namespace.clone(),
            spec: spec.clone(),
        };
        state
            .site_configs
            .insert(spec.namespace.clone(), config.clone());
        Ok(config)
    }

    async fn create_router(&self, config: &SiteConfig) -> Result<()> {
        let mut state = self.state.lock();
        if !state.site_configs.contains_key(&config.namespace) {
            return Err(Error::not_found(
                "ConfigMap",
                &config.namespace,
                &config.name,
            ));
        }
        if !state.routers.insert(config.namespace.clone()) {
            return Err(Error::already_exists(
                "Deployment",
                &config.namespace,
                ROUTER_NAME,
            ));
        }
        Ok(())
    }

    async fn create_connector(
        &self,
        options: &ConnectorCreateOptions,
        token: &Secret,
    ) -> Result<()> {
        let peer = token
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(INTER_ROUTER_HOST_ANNOTATION))
            .and_then(|host| host_namespace(host))
            .ok_or_else(|| Error::token("connector secret has no usable router host"))?
            .to_string();

        let mut state = self.state.lock();
        state.require_namespace(&options.namespace)?;
        let key = (options.namespace.clone(), options.name.clone());
        if state.secrets.contains_key(&key) {
            return Err(Error::already_exists(
                "Secret",
                &options.namespace,
                &options.name,
            ));
        }

        let mut stored = token.clone();
        stored.metadata.name = Some(options.name.clone());
        stored.metadata.namespace = Some(options.namespace.clone());
        stored
            .metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert(TYPE_LABEL.to_string(), CONNECTOR_TYPE.to_string());
        state.secrets.insert(key.clone(), stored);
        state.connectors.insert(key, peer);
        Ok(())
    }

    async fn router_status(&self, namespace: &str) -> Result<RouterStatus> {
        let mut state = self.state.lock();
        if let Some(remaining) = state.status_failures.get_mut(namespace) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::serialization(format!(
                    "router in {} did not answer",
                    namespace
                )));
            }
        }
        if !state.routers.contains(namespace) {
            return Err(Error::not_found("Deployment", namespace, ROUTER_NAME));
        }
        Ok(RouterStatus {
            connected_sites: state.connected_sites(namespace),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    async fn site(platform: &MemoryPlatform, namespace: &str) {
        platform.create_namespace(namespace).await.unwrap();
        let config = platform
            .create_site_config(&SiteConfigSpec {
                namespace: namespace.to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        platform.create_router(&config).await.unwrap();
    }

    async fn connect(platform: &MemoryPlatform, from: &str, to: &str) {
        let token = Secret {
            metadata: ObjectMeta {
                annotations: Some(BTreeMap::from([(
                    INTER_ROUTER_HOST_ANNOTATION.to_string(),
                    format!("{}.{}.svc.cluster.local", ROUTER_NAME, to),
                )])),
                ..Default::default()
            },
            ..Default::default()
        };
        let options = ConnectorCreateOptions {
            namespace: from.to_string(),
            name: format!("link-{}", to),
            cost: 0,
        };
        platform.create_connector(&options, &token).await.unwrap();
    }

    #[test]
    fn host_namespace_parses_both_forms() {
        assert_eq!(host_namespace("vanlink-router.ns-a"), Some("ns-a"));
        assert_eq!(
            host_namespace("vanlink-router.ns-a.svc.cluster.local"),
            Some("ns-a")
        );
        assert_eq!(host_namespace("other.ns-a"), None);
        assert_eq!(host_namespace("vanlink-router."), None);
    }

    /// Story: a chain a - b - c gives b two direct sites and a one indirect
    #[tokio::test]
    async fn story_status_follows_connector_graph() {
        let platform = MemoryPlatform::new();
        for ns in ["a", "b", "c"] {
            site(&platform, ns).await;
        }
        assert_eq!(
            platform.router_status("a").await.unwrap().connected_sites,
            ConnectedSites::default()
        );

        connect(&platform, "a", "b").await;
        connect(&platform, "c", "b").await;

        let status = |ns: &'static str| {
            let platform = &platform;
            async move { platform.router_status(ns).await.unwrap().connected_sites }
        };
        assert_eq!(status("a").await, ConnectedSites::new(1, 1));
        assert_eq!(status("b").await, ConnectedSites::new(2, 0));
        assert_eq!(status("c").await, ConnectedSites::new(1, 1));
        assert_eq!(platform.connectors("a"), vec!["link-b".to_string()]);
    }

    #[tokio::test]
    async fn deleting_a_namespace_drops_its_links() {
        let platform = MemoryPlatform::new();
        site(&platform, "a").await;
        site(&platform, "b").await;
        connect(&platform, "a", "b").await;
        assert!(platform.has_router("a"));

        platform.delete_namespace("a").await.unwrap();
        assert!(!platform.has_router("a"));
        assert!(platform.has_router("b"));
        assert_eq!(
            platform.router_status("b").await.unwrap().connected_sites,
            ConnectedSites::default()
        );
        assert!(platform
            .delete_namespace("a")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn secrets_need_a_namespace_and_a_free_name() {
        let platform = MemoryPlatform::new();
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some("s".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(platform
            .create_secret("nowhere", &secret)
            .await
            .unwrap_err()
            .is_not_found());

        platform.create_namespace("ns").await.unwrap();
        let stored = platform.create_secret("ns", &secret).await.unwrap();
        assert_eq!(stored.metadata.namespace.as_deref(), Some("ns"));
        assert!(platform
            .create_secret("ns", &secret)
            .await
            .unwrap_err()
            .is_already_exists());

        platform.delete_secret("ns", "s").await.unwrap();
        assert!(platform.get_secret("ns", "s").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn injected_status_failures_are_consumed() {
        let platform = MemoryPlatform::new();
        site(&platform, "a").await;
        platform.fail_router_status("a", 2);
        assert!(platform.router_status("a").await.is_err());
        assert!(platform.router_status("a").await.is_err());
        assert!(platform.router_status("a").await.is_ok());
    }

    #[tokio::test]
    async fn router_requires_site_config() {
        let platform = MemoryPlatform::new();
        platform.create_namespace("a").await.unwrap();
        let config = SiteConfig {
            name: SITE_CONFIG_NAME.to_string(),
            namespace: "a".to_string(),
            spec: SiteConfigSpec::default(),
        };
        assert!(platform.create_router(&config).await.unwrap_err().is_not_found());
        assert!(!platform.has_router("a"));
        assert!(platform.router_status("a").await.unwrap_err().is_not_found());
    }
}
