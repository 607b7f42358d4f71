//! Kubernetes-backed platform
//!
//! Sites map onto cluster objects in the site namespace:
//! - site configuration: ConfigMap `vanlink-site`, key `site.json`
//! - router: Deployment and Service `vanlink-router`
//! - connectors: Secrets labelled `vanlink.io/type: connector`
//! - router status: ConfigMap `vanlink-network-status`, key `status.json`,
//!   maintained by the router's controller

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde_json::json;
use tracing::debug;

use super::{
    ConnectorCreateOptions, RouterStatus, SecretClient, SiteConfig, SiteConfigSpec, SitePlatform,
    ROUTER_NAME, SITE_CONFIG_NAME,
};
use crate::token::{EDGE_PORT, INTER_ROUTER_PORT};
use crate::{Error, Result};

/// Field manager for server-side apply
pub const FIELD_MANAGER: &str = "vanlink";

/// ConfigMap the router publishes its status into
pub const NETWORK_STATUS_NAME: &str = "vanlink-network-status";

/// Data key holding the serialized [`RouterStatus`]
pub const NETWORK_STATUS_KEY: &str = "status.json";

/// Data key holding the serialized [`SiteConfigSpec`]
pub const SITE_CONFIG_KEY: &str = "site.json";

/// Router image used when none is configured
pub const DEFAULT_ROUTER_IMAGE: &str = "quay.io/skupper/skupper-router:main";

/// Default connect timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a kube client from an optional kubeconfig path
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .map_err(|e| Error::config(format!("failed to read kubeconfig: {}", e)))?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| Error::config(format!("failed to load kubeconfig: {}", e)))?
        }
        None => Config::infer()
            .await
            .map_err(|e| Error::config(format!("failed to infer kube config: {}", e)))?,
    };
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    Client::try_from(config).map_err(Error::Kube)
}

/// [`SecretClient`] and [`SitePlatform`] over a kube client
#[derive(Clone)]
pub struct KubePlatform {
    client: Client,
    router_image: String,
}

impl KubePlatform {
    /// Create a platform using the default router image
    pub fn new(client: Client) -> Self {
        Self {
            client,
            router_image: DEFAULT_ROUTER_IMAGE.to_string(),
        }
    }

    /// Override the router image
    pub fn with_router_image(mut self, image: impl Into<String>) -> Self {
        self.router_image = image.into();
        self
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn config_maps(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn router_labels() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app.kubernetes.io/name".to_string(), ROUTER_NAME.to_string()),
        (
            "app.kubernetes.io/managed-by".to_string(),
            FIELD_MANAGER.to_string(),
        ),
    ])
}

/// Router deployment for a stored site configuration
fn router_deployment(config: &SiteConfig, image: &str) -> Result<Deployment> {
    let mode = if config.spec.is_edge { "edge" } else { "interior" };
    let replicas = config.spec.replicas.max(1);
    let labels = router_labels();
    serde_json::from_value(json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {
            "name": ROUTER_NAME,
            "namespace": config.namespace,
            "labels": labels,
        },
        "spec": {
            "replicas": replicas,
            "selector": { "matchLabels": labels },
            "template": {
                "metadata": { "labels": labels },
                "spec": {
                    "containers": [{
                        "name": "router",
                        "image": image,
                        "env": [
                            { "name": "VANLINK_ROUTER_MODE", "value": mode },
                            {
                                "name": "VANLINK_SITE_CONFIG",
                                "valueFrom": { "configMapKeyRef": {
                                    "name": config.name,
                                    "key": SITE_CONFIG_KEY,
                                }},
                            },
                        ],
                        "ports": [
                            { "name": "inter-router", "containerPort": INTER_ROUTER_PORT },
                            { "name": "edge", "containerPort": EDGE_PORT },
                        ],
                    }],
                },
            },
        },
    }))
    .map_err(|e| Error::serialization(format!("failed to build router deployment: {}", e)))
}

/// Service exposing the router's link listeners
fn router_service(config: &SiteConfig) -> Result<Service> {
    let labels = router_labels();
    serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {
            "name": ROUTER_NAME,
            "namespace": config.namespace,
            "labels": labels,
        },
        "spec": {
            "selector": labels,
            "ports": [
                { "name": "inter-router", "port": INTER_ROUTER_PORT },
                { "name": "edge", "port": EDGE_PORT },
            ],
        },
    }))
    .map_err(|e| Error::serialization(format!("failed to build router service: {}", e)))
}

/// Parse the router status published in the network status ConfigMap
fn parse_status(config_map: &ConfigMap, namespace: &str) -> Result<RouterStatus> {
    let raw = config_map
        .data
        .as_ref()
        .and_then(|d| d.get(NETWORK_STATUS_KEY))
        .ok_or_else(|| Error::not_found("ConfigMap key", namespace, NETWORK_STATUS_KEY))?;
    serde_json::from_str(raw)
        .map_err(|e| Error::serialization(format!("malformed router status in {}: {}", namespace, e)))
}

#[async_trait]
impl SecretClient for KubePlatform {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret> {
        self.secrets(namespace)
            .get(name)
            .await
            .map_err(|e| Error::from_kube(e, "Secret", namespace, name))
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret> {
        let name = secret.metadata.name.clone().unwrap_or_default();
        self.secrets(namespace)
            .create(&PostParams::default(), secret)
            .await
            .map_err(|e| Error::from_kube(e, "Secret", namespace, &name))
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        self.secrets(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| Error::from_kube(e, "Secret", namespace, name))?;
        Ok(())
    }
}

#[async_trait]
impl SitePlatform for KubePlatform {
    async fn create_namespace(&self, namespace: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": {
                "name": namespace,
                "labels": { "app.kubernetes.io/managed-by": FIELD_MANAGER },
            }
        });
        api.patch(namespace, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&ns))
            .await
            .map_err(|e| Error::from_kube(e, "Namespace", "", namespace))?;
        debug!(namespace, "namespace applied");
        Ok(())
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.delete(namespace, &DeleteParams::default())
            .await
            .map_err(|e| Error::from_kube(e, "Namespace", "", namespace))?;
        Ok(())
    }

    async fn create_site_config(&self, spec: &SiteConfigSpec) -> Result<SiteConfig> {
        let payload = serde_json::to_string(spec)
            .map_err(|e| Error::serialization(format!("failed to serialize site config: {}", e)))?;
        let config_map = ConfigMap {
            metadata: ObjectMeta {
                name: Some(SITE_CONFIG_NAME.to_string()),
                namespace: Some(spec.namespace.clone()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(SITE_CONFIG_KEY.to_string(), payload)])),
            ..Default::default()
        };

        self.config_maps(&spec.namespace)
            .create(&PostParams::default(), &config_map)
            .await
            .map_err(|e| Error::from_kube(e, "ConfigMap", &spec.namespace, SITE_CONFIG_NAME))?;

        Ok(SiteConfig {
            name: SITE_CONFIG_NAME.to_string(),
            namespace: spec.namespace.clone(),
            spec: spec.clone(),
        })
    }

    async fn create_router(&self, config: &SiteConfig) -> Result<()> {
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), &config.namespace);
        deployments
            .create(
                &PostParams::default(),
                &router_deployment(config, &self.router_image)?,
            )
            .await
            .map_err(|e| Error::from_kube(e, "Deployment", &config.namespace, ROUTER_NAME))?;

        if !config.spec.is_edge {
            let services: Api<Service> = Api::namespaced(self.client.clone(), &config.namespace);
            services
                .create(&PostParams::default(), &router_service(config)?)
                .await
                .map_err(|e| Error::from_kube(e, "Service", &config.namespace, ROUTER_NAME))?;
        }
        Ok(())
    }

    async fn create_connector(
        &self,
        options: &ConnectorCreateOptions,
        token: &Secret,
    ) -> Result<()> {
        let mut secret = token.clone();
        secret.metadata.name = Some(options.name.clone());
        secret.metadata.namespace = Some(options.namespace.clone());
        secret.metadata.resource_version = None;
        secret.metadata.uid = None;
        self.create_secret(&options.namespace, &secret).await?;
        Ok(())
    }

    async fn router_status(&self, namespace: &str) -> Result<RouterStatus> {
        let config_map = self
            .config_maps(namespace)
            .get(NETWORK_STATUS_NAME)
            .await
            .map_err(|e| Error::from_kube(e, "ConfigMap", namespace, NETWORK_STATUS_NAME))?;
        parse_status(&config_map, namespace)
    }
}
