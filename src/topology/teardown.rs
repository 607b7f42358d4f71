//! Best-effort removal of a topology's namespaces

use std::sync::Arc;

use tracing::{info, warn};

use super::TopologySpec;
use crate::platform::SitePlatform;

/// Deletes every site namespace, logging instead of failing
pub struct Teardown {
    platform: Arc<dyn SitePlatform>,
}

impl Teardown {
    /// Create a teardown over a platform
    pub fn new(platform: Arc<dyn SitePlatform>) -> Self {
        Self { platform }
    }

    /// Delete all site namespaces; returns how many deletions succeeded
    pub async fn run(&self, spec: &TopologySpec) -> usize {
        let mut deleted = 0;
        for site in &spec.sites {
            match self.platform.delete_namespace(&site.namespace).await {
                Ok(()) => {
                    info!(site = %site.id, namespace = %site.namespace, "deleted namespace");
                    deleted += 1;
                }
                Err(e) if e.is_not_found() => {
                    warn!(site = %site.id, namespace = %site.namespace, "namespace already gone");
                }
                Err(e) => {
                    warn!(site = %site.id, namespace = %site.namespace, error = %e, "failed to delete namespace");
                }
            }
        }
        deleted
    }
}
