//! Shared fixtures for cluster-backed tests

use std::sync::Arc;

use vanlink::platform::cluster::{create_client, KubePlatform};
use vanlink::platform::{SecretClient, SitePlatform};

/// Connect to the test cluster and wrap it as a platform
pub async fn test_platform() -> vanlink::Result<Arc<KubePlatform>> {
    let client = create_client(None).await?;
    let platform = KubePlatform::new(client);
    Ok(Arc::new(match std::env::var("VANLINK_ROUTER_IMAGE") {
        Ok(image) => platform.with_router_image(image),
        Err(_) => platform,
    }))
}

/// Both seams over one platform
pub fn seams(platform: &Arc<KubePlatform>) -> (Arc<dyn SecretClient>, Arc<dyn SitePlatform>) {
    (platform.clone(), platform.clone())
}

/// Delete a namespace, ignoring errors
pub async fn cleanup_namespace(platform: &KubePlatform, namespace: &str) {
    let _ = platform.delete_namespace(namespace).await;
}
