//! Integration tests for the credential store
//!
//! These tests tell the story of how site credentials are kept in real
//! Secrets: a CA is created once and reused, leaf credentials are signed by
//! it, and deletion is not idempotent.

use vanlink::credentials::{CertAuthority, Credential, CredentialStore};
use vanlink::pki::verify_signed_by;
use vanlink::platform::{secret_string, SitePlatform, CA_CERT_KEY, TLS_CERT_KEY};

use super::helpers::{cleanup_namespace, seams, test_platform};

/// Story: operator provisions a site CA twice and gets the same CA back
///
/// Expected behavior:
/// - The first call creates the CA Secret
/// - The second call returns the stored Secret unchanged
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_site_ca_is_created_once() {
    let platform = test_platform().await.expect("failed to connect to cluster");
    let namespace = "vanlink-it-ca";
    cleanup_namespace(&platform, namespace).await;
    platform
        .create_namespace(namespace)
        .await
        .expect("failed to create namespace");

    let (secrets, _) = seams(&platform);
    let store = CredentialStore::new(secrets);
    let ca = CertAuthority::new("vanlink-site-ca");

    let first = store
        .ensure_cert_authority(&ca, None, namespace)
        .await
        .expect("failed to create CA");
    let second = store
        .ensure_cert_authority(&ca, None, namespace)
        .await
        .expect("failed to fetch CA");
    assert_eq!(first.metadata.uid, second.metadata.uid);
    assert_eq!(first.data, second.data);

    cleanup_namespace(&platform, namespace).await;
}

/// Story: a leaf credential is signed by the site CA and can be deleted once
///
/// Expected behavior:
/// - The issued Secret carries ca.crt and a tls.crt signed by it
/// - Deleting twice reports not-found the second time
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_leaf_credential_lifecycle() {
    let platform = test_platform().await.expect("failed to connect to cluster");
    let namespace = "vanlink-it-leaf";
    cleanup_namespace(&platform, namespace).await;
    platform
        .create_namespace(namespace)
        .await
        .expect("failed to create namespace");

    let (secrets, _) = seams(&platform);
    let store = CredentialStore::new(secrets);
    store
        .ensure_cert_authority(&CertAuthority::new("vanlink-site-ca"), None, namespace)
        .await
        .expect("failed to create CA");

    let credential = Credential::leaf(
        "vanlink-amqps",
        "vanlink-site-ca",
        "vanlink-messaging",
        vec!["vanlink-messaging".to_string()],
    );
    let issued = store
        .issue_credential(&credential, None, namespace)
        .await
        .expect("failed to issue credential");
    let ca = secret_string(&issued, CA_CERT_KEY).expect("missing ca.crt");
    let cert = secret_string(&issued, TLS_CERT_KEY).expect("missing tls.crt");
    assert!(verify_signed_by(&cert, &ca).expect("failed to verify"));

    store
        .delete_credential("vanlink-amqps", namespace)
        .await
        .expect("failed to delete credential");
    let err = store
        .delete_credential("vanlink-amqps", namespace)
        .await
        .expect_err("second delete should fail");
    assert!(err.is_not_found());

    cleanup_namespace(&platform, namespace).await;
}
