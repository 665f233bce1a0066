//! Schema registration and resolution against a live cluster
//!
//! Requires a kubeconfig pointing at a disposable cluster (e.g., kind).

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, DeleteParams, ObjectMeta, PostParams};
use kube::Client;

use tenant_bridge::resolver::{GroupKind, ResourceResolver, ResourceScope};
use tenant_bridge::schema::{KindSchema, KubeCrdClient, SchemaRegistry};
use tenant_bridge::tenant::{KubeConfigSource, TenantConfigSource};

const WIDGET_CRD: &str = r#"
apiVersion: apiextensions.k8s.io/v1
kind: CustomResourceDefinition
metadata:
  name: widgets.bridge-test.example.dev
spec:
  group: bridge-test.example.dev
  scope: Namespaced
  names:
    kind: Widget
    plural: widgets
    singular: widget
  versions:
    - name: v1
      served: true
      storage: true
      schema:
        openAPIV3Schema:
          type: object
          x-kubernetes-preserve-unknown-fields: true
"#;

async fn test_client() -> Client {
    Client::try_default()
        .await
        .expect("failed to create client from kubeconfig")
}

async fn cleanup_crd(client: &Client) {
    let api: Api<CustomResourceDefinition> = Api::all(client.clone());
    let _ = api
        .delete("widgets.bridge-test.example.dev", &DeleteParams::default())
        .await;
    tokio::time::sleep(Duration::from_secs(2)).await;
}

/// Story: Two replicas start at once and both register the same schema
///
/// Expected behavior:
/// - Both registrations succeed
/// - Once established, the kind resolves to a namespaced resource
#[tokio::test]
#[ignore = "requires a cluster - run with: cargo test --test tenant -- --ignored"]
async fn story_racing_replicas_register_and_resolve_schema() {
    let client = test_client().await;
    cleanup_crd(&client).await;

    let schema = KindSchema::from_yaml(WIDGET_CRD).expect("valid CRD manifest");
    let first = SchemaRegistry::new(Arc::new(KubeCrdClient::new(client.clone())));
    let second = SchemaRegistry::new(Arc::new(KubeCrdClient::new(client.clone())));

    let (a, b) = tokio::join!(first.register(&schema), second.register(&schema));
    a.expect("first replica registers");
    b.expect("second replica registers");

    let resolver = ResourceResolver::new(client.clone());
    let widget = GroupKind::new("bridge-test.example.dev", "Widget");
    let mut handle = None;
    for _ in 0..30 {
        if let Ok(h) = resolver.resolve(&widget, "default", &["v1"]).await {
            handle = Some(h);
            break;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    let handle = handle.expect("Widget never became resolvable");

    assert_eq!(handle.scope(), ResourceScope::Namespaced);
    assert_eq!(handle.resource().plural, "widgets");
    assert_eq!(handle.namespace(), Some("default"));

    cleanup_crd(&client).await;
}

/// Story: Cluster-scoped kinds ignore the namespace argument
#[tokio::test]
#[ignore = "requires a cluster - run with: cargo test --test tenant -- --ignored"]
async fn story_cluster_scoped_kind_resolves_without_namespace() {
    let client = test_client().await;
    let resolver = ResourceResolver::new(client);

    let handle = resolver
        .resolve(&GroupKind::new("", "Namespace"), "ignored", &[])
        .await
        .expect("Namespace resolves");

    assert_eq!(handle.scope(), ResourceScope::Cluster);
    assert_eq!(handle.namespace(), None);
}

/// Story: The ConfigMap source reads tenant configuration from the cluster
#[tokio::test]
#[ignore = "requires a cluster - run with: cargo test --test tenant -- --ignored"]
async fn story_config_source_reads_tenant_config_map() {
    let client = test_client().await;
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), "default");
    let name = "9001-mt-config";
    let _ = api.delete(name, &DeleteParams::default()).await;

    let source = KubeConfigSource::new(client);
    assert!(source.get_config("default", name).await.unwrap().is_none());

    let cm = ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        data: Some(
            [("ini".to_string(), r#"{"database": {"type": "sqlite3"}}"#.to_string())]
                .into_iter()
                .collect(),
        ),
        ..Default::default()
    };
    api.create(&PostParams::default(), &cm)
        .await
        .expect("create config map");

    let fetched = source.get_config("default", name).await.unwrap().unwrap();
    assert!(fetched.data.unwrap().contains_key("ini"));

    let _ = api.delete(name, &DeleteParams::default()).await;
}
