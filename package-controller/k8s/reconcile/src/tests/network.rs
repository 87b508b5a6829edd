use super::{package, reconciler, FakeCluster};
use crate::{network, KubeApiPeers};
use serde_json::json;
use uds_package_controller_core::{ClusterInfo, Owner};
use uds_package_controller_k8s_api::{NetworkPolicy, ResourceExt, GENERATION_LABEL};

fn allows() -> serde_json::Value {
    json!([
        {
            "direction": "Egress",
            "description": "operator kubeapi",
            "remoteGenerated": "KubeAPI",
        },
        {
            "direction": "Ingress",
            "description": "from web",
            "remoteNamespace": "web",
            "port": 8080,
        },
    ])
}

#[tokio::test(flavor = "current_thread")]
async fn applies_baseline_and_custom_policies() {
    let cluster = FakeCluster::default();
    let pkg = package("app", 1, json!({ "allow": allows() }));
    let owner = Owner::new(&pkg, "app");

    let count = network::reconcile(
        &cluster,
        &pkg,
        &owner,
        &ClusterInfo::default(),
        &KubeApiPeers::new(None),
    )
    .await
    .expect("reconcile must succeed");

    assert_eq!(count, 8);
    let names = cluster.names::<NetworkPolicy>();
    assert_eq!(names.len(), 8);
    assert!(names.contains(&"deny-app-default".to_string()));
    assert!(names.contains(&"allow-app-egress-operator-kubeapi".to_string()));
    assert!(names.contains(&"allow-app-ingress-from-web".to_string()));
}

#[tokio::test(flavor = "current_thread")]
async fn removed_allow_deletes_policy() {
    let reconciler = reconciler(FakeCluster::default());

    let v1 = package("app", 1, json!({ "allow": allows() }));
    reconciler.reconcile(&v1).await.expect("reconcile must succeed");
    assert!(reconciler
        .cluster()
        .names::<NetworkPolicy>()
        .contains(&"allow-app-ingress-from-web".to_string()));

    let mut allow = allows();
    allow.as_array_mut().expect("array").pop();
    let v2 = package("app", 2, json!({ "allow": allow }));
    reconciler.reconcile(&v2).await.expect("reconcile must succeed");

    let cluster = reconciler.cluster();
    let names = cluster.names::<NetworkPolicy>();
    assert_eq!(names.len(), 7);
    assert!(!names.contains(&"allow-app-ingress-from-web".to_string()));
    for name in names {
        let np = cluster
            .get::<NetworkPolicy>("app", &name)
            .expect("policy must exist");
        assert_eq!(
            np.labels().get(GENERATION_LABEL).map(String::as_str),
            Some("2"),
            "{name} must carry the current generation"
        );
    }
}

#[tokio::test(flavor = "current_thread")]
async fn disabled_defaults_are_omitted() {
    let reconciler = reconciler(FakeCluster::default());
    let pkg = package(
        "app",
        1,
        json!({ "defaults": { "allowDns": false, "allowIntraNamespace": false } }),
    );
    reconciler.reconcile(&pkg).await.expect("reconcile must succeed");

    let mut names = reconciler.cluster().names::<NetworkPolicy>();
    names.sort();
    assert_eq!(
        names,
        vec![
            "allow-app-egress-istiod-communication",
            "allow-app-ingress-sidecar-monitoring",
            "deny-app-default",
        ]
    );
}

#[tokio::test(flavor = "current_thread")]
async fn policies_owned_by_other_packages_are_kept() {
    let reconciler = reconciler(FakeCluster::default());
    reconciler
        .reconcile(&package("other", 4, json!({})))
        .await
        .expect("reconcile must succeed");
    reconciler
        .reconcile(&package("app", 1, json!({})))
        .await
        .expect("reconcile must succeed");

    let names = reconciler.cluster().names::<NetworkPolicy>();
    assert!(names.contains(&"deny-other-default".to_string()));
    assert!(names.contains(&"deny-app-default".to_string()));
}
