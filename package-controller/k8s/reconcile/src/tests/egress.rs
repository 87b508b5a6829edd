use super::{foreign_gateway, package, FakeCluster};
use crate::{
    egress::{
        apply_sidecar_egress_resources, create_sidecar_workload_egress_resources,
        purge_sidecar_egress_resources, validate_egress_gateway,
    },
    Error, SharedEgress,
};
use maplit::btreemap;
use serde_json::json;
use uds_package_controller_core::{
    egress::{
        workload::sidecar_name, HostResource, HostResourceMap, PackageHostMap, PortProtocol,
    },
    ClusterInfo, Owner,
};
use uds_package_controller_k8s_api::{
    istio::{Gateway, ServiceEntry, Sidecar, VirtualService, VirtualServiceSpec},
    package::{Allow, RemoteProtocol},
    ObjectMeta,
};

fn hosts(entries: &[(&str, u16)]) -> HostResourceMap {
    let mut hosts = HostResourceMap::new();
    for &(host, port) in entries {
        hosts
            .entry(host.to_string())
            .or_insert_with(HostResource::default)
            .port_protocol
            .push(PortProtocol {
                port,
                protocol: RemoteProtocol::Tls,
            });
    }
    hosts
}

fn foreign_virtual_service(namespace: &str, name: &str, host: &str) -> VirtualService {
    VirtualService {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: VirtualServiceSpec {
            hosts: vec![host.to_string()],
            ..Default::default()
        },
    }
}

fn egress_allow(selector: Option<serde_json::Value>) -> Allow {
    let mut allow = json!({
        "direction": "Egress",
        "remoteHost": "example.com",
        "port": 443,
    });
    if let Some(selector) = selector {
        allow["selector"] = selector;
    }
    serde_json::from_value(allow).expect("allow must deserialize")
}

#[tokio::test(flavor = "current_thread")]
async fn unrelated_host_does_not_conflict() {
    let cluster = FakeCluster::default();
    let info = ClusterInfo::default();
    cluster.insert(&foreign_virtual_service("search", "google", "google.com"));

    let packages = btreemap! { "app-app".to_string() => hosts(&[("example.com", 443)]) };
    apply_sidecar_egress_resources(&cluster, &info, &packages, 1)
        .await
        .expect("apply must succeed");

    assert_eq!(cluster.applied::<Gateway>(), vec!["gateway-example-com"]);
    assert_eq!(cluster.applied::<VirtualService>(), vec!["egress-vs-example-com"]);
    assert_eq!(cluster.applied::<ServiceEntry>(), vec!["service-entry-example-com"]);
    assert!(cluster.get::<VirtualService>("search", "google").is_some());
}

#[tokio::test(flavor = "current_thread")]
async fn foreign_claim_on_host_conflicts() {
    let cluster = FakeCluster::default();
    let info = ClusterInfo::default();
    cluster.insert(&foreign_gateway("istio-system", "example", "example.com"));

    let packages = btreemap! { "app-app".to_string() => hosts(&[("example.com", 443)]) };
    let error = apply_sidecar_egress_resources(&cluster, &info, &packages, 1)
        .await
        .expect_err("apply must fail");

    match &error {
        Error::HostConflict {
            kind,
            name,
            namespace,
            host,
        } => {
            assert_eq!(*kind, "Gateway");
            assert_eq!(name, "example");
            assert_eq!(namespace, "istio-system");
            assert_eq!(host, "example.com");
        }
        error => panic!("unexpected error: {error}"),
    }
    assert!(error.to_string().contains("istio-system/example"));
    assert!(cluster.applied::<Gateway>().is_empty());
    assert!(cluster.applied::<VirtualService>().is_empty());
    assert!(cluster.applied::<ServiceEntry>().is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn foreign_virtual_service_conflicts() {
    let cluster = FakeCluster::default();
    let info = ClusterInfo::default();
    cluster.insert(&foreign_virtual_service("team", "example", "example.com"));

    let packages = btreemap! { "app-app".to_string() => hosts(&[("example.com", 443)]) };
    let error = apply_sidecar_egress_resources(&cluster, &info, &packages, 1)
        .await
        .expect_err("apply must fail");
    assert!(
        matches!(error, Error::HostConflict { kind: "VirtualService", .. }),
        "{error}"
    );
    assert!(cluster.applied::<Gateway>().is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn reapplying_a_host_keeps_one_triad() {
    let cluster = FakeCluster::default();
    let info = ClusterInfo::default();

    let mut packages: PackageHostMap =
        btreemap! { "app-app".to_string() => hosts(&[("example.com", 443)]) };
    for _ in 0..2 {
        apply_sidecar_egress_resources(&cluster, &info, &packages, 1)
            .await
            .expect("apply must succeed");
    }
    assert_eq!(cluster.names::<Gateway>(), vec!["gateway-example-com"]);
    assert_eq!(cluster.names::<VirtualService>(), vec!["egress-vs-example-com"]);
    assert_eq!(cluster.names::<ServiceEntry>(), vec!["service-entry-example-com"]);

    packages.insert("other-other".to_string(), hosts(&[("httpbin.org", 443)]));
    apply_sidecar_egress_resources(&cluster, &info, &packages, 2)
        .await
        .expect("apply must succeed");
    assert_eq!(
        cluster.names::<Gateway>(),
        vec!["gateway-example-com", "gateway-httpbin-org"]
    );
    assert_eq!(
        cluster.names::<ServiceEntry>(),
        vec!["service-entry-example-com", "service-entry-httpbin-org"]
    );
}

#[tokio::test(flavor = "current_thread")]
async fn shared_host_is_annotated_with_every_user() {
    let cluster = FakeCluster::default();
    let info = ClusterInfo::default();
    let packages = btreemap! {
        "a-a".to_string() => hosts(&[("example.com", 443)]),
        "b-b".to_string() => hosts(&[("example.com", 443)]),
    };
    apply_sidecar_egress_resources(&cluster, &info, &packages, 1)
        .await
        .expect("apply must succeed");

    let gw = cluster
        .get::<Gateway>(&info.egress_namespace, "gateway-example-com")
        .expect("gateway must exist");
    let annotations = gw.metadata.annotations.unwrap_or_default();
    assert!(annotations.contains_key("uds.dev/user-a-a"));
    assert!(annotations.contains_key("uds.dev/user-b-b"));
    assert_eq!(gw.spec.servers.len(), 1);
}

#[tokio::test(flavor = "current_thread")]
async fn purge_removes_stale_shared_objects() {
    let cluster = FakeCluster::default();
    let info = ClusterInfo::default();
    cluster.insert(&foreign_virtual_service(
        &info.egress_namespace,
        "unmanaged",
        "other.com",
    ));

    let v1 = btreemap! { "a-a".to_string() => hosts(&[("example.com", 443), ("httpbin.org", 443)]) };
    apply_sidecar_egress_resources(&cluster, &info, &v1, 1)
        .await
        .expect("apply must succeed");
    let v2 = btreemap! { "a-a".to_string() => hosts(&[("httpbin.org", 443)]) };
    apply_sidecar_egress_resources(&cluster, &info, &v2, 2)
        .await
        .expect("apply must succeed");
    purge_sidecar_egress_resources(&cluster, &info, 2)
        .await
        .expect("purge must succeed");

    assert_eq!(cluster.names::<Gateway>(), vec!["gateway-httpbin-org"]);
    assert_eq!(cluster.names::<ServiceEntry>(), vec!["service-entry-httpbin-org"]);
    assert_eq!(
        cluster.names::<VirtualService>(),
        vec!["egress-vs-httpbin-org", "unmanaged"]
    );
}

#[tokio::test(flavor = "current_thread")]
async fn shared_egress_tracks_packages() {
    let _tracing = super::init_tracing();
    let cluster = FakeCluster::default();
    let info = ClusterInfo::default();
    let shared = SharedEgress::new(10);

    shared
        .update(&cluster, &info, "a-a", hosts(&[("example.com", 443)]))
        .await
        .expect("update must succeed");
    shared
        .update(&cluster, &info, "b-b", hosts(&[("httpbin.org", 443)]))
        .await
        .expect("update must succeed");
    assert_eq!(shared.generation().await, 12);
    assert_eq!(shared.hosts().await, 2);

    // Unchanged hosts do not start a new pass.
    shared
        .update(&cluster, &info, "a-a", hosts(&[("example.com", 443)]))
        .await
        .expect("update must succeed");
    assert_eq!(shared.generation().await, 12);

    shared
        .remove(&cluster, &info, "a-a")
        .await
        .expect("remove must succeed");
    assert_eq!(cluster.names::<Gateway>(), vec!["gateway-httpbin-org"]);

    shared
        .update(&cluster, &info, "b-b", HostResourceMap::new())
        .await
        .expect("update must succeed");
    assert!(cluster.names::<Gateway>().is_empty());
    assert!(cluster.names::<VirtualService>().is_empty());
    assert!(cluster.names::<ServiceEntry>().is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn failed_sync_forgets_the_update() {
    let cluster = FakeCluster::default();
    let info = ClusterInfo::default();
    cluster.insert(&foreign_gateway("istio-system", "example", "example.com"));
    let shared = SharedEgress::new(0);

    for _ in 0..2 {
        let error = shared
            .update(&cluster, &info, "a-a", hosts(&[("example.com", 443)]))
            .await
            .expect_err("update must fail");
        assert!(matches!(error, Error::HostConflict { .. }), "{error}");
    }
    assert_eq!(shared.generation().await, 2);
    assert_eq!(shared.hosts().await, 0);

    // Other packages are not held back by the conflicting host.
    shared
        .update(&cluster, &info, "b-b", hosts(&[("httpbin.org", 443)]))
        .await
        .expect("update must succeed");
    assert_eq!(cluster.applied::<Gateway>(), vec!["gateway-httpbin-org"]);
}

#[tokio::test(flavor = "current_thread")]
async fn failed_apply_names_kind_and_host() {
    let cluster = FakeCluster::default();
    let info = ClusterInfo::default();
    cluster.fail_applies::<VirtualService>(true);

    let packages = btreemap! { "a-a".to_string() => hosts(&[("example.com", 443)]) };
    let error = apply_sidecar_egress_resources(&cluster, &info, &packages, 1)
        .await
        .expect_err("apply must fail");
    assert_eq!(
        error.to_string(),
        "Failed to apply VirtualService for host example.com"
    );
    assert_eq!(cluster.applied::<Gateway>(), vec!["gateway-example-com"]);
    assert!(cluster.applied::<ServiceEntry>().is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn validate_rejects_unexposed_port() {
    let cluster = FakeCluster::with_egress_gateway(&[443]);
    let info = ClusterInfo::default();

    validate_egress_gateway(&cluster, &info, &hosts(&[("b.com", 443)]))
        .await
        .expect("443 is exposed");

    let error = validate_egress_gateway(&cluster, &info, &hosts(&[("a.com", 8080)]))
        .await
        .expect_err("8080 is not exposed");
    let message = error.to_string();
    assert!(message.contains("8080"), "{message}");
    assert!(message.contains("a.com"), "{message}");
}

#[tokio::test(flavor = "current_thread")]
async fn validate_requires_gateway_namespace() {
    let cluster = FakeCluster::default();
    let info = ClusterInfo::default();

    let error = validate_egress_gateway(&cluster, &info, &hosts(&[("a.com", 443)]))
        .await
        .expect_err("gateway is not installed");
    assert!(matches!(error, Error::EgressGatewayDisabled { .. }), "{error}");
    assert!(error.to_string().contains(&info.egress_namespace));
}

#[tokio::test(flavor = "current_thread")]
async fn workload_sidecars_dedupe_by_selector() {
    let cluster = FakeCluster::default();
    let pkg = package("app", 1, json!({}));
    let owner = Owner::new(&pkg, "app");
    let hosts = hosts(&[("example.com", 443)]);
    let my_app = sidecar_name("app", Some(&btreemap! { "app".into() => "my-app".into() }));

    let same = [
        egress_allow(Some(json!({ "app": "my-app" }))),
        egress_allow(Some(json!({ "app": "my-app" }))),
    ];
    create_sidecar_workload_egress_resources(&cluster, &hosts, &same, false, &owner)
        .await
        .expect("apply must succeed");
    assert_eq!(cluster.applied::<Sidecar>(), vec![my_app.clone()]);
    assert_eq!(
        cluster.applied::<ServiceEntry>(),
        vec!["app-egress-example-com-443-tls"]
    );

    let cluster = FakeCluster::default();
    let mixed = [egress_allow(Some(json!({ "app": "my-app" }))), egress_allow(None)];
    create_sidecar_workload_egress_resources(&cluster, &hosts, &mixed, false, &owner)
        .await
        .expect("apply must succeed");
    assert_eq!(
        cluster.applied::<Sidecar>(),
        vec![my_app, "app-egress-default".to_string()]
    );

    let cluster = FakeCluster::default();
    let alike = [
        egress_allow(Some(json!({ "app": "my-app" }))),
        egress_allow(Some(json!({ "app-my": "app" }))),
    ];
    create_sidecar_workload_egress_resources(&cluster, &hosts, &alike, false, &owner)
        .await
        .expect("apply must succeed");
    assert_eq!(cluster.names::<Sidecar>().len(), 2);
}
