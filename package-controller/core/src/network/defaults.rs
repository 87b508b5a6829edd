use super::generate::match_labels;
use crate::k8s::{
    labels::Map,
    package::{Allow, Defaults, Direction, Expose, Protocol, RemoteGenerated},
    NetworkPolicy, NetworkPolicySpec, ObjectMeta,
};

/// Denies all traffic to and from every pod in the namespace. Every other
/// policy in the namespace is an exception to this one.
pub fn deny_all(namespace: &str, name: String) -> NetworkPolicy {
    NetworkPolicy {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(NetworkPolicySpec {
            pod_selector: match_labels(None),
            policy_types: Some(vec!["Ingress".to_string(), "Egress".to_string()]),
            ingress: Some(vec![]),
            egress: Some(vec![]),
        }),
    }
}

/// The allow rules every package receives, in the order they are applied.
pub fn baseline(defaults: &Defaults) -> Vec<Allow> {
    let mut rules = vec![
        rule(
            Direction::Egress,
            "Istiod communication",
            "istio-system",
            labels("istio", "pilot"),
            15012,
        ),
        rule(
            Direction::Ingress,
            "Sidecar monitoring",
            "monitoring",
            labels("app", "prometheus"),
            15020,
        ),
    ];

    if defaults.allow_dns {
        rules.push(Allow {
            protocol: Some(Protocol::Udp),
            ..rule(
                Direction::Egress,
                "DNS lookup via CoreDNS",
                "kube-system",
                labels("k8s-app", "kube-dns"),
                53,
            )
        });
    }

    if defaults.allow_intra_namespace {
        for direction in [Direction::Ingress, Direction::Egress] {
            rules.push(Allow {
                description: Some("Intra-namespace communication".to_string()),
                remote_generated: Some(RemoteGenerated::IntraNamespace),
                ..empty(direction)
            });
        }
    }

    rules
}

/// Admits traffic from the gateway an expose entry is published on.
pub fn expose(expose: &Expose) -> Allow {
    let gateway = expose.gateway;
    let port = expose.target_port.unwrap_or(expose.port);
    let selector = expose
        .selector
        .as_ref()
        .map(|s| s.values().cloned().collect::<Vec<_>>().join("-"))
        .unwrap_or_default();

    Allow {
        description: Some(format!("{port}-{selector} Istio {gateway} gateway")),
        selector: expose.selector.clone(),
        remote_namespace: Some(format!("istio-{gateway}-gateway")),
        remote_selector: Some(labels("app", &format!("{gateway}-ingressgateway"))),
        port: Some(port),
        ..empty(Direction::Ingress)
    }
}

fn rule(direction: Direction, description: &str, namespace: &str, pods: Map, port: u16) -> Allow {
    Allow {
        description: Some(description.to_string()),
        remote_namespace: Some(namespace.to_string()),
        remote_selector: Some(pods),
        port: Some(port),
        ..empty(direction)
    }
}

fn empty(direction: Direction) -> Allow {
    Allow {
        direction,
        description: None,
        labels: None,
        selector: None,
        remote_namespace: None,
        remote_selector: None,
        remote_generated: None,
        remote_cidr: None,
        remote_host: None,
        remote_protocol: None,
        port: None,
        ports: None,
        protocol: None,
    }
}

fn labels(k: &str, v: &str) -> Map {
    Some((k.to_string(), v.to_string())).into_iter().collect()
}
