use crate::{
    k8s::{
        labels::Map,
        package::{Allow, Direction, RemoteGenerated},
        IPBlock, IntOrString, LabelSelector, NetworkPolicy, NetworkPolicyEgressRule,
        NetworkPolicyIngressRule, NetworkPolicyPeer, NetworkPolicyPort, NetworkPolicySpec,
        ObjectMeta, DESCRIPTION_ANNOTATION, GENERATED_LABEL,
    },
    ClusterInfo,
};

/// The cloud provider instance metadata endpoint.
pub const CLOUD_METADATA_CIDR: &str = "169.254.169.254/32";

const ANYWHERE_CIDR: &str = "0.0.0.0/0";
const NAMESPACE_NAME_LABEL: &str = "kubernetes.io/metadata.name";

/// Builds the NetworkPolicy implementing a single allow rule.
///
/// The returned policy is named after the rule but carries no package
/// labels; [`super::policies`] finalizes the metadata.
pub fn generate(
    namespace: &str,
    allow: &Allow,
    cluster: &ClusterInfo,
    kube_api: &[NetworkPolicyPeer],
) -> NetworkPolicy {
    let mut labels = allow.labels.clone().unwrap_or_default();
    if let Some(generated) = allow.remote_generated {
        labels.insert(GENERATED_LABEL.to_string(), generated.to_string());
    }

    let annotations = allow
        .description
        .as_ref()
        .map(|d| Some((DESCRIPTION_ANNOTATION.to_string(), d.clone())).into_iter().collect());

    let peers = non_empty(peers(allow, cluster, kube_api));
    let ports = non_empty(ports(allow));

    let mut spec = NetworkPolicySpec {
        pod_selector: match_labels(allow.selector.clone()),
        policy_types: Some(vec![allow.direction.to_string()]),
        ..Default::default()
    };
    match allow.direction {
        Direction::Ingress => {
            spec.ingress = Some(vec![NetworkPolicyIngressRule { from: peers, ports }]);
        }
        Direction::Egress => {
            spec.egress = Some(vec![NetworkPolicyEgressRule { to: peers, ports }]);
        }
    }

    NetworkPolicy {
        metadata: ObjectMeta {
            name: Some(name(allow)),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            annotations,
            ..Default::default()
        },
        spec: Some(spec),
    }
}

/// Names a rule after its description or, lacking one, after the pods and
/// peers it connects.
fn name(allow: &Allow) -> String {
    if let Some(description) = allow.description.as_deref().filter(|d| !d.is_empty()) {
        return format!("{}-{}", allow.direction, description);
    }

    let mut parts = values_or_all_pods(allow.selector.as_ref());
    if let Some(generated) = allow.remote_generated {
        parts.push(generated.to_string());
    } else if let Some(cidr) = allow.remote_cidr.filter(|_| !has_remote_selectors(allow)) {
        parts.push(cidr.to_string());
    } else if let Some(host) = allow.remote_host.as_ref().filter(|_| !has_remote_selectors(allow)) {
        parts.push(host.clone());
    } else {
        parts.push(allow.remote_namespace.clone().unwrap_or_default());
        parts.extend(values_or_all_pods(allow.remote_selector.as_ref()));
    }

    format!("{}-{}", allow.direction, parts.join("-"))
}

fn values_or_all_pods(selector: Option<&Map>) -> Vec<String> {
    match selector {
        Some(labels) => labels.values().cloned().collect(),
        None => vec!["all pods".to_string()],
    }
}

fn has_remote_selectors(allow: &Allow) -> bool {
    allow.remote_namespace.is_some() || allow.remote_selector.is_some()
}

fn peers(allow: &Allow, cluster: &ClusterInfo, kube_api: &[NetworkPolicyPeer]) -> Vec<NetworkPolicyPeer> {
    if let Some(generated) = allow.remote_generated {
        return match generated {
            RemoteGenerated::KubeApi => kube_api.to_vec(),
            RemoteGenerated::CloudMetadata => vec![ip_block(CLOUD_METADATA_CIDR, None)],
            RemoteGenerated::IntraNamespace => vec![intra_namespace()],
            RemoteGenerated::Anywhere => anywhere(),
            RemoteGenerated::KubeNodes => {
                tracing::warn!(
                    "KubeNodes peers are not resolved by this controller, allowing anywhere"
                );
                anywhere()
            }
        };
    }

    if has_remote_selectors(allow) {
        let namespace_selector = allow.remote_namespace.as_deref().map(|ns| match ns {
            "" | "*" => LabelSelector::default(),
            ns => match_labels(Some(
                Some((NAMESPACE_NAME_LABEL.to_string(), ns.to_string()))
                    .into_iter()
                    .collect(),
            )),
        });
        let pod_selector = allow
            .remote_selector
            .as_ref()
            .map(|labels| match_labels(Some(labels.clone())));
        return vec![NetworkPolicyPeer {
            namespace_selector,
            pod_selector,
            ..Default::default()
        }];
    }

    if let Some(cidr) = allow.remote_cidr {
        return vec![ip_block(&cidr.to_block(), None)];
    }

    if allow.remote_host.is_some() {
        return vec![egress_gateway(cluster)];
    }

    vec![]
}

fn ports(allow: &Allow) -> Vec<NetworkPolicyPort> {
    let protocol = allow.protocol.unwrap_or_default().to_string();
    allow
        .ports
        .iter()
        .flatten()
        .chain(allow.port.iter())
        .map(|port| NetworkPolicyPort {
            port: Some(IntOrString::Int((*port).into())),
            protocol: Some(protocol.clone()),
            end_port: None,
        })
        .collect()
}

pub(super) fn match_labels(labels: Option<Map>) -> LabelSelector {
    LabelSelector {
        match_labels: labels,
        match_expressions: None,
    }
}

fn ip_block(cidr: &str, except: Option<Vec<String>>) -> NetworkPolicyPeer {
    NetworkPolicyPeer {
        ip_block: Some(IPBlock {
            cidr: cidr.to_string(),
            except,
        }),
        ..Default::default()
    }
}

fn intra_namespace() -> NetworkPolicyPeer {
    NetworkPolicyPeer {
        pod_selector: Some(match_labels(Some(Map::new()))),
        ..Default::default()
    }
}

/// Any address outside the cloud metadata endpoint, plus any pod in the
/// cluster.
fn anywhere() -> Vec<NetworkPolicyPeer> {
    vec![
        ip_block(ANYWHERE_CIDR, Some(vec![CLOUD_METADATA_CIDR.to_string()])),
        NetworkPolicyPeer {
            namespace_selector: Some(LabelSelector::default()),
            ..Default::default()
        },
    ]
}

/// The open peer used when the API server's addresses are unknown.
pub fn open_peer() -> NetworkPolicyPeer {
    ip_block(ANYWHERE_CIDR, None)
}

/// A host route to a single API server address.
pub fn host_peer(cidr: &str) -> NetworkPolicyPeer {
    ip_block(cidr, None)
}

fn egress_gateway(cluster: &ClusterInfo) -> NetworkPolicyPeer {
    NetworkPolicyPeer {
        namespace_selector: Some(match_labels(Some(
            Some((
                NAMESPACE_NAME_LABEL.to_string(),
                cluster.egress_namespace.clone(),
            ))
            .into_iter()
            .collect(),
        ))),
        pod_selector: Some(match_labels(Some(
            Some(("app".to_string(), cluster.egress_service.clone()))
                .into_iter()
                .collect(),
        ))),
        ..Default::default()
    }
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::{package::Protocol, Cidr};
    use maplit::btreemap;
    use pretty_assertions::assert_eq;

    fn allow(direction: Direction) -> Allow {
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

    fn egress_rule(np: &NetworkPolicy) -> &NetworkPolicyEgressRule {
        &np.spec.as_ref().unwrap().egress.as_ref().unwrap()[0]
    }

    fn ingress_rule(np: &NetworkPolicy) -> &NetworkPolicyIngressRule {
        &np.spec.as_ref().unwrap().ingress.as_ref().unwrap()[0]
    }

    #[test]
    fn remote_namespace_and_selector() {
        let rule = Allow {
            selector: Some(btreemap! { "app".to_string() => "web".to_string() }),
            remote_namespace: Some("monitoring".to_string()),
            remote_selector: Some(btreemap! { "app".to_string() => "prometheus".to_string() }),
            port: Some(9090),
            ..allow(Direction::Ingress)
        };
        let np = generate("app-ns", &rule, &ClusterInfo::default(), &[]);

        assert_eq!(
            np.metadata.name.as_deref(),
            Some("Ingress-web-monitoring-prometheus")
        );
        let spec = np.spec.as_ref().unwrap();
        assert_eq!(spec.policy_types, Some(vec!["Ingress".to_string()]));
        assert_eq!(
            spec.pod_selector.match_labels,
            Some(btreemap! { "app".to_string() => "web".to_string() })
        );

        let rule = ingress_rule(&np);
        let peer = &rule.from.as_ref().unwrap()[0];
        assert_eq!(
            peer.namespace_selector.as_ref().unwrap().match_labels,
            Some(btreemap! {
                "kubernetes.io/metadata.name".to_string() => "monitoring".to_string()
            })
        );
        assert_eq!(
            peer.pod_selector.as_ref().unwrap().match_labels,
            Some(btreemap! { "app".to_string() => "prometheus".to_string() })
        );
        assert_eq!(
            rule.ports,
            Some(vec![NetworkPolicyPort {
                port: Some(IntOrString::Int(9090)),
                protocol: Some("TCP".to_string()),
                end_port: None,
            }])
        );
    }

    #[test]
    fn wildcard_namespace_selects_all_namespaces() {
        for ns in ["*", ""] {
            let rule = Allow {
                remote_namespace: Some(ns.to_string()),
                ..allow(Direction::Egress)
            };
            let np = generate("app-ns", &rule, &ClusterInfo::default(), &[]);
            let peer = &egress_rule(&np).to.as_ref().unwrap()[0];
            assert_eq!(peer.namespace_selector, Some(LabelSelector::default()));
            assert_eq!(peer.pod_selector, None);
        }
    }

    #[test]
    fn no_remote_allows_any_peer_on_all_ports() {
        let np = generate("app-ns", &allow(Direction::Egress), &ClusterInfo::default(), &[]);
        assert_eq!(np.metadata.name.as_deref(), Some("Egress-all pods--all pods"));
        let rule = egress_rule(&np);
        assert_eq!(rule.to, None);
        assert_eq!(rule.ports, None);
    }

    #[test]
    fn remote_generated_replaces_literal_selectors() {
        let kube_api = vec![host_peer("10.0.0.1/32")];
        let rule = Allow {
            remote_generated: Some(RemoteGenerated::KubeApi),
            remote_namespace: Some("default".to_string()),
            remote_selector: Some(btreemap! { "app".to_string() => "ignored".to_string() }),
            ..allow(Direction::Egress)
        };
        let np = generate("app-ns", &rule, &ClusterInfo::default(), &kube_api);
        assert_eq!(np.metadata.name.as_deref(), Some("Egress-all pods-KubeAPI"));
        assert_eq!(egress_rule(&np).to, Some(kube_api));
        assert_eq!(
            np.metadata.labels.as_ref().unwrap().get(GENERATED_LABEL),
            Some(&"KubeAPI".to_string())
        );
    }

    #[test]
    fn generated_peers() {
        let cluster = ClusterInfo::default();

        let rule = Allow {
            remote_generated: Some(RemoteGenerated::CloudMetadata),
            ..allow(Direction::Egress)
        };
        let np = generate("ns", &rule, &cluster, &[]);
        assert_eq!(
            egress_rule(&np).to,
            Some(vec![ip_block("169.254.169.254/32", None)])
        );

        let rule = Allow {
            remote_generated: Some(RemoteGenerated::IntraNamespace),
            ..allow(Direction::Ingress)
        };
        let np = generate("ns", &rule, &cluster, &[]);
        assert_eq!(ingress_rule(&np).from, Some(vec![intra_namespace()]));

        let rule = Allow {
            remote_generated: Some(RemoteGenerated::Anywhere),
            ..allow(Direction::Egress)
        };
        let np = generate("ns", &rule, &cluster, &[]);
        let to = egress_rule(&np).to.clone().unwrap();
        assert_eq!(to.len(), 2);
        assert_eq!(
            to[0].ip_block.as_ref().unwrap().except,
            Some(vec!["169.254.169.254/32".to_string()])
        );
        assert_eq!(to[1].namespace_selector, Some(LabelSelector::default()));
    }

    #[test]
    fn remote_cidr_and_ports() {
        let rule = Allow {
            remote_cidr: Some("10.1.0.0/16".parse::<Cidr>().unwrap()),
            ports: Some(vec![5432, 5433]),
            port: Some(6543),
            protocol: Some(Protocol::Udp),
            ..allow(Direction::Egress)
        };
        let np = generate("ns", &rule, &ClusterInfo::default(), &[]);
        assert_eq!(np.metadata.name.as_deref(), Some("Egress-all pods-10.1.0.0/16"));
        let rule = egress_rule(&np);
        assert_eq!(rule.to, Some(vec![ip_block("10.1.0.0/16", None)]));
        let ports = rule
            .ports
            .iter()
            .flatten()
            .map(|p| (p.port.clone(), p.protocol.clone()))
            .collect::<Vec<_>>();
        assert_eq!(
            ports,
            vec![
                (Some(IntOrString::Int(5432)), Some("UDP".to_string())),
                (Some(IntOrString::Int(5433)), Some("UDP".to_string())),
                (Some(IntOrString::Int(6543)), Some("UDP".to_string())),
            ]
        );
    }

    #[test]
    fn remote_host_routes_through_egress_gateway() {
        let rule = Allow {
            remote_host: Some("example.com".to_string()),
            port: Some(443),
            ..allow(Direction::Egress)
        };
        let np = generate("ns", &rule, &ClusterInfo::default(), &[]);
        assert_eq!(np.metadata.name.as_deref(), Some("Egress-all pods-example.com"));
        let peer = &egress_rule(&np).to.as_ref().unwrap()[0];
        assert_eq!(
            peer.namespace_selector.as_ref().unwrap().match_labels,
            Some(btreemap! {
                "kubernetes.io/metadata.name".to_string() => "istio-egress-gateway".to_string()
            })
        );
        assert_eq!(
            peer.pod_selector.as_ref().unwrap().match_labels,
            Some(btreemap! { "app".to_string() => "egressgateway".to_string() })
        );
    }

    #[test]
    fn description_names_policy_and_is_annotated() {
        let rule = Allow {
            description: Some("Postgres".to_string()),
            ..allow(Direction::Egress)
        };
        let np = generate("ns", &rule, &ClusterInfo::default(), &[]);
        assert_eq!(np.metadata.name.as_deref(), Some("Egress-Postgres"));
        assert_eq!(
            np.metadata.annotations,
            Some(btreemap! { DESCRIPTION_ANNOTATION.to_string() => "Postgres".to_string() })
        );
    }
}
