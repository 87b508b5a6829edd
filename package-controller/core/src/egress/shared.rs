//! The Gateway, VirtualService and ServiceEntry shared by every package
//! that reaches a host.

use super::{user_annotation, EgressResource, PortProtocol, SHARED_PACKAGE_ID};
use crate::{
    k8s::{
        istio::{
            gateway::{Server, ServerTls, TlsMode},
            service_entry::{Location, Resolution},
            virtual_service::{
                HttpMatchRequest, HttpRoute, RouteDestination, TlsMatchAttributes, TlsRoute,
            },
            Gateway, GatewaySpec, Port, ServiceEntry, ServiceEntrySpec, VirtualService,
            VirtualServiceSpec,
        },
        labels::Map,
        package::RemoteProtocol,
        ObjectMeta, GENERATION_LABEL, PACKAGE_LABEL,
    },
    sanitize_resource_name, ClusterInfo,
};

/// The reserved gateway name that applies routes to every sidecar.
const MESH_GATEWAY: &str = "mesh";

pub fn gateway_name(host: &str) -> String {
    sanitize_resource_name(&format!("gateway-{host}"))
}

pub fn virtual_service_name(host: &str) -> String {
    sanitize_resource_name(&format!("egress-vs-{host}"))
}

pub fn service_entry_name(host: &str) -> String {
    sanitize_resource_name(&format!("service-entry-{host}"))
}

/// Labels selecting every shared egress object.
pub fn selector() -> Map {
    Some((PACKAGE_LABEL.to_string(), SHARED_PACKAGE_ID.to_string()))
        .into_iter()
        .collect()
}

/// Opens a passthrough listener on the egress gateway for each port.
pub fn gateway(
    host: &str,
    resource: &EgressResource,
    generation: u64,
    cluster: &ClusterInfo,
) -> Gateway {
    let servers = resource
        .port_protocols
        .iter()
        .map(|pp| Server {
            hosts: vec![host.to_string()],
            port: port(pp),
            tls: Some(ServerTls {
                mode: Some(TlsMode::Passthrough),
            }),
        })
        .collect();

    Gateway {
        metadata: metadata(gateway_name(host), resource, generation, cluster),
        spec: GatewaySpec {
            selector: Some(("app".to_string(), cluster.egress_service.clone()))
                .into_iter()
                .collect(),
            servers,
        },
    }
}

/// Sends mesh traffic for the host to the egress gateway, and traffic
/// arriving at the egress gateway on to the host.
pub fn virtual_service(
    host: &str,
    resource: &EgressResource,
    generation: u64,
    cluster: &ClusterInfo,
) -> VirtualService {
    let gateway = gateway_name(host);
    let egress_host = cluster.egress_gateway_host();

    let mut spec = VirtualServiceSpec {
        hosts: vec![host.to_string()],
        gateways: vec![MESH_GATEWAY.to_string(), gateway.clone()],
        ..Default::default()
    };

    for pp in &resource.port_protocols {
        let hops = [
            (MESH_GATEWAY, RouteDestination::new(egress_host.clone(), pp.port)),
            (gateway.as_str(), RouteDestination::new(host, pp.port)),
        ];
        for (from, to) in hops {
            match pp.protocol {
                RemoteProtocol::Tls => spec.tls.push(TlsRoute {
                    r#match: vec![TlsMatchAttributes {
                        sni_hosts: vec![host.to_string()],
                        port: Some(pp.port),
                        gateways: vec![from.to_string()],
                    }],
                    route: vec![to],
                }),
                RemoteProtocol::Http => spec.http.push(HttpRoute {
                    r#match: vec![HttpMatchRequest {
                        port: Some(pp.port),
                        gateways: vec![from.to_string()],
                        ..Default::default()
                    }],
                    route: vec![to],
                    ..Default::default()
                }),
            }
        }
    }

    VirtualService {
        metadata: metadata(virtual_service_name(host), resource, generation, cluster),
        spec,
    }
}

/// Registers the host with the mesh in the egress gateway's namespace.
pub fn service_entry(
    host: &str,
    resource: &EgressResource,
    generation: u64,
    cluster: &ClusterInfo,
) -> ServiceEntry {
    ServiceEntry {
        metadata: metadata(service_entry_name(host), resource, generation, cluster),
        spec: external_service_entry(host, &resource.port_protocols),
    }
}

pub(super) fn external_service_entry(host: &str, pps: &[PortProtocol]) -> ServiceEntrySpec {
    ServiceEntrySpec {
        hosts: vec![host.to_string()],
        ports: pps.iter().map(port).collect(),
        location: Some(Location::MeshExternal),
        resolution: Some(Resolution::Dns),
        endpoints: vec![],
        export_to: vec![".".to_string()],
    }
}

fn port(pp: &PortProtocol) -> Port {
    Port {
        number: pp.port,
        protocol: pp.protocol.to_string(),
        name: format!("{}-{}", pp.protocol.to_string().to_lowercase(), pp.port),
    }
}

fn metadata(
    name: String,
    resource: &EgressResource,
    generation: u64,
    cluster: &ClusterInfo,
) -> ObjectMeta {
    let mut labels = selector();
    labels.insert(GENERATION_LABEL.to_string(), generation.to_string());

    ObjectMeta {
        name: Some(name),
        namespace: Some(cluster.egress_namespace.clone()),
        labels: Some(labels),
        annotations: Some(
            resource
                .packages
                .iter()
                .map(|id| (user_annotation(id), "user".to_string()))
                .collect(),
        ),
        ..Default::default()
    }
}
