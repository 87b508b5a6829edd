//! Mesh route synthesis for exposed services.

use crate::{
    k8s::{
        istio::{
            service_entry::{Location, Resolution, WorkloadEntry},
            virtual_service::{
                HttpRoute, L4MatchAttributes, RouteDestination, TcpRoute, TlsMatchAttributes,
                TlsRoute,
            },
            Port, ServiceEntry, ServiceEntrySpec, VirtualService, VirtualServiceSpec,
        },
        package::{Expose, Gateway, RouteMode},
        Package,
    },
    sanitize_resource_name, ClusterInfo, Owner,
};

/// The objects that publish a single expose entry.
#[derive(Clone, Debug)]
pub struct ExposeRoutes {
    pub fqdn: String,
    pub virtual_service: VirtualService,
    pub service_entry: ServiceEntry,
}

/// Builds the routes for every expose entry of a package.
pub fn routes(pkg: &Package, owner: &Owner, cluster: &ClusterInfo) -> Vec<ExposeRoutes> {
    pkg.expose()
        .iter()
        .map(|expose| ExposeRoutes {
            fqdn: cluster.gateway_fqdn(expose.gateway, &expose.host),
            virtual_service: virtual_service(expose, owner, cluster),
            service_entry: service_entry(expose, owner, cluster),
        })
        .collect()
}

/// Routes the exposed host from the selected gateway to the service.
pub fn virtual_service(expose: &Expose, owner: &Owner, cluster: &ClusterInfo) -> VirtualService {
    let fqdn = cluster.gateway_fqdn(expose.gateway, &expose.host);
    let gateway = expose.gateway;
    let destination = vec![RouteDestination::new(
        cluster.service_dns_name(&owner.namespace, &expose.service),
        expose.port,
    )];

    let mut spec = VirtualServiceSpec {
        hosts: vec![fqdn.clone()],
        gateways: vec![format!("istio-{gateway}-gateway/{gateway}-gateway")],
        ..Default::default()
    };

    match expose.mode {
        RouteMode::Tcp => {
            spec.tcp = vec![TcpRoute {
                r#match: vec![L4MatchAttributes {
                    port: Some(expose.port),
                    gateways: vec![],
                }],
                route: destination.clone(),
            }];
        }
        RouteMode::Http => {
            let advanced = expose.advanced_http.clone().unwrap_or_default();
            spec.http = vec![HttpRoute {
                name: None,
                r#match: expose.matches().to_vec(),
                route: destination.clone(),
                rewrite: advanced.rewrite,
                timeout: advanced.timeout,
                retries: advanced.retries,
            }];
        }
    }

    if gateway == Gateway::Passthrough {
        spec.tls = vec![TlsRoute {
            r#match: vec![TlsMatchAttributes {
                sni_hosts: vec![fqdn],
                port: Some(443),
                gateways: vec![],
            }],
            route: destination,
        }];
    }

    VirtualService {
        metadata: owner.metadata(virtual_service_name(&owner.name, expose)),
        spec,
    }
}

/// Makes the exposed host resolvable inside the mesh through its gateway.
pub fn service_entry(expose: &Expose, owner: &Owner, cluster: &ClusterInfo) -> ServiceEntry {
    let gateway = expose.gateway;
    let address = cluster.service_dns_name(
        &format!("istio-{gateway}-gateway"),
        &format!("{gateway}-ingressgateway"),
    );

    ServiceEntry {
        metadata: owner.metadata(sanitize_resource_name(&format!(
            "{}-{}-{}",
            owner.name, gateway, expose.host
        ))),
        spec: ServiceEntrySpec {
            hosts: vec![cluster.gateway_fqdn(gateway, &expose.host)],
            ports: vec![Port {
                number: 443,
                protocol: "HTTPS".to_string(),
                name: "https".to_string(),
            }],
            location: Some(Location::MeshInternal),
            resolution: Some(Resolution::Dns),
            endpoints: vec![WorkloadEntry { address }],
            export_to: vec![],
        },
    }
}

/// Names an expose entry's route after its description or, lacking one,
/// after everything that distinguishes it from other entries.
pub fn virtual_service_name(pkg: &str, expose: &Expose) -> String {
    let suffix = match expose.description.as_deref().filter(|d| !d.is_empty()) {
        Some(description) => description.to_string(),
        None => {
            let matches = expose
                .matches()
                .iter()
                .filter_map(|m| m.name.as_deref())
                .collect::<Vec<_>>()
                .join("-");
            format!(
                "{}-{}-{}-{}",
                expose.host, expose.port, expose.service, matches
            )
        }
    };
    sanitize_resource_name(&format!("{pkg}-{}-{suffix}", expose.gateway))
}
