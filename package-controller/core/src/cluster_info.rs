use crate::k8s::package::Gateway;

/// Holds cluster-wide configuration consulted while synthesizing objects.
#[derive(Clone, Debug)]
pub struct ClusterInfo {
    /// The domain tenant hosts are exposed under, e.g. "uds.dev".
    pub domain: String,

    /// The domain admin hosts are exposed under, e.g. "admin.uds.dev".
    pub admin_domain: String,

    /// E.g. "cluster.local"
    pub dns_domain: String,

    /// The namespace of the shared egress gateway.
    pub egress_namespace: String,

    /// The name of the shared egress gateway's Service. Its pods carry an
    /// `app` label with the same value.
    pub egress_service: String,
}

impl Default for ClusterInfo {
    fn default() -> Self {
        Self {
            domain: "uds.dev".to_string(),
            admin_domain: "admin.uds.dev".to_string(),
            dns_domain: "cluster.local".to_string(),
            egress_namespace: "istio-egress-gateway".to_string(),
            egress_service: "egressgateway".to_string(),
        }
    }
}

impl ClusterInfo {
    pub fn service_dns_name(&self, ns: &str, svc: &str) -> String {
        format!("{}.{}.svc.{}", svc, ns, self.dns_domain)
    }

    /// The fully-qualified host an expose entry is served under.
    pub fn gateway_fqdn(&self, gateway: Gateway, host: &str) -> String {
        let domain = match gateway {
            Gateway::Admin => &self.admin_domain,
            Gateway::Tenant | Gateway::Passthrough => &self.domain,
        };
        format!("{host}.{domain}")
    }

    pub(crate) fn egress_gateway_host(&self) -> String {
        self.service_dns_name(&self.egress_namespace, &self.egress_service)
    }
}
