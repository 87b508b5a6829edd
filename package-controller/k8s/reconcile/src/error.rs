pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Kube(#[from] kube::Error),

    #[error("unable to get the egress gateway namespace {namespace}")]
    EgressNamespace {
        namespace: String,
        #[source]
        source: kube::Error,
    },

    #[error("egress gateway is not enabled in the cluster: namespace {namespace} not found")]
    EgressGatewayDisabled { namespace: String },

    #[error("egress gateway service {namespace}/{name} not found")]
    EgressService { namespace: String, name: String },

    #[error("egress gateway does not expose port {port} for host {host}")]
    EgressPortNotExposed { host: String, port: u16 },

    #[error("found existing {kind} {namespace}/{name} with matching host {host}")]
    HostConflict {
        kind: &'static str,
        name: String,
        namespace: String,
        host: String,
    },

    #[error("Failed to apply {kind} for host {host}")]
    ApplyHost {
        kind: &'static str,
        host: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Failed to purge orphaned sidecar egress resources")]
    PurgeSharedEgress(#[source] Box<Error>),

    #[error("timed out patching status of {namespace}/{name}")]
    StatusTimeout { namespace: String, name: String },

    #[error("resource is missing metadata.{0}")]
    MissingMetadata(&'static str),
}
