use crate::{
    k8s::{Api, Client, Package, ResourceExt},
    reconcile::{self, KubeCluster, Reconciler},
};
use futures::prelude::*;
use kube::runtime::{
    controller::{Action, Controller},
    finalizer::{self, finalizer, Event},
    watcher,
};
use std::{sync::Arc, time::Duration};
use tracing::{info_span, Instrument};

/// Guards packages until their shared egress hosts are released.
pub const FINALIZER: &str = "uds.dev/finalizer";

const ERROR_REQUEUE: Duration = Duration::from_secs(5);

struct Context {
    client: Client,
    reconciler: Reconciler<KubeCluster>,
}

type Error = finalizer::Error<reconcile::Error>;

/// Watches packages across all namespaces and reconciles each change until
/// `drain` is signaled.
pub(crate) async fn run(client: Client, reconciler: Reconciler<KubeCluster>, drain: drain::Watch) {
    let packages = Api::<Package>::all(client.clone());
    let ctx = Arc::new(Context { client, reconciler });

    let (close_tx, close_rx) = tokio::sync::oneshot::channel::<()>();
    let controller = Controller::new(packages, watcher::Config::default())
        .graceful_shutdown_on(close_rx.map(|_| {}))
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => tracing::trace!(namespace = ?obj.namespace, name = %obj.name, "Reconciled"),
                Err(error) => tracing::debug!(%error, "Reconcile failed"),
            }
        });
    tokio::pin!(controller);

    tracing::info!("Watching packages");
    tokio::select! {
        _ = (&mut controller) => {}
        handle = drain.signaled() => {
            let _ = close_tx.send(());
            handle.release_after(controller).await;
        }
    }
}

async fn reconcile(pkg: Arc<Package>, ctx: Arc<Context>) -> Result<Action, Error> {
    let namespace = pkg.namespace().unwrap_or_default();
    let name = pkg.name_any();
    let api = Api::<Package>::namespaced(ctx.client.clone(), &namespace);

    finalizer(&api, FINALIZER, pkg, |event| async {
        match event {
            Event::Apply(pkg) => ctx.reconciler.reconcile(&pkg).await?,
            Event::Cleanup(pkg) => ctx.reconciler.remove(&pkg).await?,
        }
        Ok::<_, reconcile::Error>(Action::await_change())
    })
    .instrument(info_span!("package", %namespace, %name))
    .await
}

fn error_policy(pkg: Arc<Package>, error: &Error, _ctx: Arc<Context>) -> Action {
    tracing::warn!(
        namespace = ?pkg.namespace(),
        name = %pkg.name_any(),
        %error,
        "Requeueing package"
    );
    Action::requeue(ERROR_REQUEUE)
}
