//! The `xp` control-plane process: runs the Definition and Publication
//! meta-controllers, the Usage index refresher, and the Usage admission
//! server side by side, all torn down together on shutdown.

mod configuration;
mod telemetry;

use std::time::Duration;

use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::{Client, ResourceExt};
use tokio::sync::watch;
use tracing::{info, warn};

use xp_controller::{ControllerEngine, DefinitionReconciler, PublicationReconciler};
use xp_types::xrd::CompositeResourceDefinition;
use xp_webhook::{router, AdmissionState, UsageIndex};

const STATUS_FIELD_MANAGER: &str = "xp-definition-controller";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();
    let config = configuration::load_configuration()?;
    let client = Client::try_default().await?;
    let engine = ControllerEngine::new();

    let (cancel_tx, cancel_rx) = watch::channel(false);

    let definition_handle = tokio::spawn(run_definition_loop(
        client.clone(),
        engine.clone(),
        Duration::from_secs(config.controller.xrd_poll_interval_secs),
        cancel_rx.clone(),
    ));
    let publication_handle = tokio::spawn(run_publication_loop(
        client.clone(),
        engine.clone(),
        Duration::from_secs(config.controller.xrd_poll_interval_secs),
        cancel_rx.clone(),
    ));

    let usage_index = UsageIndex::new();
    let refresher_handle = tokio::spawn(xp_webhook::run_refresher(
        usage_index.clone(),
        client.clone(),
        Duration::from_secs(config.controller.usage_index_refresh_secs),
        cancel_rx.clone(),
    ));

    let admission_state = AdmissionState { client: client.clone(), index: usage_index };
    let app = router(admission_state);
    let addr = config.webhook.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "usage admission server listening");

    let mut shutdown_cancel_rx = cancel_rx.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = shutdown_cancel_rx.changed().await;
    });

    tokio::select! {
        result = server => {
            if let Err(err) = result {
                warn!(error = %err, "admission server exited with an error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    let _ = cancel_tx.send(true);
    let _ = tokio::join!(definition_handle, publication_handle, refresher_handle);
    Ok(())
}

/// List every `CompositeResourceDefinition` and run the Definition
/// Controller (§4.E) over each, patching the XRD's status back after.
async fn run_definition_loop(
    client: Client,
    engine: ControllerEngine,
    interval: Duration,
    mut cancel: watch::Receiver<bool>,
) {
    let reconciler = DefinitionReconciler::new(client.clone(), engine);
    let xrds: Api<CompositeResourceDefinition> = Api::all(client);
    loop {
        if *cancel.borrow() {
            return;
        }
        match xrds.list(&ListParams::default()).await {
            Ok(list) => {
                for mut xrd in list.items {
                    let name = xrd.name_any();
                    match reconciler.reconcile(&mut xrd).await {
                        Ok(_) => {
                            if let Err(err) = xrds
                                .patch_status(
                                    &name,
                                    &PatchParams::apply(STATUS_FIELD_MANAGER),
                                    &Patch::Merge(serde_json::json!({ "status": xrd.status })),
                                )
                                .await
                            {
                                warn!(error = %err, xrd = %name, "failed to patch XRD status");
                            }
                        }
                        Err(err) => warn!(error = %err, xrd = %name, "definition reconcile failed"),
                    }
                }
            }
            Err(err) => warn!(error = %err, "failed to list composite resource definitions"),
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel.changed() => return,
        }
    }
}

/// List every `CompositeResourceDefinition` and run the Publication
/// Controller (§4.F) over each; the claim schema has no status of its
/// own to write back.
async fn run_publication_loop(
    client: Client,
    engine: ControllerEngine,
    interval: Duration,
    mut cancel: watch::Receiver<bool>,
) {
    let reconciler = PublicationReconciler::new(client.clone(), engine);
    let xrds: Api<CompositeResourceDefinition> = Api::all(client);
    loop {
        if *cancel.borrow() {
            return;
        }
        match xrds.list(&ListParams::default()).await {
            Ok(list) => {
                for xrd in list.items {
                    if let Err(err) = reconciler.reconcile(&xrd).await {
                        warn!(error = %err, xrd = %xrd.name_any(), "publication reconcile failed");
                    }
                }
            }
            Err(err) => warn!(error = %err, "failed to list composite resource definitions"),
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel.changed() => return,
        }
    }
}
