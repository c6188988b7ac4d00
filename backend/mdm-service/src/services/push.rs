//! APNs push service.
//!
//! If the server boots without a push certificate the queued-command
//! subscriber parks on a watch barrier; uploading the certificate publishes
//! `ServerConfigUpdated`, which builds the client and releases the barrier.

use std::sync::Arc;

use event_bus::PubSub;
use mdm_apns::{ApnsClient, MdmPusher};
use tokio::sync::{watch, RwLock};
use tracing::{error, info, warn};

use crate::error::{Result, ServiceError};
use crate::models::events::{self, topics};
use crate::store::config::ConfigStore;
use crate::store::push_info::PushInfoStore;

pub struct PushService {
    store: PushInfoStore,
    client: RwLock<Option<Arc<dyn MdmPusher>>>,
    ready_tx: watch::Sender<bool>,
}

impl PushService {
    pub fn new(store: PushInfoStore, initial: Option<Arc<dyn MdmPusher>>) -> Arc<Self> {
        let ready = initial.is_some();
        let (ready_tx, _) = watch::channel(ready);
        Arc::new(Self {
            store,
            client: RwLock::new(initial),
            ready_tx,
        })
    }

    /// Send a wakeup push to a device (or user channel) by UDID. Returns the
    /// push notification id.
    pub async fn push(&self, udid: &str) -> Result<String> {
        let info = self.store.push_info(udid).await?;
        let client = self.client.read().await.clone().ok_or_else(|| {
            ServiceError::Internal("push certificate not configured".to_string())
        })?;
        client
            .push(&info.token, &info.push_magic, &info.mdm_topic)
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))
    }

    async fn wait_until_ready(&self) {
        let mut ready = self.ready_tx.subscribe();
        if *ready.borrow() {
            return;
        }
        info!("push: waiting for push certificate before enabling APNs delivery");
        while ready.changed().await.is_ok() {
            if *ready.borrow() {
                info!("push: service started");
                return;
            }
        }
    }
}

/// Rebuild the APNs client whenever the server config changes.
pub fn start_config_listener(svc: Arc<PushService>, config: ConfigStore, bus: &PubSub) {
    let mut config_events = bus.subscribe("push-server-configs", topics::CONFIG_UPDATED);
    tokio::spawn(async move {
        while config_events.recv().await.is_some() {
            let cert = match config.push_certificate().await {
                Ok(cert) => cert,
                Err(e) => {
                    warn!(error = %e, "push: could not get push certificate");
                    continue;
                }
            };
            match ApnsClient::from_pem_parts(&cert.cert_pem, &cert.key_pem) {
                Ok(client) => {
                    *svc.client.write().await = Some(Arc::new(client));
                    svc.ready_tx.send_replace(true);
                    info!("push: APNs client configured");
                }
                Err(e) => warn!(error = %e, "push: could not build APNs client"),
            }
        }
    });
}

/// Wake devices for queued commands. Push failures are logged and dropped;
/// the command stays queued and the device will pick it up on its next poll.
pub fn start_queued_listener(svc: Arc<PushService>, bus: &PubSub) {
    let mut queued = bus.subscribe("push-info", topics::COMMAND_QUEUED);
    tokio::spawn(async move {
        svc.wait_until_ready().await;
        while let Some(event) = queued.recv().await {
            let command = match events::decode_command_queued(&event.message) {
                Ok(cq) => cq,
                Err(e) => {
                    error!(error = %e, "decode queued command event");
                    continue;
                }
            };
            if let Err(e) = svc.push(&command.device_udid).await {
                error!(udid = %command.device_udid, error = %e, "push for queued command");
            }
        }
    });
}
