//! Push-addressable records, maintained from TokenUpdate messages.

use event_bus::PubSub;
use kv_store::KvStore;
use tracing::{debug, error};

use crate::error::{Result, ServiceError};
use crate::models::codec::{decode_push_info, encode_push_info};
use crate::models::events::{self, topics};
use crate::models::PushInfo;

pub const PUSH_INFO_BUCKET: &str = "mdm.PushInfo";

#[derive(Clone)]
pub struct PushInfoStore {
    kv: KvStore,
}

impl PushInfoStore {
    pub async fn new(kv: KvStore) -> Result<Self> {
        kv.create_bucket_if_not_exists(PUSH_INFO_BUCKET).await?;
        Ok(Self { kv })
    }

    pub async fn save(&self, info: &PushInfo) -> Result<()> {
        self.kv
            .put(PUSH_INFO_BUCKET, info.udid.as_bytes(), &encode_push_info(info))
            .await?;
        Ok(())
    }

    pub async fn push_info(&self, udid: &str) -> Result<PushInfo> {
        let Some(raw) = self.kv.get(PUSH_INFO_BUCKET, udid.as_bytes()).await? else {
            return Err(ServiceError::NotFound(format!("push info for udid {udid}")));
        };
        Ok(decode_push_info(&raw)?)
    }
}

/// Track token/magic/topic from TokenUpdates. Per-user updates are keyed by
/// the user GUID so users are push-addressable like devices.
pub fn start_listener(store: PushInfoStore, bus: PubSub) {
    let mut token_updates = bus.subscribe("push-info", topics::TOKEN_UPDATE);
    tokio::spawn(async move {
        while let Some(event) = token_updates.recv().await {
            if let Err(e) = on_token_update(&store, &event.message).await {
                error!(error = %e, "push info update failed");
            }
        }
    });
}

async fn on_token_update(store: &PushInfoStore, message: &[u8]) -> Result<()> {
    let event = events::decode_checkin_event(message)?;
    let msg = event.message()?;
    let mdm_protocol::CheckinMessage::TokenUpdate { udid, topic, update } = msg else {
        return Ok(());
    };
    let mut info = PushInfo {
        udid,
        token: hex::encode(&update.token),
        push_magic: update.push_magic.clone(),
        mdm_topic: topic,
    };
    if !update.user_id.is_empty() {
        info.udid = update.user_id.clone();
    }
    store.save(&info).await?;
    debug!(udid = %info.udid, "updated push info");
    Ok(())
}
