//! Device projection: materialized device records fed by check-in, connect
//! and DEP sync events.

use chrono::Utc;
use event_bus::PubSub;
use kv_store::KvStore;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{Result, ServiceError};
use crate::models::codec::{decode_device, encode_device};
use crate::models::events::{self, topics};
use crate::models::{DepProfileStatus, Device};

pub const DEVICE_BUCKET: &str = "mdm.Devices";

// Maps UDIDs and serial numbers to the device UUID.
const DEVICE_INDEX_BUCKET: &str = "mdm.DeviceIdx";

#[derive(Clone)]
pub struct DeviceStore {
    kv: KvStore,
}

impl DeviceStore {
    pub async fn new(kv: KvStore) -> Result<Self> {
        kv.create_bucket_if_not_exists(DEVICE_BUCKET).await?;
        kv.create_bucket_if_not_exists(DEVICE_INDEX_BUCKET).await?;
        Ok(Self { kv })
    }

    pub async fn save(&self, device: &Device) -> Result<()> {
        let mut tx = self.kv.begin().await?;
        for index in [&device.udid, &device.serial_number] {
            if index.is_empty() {
                continue;
            }
            tx.put(DEVICE_INDEX_BUCKET, index.as_bytes(), device.uuid.as_bytes())
                .await?;
        }
        tx.put(DEVICE_BUCKET, device.uuid.as_bytes(), &encode_device(device))
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<Device>> {
        let mut devices = Vec::new();
        for (_, value) in self.kv.list(DEVICE_BUCKET).await? {
            devices.push(decode_device(&value)?);
        }
        Ok(devices)
    }

    async fn by_index(&self, index: &str) -> Result<Option<Device>> {
        let Some(uuid) = self.kv.get(DEVICE_INDEX_BUCKET, index.as_bytes()).await? else {
            return Ok(None);
        };
        let Some(raw) = self.kv.get(DEVICE_BUCKET, &uuid).await? else {
            return Ok(None);
        };
        Ok(Some(decode_device(&raw)?))
    }

    pub async fn device_by_udid(&self, udid: &str) -> Result<Device> {
        self.by_index(udid)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("device with udid {udid}")))
    }

    pub async fn device_by_serial(&self, serial: &str) -> Result<Device> {
        self.by_index(serial)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("device with serial {serial}")))
    }
}

/// Subscribe the projection to the check-in, connect and DEP sync topics.
/// One long-lived task owns all five subscriptions, mirroring the single
/// writer the projection needs.
pub fn start_listener(store: DeviceStore, bus: PubSub) {
    let mut authenticate = bus.subscribe("devices", topics::AUTHENTICATE);
    let mut token_update = bus.subscribe("devices", topics::TOKEN_UPDATE);
    let mut checkout = bus.subscribe("devices", topics::CHECKOUT);
    let mut dep_sync = bus.subscribe("devices", topics::DEP_SYNC);
    let mut connect = bus.subscribe("devices", topics::CONNECT);

    tokio::spawn(async move {
        loop {
            let result = tokio::select! {
                Some(event) = authenticate.recv() => on_authenticate(&store, &event.message).await,
                Some(event) = token_update.recv() => on_token_update(&store, &bus, &event.message).await,
                Some(event) = checkout.recv() => on_checkout(&store, &event.message).await,
                Some(event) = dep_sync.recv() => on_dep_sync(&store, &event.message).await,
                Some(event) = connect.recv() => on_connect(&store, &event.message).await,
                else => break,
            };
            if let Err(e) = result {
                error!(error = %e, "device projection update failed");
            }
        }
    });
}

async fn on_authenticate(store: &DeviceStore, message: &[u8]) -> Result<()> {
    let event = events::decode_checkin_event(message)?;
    let msg = event.message()?;
    let mdm_protocol::CheckinMessage::Authenticate { udid, topic, identity } = msg else {
        return Ok(());
    };

    // DEP-synced devices exist before first check-in, keyed by serial.
    let mut device = store
        .by_index(&identity.serial_number)
        .await?
        .unwrap_or_default();

    match store.by_index(&udid).await? {
        None => info!(serial = %identity.serial_number, "checking in new device"),
        Some(existing) => {
            info!(serial = %identity.serial_number, "re-enrolling device");
            device = existing;
            device.enrolled = false;
        }
    }

    if device.uuid.is_empty() {
        device.uuid = Uuid::new_v4().to_string();
    }
    device.udid = udid;
    device.os_version = identity.os_version;
    device.build_version = identity.build_version;
    device.product_name = identity.product_name;
    device.serial_number = identity.serial_number;
    device.imei = identity.imei;
    device.meid = identity.meid;
    device.device_name = identity.device_name;
    device.model = identity.model;
    device.model_name = identity.model_name;
    device.mdm_topic = topic;
    device.last_checkin = Some(Utc::now());

    store.save(&device).await
}

async fn on_token_update(store: &DeviceStore, bus: &PubSub, message: &[u8]) -> Result<()> {
    let event = events::decode_checkin_event(message)?;
    let msg = event.message()?;
    let mdm_protocol::CheckinMessage::TokenUpdate { udid, update, .. } = msg else {
        return Ok(());
    };
    if !update.user_id.is_empty() {
        // user-channel token updates belong to the user projection
        return Ok(());
    }

    let mut device = store.device_by_udid(&udid).await?;
    device.token = hex::encode(&update.token);
    device.push_magic = update.push_magic;
    device.unlock_token = update
        .unlock_token
        .as_ref()
        .map(hex::encode)
        .unwrap_or_default();
    device.awaiting_configuration = update.awaiting_configuration;
    device.last_checkin = Some(Utc::now());

    let newly_enrolled = !device.enrolled;
    device.enrolled = true;
    store.save(&device).await?;

    if newly_enrolled {
        info!(udid = %device.udid, "device enrolled");
        bus.publish(topics::DEVICE_ENROLLED, message);
    }
    Ok(())
}

async fn on_checkout(store: &DeviceStore, message: &[u8]) -> Result<()> {
    let event = events::decode_checkin_event(message)?;
    let msg = event.message()?;
    let mdm_protocol::CheckinMessage::CheckOut { udid, .. } = msg else {
        return Ok(());
    };
    let mut device = store.device_by_udid(&udid).await?;
    device.enrolled = false;
    device.last_checkin = Some(Utc::now());
    store.save(&device).await
}

async fn on_connect(store: &DeviceStore, message: &[u8]) -> Result<()> {
    let event = events::decode_connect_event(message)?;
    let mut device = match store.device_by_udid(&event.udid).await {
        Ok(device) => device,
        Err(ServiceError::NotFound(_)) => {
            warn!(udid = %event.udid, "connect from unknown device");
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    device.last_checkin = Some(Utc::now());
    if event.request_type == "DeviceInformation" && !event.raw.is_empty() {
        device.last_query_response = event.raw.clone();
    }
    store.save(&device).await
}

async fn on_dep_sync(store: &DeviceStore, message: &[u8]) -> Result<()> {
    let event = events::decode_dep_sync_event(message)?;
    info!(count = event.devices.len(), "got devices from DEP");
    for dep in &event.devices {
        let mut device = store.by_index(&dep.serial_number).await?.unwrap_or_default();
        if device.uuid.is_empty() {
            device.uuid = Uuid::new_v4().to_string();
        } else {
            info!(serial = %dep.serial_number, "existing device reported by DEP");
        }
        device.serial_number = dep.serial_number.clone();
        device.model = dep.model.clone();
        device.description = dep.description.clone();
        device.color = dep.color.clone();
        device.asset_tag = dep.asset_tag.clone();
        device.dep_device = true;
        device.dep_profile_status = DepProfileStatus::from_str(&dep.profile_status);
        device.dep_profile_uuid = dep.profile_uuid.clone();
        device.dep_profile_assign_time = dep.profile_assign_time;
        device.dep_profile_push_time = dep.profile_push_time;
        device.dep_profile_assigned_date = dep.device_assigned_date;
        device.dep_profile_assigned_by = dep.device_assigned_by.clone();
        store.save(&device).await?;
    }
    Ok(())
}
