//! Device-user records (macOS multi-user MDM), fed by per-user TokenUpdates.

use event_bus::PubSub;
use kv_store::KvStore;
use tracing::error;
use uuid::Uuid;

use crate::error::{Result, ServiceError};
use crate::models::codec::{decode_user, encode_user};
use crate::models::events::{self, topics};
use crate::models::User;

pub const USER_BUCKET: &str = "mdm.Users";

// Maps UDIDs and user GUIDs to the user UUID.
const USER_INDEX_BUCKET: &str = "mdm.UserIdx";

#[derive(Clone)]
pub struct UserStore {
    kv: KvStore,
}

impl UserStore {
    pub async fn new(kv: KvStore) -> Result<Self> {
        kv.create_bucket_if_not_exists(USER_BUCKET).await?;
        kv.create_bucket_if_not_exists(USER_INDEX_BUCKET).await?;
        Ok(Self { kv })
    }

    pub async fn save(&self, user: &User) -> Result<()> {
        let mut tx = self.kv.begin().await?;
        for index in [&user.udid, &user.user_id] {
            if index.is_empty() {
                continue;
            }
            tx.put(USER_INDEX_BUCKET, index.as_bytes(), user.uuid.as_bytes())
                .await?;
        }
        tx.put(USER_BUCKET, user.uuid.as_bytes(), &encode_user(user))
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<User>> {
        let mut users = Vec::new();
        for (_, value) in self.kv.list(USER_BUCKET).await? {
            users.push(decode_user(&value)?);
        }
        Ok(users)
    }

    pub async fn user(&self, uuid: &str) -> Result<User> {
        let Some(raw) = self.kv.get(USER_BUCKET, uuid.as_bytes()).await? else {
            return Err(ServiceError::NotFound(format!("user with uuid {uuid}")));
        };
        Ok(decode_user(&raw)?)
    }

    pub async fn user_by_user_id(&self, user_id: &str) -> Result<User> {
        let Some(uuid) = self.kv.get(USER_INDEX_BUCKET, user_id.as_bytes()).await? else {
            return Err(ServiceError::NotFound(format!("user with id {user_id}")));
        };
        let Some(raw) = self.kv.get(USER_BUCKET, &uuid).await? else {
            return Err(ServiceError::NotFound(format!("user with id {user_id}")));
        };
        Ok(decode_user(&raw)?)
    }

    pub async fn device_users(&self, udid: &str) -> Result<Vec<User>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|u| u.udid == udid)
            .collect())
    }

    pub async fn delete_device_users(&self, udid: &str) -> Result<()> {
        let mut tx = self.kv.begin().await?;
        let users = tx.list(USER_BUCKET).await?;
        for (key, value) in users {
            let user = decode_user(&value)?;
            if user.udid == udid {
                tx.delete(USER_BUCKET, &key).await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }
}

/// Upsert users from per-user TokenUpdate messages. An incoming record with
/// no known user GUID clears the device's previous users first.
pub fn start_listener(store: UserStore, bus: PubSub) {
    let mut token_updates = bus.subscribe("users", topics::TOKEN_UPDATE);
    tokio::spawn(async move {
        while let Some(event) = token_updates.recv().await {
            if let Err(e) = on_token_update(&store, &event.message).await {
                error!(error = %e, "user projection update failed");
            }
        }
    });
}

async fn on_token_update(store: &UserStore, message: &[u8]) -> Result<()> {
    let event = events::decode_checkin_event(message)?;
    let msg = event.message()?;
    let mdm_protocol::CheckinMessage::TokenUpdate { udid, update, .. } = msg else {
        return Ok(());
    };
    if update.user_id.is_empty() {
        // only interested in user-channel updates
        return Ok(());
    }

    let mut user = match store.user_by_user_id(&update.user_id).await {
        Ok(user) => user,
        Err(e) if e.is_not_found() => User::default(),
        Err(e) => return Err(e),
    };
    if user.uuid.is_empty() {
        store.delete_device_users(&udid).await?;
        user.uuid = Uuid::new_v4().to_string();
    }
    user.udid = udid;
    user.user_id = update.user_id.clone();
    user.user_longname = update.user_long_name.clone();
    user.user_shortname = update.user_short_name.clone();
    user.auth_token = hex::encode(&update.token);
    store.save(&user).await
}
