//! Stored configuration profiles, keyed by payload identifier.

use kv_store::KvStore;

use crate::error::{Result, ServiceError};
use crate::models::codec::{decode_profile, encode_profile};
use crate::models::Profile;

pub const PROFILE_BUCKET: &str = "mdm.Profile";

#[derive(Clone)]
pub struct ProfileStore {
    kv: KvStore,
}

impl ProfileStore {
    pub async fn new(kv: KvStore) -> Result<Self> {
        kv.create_bucket_if_not_exists(PROFILE_BUCKET).await?;
        Ok(Self { kv })
    }

    pub async fn save(&self, profile: &Profile) -> Result<()> {
        profile.validate().map_err(ServiceError::BadRequest)?;
        self.kv
            .put(
                PROFILE_BUCKET,
                profile.identifier.as_bytes(),
                &encode_profile(profile),
            )
            .await?;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<Profile>> {
        let mut profiles = Vec::new();
        for (_, value) in self.kv.list(PROFILE_BUCKET).await? {
            profiles.push(decode_profile(&value)?);
        }
        Ok(profiles)
    }

    pub async fn profile_by_id(&self, identifier: &str) -> Result<Profile> {
        let Some(raw) = self.kv.get(PROFILE_BUCKET, identifier.as_bytes()).await? else {
            return Err(ServiceError::NotFound(format!("profile with id {identifier}")));
        };
        Ok(decode_profile(&raw)?)
    }

    pub async fn delete(&self, identifier: &str) -> Result<()> {
        if self.kv.get(PROFILE_BUCKET, identifier.as_bytes()).await?.is_none() {
            return Err(ServiceError::NotFound(format!("profile with id {identifier}")));
        }
        self.kv.delete(PROFILE_BUCKET, identifier.as_bytes()).await?;
        Ok(())
    }
}
