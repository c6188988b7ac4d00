//! Blocked-device list. Presence of a UDID forces checkout on next Connect.

use kv_store::KvStore;

use crate::error::Result;

pub const REMOVE_BUCKET: &str = "mdm.RemoveDevice";

#[derive(Clone)]
pub struct BlockStore {
    kv: KvStore,
}

impl BlockStore {
    pub async fn new(kv: KvStore) -> Result<Self> {
        kv.create_bucket_if_not_exists(REMOVE_BUCKET).await?;
        Ok(Self { kv })
    }

    pub async fn block(&self, udid: &str) -> Result<()> {
        self.kv.put(REMOVE_BUCKET, udid.as_bytes(), udid.as_bytes()).await?;
        Ok(())
    }

    pub async fn unblock(&self, udid: &str) -> Result<()> {
        self.kv.delete(REMOVE_BUCKET, udid.as_bytes()).await?;
        Ok(())
    }

    pub async fn is_blocked(&self, udid: &str) -> Result<bool> {
        Ok(self.kv.get(REMOVE_BUCKET, udid.as_bytes()).await?.is_some())
    }
}
