//! Blueprint storage: bundles applied to devices on enrollment.

use kv_store::KvStore;

use crate::error::{Result, ServiceError};
use crate::models::codec::{decode_blueprint, encode_blueprint};
use crate::models::Blueprint;
use crate::store::profiles::ProfileStore;

pub const BLUEPRINT_BUCKET: &str = "mdm.Blueprint";

// Maps blueprint names to the blueprint UUID.
const BLUEPRINT_INDEX_BUCKET: &str = "mdm.BlueprintIdx";

#[derive(Clone)]
pub struct BlueprintStore {
    kv: KvStore,
    profiles: ProfileStore,
}

impl BlueprintStore {
    pub async fn new(kv: KvStore, profiles: ProfileStore) -> Result<Self> {
        kv.create_bucket_if_not_exists(BLUEPRINT_BUCKET).await?;
        kv.create_bucket_if_not_exists(BLUEPRINT_INDEX_BUCKET).await?;
        Ok(Self { kv, profiles })
    }

    /// Save after verifying the blueprint and that every referenced profile
    /// identifier exists.
    pub async fn save(&self, blueprint: &Blueprint) -> Result<()> {
        blueprint.verify().map_err(ServiceError::BadRequest)?;
        for identifier in &blueprint.profile_identifiers {
            self.profiles.profile_by_id(identifier).await.map_err(|e| {
                if e.is_not_found() {
                    ServiceError::BadRequest(format!(
                        "blueprint {} references unknown profile {identifier}",
                        blueprint.name
                    ))
                } else {
                    e
                }
            })?;
        }

        let mut tx = self.kv.begin().await?;
        tx.put(
            BLUEPRINT_INDEX_BUCKET,
            blueprint.name.as_bytes(),
            blueprint.uuid.as_bytes(),
        )
        .await?;
        tx.put(
            BLUEPRINT_BUCKET,
            blueprint.uuid.as_bytes(),
            &encode_blueprint(blueprint),
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<Blueprint>> {
        let mut blueprints = Vec::new();
        for (_, value) in self.kv.list(BLUEPRINT_BUCKET).await? {
            blueprints.push(decode_blueprint(&value)?);
        }
        Ok(blueprints)
    }

    pub async fn blueprint_by_name(&self, name: &str) -> Result<Blueprint> {
        let Some(uuid) = self.kv.get(BLUEPRINT_INDEX_BUCKET, name.as_bytes()).await? else {
            return Err(ServiceError::NotFound(format!("blueprint named {name}")));
        };
        let Some(raw) = self.kv.get(BLUEPRINT_BUCKET, &uuid).await? else {
            return Err(ServiceError::NotFound(format!("blueprint named {name}")));
        };
        Ok(decode_blueprint(&raw)?)
    }

    pub async fn blueprints_by_apply_at(&self, trigger: &str) -> Result<Vec<Blueprint>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|bp| bp.applies_at(trigger))
            .collect())
    }

    pub async fn delete(&self, name: &str) -> Result<()> {
        let blueprint = self.blueprint_by_name(name).await?;
        let mut tx = self.kv.begin().await?;
        tx.delete(BLUEPRINT_INDEX_BUCKET, name.as_bytes()).await?;
        tx.delete(BLUEPRINT_BUCKET, blueprint.uuid.as_bytes()).await?;
        tx.commit().await?;
        Ok(())
    }
}
