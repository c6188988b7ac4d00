//! DEP sync loop: cursor-based fetch/sync against Apple's DEP API.
//!
//! The loop has two phases. FETCH pages through the full device list until
//! Apple reports the cursor exhausted; SYNC then polls for changes on a
//! 30-minute tick. An expired cursor drops the loop back to FETCH with an
//! empty cursor. The loop parks until a DEP token arrives on the bus.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dep_client::{Config as DepConfig, DepClient};
use event_bus::PubSub;
use kv_store::KvStore;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};
use tracing::{error, info, warn};

use crate::error::Result;
use crate::models::events::{encode_dep_sync_event, topics, DepSyncEvent};
use crate::models::DepToken;

pub const DEP_CONFIG_BUCKET: &str = "mdm.DEPConfig";

const CONFIG_KEY: &[u8] = b"configuration";
const FETCH_LIMIT: u32 = 100;
const SYNC_TICK: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cursor {
    pub value: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Cursor {
    // A cursor is valid for a week.
    pub fn valid(&self) -> bool {
        match self.created_at {
            Some(created_at) => Utc::now() - created_at < chrono::Duration::days(7),
            None => false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SyncState {
    cursor: Cursor,
}

pub struct DepSyncer {
    kv: KvStore,
    bus: PubSub,
    client: RwLock<Option<Arc<DepClient>>>,
    client_ready: watch::Sender<bool>,
    depsim_url: Option<String>,
}

impl DepSyncer {
    /// Build the syncer and start its background tasks. `initial_client` is
    /// present when a DEP token already exists in the config store (or a
    /// depsim override is configured).
    pub async fn start(
        kv: KvStore,
        bus: PubSub,
        initial_client: Option<Arc<DepClient>>,
        depsim_url: Option<String>,
    ) -> Result<Arc<Self>> {
        kv.create_bucket_if_not_exists(DEP_CONFIG_BUCKET).await?;

        let ready = initial_client.is_some();
        let (client_ready, _) = watch::channel(ready);
        let syncer = Arc::new(Self {
            kv,
            bus,
            client: RwLock::new(initial_client),
            client_ready,
            depsim_url,
        });

        start_token_listener(syncer.clone());
        start_run_loop(syncer.clone());
        Ok(syncer)
    }

    pub async fn client(&self) -> Option<Arc<DepClient>> {
        self.client.read().await.clone()
    }

    async fn load_state(&self) -> Result<SyncState> {
        let Some(raw) = self.kv.get(DEP_CONFIG_BUCKET, CONFIG_KEY).await? else {
            return Ok(SyncState::default());
        };
        Ok(serde_json::from_slice(&raw).unwrap_or_default())
    }

    async fn save_state(&self, state: &SyncState) -> Result<()> {
        let raw = serde_json::to_vec(state)
            .map_err(|e| crate::error::ServiceError::Internal(e.to_string()))?;
        self.kv.put(DEP_CONFIG_BUCKET, CONFIG_KEY, &raw).await?;
        info!(cursor = %state.cursor.value, "saved DEP cursor");
        Ok(())
    }

    async fn wait_for_client(&self) -> Arc<DepClient> {
        let mut ready = self.client_ready.subscribe();
        loop {
            if let Some(client) = self.client.read().await.clone() {
                return client;
            }
            info!("depsync: waiting for DEP token to be added before starting sync");
            if ready.changed().await.is_err() {
                // unreachable outside teardown: the sender lives on this
                // DepSyncer, so it only drops when the run task does too.
                // Park rather than spin if that race is ever lost.
                futures::future::pending::<()>().await;
            }
        }
    }

    fn publish_devices(&self, devices: Vec<dep_client::Device>) {
        let event = DepSyncEvent::new(devices);
        self.bus.publish(topics::DEP_SYNC, &encode_dep_sync_event(&event));
    }

    /// Run fetch/sync forever. Transport errors back off exponentially,
    /// capped at the sync tick, with the cursor saved at every transition so
    /// a restart resumes where we left off.
    async fn run(&self) -> Result<()> {
        let mut state = self.load_state().await?;
        if state.cursor.valid() {
            info!(cursor = %state.cursor.value, "loaded DEP config with cursor");
        } else {
            state.cursor = Cursor::default();
        }

        let mut backoff = Duration::from_secs(10);
        let mut fetching = true;

        loop {
            let client = self.wait_for_client().await;

            if fetching {
                match client.fetch_devices(FETCH_LIMIT, &state.cursor.value).await {
                    Ok(response) => {
                        backoff = Duration::from_secs(10);
                        info!(
                            more = response.more_to_follow,
                            cursor = %response.cursor,
                            fetched = response.devices.len(),
                            "fetched DEP devices"
                        );
                        state.cursor = Cursor {
                            value: response.cursor.clone(),
                            created_at: Some(Utc::now()),
                        };
                        self.save_state(&state).await?;
                        self.publish_devices(response.devices);
                        if !response.more_to_follow {
                            fetching = false;
                        }
                    }
                    Err(e) if e.contains("EXHAUSTED_CURSOR") => {
                        fetching = false;
                    }
                    Err(e) => {
                        error!(error = %e, "DEP fetch failed");
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(SYNC_TICK);
                    }
                }
                continue;
            }

            match client.sync_devices(&state.cursor.value).await {
                Ok(response) => {
                    backoff = Duration::from_secs(10);
                    if !response.devices.is_empty() {
                        info!(
                            more = response.more_to_follow,
                            cursor = %response.cursor,
                            synced = response.devices.len(),
                            "synced DEP devices"
                        );
                    }
                    state.cursor = Cursor {
                        value: response.cursor.clone(),
                        created_at: Some(Utc::now()),
                    };
                    self.save_state(&state).await?;
                    if !response.devices.is_empty() {
                        self.publish_devices(response.devices);
                    }
                    if !response.more_to_follow {
                        tokio::time::sleep(SYNC_TICK).await;
                    }
                }
                Err(e) if e.contains("EXPIRED_CURSOR") => {
                    warn!("DEP cursor expired, restarting fetch");
                    state.cursor = Cursor::default();
                    fetching = true;
                }
                Err(e) => {
                    error!(error = %e, "DEP sync failed");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(SYNC_TICK);
                }
            }
        }
    }
}

/// Swap in a DEP client whenever a token lands on the bus.
fn start_token_listener(syncer: Arc<DepSyncer>) {
    let mut token_added = syncer.bus.subscribe("token-events", topics::TOKEN_ADDED);
    tokio::spawn(async move {
        while let Some(event) = token_added.recv().await {
            let token: DepToken = match serde_json::from_slice(&event.message) {
                Ok(token) => token,
                Err(e) => {
                    error!(error = %e, "unmarshal DEP token event");
                    continue;
                }
            };
            let config = match &syncer.depsim_url {
                Some(url) => DepConfig::new(token.credentials()).with_server_url(url),
                None => DepConfig::new(token.credentials()),
            };
            match DepClient::new(config) {
                Ok(client) => {
                    *syncer.client.write().await = Some(Arc::new(client));
                    syncer.client_ready.send_replace(true);
                    info!("DEP client configured from token");
                }
                Err(e) => error!(error = %e, "creating new DEP client"),
            }
        }
    });
}

fn start_run_loop(syncer: Arc<DepSyncer>) {
    tokio::spawn(async move {
        if let Err(e) = syncer.run().await {
            error!(error = %e, "DEP watcher failed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_cursor_is_valid() {
        let cursor = Cursor {
            value: "C".to_string(),
            created_at: Some(Utc::now() - chrono::Duration::days(1)),
        };
        assert!(cursor.valid());
    }

    #[test]
    fn eight_day_old_cursor_is_invalid() {
        let cursor = Cursor {
            value: "C".to_string(),
            created_at: Some(Utc::now() - chrono::Duration::days(8)),
        };
        assert!(!cursor.valid());
    }

    #[test]
    fn cursor_without_timestamp_is_invalid() {
        assert!(!Cursor::default().valid());
    }
}
