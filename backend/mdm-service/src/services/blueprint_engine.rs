//! Blueprint engine: applies enrollment-time bundles to devices.

use event_bus::PubSub;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::models::events::{self, topics};
use crate::models::{Blueprint, APPLY_AT_ENROLL};
use crate::services::command::CommandService;
use crate::store::blueprints::BlueprintStore;
use crate::store::profiles::ProfileStore;
use crate::store::users::UserStore;
use mdm_protocol::{AdminAccount, CheckinMessage, Command};

#[derive(Clone)]
pub struct BlueprintEngine {
    blueprints: BlueprintStore,
    profiles: ProfileStore,
    users: UserStore,
    commands: CommandService,
}

impl BlueprintEngine {
    pub fn new(
        blueprints: BlueprintStore,
        profiles: ProfileStore,
        users: UserStore,
        commands: CommandService,
    ) -> Self {
        Self {
            blueprints,
            profiles,
            users,
            commands,
        }
    }

    /// Emit the blueprint's commands for one device: admin accounts first,
    /// then applications, then profiles.
    pub async fn apply_to_device(&self, blueprint: &Blueprint, udid: &str) -> Result<()> {
        for user_uuid in &blueprint.user_uuids {
            let user = match self.users.user(user_uuid).await {
                Ok(user) => user,
                Err(e) => {
                    warn!(
                        user_uuid,
                        blueprint = %blueprint.name,
                        error = %e,
                        "user referenced by blueprint not added"
                    );
                    continue;
                }
            };
            self.commands
                .new_command(
                    udid,
                    Command::AccountConfiguration {
                        skip_primary_setup_account_creation: blueprint
                            .skip_primary_setup_account_creation,
                        set_primary_setup_account_as_regular_user: blueprint
                            .set_primary_setup_account_as_regular_user,
                        auto_setup_admin_accounts: vec![AdminAccount {
                            short_name: user.user_shortname,
                            full_name: user.user_longname,
                            password_hash: user.password_hash,
                            hidden: user.hidden,
                        }],
                    },
                )
                .await?;
        }

        for manifest_url in &blueprint.application_urls {
            self.commands
                .new_command(
                    udid,
                    Command::InstallApplication {
                        manifest_url: manifest_url.clone(),
                        management_flags: Some(1),
                        itunes_store_id: None,
                        identifier: String::new(),
                        not_managed: false,
                        change_management_state: String::new(),
                        options: None,
                    },
                )
                .await?;
        }

        for identifier in &blueprint.profile_identifiers {
            let profile = match self.profiles.profile_by_id(identifier).await {
                Ok(profile) => profile,
                Err(e) if e.is_not_found() => {
                    warn!(
                        identifier,
                        blueprint = %blueprint.name,
                        "profile referenced by blueprint does not exist"
                    );
                    continue;
                }
                Err(e) => return Err(e),
            };
            self.commands
                .new_command(
                    udid,
                    Command::InstallProfile {
                        payload: profile.mobileconfig,
                    },
                )
                .await?;
        }
        Ok(())
    }
}

/// Apply enroll-triggered blueprints whenever a device (not a user channel)
/// finishes enrollment; acknowledge DEP's awaiting-configuration state.
pub fn start_listener(engine: BlueprintEngine, bus: &PubSub) {
    let mut enrolled = bus.subscribe("applyAtEnroll", topics::DEVICE_ENROLLED);
    tokio::spawn(async move {
        while let Some(event) = enrolled.recv().await {
            if let Err(e) = on_enrolled(&engine, &event.message).await {
                error!(error = %e, "apply blueprints on enrollment");
            }
        }
    });
}

async fn on_enrolled(engine: &BlueprintEngine, message: &[u8]) -> Result<()> {
    let event = events::decode_checkin_event(message)?;
    let CheckinMessage::TokenUpdate { udid, update, .. } = event.message()? else {
        return Ok(());
    };
    if !update.user_id.is_empty() {
        // skip user-channel token updates
        return Ok(());
    }

    let blueprints = engine.blueprints.blueprints_by_apply_at(APPLY_AT_ENROLL).await?;
    for blueprint in &blueprints {
        info!(blueprint = %blueprint.name, udid = %udid, "applying blueprint");
        if let Err(e) = engine.apply_to_device(blueprint, &udid).await {
            error!(blueprint = %blueprint.name, error = %e, "apply blueprint");
        }
    }

    if update.awaiting_configuration {
        engine
            .commands
            .new_command(&udid, Command::DeviceConfigured)
            .await?;
    }
    Ok(())
}
