//! Webhook dispatcher: re-emits device responses to a callback URL.
//! Best effort, at most once, no retry.

use std::time::Duration;

use event_bus::PubSub;
use tracing::error;

use crate::models::events::{self, topics};

const CONTENT_TYPE: &str = "application/x-apple-aspen-mdm";

pub fn start(bus: &PubSub, callback_url: String) {
    let mut connect_events = bus.subscribe("commandWebhook", topics::CONNECT);
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .expect("reqwest client");

    tokio::spawn(async move {
        while let Some(event) = connect_events.recv().await {
            let connect = match events::decode_connect_event(&event.message) {
                Ok(ev) => ev,
                Err(e) => {
                    error!(error = %e, "decode connect event for webhook");
                    continue;
                }
            };
            let result = client
                .post(&callback_url)
                .header("Content-Type", CONTENT_TYPE)
                .body(connect.raw)
                .send()
                .await;
            if let Err(e) = result {
                error!(error = %e, "error sending command response");
            }
        }
    });
}
