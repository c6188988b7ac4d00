//! Connect service: accepts device responses and hands out the next command.

use event_bus::PubSub;
use tracing::info;

use crate::error::{Result, ServiceError};
use crate::models::events::{encode_connect_event, topics, ConnectEvent};
use crate::store::block::BlockStore;
use crate::store::queue::CommandQueue;
use mdm_protocol::ConnectResponse;

#[derive(Clone)]
pub struct ConnectService {
    queue: CommandQueue,
    bus: PubSub,
    block: BlockStore,
}

impl ConnectService {
    pub fn new(queue: CommandQueue, bus: PubSub, block: BlockStore) -> Self {
        Self { queue, bus, block }
    }

    /// Record the response and return the next command's plist, if any.
    /// A blocked UDID short-circuits into a forced checkout (401) before the
    /// queue is touched.
    pub async fn acknowledge(
        &self,
        response: &ConnectResponse,
        raw: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        if self.block.is_blocked(&response.udid).await? {
            info!(udid = %response.udid, "blocked device connected, forcing checkout");
            return Err(ServiceError::Checkout);
        }

        let event = ConnectEvent::new(response, raw.to_vec());
        self.bus.publish(topics::CONNECT, &encode_connect_event(&event));

        let command = self.queue.next(response).await?;
        Ok(command.map(|c| c.payload))
    }
}
