//! Persist-then-deliver routing for direct and channel messages.
//!
//! A message is always written before anyone is told about it. Live
//! delivery is best effort: offline users and full queues are recorded in
//! the [`DeliveryReport`] and are not errors.

use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use tradepost_shared::protocol::ServerEvent;
use tradepost_shared::{ChannelMessage, MessageType, UserRef};

use crate::error::ServerError;
use crate::presence::PresenceRegistry;
use crate::store::Store;

/// Where one message went.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReport {
    pub message_id: Uuid,
    pub delivered: Vec<UserRef>,
    pub offline: Vec<UserRef>,
    /// Online, but their outbound queue was full or closed.
    pub dropped: Vec<UserRef>,
}

impl DeliveryReport {
    fn new(message_id: Uuid) -> Self {
        Self {
            message_id,
            delivered: Vec::new(),
            offline: Vec::new(),
            dropped: Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct FanOut {
    store: Store,
    presence: PresenceRegistry,
}

impl FanOut {
    pub fn new(store: Store, presence: PresenceRegistry) -> Self {
        Self { store, presence }
    }

    /// Store a direct message and push `receiveMessage` to the recipient
    /// and the sender.
    pub async fn send_direct(
        &self,
        sender: UserRef,
        recipient: UserRef,
        message_type: MessageType,
        content: Option<String>,
        file_url: Option<String>,
    ) -> Result<DeliveryReport, ServerError> {
        let message = self
            .store
            .call(move |db| {
                db.create_direct_message(sender, recipient, message_type, content, file_url)
            })
            .await?;

        let mut report = DeliveryReport::new(message.id);
        let event = ServerEvent::ReceiveMessage(message);

        let mut targets = vec![recipient];
        if sender != recipient {
            targets.push(sender);
        }
        self.deliver_all(&targets, &event, &mut report).await;

        debug!(
            message = %report.message_id,
            sender = %sender,
            recipient = %recipient,
            delivered = report.delivered.len(),
            "Routed direct message"
        );
        Ok(report)
    }

    /// Store a channel message and push `receive-channel-message` to every
    /// member and the admin, as of just after the append.
    pub async fn send_channel(
        &self,
        channel_id: Uuid,
        sender: UserRef,
        message_type: MessageType,
        content: Option<String>,
        file_url: Option<String>,
    ) -> Result<DeliveryReport, ServerError> {
        let (message, targets) = self
            .store
            .call(move |db| {
                let message =
                    db.post_channel_message(channel_id, sender, message_type, content, file_url)?;
                let targets = db.members_and_admin(channel_id)?;
                Ok((message, targets))
            })
            .await?;

        let mut report = DeliveryReport::new(message.id);
        let event = ServerEvent::ReceiveChannelMessage(ChannelMessage {
            message,
            channel_id,
        });
        self.deliver_all(&targets, &event, &mut report).await;

        debug!(
            message = %report.message_id,
            channel = %channel_id,
            sender = %sender,
            targets = targets.len(),
            delivered = report.delivered.len(),
            offline = report.offline.len(),
            "Routed channel message"
        );
        Ok(report)
    }

    async fn deliver_all(&self, targets: &[UserRef], event: &ServerEvent, report: &mut DeliveryReport) {
        for user in targets {
            match self.presence.lookup(user).await {
                Some(handle) => {
                    if handle.deliver(event.clone()) {
                        report.delivered.push(*user);
                    } else {
                        report.dropped.push(*user);
                    }
                }
                None => report.offline.push(*user),
            }
        }
    }
}
