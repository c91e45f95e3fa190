/// Room broadcaster: message fan-out and typing relay
use super::{ConnectionId, ConnectionRegistry, RoomId, ServerEvent, TypingSignal};
use crate::ledger::{DirectMessage, GroupMessage};

/// Publishes events to rooms of the shared registry
#[derive(Clone)]
pub struct RoomBroadcaster {
    registry: ConnectionRegistry,
}

impl RoomBroadcaster {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Deliver an event to every connection joined to `room`
    pub async fn publish(&self, room: &RoomId, event: ServerEvent) -> usize {
        let delivered = self.registry.publish(room, &event, None).await;
        tracing::debug!(room = %room, event = event.name(), delivered, "published");
        delivered
    }

    /// Push a stored direct message to the receiver's connections
    pub async fn direct_message(&self, message: &DirectMessage) -> usize {
        self.publish(
            &RoomId::user(&message.receiver),
            ServerEvent::ReceiveMessage(message.clone()),
        )
        .await
    }

    /// Push a stored group message to everyone in the group room
    pub async fn group_message(&self, message: &GroupMessage) -> usize {
        self.publish(
            &RoomId::group(&message.group),
            ServerEvent::ReceiveGroupMessage(message.clone()),
        )
        .await
    }

    /// Relay a typing or stop-typing signal from one connection
    ///
    /// Group signals skip the sender and are dropped unless the sender has
    /// joined the group room.
    pub async fn relay_typing(&self, from: ConnectionId, signal: TypingSignal, stopped: bool) -> usize {
        let (room, exclude) = if signal.is_group {
            let room = RoomId::group(&signal.target_id);
            if !self.registry.is_in_room(from, &room).await {
                tracing::debug!(connection = %from, room = %room, "typing signal for unjoined group dropped");
                return 0;
            }
            (room, Some(from))
        } else {
            (RoomId::user(&signal.target_id), None)
        };

        let event = if stopped {
            ServerEvent::StopTyping(signal)
        } else {
            ServerEvent::Typing(signal)
        };
        self.registry.publish(&room, &event, exclude).await
    }
}
