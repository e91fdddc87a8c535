use crate::{message::Message, registry::Registry, session::SessionId};

/// Queues `message` on every registered session except `origin`.
///
/// Membership is snapshotted once up front. A session that closes while the
/// loop runs simply refuses the message, and one that registers afterwards
/// does not get it. Returns how many sessions accepted the message.
pub async fn broadcast(registry: &Registry, origin: SessionId, message: Message) -> usize {
    let recipients = registry.snapshot().await;

    let mut accepted = 0;
    for session in recipients.iter().filter(|session| session.id() != origin) {
        if session.enqueue_outbound(message.clone()).await {
            accepted += 1;
        }
    }
    accepted
}
