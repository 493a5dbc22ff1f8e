//! Message sending and receipts. Both the REST handlers and the socket go
//! through here so that every path produces the same events.

use tracing::{debug, warn};

use crate::{
    data::model::{Conversation, Message, MessageDraft},
    error::AppError,
    realtime::{OutgoingMessage, ServerEvent},
    AppState,
};

pub const MAX_BODY_CHARS: usize = 4000;
pub const MAX_CLIENT_ID_CHARS: usize = 64;

impl OutgoingMessage {
    pub fn validate(self) -> Result<MessageDraft, AppError> {
        let body = self
            .body
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty());
        let media_url = self
            .media_url
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty());
        let client_id = self
            .client_id
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());

        if body.is_none() && media_url.is_none() {
            return Err(AppError::validation("a message needs text or media"));
        }
        if body
            .as_ref()
            .is_some_and(|b| b.chars().count() > MAX_BODY_CHARS)
        {
            return Err(AppError::validation(format!(
                "messages are limited to {MAX_BODY_CHARS} characters"
            )));
        }
        if client_id
            .as_ref()
            .is_some_and(|c| c.chars().count() > MAX_CLIENT_ID_CHARS)
        {
            return Err(AppError::validation("client_id is too long"));
        }

        Ok(MessageDraft {
            body,
            media_url,
            client_id,
        })
    }
}

/// Loads the conversation and checks that `user_id` takes part in it.
pub async fn participant_conversation(
    state: &AppState,
    user_id: i64,
    conversation_id: i64,
) -> Result<Conversation, AppError> {
    let conversation = state
        .messages
        .find_conversation(conversation_id)
        .await?
        .ok_or(AppError::NotFound("conversation"))?;

    if !conversation.has_participant(user_id) {
        return Err(AppError::forbidden("not a participant of this conversation"));
    }

    Ok(conversation)
}

pub async fn send_message(
    state: &AppState,
    sender_id: i64,
    conversation_id: i64,
    outgoing: OutgoingMessage,
) -> Result<Message, AppError> {
    let conversation = participant_conversation(state, sender_id, conversation_id).await?;
    let draft = outgoing.validate()?;
    let recipient_id = conversation.other_participant(sender_id);

    let mut message = state
        .messages
        .insert_message(conversation.id, sender_id, &draft)
        .await?;
    debug!(message_id = message.id, conversation_id, sender_id, "message stored");

    if state.hub.is_online(recipient_id).await {
        if let Some(delivered_at) = state.messages.mark_delivered(message.id).await? {
            message.delivered_at = Some(delivered_at);
        }
    }

    let recipient_copy = Message {
        client_id: None,
        ..message.clone()
    };
    state
        .hub
        .send_to(recipient_id, &ServerEvent::ReceiveMessage(recipient_copy))
        .await;
    state
        .hub
        .send_to(sender_id, &ServerEvent::ReceiveMessage(message.clone()))
        .await;

    if let Some(delivered_at) = message.delivered_at {
        state
            .hub
            .send_to(
                sender_id,
                &ServerEvent::MessageDelivered {
                    message_id: message.id,
                    conversation_id,
                    delivered_at,
                },
            )
            .await;
    }

    push_conversation_update(state, conversation_id, &[sender_id, recipient_id]).await;

    Ok(message)
}

/// Marks the other participant's messages as read and tells them so.
pub async fn mark_read(
    state: &AppState,
    reader_id: i64,
    conversation_id: i64,
) -> Result<Vec<i64>, AppError> {
    let conversation = participant_conversation(state, reader_id, conversation_id).await?;
    let (message_ids, read_at) = state.messages.mark_read(conversation_id, reader_id).await?;

    if let Some(read_at) = read_at {
        state
            .hub
            .send_to(
                conversation.other_participant(reader_id),
                &ServerEvent::MessagesRead {
                    conversation_id,
                    reader_id,
                    message_ids: message_ids.clone(),
                    read_at,
                },
            )
            .await;
        push_conversation_update(state, conversation_id, &[reader_id]).await;
    }

    Ok(message_ids)
}

/// Called when a user's socket connects: everything queued for them is now
/// delivered.
pub async fn deliver_pending(state: &AppState, recipient_id: i64) -> Result<usize, AppError> {
    let deliveries = state.messages.deliver_pending(recipient_id).await?;

    for delivery in &deliveries {
        state
            .hub
            .send_to(
                delivery.sender_id,
                &ServerEvent::MessageDelivered {
                    message_id: delivery.message_id,
                    conversation_id: delivery.conversation_id,
                    delivered_at: delivery.delivered_at,
                },
            )
            .await;
    }

    Ok(deliveries.len())
}

/// Best effort: a failed summary for one viewer is logged and skipped.
async fn push_conversation_update(state: &AppState, conversation_id: i64, viewers: &[i64]) {
    for &viewer_id in viewers {
        match state.messages.summary(conversation_id, viewer_id).await {
            Ok(Some(summary)) => {
                state
                    .hub
                    .send_to(viewer_id, &ServerEvent::ConversationUpdated(summary))
                    .await;
            }
            Ok(None) => {}
            Err(err) => {
                warn!(?err, conversation_id, viewer_id, "failed to load conversation summary");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use sqlx::PgPool;
    use tokio::sync::mpsc;

    use super::*;
    use crate::{config::Config, data::repository::fixtures};

    fn outgoing(body: Option<&str>, media_url: Option<&str>) -> OutgoingMessage {
        OutgoingMessage {
            body: body.map(str::to_string),
            media_url: media_url.map(str::to_string),
            client_id: Some(" c-1 ".into()),
        }
    }

    #[test]
    fn trims_body_and_client_id() {
        let draft = outgoing(Some("  see you at practice "), None).validate().unwrap();
        assert_eq!(draft.body.as_deref(), Some("see you at practice"));
        assert_eq!(draft.client_id.as_deref(), Some("c-1"));
        assert_eq!(draft.media_url, None);
    }

    #[test]
    fn needs_text_or_media() {
        assert!(outgoing(Some("   "), None).validate().is_err());
        assert!(outgoing(None, Some(" ")).validate().is_err());
        let draft = outgoing(None, Some("https://cdn.example/p.jpg")).validate().unwrap();
        assert!(draft.body.is_none());
    }

    #[test]
    fn caps_body_length() {
        let long = "a".repeat(MAX_BODY_CHARS + 1);
        assert!(outgoing(Some(&long), None).validate().is_err());
        let max = "a".repeat(MAX_BODY_CHARS);
        assert!(outgoing(Some(&max), None).validate().is_ok());
    }

    fn drain(receiver: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            events.push(event);
        }
        events
    }

    struct Pair {
        state: AppState,
        ana: i64,
        ben: i64,
        conversation_id: i64,
    }

    async fn pair(pool: PgPool) -> Pair {
        let ana = fixtures::user(&pool, "ana").await.id;
        let ben = fixtures::user(&pool, "ben").await.id;
        let state = AppState::new(pool, Config::for_tests());
        let conversation_id = state
            .messages
            .get_or_create_conversation(ana, ben)
            .await
            .unwrap()
            .id;
        Pair {
            state,
            ana,
            ben,
            conversation_id,
        }
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres server in DATABASE_URL"]
    async fn online_recipient_gets_the_message_and_sender_a_receipt(pool: PgPool) {
        let Pair { state, ana, ben, conversation_id } = pair(pool).await;
        let mut ana_rx = state.hub.register(ana).await.receiver;
        let mut ben_rx = state.hub.register(ben).await.receiver;

        let message = send_message(&state, ana, conversation_id, outgoing(Some("warmups at 6"), None))
            .await
            .unwrap();
        assert!(message.delivered_at.is_some());

        let ana_events = drain(&mut ana_rx);
        assert_eq!(ana_events.len(), 3, "{ana_events:?}");
        match &ana_events[0] {
            ServerEvent::ReceiveMessage(echo) => {
                assert_eq!(echo.id, message.id);
                assert_eq!(echo.client_id.as_deref(), Some("c-1"));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(
            &ana_events[1],
            ServerEvent::MessageDelivered { message_id, .. } if *message_id == message.id
        ));
        assert!(matches!(
            &ana_events[2],
            ServerEvent::ConversationUpdated(summary) if summary.id == conversation_id
        ));

        let ben_events = drain(&mut ben_rx);
        assert_eq!(ben_events.len(), 2, "{ben_events:?}");
        match &ben_events[0] {
            ServerEvent::ReceiveMessage(copy) => {
                assert_eq!(copy.id, message.id);
                assert_eq!(copy.client_id, None);
                assert!(copy.delivered_at.is_some());
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(&ben_events[1], ServerEvent::ConversationUpdated(_)));
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres server in DATABASE_URL"]
    async fn queued_messages_are_delivered_when_the_recipient_connects(pool: PgPool) {
        let Pair { state, ana, ben, conversation_id } = pair(pool).await;
        let mut ana_rx = state.hub.register(ana).await.receiver;

        let message = send_message(&state, ana, conversation_id, outgoing(Some("film at 4"), None))
            .await
            .unwrap();
        assert!(message.delivered_at.is_none());
        let ana_events = drain(&mut ana_rx);
        assert!(!ana_events
            .iter()
            .any(|e| matches!(e, ServerEvent::MessageDelivered { .. })));

        let _ben = state.hub.register(ben).await;
        assert_eq!(deliver_pending(&state, ben).await.unwrap(), 1);

        let ana_events = drain(&mut ana_rx);
        assert_eq!(ana_events.len(), 1, "{ana_events:?}");
        assert!(matches!(
            &ana_events[0],
            ServerEvent::MessageDelivered { message_id, conversation_id: c, .. }
                if *message_id == message.id && *c == conversation_id
        ));
        assert_eq!(deliver_pending(&state, ben).await.unwrap(), 0);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres server in DATABASE_URL"]
    async fn reading_notifies_the_sender(pool: PgPool) {
        let Pair { state, ana, ben, conversation_id } = pair(pool).await;
        let message = send_message(&state, ana, conversation_id, outgoing(Some("ride?"), None))
            .await
            .unwrap();

        let mut ana_rx = state.hub.register(ana).await.receiver;
        let mut ben_rx = state.hub.register(ben).await.receiver;

        assert_eq!(mark_read(&state, ben, conversation_id).await.unwrap(), vec![message.id]);

        let ana_events = drain(&mut ana_rx);
        assert_eq!(ana_events.len(), 1, "{ana_events:?}");
        match &ana_events[0] {
            ServerEvent::MessagesRead {
                conversation_id: c,
                reader_id,
                message_ids,
                ..
            } => {
                assert_eq!(*c, conversation_id);
                assert_eq!(*reader_id, ben);
                assert_eq!(message_ids, &vec![message.id]);
            }
            other => panic!("unexpected event {other:?}"),
        }
        let ben_events = drain(&mut ben_rx);
        assert!(matches!(ben_events.as_slice(), [ServerEvent::ConversationUpdated(_)]));

        let stored = state.messages.messages(conversation_id, None, 10).await.unwrap();
        assert!(stored[0].delivered_at.is_some());
        assert!(stored[0].read_at.is_some());

        assert!(mark_read(&state, ben, conversation_id).await.unwrap().is_empty());
        assert!(drain(&mut ana_rx).is_empty());
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres server in DATABASE_URL"]
    async fn outsiders_cannot_send_or_read(pool: PgPool) {
        let outsider = fixtures::user(&pool, "cal").await.id;
        let Pair { state, conversation_id, .. } = pair(pool).await;

        let err = send_message(&state, outsider, conversation_id, outgoing(Some("hi"), None))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
        let err = mark_read(&state, outsider, conversation_id).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }
}
