use anyhow::Context as _;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use crate::data::model::{
    Conversation, ConversationSummary, LastMessage, Message, MessageDraft, UserSummary,
};

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sender_id, body, media_url, client_id, created_at, delivered_at, read_at";

#[derive(sqlx::FromRow)]
struct SummaryRow {
    id: i64,
    updated_at: DateTime<Utc>,
    other_id: i64,
    other_username: Option<String>,
    other_full_name: String,
    other_user_type: String,
    other_avatar_url: Option<String>,
    other_primary_sport: Option<String>,
    last_id: Option<i64>,
    last_sender_id: Option<i64>,
    last_body: Option<String>,
    last_media_url: Option<String>,
    last_created_at: Option<DateTime<Utc>>,
    unread_count: i64,
}

/// A delivery receipt produced when queued messages reach their recipient.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Delivery {
    pub message_id: i64,
    pub conversation_id: i64,
    pub sender_id: i64,
    pub delivered_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct MessageRepository {
    pub pool: PgPool,
}

impl MessageRepository {
    /// Returns the conversation between the two users, creating it on first use.
    pub async fn get_or_create_conversation(&self, user_id: i64, other_id: i64) -> sqlx::Result<Conversation> {
        let (user_a, user_b) = if user_id < other_id {
            (user_id, other_id)
        } else {
            (other_id, user_id)
        };

        sqlx::query_as(
            "INSERT INTO conversations (user_a, user_b) VALUES ($1, $2)
             ON CONFLICT (user_a, user_b) DO UPDATE SET user_a = EXCLUDED.user_a
             RETURNING id, user_a, user_b",
        )
        .bind(user_a)
        .bind(user_b)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn find_conversation(&self, id: i64) -> sqlx::Result<Option<Conversation>> {
        sqlx::query_as("SELECT id, user_a, user_b FROM conversations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// The viewer's conversations, most recently active first.
    pub async fn summaries(&self, viewer_id: i64) -> anyhow::Result<Vec<ConversationSummary>> {
        self.fetch_summaries(viewer_id, None).await
    }

    pub async fn summary(
        &self,
        conversation_id: i64,
        viewer_id: i64,
    ) -> anyhow::Result<Option<ConversationSummary>> {
        Ok(self
            .fetch_summaries(viewer_id, Some(conversation_id))
            .await?
            .into_iter()
            .next())
    }

    async fn fetch_summaries(
        &self,
        viewer_id: i64,
        conversation_id: Option<i64>,
    ) -> anyhow::Result<Vec<ConversationSummary>> {
        let rows: Vec<SummaryRow> = sqlx::query_as(
            "SELECT c.id, c.updated_at,
                    o.id AS other_id, o.username AS other_username, o.full_name AS other_full_name,
                    o.user_type AS other_user_type, o.avatar_url AS other_avatar_url,
                    o.primary_sport AS other_primary_sport,
                    lm.id AS last_id, lm.sender_id AS last_sender_id, lm.body AS last_body,
                    lm.media_url AS last_media_url, lm.created_at AS last_created_at,
                    (SELECT COUNT(*) FROM messages m
                     WHERE m.conversation_id = c.id AND m.sender_id <> $1 AND m.read_at IS NULL
                    ) AS unread_count
             FROM conversations c
             JOIN users o ON o.id = CASE WHEN c.user_a = $1 THEN c.user_b ELSE c.user_a END
             LEFT JOIN LATERAL (
                SELECT id, sender_id, body, media_url, created_at FROM messages
                WHERE messages.conversation_id = c.id
                ORDER BY id DESC
                LIMIT 1
             ) lm ON TRUE
             WHERE (c.user_a = $1 OR c.user_b = $1)
               AND ($2::BIGINT IS NULL OR c.id = $2)
             ORDER BY c.updated_at DESC, c.id DESC",
        )
        .bind(viewer_id)
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(to_summary).collect()
    }

    /// Up to `limit` messages older than `before`, oldest first.
    pub async fn messages(
        &self,
        conversation_id: i64,
        before: Option<i64>,
        limit: i64,
    ) -> sqlx::Result<Vec<Message>> {
        let mut messages: Vec<Message> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE conversation_id = $1 AND ($2::BIGINT IS NULL OR id < $2)
             ORDER BY id DESC
             LIMIT $3"
        ))
        .bind(conversation_id)
        .bind(before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        messages.reverse();
        Ok(messages)
    }

    pub async fn insert_message(
        &self,
        conversation_id: i64,
        sender_id: i64,
        draft: &MessageDraft,
    ) -> sqlx::Result<Message> {
        let mut tx: Transaction<Postgres> = self.pool.begin().await?;

        let message: Message = sqlx::query_as(&format!(
            "INSERT INTO messages (conversation_id, sender_id, body, media_url, client_id)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(conversation_id)
        .bind(sender_id)
        .bind(&draft.body)
        .bind(&draft.media_url)
        .bind(&draft.client_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE conversations SET updated_at = $2 WHERE id = $1")
            .bind(conversation_id)
            .bind(message.created_at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(message)
    }

    pub async fn mark_delivered(&self, message_id: i64) -> sqlx::Result<Option<DateTime<Utc>>> {
        sqlx::query_scalar(
            "UPDATE messages SET delivered_at = now()
             WHERE id = $1 AND delivered_at IS NULL
             RETURNING delivered_at",
        )
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Marks everything addressed to `recipient_id` that has not been
    /// delivered yet.
    pub async fn deliver_pending(&self, recipient_id: i64) -> sqlx::Result<Vec<Delivery>> {
        sqlx::query_as(
            "UPDATE messages m SET delivered_at = now()
             FROM conversations c
             WHERE m.conversation_id = c.id
               AND (c.user_a = $1 OR c.user_b = $1)
               AND m.sender_id <> $1
               AND m.delivered_at IS NULL
             RETURNING m.id AS message_id, m.conversation_id, m.sender_id, m.delivered_at",
        )
        .bind(recipient_id)
        .fetch_all(&self.pool)
        .await
    }

    /// Marks the other participant's unread messages as read. Returns the ids
    /// and the read timestamp, which is `None` when nothing changed.
    pub async fn mark_read(
        &self,
        conversation_id: i64,
        reader_id: i64,
    ) -> sqlx::Result<(Vec<i64>, Option<DateTime<Utc>>)> {
        let rows: Vec<(i64, DateTime<Utc>)> = sqlx::query_as(
            "UPDATE messages
             SET read_at = now(), delivered_at = COALESCE(delivered_at, now())
             WHERE conversation_id = $1 AND sender_id <> $2 AND read_at IS NULL
             RETURNING id, read_at",
        )
        .bind(conversation_id)
        .bind(reader_id)
        .fetch_all(&self.pool)
        .await?;

        let read_at = rows.first().map(|(_, at)| *at);
        let mut ids: Vec<i64> = rows.into_iter().map(|(id, _)| id).collect();
        ids.sort_unstable();
        Ok((ids, read_at))
    }
}

fn to_summary(row: SummaryRow) -> anyhow::Result<ConversationSummary> {
    let last_message = match (row.last_id, row.last_sender_id, row.last_created_at) {
        (Some(id), Some(sender_id), Some(created_at)) => Some(LastMessage {
            id,
            sender_id,
            body: row.last_body,
            media_url: row.last_media_url,
            created_at,
        }),
        _ => None,
    };

    Ok(ConversationSummary {
        id: row.id,
        other: UserSummary {
            id: row.other_id,
            username: row.other_username,
            full_name: row.other_full_name,
            user_type: row.other_user_type.parse().context("user_type column")?,
            avatar_url: row.other_avatar_url,
            primary_sport: row.other_primary_sport,
        },
        last_message,
        unread_count: row.unread_count,
        updated_at: row.updated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::repository::fixtures;

    fn draft(body: &str) -> MessageDraft {
        MessageDraft {
            body: Some(body.into()),
            media_url: None,
            client_id: None,
        }
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres server in DATABASE_URL"]
    async fn one_conversation_per_pair_in_either_order(pool: PgPool) {
        let ana = fixtures::user(&pool, "ana").await;
        let ben = fixtures::user(&pool, "ben").await;
        let repo = MessageRepository { pool };

        let first = repo.get_or_create_conversation(ana.id, ben.id).await.unwrap();
        let again = repo.get_or_create_conversation(ana.id, ben.id).await.unwrap();
        let reversed = repo.get_or_create_conversation(ben.id, ana.id).await.unwrap();

        assert_eq!(first.id, again.id);
        assert_eq!(first.id, reversed.id);
        assert!(first.user_a < first.user_b);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres server in DATABASE_URL"]
    async fn reading_marks_undelivered_messages_delivered(pool: PgPool) {
        let ana = fixtures::user(&pool, "ana").await;
        let ben = fixtures::user(&pool, "ben").await;
        let repo = MessageRepository { pool };
        let conversation = repo.get_or_create_conversation(ana.id, ben.id).await.unwrap();

        let from_ana = repo
            .insert_message(conversation.id, ana.id, &draft("see you at practice"))
            .await
            .unwrap();
        repo.insert_message(conversation.id, ben.id, &draft("on my way"))
            .await
            .unwrap();

        let (ids, read_at) = repo.mark_read(conversation.id, ben.id).await.unwrap();
        assert_eq!(ids, vec![from_ana.id]);
        assert!(read_at.is_some());

        let messages = repo.messages(conversation.id, None, 10).await.unwrap();
        let read = messages.iter().find(|m| m.id == from_ana.id).unwrap();
        assert!(read.delivered_at.is_some());
        assert_eq!(read.read_at, read_at);
        assert!(messages.iter().all(|m| m.id == from_ana.id || m.read_at.is_none()));

        let (again, at) = repo.mark_read(conversation.id, ben.id).await.unwrap();
        assert!(again.is_empty());
        assert!(at.is_none());
    }
}
