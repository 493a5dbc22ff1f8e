use sqlx::PgPool;

use super::users::{to_summary, SummaryRow, SUMMARY_COLUMNS};
use crate::data::model::UserSummary;

#[derive(Clone)]
pub struct FollowRepository {
    pub pool: PgPool,
}

impl FollowRepository {
    pub async fn follow(&self, follower_id: i64, followee_id: i64) -> sqlx::Result<()> {
        sqlx::query(
            "INSERT INTO follows (follower_id, followee_id) VALUES ($1, $2)
             ON CONFLICT DO NOTHING",
        )
        .bind(follower_id)
        .bind(followee_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn unfollow(&self, follower_id: i64, followee_id: i64) -> sqlx::Result<()> {
        sqlx::query("DELETE FROM follows WHERE follower_id = $1 AND followee_id = $2")
            .bind(follower_id)
            .bind(followee_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn followers(&self, user_id: i64) -> anyhow::Result<Vec<UserSummary>> {
        let rows: Vec<SummaryRow> = sqlx::query_as(&format!(
            "SELECT {SUMMARY_COLUMNS} FROM follows
             JOIN users ON users.id = follows.follower_id
             WHERE follows.followee_id = $1
             ORDER BY follows.created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(to_summary).collect()
    }

    pub async fn following(&self, user_id: i64) -> anyhow::Result<Vec<UserSummary>> {
        let rows: Vec<SummaryRow> = sqlx::query_as(&format!(
            "SELECT {SUMMARY_COLUMNS} FROM follows
             JOIN users ON users.id = follows.followee_id
             WHERE follows.follower_id = $1
             ORDER BY follows.created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(to_summary).collect()
    }
}
