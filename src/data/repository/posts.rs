use anyhow::Context as _;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::users::escape_like;
use crate::data::model::{Comment, NewPost, Post, PostKind, UserSummary};

/// Post columns plus author and engagement data. `$1` is always the viewer.
const POST_SELECT: &str = "SELECT posts.id, posts.kind, posts.title, posts.body, posts.media_url, posts.created_at,
        users.id AS author_id, users.username AS author_username, users.full_name AS author_full_name,
        users.user_type AS author_user_type, users.avatar_url AS author_avatar_url,
        users.primary_sport AS author_primary_sport,
        (SELECT COUNT(*) FROM post_likes WHERE post_likes.post_id = posts.id) AS like_count,
        (SELECT COUNT(*) FROM post_comments WHERE post_comments.post_id = posts.id) AS comment_count,
        EXISTS (
            SELECT 1 FROM post_likes WHERE post_likes.post_id = posts.id AND post_likes.user_id = $1
        ) AS liked_by_me
     FROM posts
     JOIN users ON users.id = posts.author_id";

#[derive(sqlx::FromRow)]
struct PostRow {
    id: i64,
    kind: String,
    title: Option<String>,
    body: Option<String>,
    media_url: Option<String>,
    created_at: DateTime<Utc>,
    author_id: i64,
    author_username: Option<String>,
    author_full_name: String,
    author_user_type: String,
    author_avatar_url: Option<String>,
    author_primary_sport: Option<String>,
    like_count: i64,
    comment_count: i64,
    liked_by_me: bool,
}

#[derive(sqlx::FromRow)]
struct CommentRow {
    id: i64,
    post_id: i64,
    body: String,
    created_at: DateTime<Utc>,
    author_id: i64,
    author_username: Option<String>,
    author_full_name: String,
    author_user_type: String,
    author_avatar_url: Option<String>,
    author_primary_sport: Option<String>,
}

#[derive(Clone)]
pub struct PostRepository {
    pub pool: PgPool,
}

impl PostRepository {
    pub async fn create(&self, author_id: i64, post: &NewPost) -> anyhow::Result<Post> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO posts (author_id, kind, title, body, media_url)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id",
        )
        .bind(author_id)
        .bind(post.kind.as_str())
        .bind(&post.title)
        .bind(&post.body)
        .bind(&post.media_url)
        .fetch_one(&self.pool)
        .await?;

        self.find(id, author_id)
            .await?
            .context("post vanished right after insert")
    }

    pub async fn find(&self, id: i64, viewer_id: i64) -> anyhow::Result<Option<Post>> {
        let row: Option<PostRow> = sqlx::query_as(&format!("{POST_SELECT} WHERE posts.id = $2"))
            .bind(viewer_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(to_post).transpose()
    }

    /// The viewer's own posts and those of accounts they follow, newest first.
    pub async fn feed(
        &self,
        viewer_id: i64,
        before: Option<i64>,
        limit: i64,
    ) -> anyhow::Result<Vec<Post>> {
        let rows: Vec<PostRow> = sqlx::query_as(&format!(
            "{POST_SELECT}
             WHERE (posts.author_id = $1
                    OR posts.author_id IN (SELECT followee_id FROM follows WHERE follower_id = $1))
               AND ($2::BIGINT IS NULL OR posts.id < $2)
             ORDER BY posts.id DESC
             LIMIT $3"
        ))
        .bind(viewer_id)
        .bind(before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(to_post).collect()
    }

    pub async fn by_author(
        &self,
        author_id: i64,
        viewer_id: i64,
        kind: Option<PostKind>,
        before: Option<i64>,
        limit: i64,
    ) -> anyhow::Result<Vec<Post>> {
        let rows: Vec<PostRow> = sqlx::query_as(&format!(
            "{POST_SELECT}
             WHERE posts.author_id = $2
               AND ($3::TEXT IS NULL OR posts.kind = $3)
               AND ($4::BIGINT IS NULL OR posts.id < $4)
             ORDER BY posts.id DESC
             LIMIT $5"
        ))
        .bind(viewer_id)
        .bind(author_id)
        .bind(kind.map(PostKind::as_str))
        .bind(before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(to_post).collect()
    }

    pub async fn search(&self, viewer_id: i64, query: &str, limit: i64) -> anyhow::Result<Vec<Post>> {
        let rows: Vec<PostRow> = sqlx::query_as(&format!(
            "{POST_SELECT}
             WHERE posts.title ILIKE $2 ESCAPE '\\' OR posts.body ILIKE $2 ESCAPE '\\'
             ORDER BY posts.id DESC
             LIMIT $3"
        ))
        .bind(viewer_id)
        .bind(format!("%{}%", escape_like(query)))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(to_post).collect()
    }

    pub async fn author_of(&self, id: i64) -> sqlx::Result<Option<i64>> {
        sqlx::query_scalar("SELECT author_id FROM posts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn delete(&self, id: i64) -> sqlx::Result<u64> {
        let rows_affected = sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(rows_affected)
    }

    /// Returns the like count after the change.
    pub async fn like(&self, post_id: i64, user_id: i64) -> sqlx::Result<i64> {
        sqlx::query("INSERT INTO post_likes (post_id, user_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
            .bind(post_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        self.like_count(post_id).await
    }

    /// Returns the like count after the change.
    pub async fn unlike(&self, post_id: i64, user_id: i64) -> sqlx::Result<i64> {
        sqlx::query("DELETE FROM post_likes WHERE post_id = $1 AND user_id = $2")
            .bind(post_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        self.like_count(post_id).await
    }

    async fn like_count(&self, post_id: i64) -> sqlx::Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM post_likes WHERE post_id = $1")
            .bind(post_id)
            .fetch_one(&self.pool)
            .await
    }

    pub async fn comments(&self, post_id: i64) -> anyhow::Result<Vec<Comment>> {
        let rows: Vec<CommentRow> = sqlx::query_as(
            "SELECT post_comments.id, post_comments.post_id, post_comments.body, post_comments.created_at,
                    users.id AS author_id, users.username AS author_username,
                    users.full_name AS author_full_name, users.user_type AS author_user_type,
                    users.avatar_url AS author_avatar_url, users.primary_sport AS author_primary_sport
             FROM post_comments
             JOIN users ON users.id = post_comments.author_id
             WHERE post_comments.post_id = $1
             ORDER BY post_comments.id",
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(to_comment).collect()
    }

    pub async fn add_comment(&self, post_id: i64, author_id: i64, body: &str) -> anyhow::Result<Comment> {
        let row: CommentRow = sqlx::query_as(
            "WITH inserted AS (
                INSERT INTO post_comments (post_id, author_id, body)
                VALUES ($1, $2, $3)
                RETURNING id, post_id, author_id, body, created_at
             )
             SELECT inserted.id, inserted.post_id, inserted.body, inserted.created_at,
                    users.id AS author_id, users.username AS author_username,
                    users.full_name AS author_full_name, users.user_type AS author_user_type,
                    users.avatar_url AS author_avatar_url, users.primary_sport AS author_primary_sport
             FROM inserted
             JOIN users ON users.id = inserted.author_id",
        )
        .bind(post_id)
        .bind(author_id)
        .bind(body)
        .fetch_one(&self.pool)
        .await?;

        to_comment(row)
    }
}

fn to_post(row: PostRow) -> anyhow::Result<Post> {
    Ok(Post {
        id: row.id,
        kind: row.kind.parse().context("kind column")?,
        title: row.title,
        body: row.body,
        body_html: None,
        media_url: row.media_url,
        author: UserSummary {
            id: row.author_id,
            username: row.author_username,
            full_name: row.author_full_name,
            user_type: row.author_user_type.parse().context("user_type column")?,
            avatar_url: row.author_avatar_url,
            primary_sport: row.author_primary_sport,
        },
        like_count: row.like_count,
        comment_count: row.comment_count,
        liked_by_me: row.liked_by_me,
        created_at: row.created_at,
    })
}

fn to_comment(row: CommentRow) -> anyhow::Result<Comment> {
    Ok(Comment {
        id: row.id,
        post_id: row.post_id,
        author: UserSummary {
            id: row.author_id,
            username: row.author_username,
            full_name: row.author_full_name,
            user_type: row.author_user_type.parse().context("user_type column")?,
            avatar_url: row.author_avatar_url,
            primary_sport: row.author_primary_sport,
        },
        body: row.body,
        created_at: row.created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::repository::fixtures;

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres server in DATABASE_URL"]
    async fn likes_count_once_per_user(pool: PgPool) {
        let author = fixtures::user(&pool, "author_1").await;
        let fan = fixtures::user(&pool, "fan_2").await;
        let repo = PostRepository { pool };

        let post = repo
            .create(
                author.id,
                &NewPost {
                    kind: PostKind::Post,
                    title: None,
                    body: Some("Game day".into()),
                    media_url: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(post.like_count, 0);

        assert_eq!(repo.like(post.id, fan.id).await.unwrap(), 1);
        assert_eq!(repo.like(post.id, fan.id).await.unwrap(), 1);
        assert!(repo.find(post.id, fan.id).await.unwrap().unwrap().liked_by_me);

        assert_eq!(repo.unlike(post.id, fan.id).await.unwrap(), 0);
        assert_eq!(repo.unlike(post.id, fan.id).await.unwrap(), 0);
    }
}
