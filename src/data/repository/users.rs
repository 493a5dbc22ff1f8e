use anyhow::Context as _;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::data::model::{NewUser, Profile, ProfileUpdate, User, UserSummary};

pub(crate) const USER_COLUMNS: &str = "users.id, users.email, users.username, users.password_hash, \
     users.full_name, users.date_of_birth, users.user_type, users.bio, users.city, users.avatar_url, \
     users.cover_url, users.primary_sport, users.sports_played, users.parent_email, users.parent_name, \
     users.created_at";

pub(crate) const SUMMARY_COLUMNS: &str =
    "users.id, users.username, users.full_name, users.user_type, users.avatar_url, users.primary_sport";

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    email: Option<String>,
    username: Option<String>,
    password_hash: String,
    full_name: String,
    date_of_birth: NaiveDate,
    user_type: String,
    bio: Option<String>,
    city: Option<String>,
    avatar_url: Option<String>,
    cover_url: Option<String>,
    primary_sport: Option<String>,
    sports_played: Vec<String>,
    parent_email: Option<String>,
    parent_name: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
pub(crate) struct SummaryRow {
    id: i64,
    username: Option<String>,
    full_name: String,
    user_type: String,
    avatar_url: Option<String>,
    primary_sport: Option<String>,
}

#[derive(sqlx::FromRow)]
struct ProfileRow {
    #[sqlx(flatten)]
    user: UserRow,
    follower_count: i64,
    following_count: i64,
    post_count: i64,
    is_following: bool,
}

#[derive(Clone)]
pub struct UserRepository {
    pub pool: PgPool,
}

impl UserRepository {
    /// True when the email or username already belongs to an account.
    pub async fn identifier_taken(
        &self,
        email: Option<&str>,
        username: Option<&str>,
    ) -> sqlx::Result<bool> {
        sqlx::query_scalar(
            "SELECT EXISTS (
                SELECT 1 FROM users
                WHERE lower(email) = lower($1) OR lower(username) = lower($2)
             )",
        )
        .bind(email)
        .bind(username)
        .fetch_one(&self.pool)
        .await
    }

    /// Inserts the account. Returns `None` when the email or username was
    /// claimed concurrently.
    pub async fn create(&self, new_user: &NewUser) -> anyhow::Result<Option<User>> {
        let signup = &new_user.signup;
        let result: sqlx::Result<UserRow> = sqlx::query_as(&format!(
            "INSERT INTO users (
                email, username, password_hash, full_name, date_of_birth, user_type,
                sports_played, primary_sport, parent_email, parent_name
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             RETURNING {USER_COLUMNS}"
        ))
        .bind(signup.identity.email())
        .bind(signup.identity.username())
        .bind(&new_user.password_hash)
        .bind(&signup.full_name)
        .bind(signup.date_of_birth)
        .bind(signup.user_type.as_str())
        .bind(&signup.sports_played)
        .bind(&signup.primary_sport)
        .bind(signup.parent.as_ref().map(|p| p.email.as_str()))
        .bind(signup.parent.as_ref().map(|p| p.name.as_str()))
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => to_user(row).map(Some),
            Err(err) if is_unique_violation(&err) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Looks an account up by email or username, case-insensitively.
    pub async fn find_by_identifier(&self, identifier: &str) -> anyhow::Result<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE lower(users.email) = lower($1) OR lower(users.username) = lower($1)"
        ))
        .bind(identifier.trim())
        .fetch_optional(&self.pool)
        .await?;

        row.map(to_user).transpose()
    }

    pub async fn exists(&self, id: i64) -> sqlx::Result<bool> {
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await
    }

    pub async fn profile(&self, id: i64, viewer_id: i64) -> anyhow::Result<Option<Profile>> {
        let row: Option<ProfileRow> = sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS},
                (SELECT COUNT(*) FROM follows WHERE followee_id = users.id) AS follower_count,
                (SELECT COUNT(*) FROM follows WHERE follower_id = users.id) AS following_count,
                (SELECT COUNT(*) FROM posts WHERE author_id = users.id) AS post_count,
                EXISTS (
                    SELECT 1 FROM follows WHERE follower_id = $2 AND followee_id = users.id
                ) AS is_following
             FROM users
             WHERE users.id = $1"
        ))
        .bind(id)
        .bind(viewer_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let user = to_user(row.user)?;
            Ok(Profile {
                id: user.id,
                username: user.username,
                full_name: user.full_name,
                user_type: user.user_type,
                bio: user.bio,
                city: user.city,
                avatar_url: user.avatar_url,
                cover_url: user.cover_url,
                primary_sport: user.primary_sport,
                sports_played: user.sports_played,
                follower_count: row.follower_count,
                following_count: row.following_count,
                post_count: row.post_count,
                is_following: row.is_following,
                created_at: user.created_at,
            })
        })
        .transpose()
    }

    /// Applies the non-`None` fields of `update`.
    pub async fn update_profile(&self, id: i64, update: &ProfileUpdate) -> anyhow::Result<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "UPDATE users SET
                full_name = COALESCE($2, full_name),
                bio = COALESCE($3, bio),
                city = COALESCE($4, city),
                avatar_url = COALESCE($5, avatar_url),
                cover_url = COALESCE($6, cover_url),
                sports_played = COALESCE($7, sports_played),
                primary_sport = CASE WHEN $7::TEXT[] IS NULL AND $8::TEXT IS NULL
                                     THEN primary_sport ELSE $8 END,
                updated_at = now()
             WHERE users.id = $1
             RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(&update.full_name)
        .bind(&update.bio)
        .bind(&update.city)
        .bind(&update.avatar_url)
        .bind(&update.cover_url)
        .bind(&update.sports_played)
        .bind(&update.primary_sport)
        .fetch_optional(&self.pool)
        .await?;

        row.map(to_user).transpose()
    }

    pub async fn children_of(&self, parent_email: &str) -> anyhow::Result<Vec<UserSummary>> {
        let rows: Vec<SummaryRow> = sqlx::query_as(&format!(
            "SELECT {SUMMARY_COLUMNS} FROM users
             WHERE lower(users.parent_email) = lower($1)
             ORDER BY users.full_name, users.id"
        ))
        .bind(parent_email)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(to_summary).collect()
    }

    /// Case-insensitive substring search over names and usernames; usernames
    /// starting with the query rank first.
    pub async fn search(&self, query: &str, limit: i64) -> anyhow::Result<Vec<UserSummary>> {
        let escaped = escape_like(query);
        let rows: Vec<SummaryRow> = sqlx::query_as(&format!(
            "SELECT {SUMMARY_COLUMNS} FROM users
             WHERE users.full_name ILIKE $1 ESCAPE '\\' OR users.username ILIKE $1 ESCAPE '\\'
             ORDER BY (users.username ILIKE $2 ESCAPE '\\') DESC, users.full_name, users.id
             LIMIT $3"
        ))
        .bind(format!("%{escaped}%"))
        .bind(format!("{escaped}%"))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(to_summary).collect()
    }

    pub async fn create_session(&self, user_id: i64, ttl: Duration) -> sqlx::Result<Uuid> {
        let token = Uuid::new_v4();
        sqlx::query("INSERT INTO sessions (token, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(token)
            .bind(user_id)
            .bind(Utc::now() + ttl)
            .execute(&self.pool)
            .await?;
        Ok(token)
    }

    pub async fn find_session_user(&self, token: Uuid) -> anyhow::Result<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS} FROM sessions
             JOIN users ON users.id = sessions.user_id
             WHERE sessions.token = $1 AND sessions.expires_at > now()"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        row.map(to_user).transpose()
    }

    pub async fn delete_session(&self, token: Uuid) -> sqlx::Result<u64> {
        let rows_affected = sqlx::query("DELETE FROM sessions WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(rows_affected)
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db_err| db_err.is_unique_violation())
}

/// Escapes LIKE wildcards so user input matches literally.
pub(crate) fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn to_user(row: UserRow) -> anyhow::Result<User> {
    Ok(User {
        id: row.id,
        email: row.email,
        username: row.username,
        password_hash: row.password_hash,
        full_name: row.full_name,
        date_of_birth: row.date_of_birth,
        user_type: row.user_type.parse().context("user_type column")?,
        bio: row.bio,
        city: row.city,
        avatar_url: row.avatar_url,
        cover_url: row.cover_url,
        primary_sport: row.primary_sport,
        sports_played: row.sports_played,
        parent_email: row.parent_email,
        parent_name: row.parent_name,
        created_at: row.created_at,
    })
}

pub(crate) fn to_summary(row: SummaryRow) -> anyhow::Result<UserSummary> {
    Ok(UserSummary {
        id: row.id,
        username: row.username,
        full_name: row.full_name,
        user_type: row.user_type.parse().context("user_type column")?,
        avatar_url: row.avatar_url,
        primary_sport: row.primary_sport,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::{Identity, UserType, ValidatedSignup};

    #[test]
    fn escapes_like_wildcards() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("plain"), "plain");
    }

    fn new_user(identity: Identity) -> NewUser {
        NewUser {
            signup: ValidatedSignup {
                identity,
                full_name: "Casey Runner".into(),
                date_of_birth: NaiveDate::from_ymd_opt(1999, 3, 4).unwrap(),
                user_type: UserType::Athlete,
                sports_played: vec!["Track & Field".into()],
                primary_sport: Some("Track & Field".into()),
                parent: None,
            },
            password_hash: "hash".into(),
        }
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres server in DATABASE_URL"]
    async fn duplicate_identifier_is_reported_as_none(pool: PgPool) {
        let repo = UserRepository { pool };
        let first = repo
            .create(&new_user(Identity::Email("casey@example.com".into())))
            .await
            .unwrap();
        assert!(first.is_some());

        let second = repo
            .create(&new_user(Identity::Email("CASEY@example.com".into())))
            .await
            .unwrap();
        assert!(second.is_none());
        assert!(repo
            .identifier_taken(Some("casey@EXAMPLE.com"), None)
            .await
            .unwrap());
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres server in DATABASE_URL"]
    async fn sessions_resolve_until_deleted(pool: PgPool) {
        let repo = UserRepository { pool };
        let user = repo
            .create(&new_user(Identity::Username("casey_r".into())))
            .await
            .unwrap()
            .unwrap();

        let token = repo.create_session(user.id, Duration::hours(1)).await.unwrap();
        let found = repo.find_session_user(token).await.unwrap().unwrap();
        assert_eq!(found.id, user.id);

        assert_eq!(repo.delete_session(token).await.unwrap(), 1);
        assert!(repo.find_session_user(token).await.unwrap().is_none());
    }
}
