use anyhow::Context as _;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::data::model::{Identity, NewUser, ParentContact, PendingSignup, ValidatedSignup};

#[derive(sqlx::FromRow)]
struct PendingSignupRow {
    id: Uuid,
    email: Option<String>,
    username: Option<String>,
    password_hash: String,
    full_name: String,
    date_of_birth: NaiveDate,
    user_type: String,
    sports_played: Vec<String>,
    primary_sport: Option<String>,
    parent_email: Option<String>,
    parent_name: Option<String>,
    otp_hash: Option<String>,
    attempts: i32,
    expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SignupRepository {
    pub pool: PgPool,
}

impl SignupRepository {
    /// Stores a pending signup, replacing any earlier one for the same
    /// identifier.
    pub async fn replace(
        &self,
        new_user: &NewUser,
        otp_hash: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> sqlx::Result<Uuid> {
        let signup = &new_user.signup;
        let id = Uuid::new_v4();
        let mut tx: Transaction<Postgres> = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM pending_signups
             WHERE lower(email) = lower($1) OR lower(username) = lower($2) OR expires_at < now()",
        )
        .bind(signup.identity.email())
        .bind(signup.identity.username())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO pending_signups (
                id, email, username, password_hash, full_name, date_of_birth, user_type,
                sports_played, primary_sport, parent_email, parent_name, otp_hash, expires_at
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(id)
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
        .bind(otp_hash)
        .bind(expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(id)
    }

    pub async fn find(&self, id: Uuid) -> anyhow::Result<Option<PendingSignup>> {
        let row: Option<PendingSignupRow> = sqlx::query_as(
            "SELECT id, email, username, password_hash, full_name, date_of_birth, user_type,
                    sports_played, primary_sport, parent_email, parent_name, otp_hash, attempts,
                    expires_at
             FROM pending_signups
             WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(to_pending_signup).transpose()
    }

    /// Returns the attempt count after recording the failure.
    pub async fn record_failed_attempt(&self, id: Uuid) -> sqlx::Result<i32> {
        sqlx::query_scalar(
            "UPDATE pending_signups SET attempts = attempts + 1 WHERE id = $1 RETURNING attempts",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn delete(&self, id: Uuid) -> sqlx::Result<u64> {
        let rows_affected = sqlx::query("DELETE FROM pending_signups WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(rows_affected)
    }
}

fn to_pending_signup(row: PendingSignupRow) -> anyhow::Result<PendingSignup> {
    let identity = match (row.email, row.username) {
        (Some(email), None) => Identity::Email(email),
        (None, Some(username)) => Identity::Username(username),
        _ => anyhow::bail!("pending signup {} has an ambiguous identity", row.id),
    };

    let parent = match (row.parent_email, row.parent_name) {
        (Some(email), Some(name)) => Some(ParentContact { email, name }),
        _ => None,
    };

    Ok(PendingSignup {
        id: row.id,
        user: NewUser {
            signup: ValidatedSignup {
                identity,
                full_name: row.full_name,
                date_of_birth: row.date_of_birth,
                user_type: row.user_type.parse().context("user_type column")?,
                sports_played: row.sports_played,
                primary_sport: row.primary_sport,
                parent,
            },
            password_hash: row.password_hash,
        },
        otp_hash: row.otp_hash,
        attempts: row.attempts,
        expires_at: row.expires_at,
    })
}
