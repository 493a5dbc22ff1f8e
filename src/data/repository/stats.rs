use anyhow::Context as _;
use sqlx::{PgPool, Postgres, Transaction};

use crate::{
    data::model::{Position, PositionField, Sport, SportProfile},
    stats::{group_entries, ResolvedValue, StatRow},
};

#[derive(sqlx::FromRow)]
struct FieldRow {
    id: i64,
    position_id: i64,
    label: String,
    unit: Option<String>,
    field_type: String,
}

#[derive(Clone)]
pub struct StatsRepository {
    pub pool: PgPool,
}

impl StatsRepository {
    pub async fn sports(&self) -> sqlx::Result<Vec<Sport>> {
        sqlx::query_as("SELECT id, name FROM sports ORDER BY name")
            .fetch_all(&self.pool)
            .await
    }

    pub async fn sport_exists(&self, sport_id: i64) -> sqlx::Result<bool> {
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM sports WHERE id = $1)")
            .bind(sport_id)
            .fetch_one(&self.pool)
            .await
    }

    pub async fn position_exists(&self, position_id: i64) -> sqlx::Result<bool> {
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM positions WHERE id = $1)")
            .bind(position_id)
            .fetch_one(&self.pool)
            .await
    }

    pub async fn positions(&self, sport_id: i64) -> sqlx::Result<Vec<Position>> {
        sqlx::query_as("SELECT id, sport_id, name FROM positions WHERE sport_id = $1 ORDER BY name")
            .bind(sport_id)
            .fetch_all(&self.pool)
            .await
    }

    pub async fn fields(&self, position_id: i64) -> anyhow::Result<Vec<PositionField>> {
        let rows: Vec<FieldRow> = sqlx::query_as(
            "SELECT id, position_id, label, unit, field_type FROM position_fields
             WHERE position_id = $1
             ORDER BY sort_order, id",
        )
        .bind(position_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(PositionField {
                    id: row.id,
                    position_id: row.position_id,
                    label: row.label,
                    unit: row.unit,
                    field_type: row.field_type.parse().context("field_type column")?,
                })
            })
            .collect()
    }

    pub async fn sport_by_name(&self, name: &str) -> sqlx::Result<Option<Sport>> {
        sqlx::query_as("SELECT id, name FROM sports WHERE lower(name) = lower($1)")
            .bind(name.trim())
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn position_by_name(&self, sport_id: i64, name: &str) -> sqlx::Result<Option<Position>> {
        sqlx::query_as(
            "SELECT id, sport_id, name FROM positions WHERE sport_id = $1 AND lower(name) = lower($2)",
        )
        .bind(sport_id)
        .bind(name.trim())
        .fetch_optional(&self.pool)
        .await
    }

    /// Replaces the (user, sport, position, year) entry with `values` in one
    /// transaction and returns the entry id.
    pub async fn save_entry(
        &self,
        user_id: i64,
        sport_id: i64,
        position_id: i64,
        year: i32,
        values: &[ResolvedValue],
    ) -> sqlx::Result<i64> {
        let mut tx: Transaction<Postgres> = self.pool.begin().await?;

        let profile_id: i64 = sqlx::query_scalar(
            "INSERT INTO user_sport_profiles (user_id, sport_id, position_id)
             VALUES ($1, $2, $3)
             ON CONFLICT (user_id, sport_id, position_id) DO UPDATE SET user_id = EXCLUDED.user_id
             RETURNING id",
        )
        .bind(user_id)
        .bind(sport_id)
        .bind(position_id)
        .fetch_one(&mut *tx)
        .await?;

        let entry_id: i64 = sqlx::query_scalar(
            "INSERT INTO stat_entries (profile_id, year)
             VALUES ($1, $2)
             ON CONFLICT (profile_id, year) DO UPDATE SET updated_at = now()
             RETURNING id",
        )
        .bind(profile_id)
        .bind(year)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM stat_values WHERE entry_id = $1")
            .bind(entry_id)
            .execute(&mut *tx)
            .await?;

        let field_ids: Vec<i64> = values.iter().map(|v| v.field_id).collect();
        let raw_values: Vec<String> = values.iter().map(|v| v.value.clone()).collect();
        sqlx::query(
            "INSERT INTO stat_values (entry_id, field_id, value)
             SELECT $1, field_id, value FROM UNNEST($2::BIGINT[], $3::TEXT[]) AS t (field_id, value)",
        )
        .bind(entry_id)
        .bind(&field_ids)
        .bind(&raw_values)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(entry_id)
    }

    /// All of a user's sport profiles with entries (newest year first), or only
    /// the one entry when `entry_id` is given.
    pub async fn user_stats(&self, user_id: i64, entry_id: Option<i64>) -> sqlx::Result<Vec<SportProfile>> {
        let rows: Vec<StatRow> = sqlx::query_as(
            "SELECT p.id AS profile_id, s.id AS sport_id, s.name AS sport_name,
                    pos.id AS position_id, pos.name AS position_name,
                    e.id AS entry_id, e.year, e.updated_at AS entry_updated_at,
                    f.id AS field_id, f.label, f.unit, v.value
             FROM user_sport_profiles p
             JOIN sports s ON s.id = p.sport_id
             JOIN positions pos ON pos.id = p.position_id
             LEFT JOIN stat_entries e ON e.profile_id = p.id
             LEFT JOIN stat_values v ON v.entry_id = e.id
             LEFT JOIN position_fields f ON f.id = v.field_id
             WHERE p.user_id = $1 AND ($2::BIGINT IS NULL OR e.id = $2)
             ORDER BY s.name, pos.name, e.year DESC NULLS LAST, f.sort_order, f.id",
        )
        .bind(user_id)
        .bind(entry_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(group_entries(rows))
    }

    pub async fn entry_owner(&self, entry_id: i64) -> sqlx::Result<Option<i64>> {
        sqlx::query_scalar(
            "SELECT p.user_id FROM stat_entries e
             JOIN user_sport_profiles p ON p.id = e.profile_id
             WHERE e.id = $1",
        )
        .bind(entry_id)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn delete_entry(&self, entry_id: i64) -> sqlx::Result<u64> {
        let rows_affected = sqlx::query("DELETE FROM stat_entries WHERE id = $1")
            .bind(entry_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres server in DATABASE_URL"]
    async fn saving_the_same_year_overwrites_the_entry(pool: PgPool) {
        let user_id: i64 = sqlx::query_scalar(
            "INSERT INTO users (email, password_hash, full_name, date_of_birth)
             VALUES ('qb@example.com', 'x', 'Quinn Back', '2001-02-03') RETURNING id",
        )
        .fetch_one(&pool)
        .await
        .unwrap();

        let repo = StatsRepository { pool };
        let sport = repo.sport_by_name("football").await.unwrap().unwrap();
        let position = repo
            .position_by_name(sport.id, "QUARTERBACK")
            .await
            .unwrap()
            .unwrap();
        let fields = repo.fields(position.id).await.unwrap();
        let touchdowns = fields.iter().find(|f| f.label == "Touchdowns").unwrap();

        let first = repo
            .save_entry(
                user_id,
                sport.id,
                position.id,
                2025,
                &[ResolvedValue {
                    field_id: touchdowns.id,
                    value: "10".into(),
                }],
            )
            .await
            .unwrap();
        let second = repo
            .save_entry(
                user_id,
                sport.id,
                position.id,
                2025,
                &[ResolvedValue {
                    field_id: touchdowns.id,
                    value: "14".into(),
                }],
            )
            .await
            .unwrap();
        assert_eq!(first, second);

        let profiles = repo.user_stats(user_id, None).await.unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].entries.len(), 1);
        assert_eq!(profiles[0].entries[0].values[0].value, "14");

        assert_eq!(repo.entry_owner(first).await.unwrap(), Some(user_id));
        assert_eq!(repo.delete_entry(first).await.unwrap(), 1);
        assert!(repo.user_stats(user_id, None).await.unwrap()[0].entries.is_empty());
    }
}
