//! Stat entry rules: resolving submitted field labels against a position's
//! schema and folding flat stat rows into profiles and yearly entries.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Deserialize;

use crate::{
    data::model::{FieldType, PositionField, SportProfile, StatEntry, StatValue},
    error::AppError,
};

pub const EARLIEST_YEAR: i32 = 1900;

#[derive(Debug, Clone, Deserialize)]
pub struct SaveStatsRequest {
    pub sport: String,
    pub position: String,
    pub year: i32,
    pub values: Vec<StatInput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatInput {
    /// Field label as shown on the stat form.
    pub field: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedValue {
    pub field_id: i64,
    pub value: String,
}

/// Accepts seasons from 1900 through next year.
pub fn validate_year(year: i32, today: NaiveDate) -> Result<i32, AppError> {
    let latest = today.year() + 1;
    if (EARLIEST_YEAR..=latest).contains(&year) {
        Ok(year)
    } else {
        Err(AppError::validation(format!(
            "year must be between {EARLIEST_YEAR} and {latest}"
        )))
    }
}

/// Maps submitted labels onto the position's fields. Blank values are
/// skipped; number fields must hold a finite number.
pub fn resolve_values(
    fields: &[PositionField],
    inputs: &[StatInput],
) -> Result<Vec<ResolvedValue>, AppError> {
    let mut resolved: Vec<ResolvedValue> = Vec::with_capacity(inputs.len());

    for input in inputs {
        let label = input.field.trim();
        let field = fields
            .iter()
            .find(|f| f.label.eq_ignore_ascii_case(label))
            .ok_or(AppError::NotFound("field"))?;

        if resolved.iter().any(|r| r.field_id == field.id) {
            return Err(AppError::validation(format!(
                "field {:?} was submitted more than once",
                field.label
            )));
        }

        let value = input.value.trim();
        if value.is_empty() {
            continue;
        }

        if field.field_type == FieldType::Number
            && !value.parse::<f64>().is_ok_and(f64::is_finite)
        {
            return Err(AppError::validation(format!(
                "{} must be a number",
                field.label
            )));
        }

        resolved.push(ResolvedValue {
            field_id: field.id,
            value: value.to_string(),
        });
    }

    if resolved.is_empty() {
        return Err(AppError::validation("at least one stat value is required"));
    }

    Ok(resolved)
}

/// One row of profiles left-joined with their entries and values.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StatRow {
    pub profile_id: i64,
    pub sport_id: i64,
    pub sport_name: String,
    pub position_id: i64,
    pub position_name: String,
    pub entry_id: Option<i64>,
    pub year: Option<i32>,
    pub entry_updated_at: Option<DateTime<Utc>>,
    pub field_id: Option<i64>,
    pub label: Option<String>,
    pub unit: Option<String>,
    pub value: Option<String>,
}

/// Folds joined rows into profiles, entries and values, keeping the order in
/// which each first appears.
pub fn group_entries(rows: Vec<StatRow>) -> Vec<SportProfile> {
    let mut profiles: Vec<SportProfile> = Vec::new();

    for row in rows {
        let profile_index = match profiles.iter().position(|p| p.id == row.profile_id) {
            Some(index) => index,
            None => {
                profiles.push(SportProfile {
                    id: row.profile_id,
                    sport_id: row.sport_id,
                    sport_name: row.sport_name,
                    position_id: row.position_id,
                    position_name: row.position_name,
                    entries: Vec::new(),
                });
                profiles.len() - 1
            }
        };
        let profile = &mut profiles[profile_index];

        let (Some(entry_id), Some(year), Some(updated_at)) =
            (row.entry_id, row.year, row.entry_updated_at)
        else {
            continue;
        };

        let entry_index = match profile.entries.iter().position(|e| e.id == entry_id) {
            Some(index) => index,
            None => {
                profile.entries.push(StatEntry {
                    id: entry_id,
                    year,
                    updated_at,
                    values: Vec::new(),
                });
                profile.entries.len() - 1
            }
        };

        if let (Some(field_id), Some(label), Some(value)) = (row.field_id, row.label, row.value) {
            profile.entries[entry_index].values.push(StatValue {
                field_id,
                label,
                unit: row.unit,
                value,
            });
        }
    }

    profiles
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> Vec<PositionField> {
        vec![
            PositionField {
                id: 10,
                position_id: 1,
                label: "40-Yard Dash".into(),
                unit: Some("s".into()),
                field_type: FieldType::Number,
            },
            PositionField {
                id: 11,
                position_id: 1,
                label: "Throwing Hand".into(),
                unit: None,
                field_type: FieldType::Text,
            },
        ]
    }

    fn input(field: &str, value: &str) -> StatInput {
        StatInput {
            field: field.into(),
            value: value.into(),
        }
    }

    #[test]
    fn resolves_labels_case_insensitively() {
        let resolved = resolve_values(
            &fields(),
            &[input(" 40-yard dash ", "4.52"), input("throwing hand", "Left")],
        )
        .unwrap();
        assert_eq!(
            resolved,
            vec![
                ResolvedValue {
                    field_id: 10,
                    value: "4.52".into()
                },
                ResolvedValue {
                    field_id: 11,
                    value: "Left".into()
                },
            ]
        );
    }

    #[test]
    fn unknown_field_is_not_found() {
        let err = resolve_values(&fields(), &[input("Vertical", "30")]).unwrap_err();
        assert!(matches!(err, AppError::NotFound("field")));
    }

    #[test]
    fn rejects_duplicates_and_non_numbers() {
        assert!(matches!(
            resolve_values(&fields(), &[input("40-Yard Dash", "4.5"), input("40-yard dash", "4.6")]),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            resolve_values(&fields(), &[input("40-Yard Dash", "fast")]),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            resolve_values(&fields(), &[input("40-Yard Dash", "inf")]),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn blank_values_are_skipped_but_one_is_required() {
        let resolved =
            resolve_values(&fields(), &[input("40-Yard Dash", " "), input("Throwing Hand", "R")])
                .unwrap();
        assert_eq!(resolved.len(), 1);
        assert!(resolve_values(&fields(), &[input("40-Yard Dash", "")]).is_err());
    }

    #[test]
    fn year_window() {
        let today = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        assert_eq!(validate_year(2027, today).unwrap(), 2027);
        assert!(validate_year(2028, today).is_err());
        assert!(validate_year(1899, today).is_err());
    }

    fn row(profile_id: i64, entry: Option<(i64, i32)>, value: Option<(i64, &str, &str)>) -> StatRow {
        StatRow {
            profile_id,
            sport_id: 1,
            sport_name: "Football".into(),
            position_id: profile_id * 10,
            position_name: format!("Position {profile_id}"),
            entry_id: entry.map(|(id, _)| id),
            year: entry.map(|(_, year)| year),
            entry_updated_at: entry.map(|_| Utc::now()),
            field_id: value.map(|(id, _, _)| id),
            label: value.map(|(_, label, _)| label.to_string()),
            unit: None,
            value: value.map(|(_, _, v)| v.to_string()),
        }
    }

    #[test]
    fn groups_rows_into_profiles_and_entries() {
        let profiles = group_entries(vec![
            row(1, Some((100, 2025)), Some((10, "Touchdowns", "12"))),
            row(1, Some((100, 2025)), Some((11, "Sacks", "3"))),
            row(1, Some((99, 2024)), Some((10, "Touchdowns", "8"))),
            row(2, None, None),
        ]);

        assert_eq!(profiles.len(), 2);
        let first = &profiles[0];
        assert_eq!(first.entries.len(), 2);
        assert_eq!(first.entries[0].year, 2025);
        assert_eq!(first.entries[0].values.len(), 2);
        assert_eq!(first.entries[1].year, 2024);
        assert_eq!(first.entries[1].values[0].value, "8");
        assert!(profiles[1].entries.is_empty());
    }

    #[test]
    fn entry_without_values_is_kept() {
        let profiles = group_entries(vec![row(3, Some((7, 2020)), None)]);
        assert_eq!(profiles[0].entries.len(), 1);
        assert!(profiles[0].entries[0].values.is_empty());
    }
}
