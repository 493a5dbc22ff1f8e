//! Account rules: signup validation, password hashing and one-time codes.

use argon2::{
    password_hash::{rand_core::OsRng, rand_core::RngCore, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{Datelike, NaiveDate};
use serde::Deserialize;

use crate::{
    data::model::{Identity, ParentContact, UserType, ValidatedSignup},
    error::AppError,
};

/// Accounts younger than this need a parent contact.
pub const ADULT_AGE: u32 = 18;
pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_OTP_ATTEMPTS: i32 = 5;

#[derive(Debug, Clone, Deserialize)]
pub struct SignupRequest {
    pub email: Option<String>,
    pub username: Option<String>,
    pub password: String,
    pub full_name: String,
    pub date_of_birth: NaiveDate,
    #[serde(default)]
    pub user_type: UserType,
    #[serde(default)]
    pub sports_played: Vec<String>,
    pub primary_sport: Option<String>,
    pub parent_email: Option<String>,
    pub parent_name: Option<String>,
}

impl SignupRequest {
    pub fn validate(&self, today: NaiveDate) -> Result<ValidatedSignup, AppError> {
        let identity = match (non_empty(&self.email), non_empty(&self.username)) {
            (Some(_), Some(_)) => {
                return Err(AppError::validation(
                    "provide either an email or a username, not both",
                ))
            }
            (None, None) => return Err(AppError::validation("an email or a username is required")),
            (Some(email), None) => Identity::Email(normalize_email(email)?),
            (None, Some(username)) => Identity::Username(validate_username(username)?),
        };

        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AppError::validation(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        let full_name = self.full_name.trim();
        if full_name.is_empty() {
            return Err(AppError::validation("full name is required"));
        }

        let age = age_on(self.date_of_birth, today)
            .ok_or_else(|| AppError::validation("date of birth cannot be in the future"))?;

        let parent = if age < ADULT_AGE {
            if self.user_type == UserType::Parent {
                return Err(AppError::validation("parent accounts must belong to adults"));
            }
            let (Some(email), Some(name)) = (non_empty(&self.parent_email), non_empty(&self.parent_name)) else {
                return Err(AppError::validation(
                    "parent email and parent name are required for athletes under 18",
                ));
            };
            Some(ParentContact {
                email: normalize_email(email)?,
                name: name.to_string(),
            })
        } else {
            None
        };

        let (sports_played, primary_sport) =
            normalize_sports(&self.sports_played, self.primary_sport.as_deref())?;

        Ok(ValidatedSignup {
            identity,
            full_name: full_name.to_string(),
            date_of_birth: self.date_of_birth,
            user_type: self.user_type,
            sports_played,
            primary_sport,
            parent,
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Whole years between `date_of_birth` and `today`, or `None` for future dates.
pub fn age_on(date_of_birth: NaiveDate, today: NaiveDate) -> Option<u32> {
    if date_of_birth > today {
        return None;
    }
    let mut years = today.year() - date_of_birth.year();
    if (today.month(), today.day()) < (date_of_birth.month(), date_of_birth.day()) {
        years -= 1;
    }
    u32::try_from(years).ok()
}

pub fn normalize_email(email: &str) -> Result<String, AppError> {
    let email = email.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain
                    .rsplit_once('.')
                    .is_some_and(|(host, tld)| !host.is_empty() && tld.len() >= 2)
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };

    if valid {
        Ok(email)
    } else {
        Err(AppError::validation("email address is not valid"))
    }
}

pub fn validate_username(username: &str) -> Result<String, AppError> {
    let username = username.trim();
    let len = username.chars().count();
    if !(3..=30).contains(&len)
        || !username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
    {
        return Err(AppError::validation(
            "username must be 3-30 characters of letters, digits, '_' or '.'",
        ));
    }
    Ok(username.to_string())
}

/// Trims and de-duplicates sports (case-insensitively, first spelling wins) and
/// checks that the primary sport is one of them.
pub fn normalize_sports(
    sports: &[String],
    primary: Option<&str>,
) -> Result<(Vec<String>, Option<String>), AppError> {
    let mut played: Vec<String> = Vec::with_capacity(sports.len());
    for sport in sports.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        if !played.iter().any(|p| p.eq_ignore_ascii_case(sport)) {
            played.push(sport.to_string());
        }
    }

    let primary = match primary.map(str::trim).filter(|p| !p.is_empty()) {
        Some(primary) => Some(
            played
                .iter()
                .find(|p| p.eq_ignore_ascii_case(primary))
                .cloned()
                .ok_or_else(|| AppError::validation("primary sport must be one of the sports played"))?,
        ),
        None => None,
    };

    Ok((played, primary))
}

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| anyhow::anyhow!("failed to hash password: {e}"))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

/// Runs [`hash_password`] on the blocking pool.
pub async fn hash_password_blocking(password: String) -> anyhow::Result<String> {
    tokio::task::spawn_blocking(move || hash_password(&password)).await?
}

pub async fn verify_password_blocking(password: String, hash: String) -> anyhow::Result<bool> {
    Ok(tokio::task::spawn_blocking(move || verify_password(&password, &hash)).await?)
}

pub fn generate_otp() -> String {
    format!("{:06}", OsRng.next_u32() % 1_000_000)
}

/// `jordan@example.com` becomes `j*****@example.com`.
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let mut chars = local.chars();
            let first = chars.next().map(String::from).unwrap_or_default();
            format!("{first}{}@{domain}", "*".repeat(chars.count().max(1)))
        }
        None => "*".repeat(email.len()),
    }
}
