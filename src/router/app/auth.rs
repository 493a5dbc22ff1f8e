use axum::{extract::State, http::StatusCode};

use serde::{Deserialize, Serialize};
use tower_cookies::{
    cookie::{time, SameSite},
    Cookie, Cookies,
};
use tracing::{debug, info};
use uuid::Uuid;

use std::sync::Arc;

use crate::{
    auth::{
        generate_otp, hash_password_blocking, mask_email, verify_password_blocking,
        SignupRequest, MAX_OTP_ATTEMPTS,
    },
    config::Config,
    data::model::{NewUser, PendingSignup, User},
    error::AppError,
    extract::Json,
    middleware::{CurrentUser, SESSION_COOKIE},
    AppState,
};

fn session_cookie(config: &Config, value: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(config.cookie_secure)
        .max_age(time::Duration::seconds(config.session_ttl.num_seconds()))
        .build()
}

async fn open_session(state: &AppState, cookies: &Cookies, user_id: i64) -> Result<(), AppError> {
    let token = state
        .users
        .create_session(user_id, state.config.session_ttl)
        .await?;
    cookies.add(session_cookie(&state.config, token.to_string()));
    Ok(())
}

/// Stand-in for a mail transport.
fn deliver_code(to: &str, code: &str) {
    info!(to = %mask_email(to), "verification code issued");
    debug!(to, code, "verification code");
}

#[derive(Serialize, Debug)]
pub struct SignupStarted {
    signup_id: Uuid,
    verification_required: bool,
    delivered_to: Option<String>,
}

#[axum::debug_handler]
pub async fn signup_start(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SignupRequest>,
) -> Result<(StatusCode, Json<SignupStarted>), AppError> {
    let signup = request.validate(chrono::Utc::now().date_naive())?;

    if state
        .users
        .identifier_taken(signup.identity.email(), signup.identity.username())
        .await?
    {
        return Err(AppError::conflict(
            "an account with this email or username already exists",
        ));
    }

    // Minors verify through their parent.
    let delivery_target = signup
        .parent
        .as_ref()
        .map(|parent| parent.email.clone())
        .or_else(|| signup.identity.email().map(str::to_string));
    let otp = delivery_target.as_ref().map(|_| generate_otp());
    let otp_hash = match &otp {
        Some(code) => Some(hash_password_blocking(code.clone()).await?),
        None => None,
    };

    let password_hash = hash_password_blocking(request.password).await?;
    let new_user = NewUser {
        signup,
        password_hash,
    };
    let expires_at = chrono::Utc::now() + state.config.otp_ttl;
    let signup_id = state
        .signups
        .replace(&new_user, otp_hash.as_deref(), expires_at)
        .await?;

    if let (Some(target), Some(code)) = (&delivery_target, &otp) {
        deliver_code(target, code);
    }

    Ok((
        StatusCode::CREATED,
        Json(SignupStarted {
            signup_id,
            verification_required: otp.is_some(),
            delivered_to: delivery_target.as_deref().map(mask_email),
        }),
    ))
}

/// Verifies the submitted code against the stored hash. Each miss is counted
/// and the pending signup is dropped at [`MAX_OTP_ATTEMPTS`].
async fn check_code(
    state: &AppState,
    pending: &PendingSignup,
    given: Option<&str>,
) -> Result<(), AppError> {
    let Some(otp_hash) = &pending.otp_hash else {
        return Ok(());
    };

    let given = given.map(str::trim).unwrap_or_default().to_string();
    if verify_password_blocking(given, otp_hash.clone()).await? {
        return Ok(());
    }

    let attempts = state.signups.record_failed_attempt(pending.id).await?;
    if attempts >= MAX_OTP_ATTEMPTS {
        state.signups.delete(pending.id).await?;
        info!(signup_id = %pending.id, attempts, "signup discarded after failed codes");
        return Err(AppError::validation(
            "too many incorrect codes, start the signup again",
        ));
    }
    Err(AppError::validation("verification code is incorrect"))
}

#[derive(Deserialize, Debug)]
pub struct VerifySignup {
    signup_id: Uuid,
    otp: Option<String>,
}

#[axum::debug_handler]
pub async fn signup_verify(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    Json(verify): Json<VerifySignup>,
) -> Result<(StatusCode, Json<User>), AppError> {
    let pending = state
        .signups
        .find(verify.signup_id)
        .await?
        .ok_or(AppError::NotFound("signup"))?;

    if pending.expires_at <= chrono::Utc::now() {
        state.signups.delete(pending.id).await?;
        return Err(AppError::NotFound("signup"));
    }

    check_code(&state, &pending, verify.otp.as_deref()).await?;

    let user = state.users.create(&pending.user).await?.ok_or_else(|| {
        AppError::conflict("an account with this email or username already exists")
    })?;
    state.signups.delete(pending.id).await?;
    info!(user_id = user.id, user_type = %user.user_type, "account created");

    open_session(&state, &cookies, user.id).await?;

    Ok((StatusCode::CREATED, Json(user)))
}

#[derive(Deserialize, Debug)]
pub struct LogIn {
    identifier: String,
    password: String,
}

#[axum::debug_handler]
pub async fn login(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    Json(log_in): Json<LogIn>,
) -> Result<Json<User>, AppError> {
    let user = state
        .users
        .find_by_identifier(log_in.identifier.trim())
        .await?
        .ok_or(AppError::InvalidCredentials)?;

    if !verify_password_blocking(log_in.password, user.password_hash.clone()).await? {
        return Err(AppError::InvalidCredentials);
    }

    open_session(&state, &cookies, user.id).await?;
    debug!(user_id = user.id, "logged in");

    Ok(Json(user))
}

#[axum::debug_handler]
pub async fn logout(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
) -> Result<StatusCode, AppError> {
    let token = cookies
        .get(SESSION_COOKIE)
        .and_then(|cookie| Uuid::parse_str(cookie.value()).ok());
    if let Some(token) = token {
        state.users.delete_session(token).await?;
    }

    cookies.remove(session_cookie(&state.config, String::new()));

    Ok(StatusCode::NO_CONTENT)
}

pub async fn me(CurrentUser(user): CurrentUser) -> Json<User> {
    Json(user)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate, Utc};
    use sqlx::PgPool;

    use super::*;
    use crate::{
        auth::hash_password,
        data::model::{Identity, UserType, ValidatedSignup},
    };

    #[test]
    fn session_cookie_lives_as_long_as_the_session() {
        let config = Config::for_tests();
        let cookie = session_cookie(&config, "token".into());

        assert_eq!(cookie.name(), SESSION_COOKIE);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.max_age(), Some(time::Duration::hours(1)));
    }

    fn new_user() -> NewUser {
        NewUser {
            signup: ValidatedSignup {
                identity: Identity::Email("riley@example.com".into()),
                full_name: "Riley Park".into(),
                date_of_birth: NaiveDate::from_ymd_opt(2000, 1, 15).unwrap(),
                user_type: UserType::Athlete,
                sports_played: vec!["Soccer".into()],
                primary_sport: Some("Soccer".into()),
                parent: None,
            },
            password_hash: "hash".into(),
        }
    }

    async fn pending_with_code(state: &AppState, code: &str) -> PendingSignup {
        let otp_hash = hash_password(code).unwrap();
        let id = state
            .signups
            .replace(&new_user(), Some(&otp_hash), Utc::now() + Duration::minutes(10))
            .await
            .unwrap();
        state.signups.find(id).await.unwrap().unwrap()
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres server in DATABASE_URL"]
    async fn stored_code_is_hashed_and_accepted(pool: PgPool) {
        let state = AppState::new(pool, Config::for_tests());
        let pending = pending_with_code(&state, "048213").await;

        assert_ne!(pending.otp_hash.as_deref(), Some("048213"));
        check_code(&state, &pending, Some(" 048213 ")).await.unwrap();
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres server in DATABASE_URL"]
    async fn pending_signup_is_discarded_after_five_wrong_codes(pool: PgPool) {
        let state = AppState::new(pool, Config::for_tests());
        let pending = pending_with_code(&state, "048213").await;

        for _ in 1..MAX_OTP_ATTEMPTS {
            let err = check_code(&state, &pending, Some("111111")).await.unwrap_err();
            assert_eq!(err.to_string(), "verification code is incorrect");
        }
        assert!(state.signups.find(pending.id).await.unwrap().is_some());

        let err = check_code(&state, &pending, Some("111111")).await.unwrap_err();
        assert!(err.to_string().contains("too many"));
        assert!(state.signups.find(pending.id).await.unwrap().is_none());
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres server in DATABASE_URL"]
    async fn signup_for_the_same_identifier_replaces_the_earlier_one(pool: PgPool) {
        let state = AppState::new(pool, Config::for_tests());
        let first = pending_with_code(&state, "111111").await;
        let second = pending_with_code(&state, "222222").await;

        assert!(state.signups.find(first.id).await.unwrap().is_none());
        assert!(state.signups.find(second.id).await.unwrap().is_some());
    }
}
