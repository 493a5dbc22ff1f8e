use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    #[default]
    Athlete,
    Coach,
    Organization,
    Parent,
}

impl UserType {
    pub fn as_str(self) -> &'static str {
        match self {
            UserType::Athlete => "athlete",
            UserType::Coach => "coach",
            UserType::Organization => "organization",
            UserType::Parent => "parent",
        }
    }
}

impl fmt::Display for UserType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "athlete" => Ok(UserType::Athlete),
            "coach" => Ok(UserType::Coach),
            "organization" => Ok(UserType::Organization),
            "parent" => Ok(UserType::Parent),
            other => Err(anyhow::anyhow!("unknown user type {other:?}")),
        }
    }
}

/// A registered account. Serializes as the private profile; the password hash
/// never leaves the server.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub email: Option<String>,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub full_name: String,
    pub date_of_birth: NaiveDate,
    pub user_type: UserType,
    pub bio: Option<String>,
    pub city: Option<String>,
    pub avatar_url: Option<String>,
    pub cover_url: Option<String>,
    pub primary_sport: Option<String>,
    pub sports_played: Vec<String>,
    pub parent_email: Option<String>,
    pub parent_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The login identity of an account: either an email or a username, never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Email(String),
    Username(String),
}

impl Identity {
    pub fn email(&self) -> Option<&str> {
        match self {
            Identity::Email(email) => Some(email),
            Identity::Username(_) => None,
        }
    }

    pub fn username(&self) -> Option<&str> {
        match self {
            Identity::Username(username) => Some(username),
            Identity::Email(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentContact {
    pub email: String,
    pub name: String,
}

/// Signup data that has passed validation, minus the password.
#[derive(Debug, Clone)]
pub struct ValidatedSignup {
    pub identity: Identity,
    pub full_name: String,
    pub date_of_birth: NaiveDate,
    pub user_type: UserType,
    pub sports_played: Vec<String>,
    pub primary_sport: Option<String>,
    pub parent: Option<ParentContact>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub signup: ValidatedSignup,
    pub password_hash: String,
}

#[derive(Debug, Clone)]
pub struct PendingSignup {
    pub id: uuid::Uuid,
    pub user: NewUser,
    pub otp_hash: Option<String>,
    pub attempts: i32,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub full_name: Option<String>,
    pub bio: Option<String>,
    pub city: Option<String>,
    pub avatar_url: Option<String>,
    pub cover_url: Option<String>,
    pub sports_played: Option<Vec<String>>,
    pub primary_sport: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UserSummary {
    pub id: i64,
    pub username: Option<String>,
    pub full_name: String,
    pub user_type: UserType,
    pub avatar_url: Option<String>,
    pub primary_sport: Option<String>,
}

/// What other users see of an account.
#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    pub id: i64,
    pub username: Option<String>,
    pub full_name: String,
    pub user_type: UserType,
    pub bio: Option<String>,
    pub city: Option<String>,
    pub avatar_url: Option<String>,
    pub cover_url: Option<String>,
    pub primary_sport: Option<String>,
    pub sports_played: Vec<String>,
    pub follower_count: i64,
    pub following_count: i64,
    pub post_count: i64,
    pub is_following: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostKind {
    Post,
    Article,
    Clip,
}

impl PostKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PostKind::Post => "post",
            PostKind::Article => "article",
            PostKind::Clip => "clip",
        }
    }
}

impl FromStr for PostKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "post" => Ok(PostKind::Post),
            "article" => Ok(PostKind::Article),
            "clip" => Ok(PostKind::Clip),
            other => Err(anyhow::anyhow!("unknown post kind {other:?}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewPost {
    pub kind: PostKind,
    pub title: Option<String>,
    pub body: Option<String>,
    pub media_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Post {
    pub id: i64,
    pub kind: PostKind,
    pub title: Option<String>,
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_html: Option<String>,
    pub media_url: Option<String>,
    pub author: UserSummary,
    pub like_count: i64,
    pub comment_count: i64,
    pub liked_by_me: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub author: UserSummary,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow)]
pub struct Conversation {
    pub id: i64,
    pub user_a: i64,
    pub user_b: i64,
}

impl Conversation {
    pub fn has_participant(&self, user_id: i64) -> bool {
        self.user_a == user_id || self.user_b == user_id
    }

    /// The participant that is not `user_id`.
    pub fn other_participant(&self, user_id: i64) -> i64 {
        if self.user_a == user_id {
            self.user_b
        } else {
            self.user_a
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_id: i64,
    pub body: Option<String>,
    pub media_url: Option<String>,
    pub client_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn is_delivered(&self) -> bool {
        self.delivered_at.is_some()
    }

    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }
}

/// A validated outgoing message.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageDraft {
    pub body: Option<String>,
    pub media_url: Option<String>,
    pub client_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LastMessage {
    pub id: i64,
    pub sender_id: i64,
    pub body: Option<String>,
    pub media_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A conversation as seen by one of its participants.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub id: i64,
    pub other: UserSummary,
    pub last_message: Option<LastMessage>,
    pub unread_count: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Sport {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Position {
    pub id: i64,
    pub sport_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Number,
    Text,
}

impl FromStr for FieldType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "number" => Ok(FieldType::Number),
            "text" => Ok(FieldType::Text),
            other => Err(anyhow::anyhow!("unknown field type {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PositionField {
    pub id: i64,
    pub position_id: i64,
    pub label: String,
    pub unit: Option<String>,
    pub field_type: FieldType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatValue {
    pub field_id: i64,
    pub label: String,
    pub unit: Option<String>,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatEntry {
    pub id: i64,
    pub year: i32,
    pub updated_at: DateTime<Utc>,
    pub values: Vec<StatValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SportProfile {
    pub id: i64,
    pub sport_id: i64,
    pub sport_name: String,
    pub position_id: i64,
    pub position_name: String,
    pub entries: Vec<StatEntry>,
}
