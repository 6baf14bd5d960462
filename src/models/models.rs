use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stored user document. Holds the password hash, so it is never sent to
/// clients directly; responses go through [`PublicUser`].
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub profile_picture: Option<String>,
    #[serde(default)]
    pub followers: Vec<String>,
    #[serde(default)]
    pub followings: Vec<String>,
    #[serde(default)]
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: String,
    pub username: String,
    pub email: String,
    pub profile_picture: Option<String>,
    pub followers: Vec<String>,
    pub followings: Vec<String>,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_following: Option<bool>,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            profile_picture: user.profile_picture.clone(),
            followers: user.followers.clone(),
            followings: user.followings.clone(),
            is_admin: user.is_admin,
            created_at: user.created_at,
            is_following: None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub user_id: String,
    pub desc: String,
    #[serde(default)]
    pub img: Option<String>,
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default)]
    pub likes: Vec<String>,
    #[serde(default)]
    pub edited: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Embedded in its parent [`Post`]; has no storage key of its own.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub user_id: String,
    pub text: String,
    #[serde(default)]
    pub likes: Vec<String>,
    #[serde(default)]
    pub edited: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CommentAuthor {
    pub id: String,
    pub username: String,
    pub profile_picture: Option<String>,
}

/// A comment with its author's display fields filled in.
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CommentView {
    #[serde(flatten)]
    pub comment: Comment,
    pub author: Option<CommentAuthor>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Like,
    Comment,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    /// Recipient.
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub by_user_id: String,
    pub post_id: String,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub seen: bool,
}

/// Resulting membership after a like toggle.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LikeState {
    Liked,
    Unliked,
}

impl LikeState {
    pub fn is_liked(self) -> bool {
        matches!(self, LikeState::Liked)
    }
}

/// Social event emitted by a content mutation, consumed by the notification log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContentEvent {
    Liked {
        post_id: String,
        post_author: String,
        actor: String,
    },
    Commented {
        post_id: String,
        post_author: String,
        actor: String,
    },
}

/// Bearer token claims.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub username: String,
    pub iat: i64,
    pub exp: i64,
}
