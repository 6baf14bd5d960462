use std::{env, fmt::Display, str::FromStr};

use tracing::{info, warn};

// === Storage keys ===
pub const USERS_LIST_KEY: &str = "users_list";
pub const FEED_KEY: &str = "feed";
pub const JWT_SECRET_KEY: &str = "jwt_secret";

pub fn user_key(user_id: &str) -> String {
    format!("user:{}", user_id)
}

/// Reservation of a username, holding the owning user id.
pub fn username_key(username: &str) -> String {
    format!("username:{}", username)
}

pub fn post_key(post_id: &str) -> String {
    format!("post:{}", post_id)
}

pub fn notification_key(notification_id: &str) -> String {
    format!("notification:{}", notification_id)
}

pub fn notifications_key(user_id: &str) -> String {
    format!("notifications:{}", user_id)
}

pub fn upload_key(file_name: &str) -> String {
    format!("upload:{}", file_name)
}

// === Field limits ===
pub const MIN_USERNAME_LENGTH: usize = 3;
pub const MAX_USERNAME_LENGTH: usize = 50;
pub const MIN_PASSWORD_LENGTH: usize = 3;
pub const MAX_POST_LENGTH: usize = 500;
pub const MAX_COMMENT_LENGTH: usize = 500;

/// Public path prefix under which uploaded images are served.
pub const UPLOADS_PATH_PREFIX: &str = "/uploads/images/";
pub const ALLOWED_IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];

/// Runtime settings, read from `BORD_*` environment variables.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_addr: String,
    pub token_expiration_hours: i64,
    /// When unset, a secret is generated once and persisted in the store.
    pub jwt_secret: Option<String>,
    /// Accept a body `userId` as the actor when no bearer token is sent.
    pub trust_body_user_id: bool,
    pub max_upload_bytes: usize,
    pub seed_demo_data: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5000".to_string(),
            token_expiration_hours: 24,
            jwt_secret: None,
            trust_body_user_id: false,
            max_upload_bytes: 5 * 1024 * 1024,
            seed_demo_data: false,
        }
    }
}

impl Config {
    pub fn load() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: try_load("BORD_BIND_ADDR", defaults.bind_addr),
            token_expiration_hours: try_load(
                "BORD_TOKEN_EXPIRATION_HOURS",
                defaults.token_expiration_hours,
            ),
            jwt_secret: env::var("BORD_JWT_SECRET").ok().filter(|s| !s.is_empty()),
            trust_body_user_id: try_load("BORD_TRUST_BODY_USER_ID", defaults.trust_body_user_id),
            max_upload_bytes: try_load("BORD_MAX_UPLOAD_BYTES", defaults.max_upload_bytes),
            seed_demo_data: try_load("BORD_SEED_DEMO_DATA", defaults.seed_demo_data),
        }
    }
}

fn try_load<T>(key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|e| {
            warn!("Invalid {key} value {raw:?}: {e}, using default: {default}");
            default
        }),
        Err(_) => {
            info!("{key} not set, using default: {default}");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = Config::default();
        assert_eq!(c.token_expiration_hours, 24);
        assert!(!c.trust_body_user_id);
        assert!(c.jwt_secret.is_none());
        assert_eq!(c.max_upload_bytes, 5 * 1024 * 1024);
    }

    #[test]
    fn key_builders() {
        assert_eq!(user_key("u1"), "user:u1");
        assert_eq!(post_key("p1"), "post:p1");
        assert_eq!(username_key("alice"), "username:alice");
        assert_eq!(notifications_key("u1"), "notifications:u1");
        assert_eq!(upload_key("a.png"), "upload:a.png");
    }

    #[test]
    fn try_load_falls_back_on_garbage() {
        env::set_var("BORD_TEST_TRY_LOAD_GARBAGE", "not-a-number");
        let v: i64 = try_load("BORD_TEST_TRY_LOAD_GARBAGE", 7);
        assert_eq!(v, 7);
        env::remove_var("BORD_TEST_TRY_LOAD_GARBAGE");
    }
}
