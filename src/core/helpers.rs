use std::collections::HashSet;
use std::sync::OnceLock;

use ammonia::Builder;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use regex::Regex;
use serde::Serialize;
use spin_sdk::http::{Request, Response};
use uuid::Uuid;

use crate::core::errors::{ApiError, ApiResult, HandlerResult};

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn validate_uuid(id: &str) -> bool {
    Uuid::parse_str(id).is_ok()
}

pub fn hash_password(password: &str) -> ApiResult<String> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApiError::InternalError(format!("Failed to hash password: {}", e)))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Strips all markup, leaving plain text.
pub fn sanitize_text(text: &str) -> String {
    Builder::default()
        .tags(HashSet::new())
        .clean(text)
        .to_string()
}

fn email_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("Regex should compile"))
}

pub fn validate_email(email: &str) -> bool {
    email_regex().is_match(email)
}

fn username_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^[\p{L}\p{N}_.\-]+$").expect("Regex should compile"))
}

/// Letters, digits, `_`, `.` and `-` only. Usernames are stored verbatim.
pub fn is_valid_username(username: &str) -> bool {
    username_regex().is_match(username)
}

pub fn header_str<'a>(req: &'a Request, name: &str) -> Option<&'a str> {
    req.header(name).and_then(|h| h.as_str())
}

pub fn json_response<T: Serialize>(status: u16, value: &T) -> HandlerResult {
    Ok(Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(serde_json::to_vec(value)?)
        .build())
}

pub fn ok_json<T: Serialize>(value: &T) -> HandlerResult {
    json_response(200, value)
}

pub fn message(text: &str) -> HandlerResult {
    ok_json(&serde_json::json!({ "message": text }))
}
