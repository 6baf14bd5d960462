use chrono::Duration;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use spin_sdk::http::Request;
use tracing::{debug, info, warn};

use crate::config::*;
use crate::core::db::{KvStore, KvStoreExt};
use crate::core::errors::{ApiError, ApiResult, HandlerResult};
use crate::core::form::parse_json;
use crate::core::helpers::{hash_password, header_str, new_id, now, ok_json, validate_email, verify_password};
use crate::models::models::{Claims, PublicUser, User};
use crate::state::AppState;
use crate::users::{find_user_by_username, load_user, release_username, reserve_username, validate_username};

/// HS256 signing and verification of session tokens.
pub struct TokenKeys {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl TokenKeys {
    pub fn new(secret: &[u8], ttl_hours: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation: Validation::default(),
            ttl: Duration::hours(ttl_hours),
        }
    }

    pub fn issue(&self, user: &User) -> ApiResult<String> {
        let issued_at = now();
        let claims = Claims {
            sub: user.id.clone(),
            username: user.username.clone(),
            iat: issued_at.timestamp(),
            exp: (issued_at + self.ttl).timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| ApiError::InternalError(format!("Failed to sign token: {}", e)))
    }

    pub fn verify(&self, token: &str) -> ApiResult<Claims> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                debug!(error = %e, "rejecting bearer token");
                ApiError::Unauthorized
            })
    }
}

/// Creates an account. The username is reserved before the (slow) password
/// hash so concurrent registrations of one name cannot both succeed.
pub fn register_user(store: &dyn KvStore, username: &str, email: &str, password: &str) -> ApiResult<User> {
    let email = email.trim();

    if username.is_empty() {
        return Err(ApiError::BadRequest("Username is required".to_string()));
    }
    validate_username(username)?;
    if !validate_email(email) {
        return Err(ApiError::BadRequest("A valid email is required".to_string()));
    }
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(ApiError::BadRequest(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }

    let user_id = new_id();
    reserve_username(store, username, &user_id)?;

    match create_account(store, user_id, username, email, password) {
        Ok(user) => {
            info!(user_id = %user.id, username = %user.username, "registered user");
            Ok(user)
        }
        Err(err) => {
            release_username(store, username);
            Err(err)
        }
    }
}

fn create_account(store: &dyn KvStore, user_id: String, username: &str, email: &str, password: &str) -> ApiResult<User> {
    let created_at = now();
    let user = User {
        id: user_id,
        username: username.to_string(),
        email: email.to_string(),
        password: hash_password(password)?,
        profile_picture: None,
        followers: Vec::new(),
        followings: Vec::new(),
        is_admin: false,
        created_at,
        updated_at: created_at,
    };

    store.set_json(&user_key(&user.id), &user)?;
    if let Err(err) = store.update_list(USERS_LIST_KEY, |ids| ids.push(user.id.clone())) {
        if let Err(cleanup) = store.delete(&user_key(&user.id)) {
            warn!(user_id = %user.id, error = %cleanup, "could not remove half-created user");
        }
        return Err(err.into());
    }
    Ok(user)
}

pub fn authenticate(store: &dyn KvStore, username: &str, password: &str) -> ApiResult<User> {
    let user = find_user_by_username(store, username)?.ok_or_else(|| ApiError::not_found("User"))?;
    if !verify_password(password, &user.password) {
        debug!(user_id = %user.id, "password mismatch");
        return Err(ApiError::InvalidCredential);
    }
    Ok(user)
}

fn bearer_token(req: &Request) -> Option<&str> {
    header_str(req, "Authorization")?.strip_prefix("Bearer ")
}

/// Resolves who is performing a mutating call.
///
/// A valid bearer token decides the actor; a body `userId` that names somebody
/// else is rejected. Without a token the call is unauthorized unless the server
/// trusts body identities.
pub fn resolve_actor(state: &AppState, req: &Request, claimed: Option<&str>) -> ApiResult<String> {
    let claimed = claimed.filter(|c| !c.is_empty());

    match bearer_token(req) {
        Some(token) => {
            let claims = state.tokens.verify(token)?;
            if load_user(state.store(), &claims.sub)?.is_none() {
                return Err(ApiError::Unauthorized);
            }
            if let Some(claimed) = claimed {
                if claimed != claims.sub {
                    warn!(token_user = %claims.sub, claimed_user = %claimed, "userId does not match token");
                    return Err(ApiError::Forbidden("userId does not match the authenticated user".to_string()));
                }
            }
            Ok(claims.sub)
        }
        None if state.config.trust_body_user_id => claimed.map(str::to_string).ok_or(ApiError::Unauthorized),
        None => Err(ApiError::Unauthorized),
    }
}

// === HTTP Handlers ===

#[derive(Deserialize)]
struct RegisterBody {
    #[serde(default)]
    username: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

#[derive(Deserialize)]
struct LoginBody {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[derive(Serialize)]
struct LoginResponse {
    #[serde(flatten)]
    user: PublicUser,
    token: String,
}

pub fn handle_register(state: &AppState, req: &Request) -> HandlerResult {
    let body: RegisterBody = parse_json(req)?;
    let user = register_user(state.store(), &body.username, &body.email, &body.password)?;
    ok_json(&PublicUser::from(&user))
}

pub fn handle_login(state: &AppState, req: &Request) -> HandlerResult {
    let body: LoginBody = parse_json(req)?;
    let user = authenticate(state.store(), &body.username, &body.password)?;
    let token = state.tokens.issue(&user)?;

    info!(user_id = %user.id, "user logged in");
    ok_json(&LoginResponse {
        user: PublicUser::from(&user),
        token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::core::db::MemoryStore;
    use spin_sdk::http::Method;
    use std::sync::Arc;

    fn state(trust_body_user_id: bool) -> AppState {
        let config = Config {
            jwt_secret: Some("test-secret".to_string()),
            trust_body_user_id,
            ..Config::default()
        };
        AppState::new(Arc::new(MemoryStore::new()), config).unwrap()
    }

    fn put(token: Option<&str>) -> Request {
        let mut builder = Request::builder();
        builder.method(Method::Put).uri("/api/users/x/follow");
        if let Some(token) = token {
            builder.header("Authorization", format!("Bearer {}", token));
        }
        builder.body(Vec::new()).build()
    }

    #[test]
    fn register_hashes_password() {
        let store = MemoryStore::new();
        let user = register_user(&store, "alice", "alice@example.com", "pw1").unwrap();
        assert_ne!(user.password, "pw1");
        assert!(user.followers.is_empty() && user.followings.is_empty());
        assert!(!user.is_admin);
    }

    #[test]
    fn duplicate_username_is_rejected() {
        let store = MemoryStore::new();
        register_user(&store, "alice", "alice@example.com", "pw1").unwrap();
        let err = register_user(&store, "alice", "other@example.com", "pw2").unwrap_err();
        assert!(matches!(err, ApiError::DuplicateUsername));
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn register_validates_fields() {
        let store = MemoryStore::new();
        assert!(matches!(
            register_user(&store, "", "a@b.co", "pw1"),
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            register_user(&store, "alice", "nope", "pw1"),
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            register_user(&store, "alice", "a@b.co", ""),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[test]
    fn login_uses_the_name_as_registered() {
        let store = MemoryStore::new();
        assert!(matches!(
            register_user(&store, "tom&jerry", "tj@example.com", "pw1"),
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            register_user(&store, "<b>bob</b>", "bob@example.com", "pw1"),
            Err(ApiError::BadRequest(_))
        ));

        let user = register_user(&store, "élodie.m", "elodie@example.com", "pw1").unwrap();
        assert_eq!(user.username, "élodie.m");
        assert_eq!(authenticate(&store, "élodie.m", "pw1").unwrap().id, user.id);
    }

    #[test]
    fn username_length_counts_characters() {
        let store = MemoryStore::new();
        // three characters, six bytes
        assert!(register_user(&store, "ééé", "e@example.com", "pw1").is_ok());
        let long = "é".repeat(MAX_USERNAME_LENGTH);
        assert!(register_user(&store, &long, "l@example.com", "pw1").is_ok());
        let too_long = "é".repeat(MAX_USERNAME_LENGTH + 1);
        assert!(matches!(
            register_user(&store, &too_long, "t@example.com", "pw1"),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[test]
    fn concurrent_registrations_of_one_name_have_one_winner() {
        let store = MemoryStore::new();
        let results: Vec<ApiResult<User>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|i| {
                    let store = &store;
                    s.spawn(move || register_user(store, "alice", &format!("a{}@example.com", i), "pw1"))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let winners: Vec<&User> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1);
        assert!(results
            .iter()
            .filter(|r| r.is_err())
            .all(|r| matches!(r, Err(ApiError::DuplicateUsername))));

        let users: Vec<String> = store.get_json(USERS_LIST_KEY).unwrap().unwrap();
        assert_eq!(users, vec![winners[0].id.clone()]);
        assert_eq!(authenticate(&store, "alice", "pw1").unwrap().id, winners[0].id);
    }

    #[test]
    fn concurrent_registrations_all_land_in_the_directory() {
        let store = MemoryStore::new();
        std::thread::scope(|s| {
            for i in 0..6 {
                let store = &store;
                s.spawn(move || {
                    register_user(store, &format!("user{}", i), &format!("u{}@example.com", i), "pw1").unwrap();
                });
            }
        });
        let users: Vec<String> = store.get_json(USERS_LIST_KEY).unwrap().unwrap();
        assert_eq!(users.len(), 6);
        for i in 0..6 {
            assert!(find_user_by_username(&store, &format!("user{}", i)).unwrap().is_some());
        }
    }

    #[test]
    fn authenticate_outcomes() {
        let store = MemoryStore::new();
        let alice = register_user(&store, "alice", "alice@example.com", "pw1").unwrap();
        assert_eq!(authenticate(&store, "alice", "pw1").unwrap().id, alice.id);
        assert!(matches!(
            authenticate(&store, "alice", "wrong"),
            Err(ApiError::InvalidCredential)
        ));
        assert!(matches!(
            authenticate(&store, "nobody", "pw1"),
            Err(ApiError::NotFound(_))
        ));
    }

    #[test]
    fn token_roundtrip_and_tamper() {
        let state = state(false);
        let alice = register_user(state.store(), "alice", "alice@example.com", "pw1").unwrap();
        let token = state.tokens.issue(&alice).unwrap();
        let claims = state.tokens.verify(&token).unwrap();
        assert_eq!(claims.sub, alice.id);
        assert_eq!(claims.username, "alice");

        let other = TokenKeys::new(b"another-secret", 24);
        assert!(matches!(other.verify(&token), Err(ApiError::Unauthorized)));
    }

    #[test]
    fn resolve_actor_rules() {
        let state = state(false);
        let alice = register_user(state.store(), "alice", "alice@example.com", "pw1").unwrap();
        let token = state.tokens.issue(&alice).unwrap();

        let req = put(Some(&token));
        assert_eq!(resolve_actor(&state, &req, None).unwrap(), alice.id);
        assert_eq!(resolve_actor(&state, &req, Some(&alice.id)).unwrap(), alice.id);
        assert!(matches!(
            resolve_actor(&state, &req, Some("someone-else")),
            Err(ApiError::Forbidden(_))
        ));

        let anonymous = put(None);
        assert!(matches!(
            resolve_actor(&state, &anonymous, Some(&alice.id)),
            Err(ApiError::Unauthorized)
        ));
        assert!(matches!(
            resolve_actor(&state, &put(Some("garbage")), None),
            Err(ApiError::Unauthorized)
        ));
    }

    #[test]
    fn legacy_body_identity() {
        let state = state(true);
        let anonymous = put(None);
        assert_eq!(resolve_actor(&state, &anonymous, Some("u1")).unwrap(), "u1");
        assert!(matches!(
            resolve_actor(&state, &anonymous, None),
            Err(ApiError::Unauthorized)
        ));
    }
}
