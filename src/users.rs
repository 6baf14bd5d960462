use serde::Deserialize;
use spin_sdk::http::Request;
use tracing::{info, warn};

use crate::auth::resolve_actor;
use crate::config::*;
use crate::core::db::{KvStore, KvStoreExt};
use crate::core::errors::{ApiError, ApiResult, HandlerResult};
use crate::core::form::parse_json;
use crate::core::helpers::{hash_password, is_valid_username, message, now, ok_json, validate_email};
use crate::core::query_params::query_param;
use crate::models::models::{PublicUser, User};
use crate::state::AppState;

pub fn load_user(store: &dyn KvStore, user_id: &str) -> ApiResult<Option<User>> {
    Ok(store.get_json::<User>(&user_key(user_id))?)
}

pub fn require_user(store: &dyn KvStore, user_id: &str) -> ApiResult<User> {
    load_user(store, user_id)?.ok_or_else(|| ApiError::not_found("User"))
}

pub fn load_all_users(store: &dyn KvStore) -> ApiResult<Vec<User>> {
    let ids: Vec<String> = store.get_json(USERS_LIST_KEY)?.unwrap_or_default();
    let mut users = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(user) = load_user(store, &id)? {
            users.push(user);
        }
    }
    Ok(users)
}

pub fn find_user_by_username(store: &dyn KvStore, username: &str) -> ApiResult<Option<User>> {
    match store.get_json::<String>(&username_key(username))? {
        Some(user_id) => load_user(store, &user_id),
        None => Ok(None),
    }
}

pub fn validate_username(username: &str) -> ApiResult<()> {
    let len = username.chars().count();
    if len < MIN_USERNAME_LENGTH || len > MAX_USERNAME_LENGTH {
        return Err(ApiError::BadRequest(format!(
            "Username must be {}-{} characters",
            MIN_USERNAME_LENGTH, MAX_USERNAME_LENGTH
        )));
    }
    if !is_valid_username(username) {
        return Err(ApiError::BadRequest(
            "Username may only contain letters, digits, '_', '.' and '-'".to_string(),
        ));
    }
    Ok(())
}

/// Claims `username` for `user_id`. Exactly one concurrent claimant wins.
pub fn reserve_username(store: &dyn KvStore, username: &str, user_id: &str) -> ApiResult<()> {
    if store.set_if_absent(&username_key(username), &serde_json::to_vec(user_id)?)? {
        Ok(())
    } else {
        Err(ApiError::DuplicateUsername)
    }
}

/// Best-effort release of a reservation; failures are logged.
pub fn release_username(store: &dyn KvStore, username: &str) {
    if let Err(e) = store.delete(&username_key(username)) {
        warn!(username, error = %e, "could not release username reservation");
    }
}

/// Atomically edits an existing user document.
pub fn modify_user<R>(
    store: &dyn KvStore,
    user_id: &str,
    mut f: impl FnMut(&mut User) -> ApiResult<R>,
) -> ApiResult<R> {
    store.update_json(&user_key(user_id), |doc: &mut Option<User>| {
        let user = doc.as_mut().ok_or_else(|| ApiError::not_found("User"))?;
        f(user)
    })
}

/// Every user, each flagged with whether `requester_id` follows them.
pub fn list_users(store: &dyn KvStore, requester_id: Option<&str>) -> ApiResult<Vec<PublicUser>> {
    Ok(load_all_users(store)?
        .iter()
        .map(|user| {
            let mut public = PublicUser::from(user);
            public.is_following = Some(
                requester_id
                    .map(|rid| user.followers.iter().any(|f| f == rid))
                    .unwrap_or(false),
            );
            public
        })
        .collect())
}

/// Partial profile update. Absent fields are left alone.
#[derive(Deserialize, Default, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub user_id: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub profile_picture: Option<String>,
}

fn can_manage(store: &dyn KvStore, user_id: &str, requester_id: &str) -> ApiResult<bool> {
    if user_id == requester_id {
        return Ok(true);
    }
    Ok(load_user(store, requester_id)?.map(|r| r.is_admin).unwrap_or(false))
}

pub fn update_profile(
    store: &dyn KvStore,
    user_id: &str,
    update: ProfileUpdate,
    requester_id: &str,
) -> ApiResult<User> {
    if !can_manage(store, user_id, requester_id)? {
        return Err(ApiError::Forbidden("You can update only your account!".to_string()));
    }
    let current = require_user(store, user_id)?;

    let email = match update.email {
        Some(email) => {
            let email = email.trim().to_string();
            if !validate_email(&email) {
                return Err(ApiError::BadRequest("A valid email is required".to_string()));
            }
            Some(email)
        }
        None => None,
    };

    let password_hash = match update.password {
        Some(password) => {
            if password.chars().count() < MIN_PASSWORD_LENGTH {
                return Err(ApiError::BadRequest(format!(
                    "Password must be at least {} characters",
                    MIN_PASSWORD_LENGTH
                )));
            }
            Some(hash_password(&password)?)
        }
        None => None,
    };

    let new_username = match update.username {
        Some(username) if username != current.username => {
            validate_username(&username)?;
            reserve_username(store, &username, user_id)?;
            Some(username)
        }
        _ => None,
    };

    let result = modify_user(store, user_id, |user| {
        let previous = user.username.clone();
        if let Some(username) = &new_username {
            user.username = username.clone();
        }
        if let Some(email) = &email {
            user.email = email.clone();
        }
        if let Some(hash) = &password_hash {
            user.password = hash.clone();
        }
        if let Some(picture) = &update.profile_picture {
            user.profile_picture = if picture.is_empty() { None } else { Some(picture.clone()) };
        }
        user.updated_at = now();
        Ok((user.clone(), previous))
    });

    // a rename holds two reservations until here; drop the losing one
    if let Some(username) = &new_username {
        match &result {
            Ok((_, previous)) if previous != username => release_username(store, previous),
            Ok(_) => {}
            Err(_) => release_username(store, username),
        }
    }

    let (user, _) = result?;
    info!(user_id = %user.id, requester_id, "updated profile");
    Ok(user)
}

/// Removes the account. Posts and comments by the user are left in place.
pub fn delete_user(store: &dyn KvStore, user_id: &str, requester_id: &str) -> ApiResult<()> {
    if !can_manage(store, user_id, requester_id)? {
        return Err(ApiError::Forbidden("You can delete only your account!".to_string()));
    }
    let user = require_user(store, user_id)?;

    store.delete(&user_key(user_id))?;
    store.update_list(USERS_LIST_KEY, |ids| ids.retain(|id| id != user_id))?;
    release_username(store, &user.username);

    info!(user_id, requester_id, "deleted user");
    Ok(())
}

// === HTTP Handlers ===

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ActorBody {
    user_id: Option<String>,
}

pub fn handle_list_users(state: &AppState, req: &Request) -> HandlerResult {
    let current = query_param(req, "currentUserId");
    ok_json(&list_users(state.store(), current.as_deref())?)
}

pub fn handle_get_user(state: &AppState, user_id: &str) -> HandlerResult {
    let user = require_user(state.store(), user_id)?;
    ok_json(&PublicUser::from(&user))
}

pub fn handle_search_user(state: &AppState, username: &str) -> HandlerResult {
    let username = urlencoding::decode(username)
        .map(|u| u.into_owned())
        .unwrap_or_else(|_| username.to_string());
    let user = find_user_by_username(state.store(), &username)?
        .ok_or_else(|| ApiError::not_found("User"))?;
    ok_json(&serde_json::json!({ "id": user.id }))
}

pub fn handle_update_user(state: &AppState, req: &Request, user_id: &str) -> HandlerResult {
    let mut update: ProfileUpdate = parse_json(req)?;
    let requester = resolve_actor(state, req, update.user_id.as_deref())?;
    update.user_id = None;
    let user = update_profile(state.store(), user_id, update, &requester)?;
    ok_json(&PublicUser::from(&user))
}

pub fn handle_delete_user(state: &AppState, req: &Request, user_id: &str) -> HandlerResult {
    let body: ActorBody = parse_json(req)?;
    let requester = resolve_actor(state, req, body.user_id.as_deref())?;
    delete_user(state.store(), user_id, &requester)?;
    message("Account has been deleted")
}
