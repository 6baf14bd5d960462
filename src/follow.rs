use serde::Deserialize;
use spin_sdk::http::Request;
use tracing::{error, info};

use crate::auth::resolve_actor;
use crate::config::*;
use crate::core::db::KvStore;
use crate::core::errors::{ApiError, ApiResult, HandlerResult};
use crate::core::form::parse_json;
use crate::core::helpers::{message, ok_json};
use crate::state::AppState;
use crate::users::{load_user, modify_user, require_user};

#[derive(Clone, Copy)]
enum EdgeChange {
    Add,
    Remove,
}

impl EdgeChange {
    fn inverse(self) -> Self {
        match self {
            EdgeChange::Add => EdgeChange::Remove,
            EdgeChange::Remove => EdgeChange::Add,
        }
    }
}

fn check_pair(store: &dyn KvStore, actor_id: &str, target_id: &str) -> ApiResult<()> {
    let target = load_user(store, target_id)?;
    let actor = load_user(store, actor_id)?;
    match (actor, target) {
        (Some(_), Some(_)) => Ok(()),
        _ => Err(ApiError::not_found("User")),
    }
}

fn edit_set(ids: &mut Vec<String>, id: &str, change: EdgeChange) {
    match change {
        EdgeChange::Add => {
            if !ids.iter().any(|x| x == id) {
                ids.push(id.to_string());
            }
        }
        EdgeChange::Remove => ids.retain(|x| x != id),
    }
}

/// Writes the edge change to both users: target first, then actor.
///
/// Each side is an atomic update of one document; the follow-state check
/// happens inside the target update. There is no cross-document
/// transaction: if the actor update fails the target side is reverted, and a
/// failed revert is logged.
fn write_edge(store: &dyn KvStore, actor_id: &str, target_id: &str, change: EdgeChange) -> ApiResult<()> {
    modify_user(store, target_id, |target| {
        let following = target.followers.iter().any(|id| id == actor_id);
        match change {
            EdgeChange::Add if following => return Err(ApiError::AlreadyFollowing),
            EdgeChange::Remove if !following => return Err(ApiError::NotFollowing),
            _ => {}
        }
        edit_set(&mut target.followers, actor_id, change);
        Ok(())
    })?;

    let actor_write = modify_user(store, actor_id, |actor| {
        edit_set(&mut actor.followings, target_id, change);
        Ok(())
    });

    if let Err(write_err) = actor_write {
        error!(actor_id, target_id, error = %write_err, "follow edge write failed, reverting target");
        let revert = modify_user(store, target_id, |target| {
            edit_set(&mut target.followers, actor_id, change.inverse());
            Ok(())
        });
        if let Err(revert_err) = revert {
            error!(actor_id, target_id, error = %revert_err, "revert failed, follow graph is asymmetric");
        }
        return Err(write_err);
    }

    Ok(())
}

pub fn follow_user(store: &dyn KvStore, actor_id: &str, target_id: &str) -> ApiResult<()> {
    if actor_id == target_id {
        return Err(ApiError::SelfFollowForbidden { action: "follow" });
    }
    check_pair(store, actor_id, target_id)?;
    write_edge(store, actor_id, target_id, EdgeChange::Add)?;
    info!(actor_id, target_id, "followed");
    Ok(())
}

pub fn unfollow_user(store: &dyn KvStore, actor_id: &str, target_id: &str) -> ApiResult<()> {
    if actor_id == target_id {
        return Err(ApiError::SelfFollowForbidden { action: "unfollow" });
    }
    check_pair(store, actor_id, target_id)?;
    write_edge(store, actor_id, target_id, EdgeChange::Remove)?;
    info!(actor_id, target_id, "unfollowed");
    Ok(())
}

pub fn get_followings(store: &dyn KvStore, user_id: &str) -> ApiResult<Vec<String>> {
    Ok(require_user(store, user_id)?.followings)
}

pub fn get_followers(store: &dyn KvStore, user_id: &str) -> ApiResult<Vec<String>> {
    Ok(require_user(store, user_id)?.followers)
}

// === HTTP Handlers ===

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct FollowBody {
    user_id: Option<String>,
}

pub fn handle_follow(state: &AppState, req: &Request, target_id: &str) -> HandlerResult {
    let body: FollowBody = parse_json(req)?;
    let actor_id = resolve_actor(state, req, body.user_id.as_deref())?;
    follow_user(state.store(), &actor_id, target_id)?;
    message("User has been followed")
}

pub fn handle_unfollow(state: &AppState, req: &Request, target_id: &str) -> HandlerResult {
    let body: FollowBody = parse_json(req)?;
    let actor_id = resolve_actor(state, req, body.user_id.as_deref())?;
    unfollow_user(state.store(), &actor_id, target_id)?;
    message("User has been unfollowed")
}

pub fn handle_followings_list(state: &AppState, user_id: &str) -> HandlerResult {
    ok_json(&get_followings(state.store(), user_id)?)
}

pub fn handle_followers_list(state: &AppState, user_id: &str) -> HandlerResult {
    ok_json(&get_followers(state.store(), user_id)?)
}
