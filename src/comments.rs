use serde::{Deserialize, Serialize};
use spin_sdk::http::Request;
use tracing::info;

use crate::auth::resolve_actor;
use crate::config::*;
use crate::core::db::KvStore;
use crate::core::errors::{ApiError, ApiResult, HandlerResult};
use crate::core::form::parse_json;
use crate::core::helpers::{message, new_id, now, ok_json, sanitize_text};
use crate::models::models::{Comment, CommentAuthor, CommentView, ContentEvent, LikeState, Post};
use crate::notifications::consume_event;
use crate::posts::{get_post, modify_post};
use crate::state::AppState;
use crate::users::load_user;

fn validate_text(text: &str) -> ApiResult<String> {
    let clean = sanitize_text(text.trim());
    if clean.is_empty() {
        return Err(ApiError::BadRequest("Comment text is required".to_string()));
    }
    if clean.chars().count() > MAX_COMMENT_LENGTH {
        return Err(ApiError::BadRequest(format!(
            "Comment must be at most {} characters",
            MAX_COMMENT_LENGTH
        )));
    }
    Ok(clean)
}

fn comment_index(post: &Post, comment_id: &str) -> ApiResult<usize> {
    post.comments
        .iter()
        .position(|c| c.id == comment_id)
        .ok_or_else(|| ApiError::not_found("Comment"))
}

/// Locates the comment, checking the requester wrote it.
fn owned_comment(post: &Post, comment_id: &str, requester_id: &str, verb: &str) -> ApiResult<usize> {
    let idx = comment_index(post, comment_id)?;
    if post.comments[idx].user_id != requester_id {
        return Err(ApiError::NotOwner(format!("You can {} only your comments", verb)));
    }
    Ok(idx)
}

pub fn add_comment(store: &dyn KvStore, post_id: &str, author_id: &str, text: &str) -> ApiResult<(Post, ContentEvent)> {
    let text = validate_text(text)?;
    let comment_id = new_id();

    let post = modify_post(store, post_id, |post| {
        post.comments.push(Comment {
            id: comment_id.clone(),
            user_id: author_id.to_string(),
            text: text.clone(),
            likes: Vec::new(),
            edited: false,
            created_at: now(),
        });
        Ok(post.clone())
    })?;

    let event = ContentEvent::Commented {
        post_id: post.id.clone(),
        post_author: post.user_id.clone(),
        actor: author_id.to_string(),
    };

    info!(post_id, comment_id = %comment_id, author_id, "added comment");
    Ok((post, event))
}

/// The post's comments in order, with author username and picture filled in.
pub fn list_comments(store: &dyn KvStore, post_id: &str) -> ApiResult<Vec<CommentView>> {
    let post = get_post(store, post_id)?;
    let mut views = Vec::with_capacity(post.comments.len());
    for comment in post.comments {
        let author = load_user(store, &comment.user_id)?.map(|u| CommentAuthor {
            id: u.id,
            username: u.username,
            profile_picture: u.profile_picture,
        });
        views.push(CommentView { comment, author });
    }
    Ok(views)
}

pub fn edit_comment(store: &dyn KvStore, post_id: &str, comment_id: &str, requester_id: &str, text: &str) -> ApiResult<Comment> {
    let updated = modify_post(store, post_id, |post| {
        let idx = owned_comment(post, comment_id, requester_id, "edit")?;
        let text = validate_text(text)?;

        let comment = &mut post.comments[idx];
        comment.text = text;
        comment.edited = true;
        Ok(comment.clone())
    })?;

    info!(post_id, comment_id, requester_id, "edited comment");
    Ok(updated)
}

pub fn delete_comment(store: &dyn KvStore, post_id: &str, comment_id: &str, requester_id: &str) -> ApiResult<()> {
    modify_post(store, post_id, |post| {
        let idx = owned_comment(post, comment_id, requester_id, "delete")?;
        post.comments.remove(idx);
        Ok(())
    })?;
    info!(post_id, comment_id, requester_id, "deleted comment");
    Ok(())
}

pub fn toggle_comment_like(store: &dyn KvStore, post_id: &str, comment_id: &str, user_id: &str) -> ApiResult<LikeState> {
    let state = modify_post(store, post_id, |post| {
        let idx = comment_index(post, comment_id)?;
        let likes = &mut post.comments[idx].likes;
        if likes.iter().any(|id| id == user_id) {
            likes.retain(|id| id != user_id);
            Ok(LikeState::Unliked)
        } else {
            likes.push(user_id.to_string());
            Ok(LikeState::Liked)
        }
    })?;

    info!(post_id, comment_id, user_id, ?state, "toggled comment like");
    Ok(state)
}

// === HTTP Handlers ===

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct CommentBody {
    user_id: Option<String>,
    #[serde(default)]
    text: String,
}

#[derive(Serialize)]
struct EditResponse {
    message: &'static str,
    comment: Comment,
}

#[derive(Serialize)]
struct LikeResponse {
    status: LikeState,
    liked: bool,
}

pub fn handle_add_comment(state: &AppState, req: &Request, post_id: &str) -> HandlerResult {
    let body: CommentBody = parse_json(req)?;
    let author_id = resolve_actor(state, req, body.user_id.as_deref())?;
    let (post, event) = add_comment(state.store(), post_id, &author_id, &body.text)?;
    consume_event(state.store(), &event)?;
    ok_json(&post)
}

pub fn handle_list_comments(state: &AppState, post_id: &str) -> HandlerResult {
    ok_json(&list_comments(state.store(), post_id)?)
}

pub fn handle_edit_comment(state: &AppState, req: &Request, post_id: &str, comment_id: &str) -> HandlerResult {
    let body: CommentBody = parse_json(req)?;
    let requester_id = resolve_actor(state, req, body.user_id.as_deref())?;
    let comment = edit_comment(state.store(), post_id, comment_id, &requester_id, &body.text)?;
    ok_json(&EditResponse {
        message: "Comment updated successfully",
        comment,
    })
}

pub fn handle_delete_comment(state: &AppState, req: &Request, post_id: &str, comment_id: &str) -> HandlerResult {
    let body: CommentBody = parse_json(req)?;
    let requester_id = resolve_actor(state, req, body.user_id.as_deref())?;
    delete_comment(state.store(), post_id, comment_id, &requester_id)?;
    message("Comment deleted successfully")
}

pub fn handle_toggle_comment_like(state: &AppState, req: &Request, post_id: &str, comment_id: &str) -> HandlerResult {
    let body: CommentBody = parse_json(req)?;
    let user_id = resolve_actor(state, req, body.user_id.as_deref())?;
    let like_state = toggle_comment_like(state.store(), post_id, comment_id, &user_id)?;
    ok_json(&LikeResponse {
        status: like_state,
        liked: like_state.is_liked(),
    })
}
