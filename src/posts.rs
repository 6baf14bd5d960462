use serde::{Deserialize, Serialize};
use spin_sdk::http::Request;
use tracing::{info, warn};

use crate::auth::resolve_actor;
use crate::config::*;
use crate::core::db::{KvStore, KvStoreExt};
use crate::core::errors::{ApiError, ApiResult, HandlerResult};
use crate::core::form::{parse_json, parse_post_form, UploadedImage};
use crate::core::helpers::{message, new_id, now, ok_json, sanitize_text};
use crate::core::query_params::query_param;
use crate::models::models::{ContentEvent, LikeState, Post};
use crate::notifications::consume_event;
use crate::state::AppState;
use crate::uploads::{delete_image, store_image};
use crate::users::require_user;

pub struct NewPost {
    pub author_id: String,
    pub desc: String,
    pub img: Option<String>,
}

#[derive(Default)]
pub struct PostUpdate {
    pub desc: Option<String>,
    pub img: Option<String>,
}

/// Sanitizes the body text and checks its bounds. Empty text is only
/// allowed on posts that carry an image.
pub fn validate_desc(desc: &str, has_image: bool) -> ApiResult<String> {
    let clean = sanitize_text(desc.trim());
    if clean.chars().count() > MAX_POST_LENGTH {
        return Err(ApiError::BadRequest(format!(
            "Post text must be at most {} characters",
            MAX_POST_LENGTH
        )));
    }
    if clean.is_empty() && !has_image {
        return Err(ApiError::BadRequest("Post text or image is required".to_string()));
    }
    Ok(clean)
}

pub fn load_post(store: &dyn KvStore, post_id: &str) -> ApiResult<Option<Post>> {
    Ok(store.get_json::<Post>(&post_key(post_id))?)
}

pub fn get_post(store: &dyn KvStore, post_id: &str) -> ApiResult<Post> {
    load_post(store, post_id)?.ok_or_else(|| ApiError::not_found("Post"))
}

pub fn save_post(store: &dyn KvStore, post: &Post) -> ApiResult<()> {
    Ok(store.set_json(&post_key(&post.id), post)?)
}

/// Atomically edits an existing post.
pub fn modify_post<R>(store: &dyn KvStore, post_id: &str, mut f: impl FnMut(&mut Post) -> ApiResult<R>) -> ApiResult<R> {
    store.update_json(&post_key(post_id), |doc: &mut Option<Post>| {
        let post = doc.as_mut().ok_or_else(|| ApiError::not_found("Post"))?;
        f(post)
    })
}

fn load_feed(store: &dyn KvStore) -> ApiResult<Vec<Post>> {
    let feed: Vec<String> = store.get_json(FEED_KEY)?.unwrap_or_default();
    let mut posts = Vec::with_capacity(feed.len());
    for id in feed {
        if let Some(post) = load_post(store, &id)? {
            posts.push(post);
        }
    }
    Ok(posts)
}

fn newest_first(mut posts: Vec<Post>) -> Vec<Post> {
    posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    posts
}

pub fn create_post(store: &dyn KvStore, new_post: NewPost) -> ApiResult<Post> {
    require_user(store, &new_post.author_id)?;
    let desc = validate_desc(&new_post.desc, new_post.img.is_some())?;

    let created_at = now();
    let post = Post {
        id: new_id(),
        user_id: new_post.author_id,
        desc,
        img: new_post.img,
        comments: Vec::new(),
        likes: Vec::new(),
        edited: false,
        created_at,
        updated_at: created_at,
    };

    save_post(store, &post)?;
    // prepend newest
    if let Err(err) = store.update_list(FEED_KEY, |feed| feed.insert(0, post.id.clone())) {
        if let Err(cleanup) = store.delete(&post_key(&post.id)) {
            warn!(post_id = %post.id, error = %cleanup, "could not remove post missing from feed");
        }
        return Err(err.into());
    }

    info!(post_id = %post.id, user_id = %post.user_id, "created post");
    Ok(post)
}

pub fn update_post(store: &dyn KvStore, post_id: &str, requester_id: &str, update: PostUpdate) -> ApiResult<Post> {
    let (post, replaced_img) = modify_post(store, post_id, |post| {
        if post.user_id != requester_id {
            return Err(ApiError::Forbidden("You can update only your post".to_string()));
        }

        let has_image = update.img.is_some() || post.img.is_some();
        if let Some(desc) = &update.desc {
            post.desc = validate_desc(desc, has_image)?;
        }
        let replaced_img = match &update.img {
            Some(img) => post.img.replace(img.clone()),
            None => None,
        };

        post.edited = true;
        post.updated_at = now();
        Ok((post.clone(), replaced_img))
    })?;

    if let Some(old) = replaced_img {
        delete_image(store, &old)?;
    }

    info!(post_id, requester_id, "updated post");
    Ok(post)
}

pub fn delete_post(store: &dyn KvStore, post_id: &str, requester_id: &str) -> ApiResult<()> {
    let post = store.update_json(&post_key(post_id), |doc: &mut Option<Post>| {
        match doc.as_ref() {
            None => return Err(ApiError::not_found("Post")),
            Some(post) if post.user_id != requester_id => {
                return Err(ApiError::NotOwner("You can delete only your posts".to_string()))
            }
            Some(_) => {}
        }
        doc.take().ok_or_else(|| ApiError::not_found("Post"))
    })?;

    store.update_list(FEED_KEY, |feed| feed.retain(|id| id != post_id))?;

    if let Some(img) = &post.img {
        delete_image(store, img)?;
    }

    info!(post_id, requester_id, "deleted post");
    Ok(())
}

/// Adds `user_id` to the post's likes, or removes it if already present.
pub fn toggle_like(store: &dyn KvStore, post_id: &str, user_id: &str) -> ApiResult<(LikeState, Option<ContentEvent>)> {
    let (state, post_author) = modify_post(store, post_id, |post| {
        let state = if post.likes.iter().any(|id| id == user_id) {
            post.likes.retain(|id| id != user_id);
            LikeState::Unliked
        } else {
            post.likes.push(user_id.to_string());
            LikeState::Liked
        };
        Ok((state, post.user_id.clone()))
    })?;

    let event = state.is_liked().then(|| ContentEvent::Liked {
        post_id: post_id.to_string(),
        post_author,
        actor: user_id.to_string(),
    });

    info!(post_id, user_id, ?state, "toggled post like");
    Ok((state, event))
}

/// Removes a freshly stored image after the post write that would have
/// referenced it failed.
fn discard_image(store: &dyn KvStore, img: Option<&str>) {
    if let Some(path) = img {
        if let Err(e) = delete_image(store, path) {
            warn!(path, error = %e, "could not remove orphaned upload");
        }
    }
}

/// Stores the optional image, then creates the post referencing it.
pub fn publish_post(store: &dyn KvStore, author_id: String, desc: String, image: Option<&UploadedImage>) -> ApiResult<Post> {
    // reject before the blob is written so a bad request leaves nothing behind
    require_user(store, &author_id)?;
    validate_desc(&desc, image.is_some())?;

    let img = image.map(|image| store_image(store, image)).transpose()?;
    create_post(store, NewPost { author_id, desc, img: img.clone() }).inspect_err(|_| discard_image(store, img.as_deref()))
}

/// Stores the optional replacement image, then updates the post.
pub fn revise_post(
    store: &dyn KvStore,
    post_id: &str,
    requester_id: &str,
    desc: Option<String>,
    image: Option<&UploadedImage>,
) -> ApiResult<Post> {
    let existing = get_post(store, post_id)?;
    if existing.user_id != requester_id {
        return Err(ApiError::Forbidden("You can update only your post".to_string()));
    }
    if let Some(desc) = &desc {
        validate_desc(desc, image.is_some() || existing.img.is_some())?;
    }

    let img = image.map(|image| store_image(store, image)).transpose()?;
    update_post(store, post_id, requester_id, PostUpdate { desc, img: img.clone() })
        .inspect_err(|_| discard_image(store, img.as_deref()))
}

/// The user's own posts plus those of everyone they follow, newest first.
pub fn get_timeline(store: &dyn KvStore, user_id: &str) -> ApiResult<Vec<Post>> {
    let user = require_user(store, user_id)?;

    let posts = load_feed(store)?
        .into_iter()
        .filter(|p| p.user_id == user.id || user.followings.contains(&p.user_id))
        .collect();

    Ok(newest_first(posts))
}

pub fn user_posts(store: &dyn KvStore, user_id: &str) -> ApiResult<Vec<Post>> {
    let posts = load_feed(store)?
        .into_iter()
        .filter(|p| p.user_id == user_id)
        .collect();
    Ok(newest_first(posts))
}

// === HTTP Handlers ===

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ActorBody {
    user_id: Option<String>,
}

#[derive(Serialize)]
struct LikeResponse {
    status: LikeState,
    liked: bool,
}

pub fn handle_create_post(state: &AppState, req: &Request) -> HandlerResult {
    let form = parse_post_form(req, state.config.max_upload_bytes)?;
    let author_id = resolve_actor(state, req, form.user_id.as_deref())?;
    let post = publish_post(state.store(), author_id, form.desc.unwrap_or_default(), form.image.as_ref())?;
    ok_json(&post)
}

pub fn handle_get_post(state: &AppState, post_id: &str) -> HandlerResult {
    ok_json(&get_post(state.store(), post_id)?)
}

pub fn handle_update_post(state: &AppState, req: &Request, post_id: &str) -> HandlerResult {
    let form = parse_post_form(req, state.config.max_upload_bytes)?;
    let requester_id = resolve_actor(state, req, form.user_id.as_deref())?;
    let post = revise_post(state.store(), post_id, &requester_id, form.desc, form.image.as_ref())?;
    ok_json(&post)
}

pub fn handle_delete_post(state: &AppState, req: &Request, post_id: &str) -> HandlerResult {
    let body: ActorBody = parse_json(req)?;
    let requester_id = resolve_actor(state, req, body.user_id.as_deref())?;
    delete_post(state.store(), post_id, &requester_id)?;
    message("Post deleted successfully")
}

pub fn handle_toggle_like(state: &AppState, req: &Request, post_id: &str) -> HandlerResult {
    let body: ActorBody = parse_json(req)?;
    let user_id = resolve_actor(state, req, body.user_id.as_deref())?;
    let (like_state, event) = toggle_like(state.store(), post_id, &user_id)?;
    if let Some(event) = event {
        consume_event(state.store(), &event)?;
    }
    ok_json(&LikeResponse {
        status: like_state,
        liked: like_state.is_liked(),
    })
}

pub fn handle_timeline(state: &AppState, req: &Request) -> HandlerResult {
    let user_id = query_param(req, "userId")
        .ok_or_else(|| ApiError::BadRequest("userId query parameter is required".to_string()))?;
    ok_json(&get_timeline(state.store(), &user_id)?)
}

pub fn handle_user_posts(state: &AppState, user_id: &str) -> HandlerResult {
    ok_json(&user_posts(state.store(), user_id)?)
}
