use spin_sdk::http::{Method, Request, Response};
use tracing::{debug, warn};

use crate::core::errors::{ApiError, HandlerResult};
use crate::state::AppState;
use crate::{auth, comments, follow, notifications, posts, uploads, users};

/// Dispatches a request to its handler and renders errors as JSON responses.
pub fn handle(state: &AppState, req: Request) -> Response {
    let path = req.path().to_string();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    match route(state, &req, req.method(), &segments) {
        Ok(resp) => resp,
        Err(err) => {
            if err.status().is_server_error() {
                warn!(method = ?req.method(), path = %path, error = %err, "request failed");
            } else {
                debug!(method = ?req.method(), path = %path, error = %err, "request rejected");
            }
            err.into()
        }
    }
}

fn route(state: &AppState, req: &Request, method: &Method, segments: &[&str]) -> HandlerResult {
    match (method, segments) {
        // auth
        (Method::Post, ["api", "auth", "register"]) => auth::handle_register(state, req),
        (Method::Post, ["api", "auth", "login"]) => auth::handle_login(state, req),

        // users and follow graph
        (Method::Get, ["api", "users"]) => users::handle_list_users(state, req),
        (Method::Get, ["api", "users", "search", username]) => users::handle_search_user(state, username),
        (Method::Get, ["api", "users", id]) => users::handle_get_user(state, id),
        (Method::Put, ["api", "users", id]) => users::handle_update_user(state, req, id),
        (Method::Delete, ["api", "users", id]) => users::handle_delete_user(state, req, id),
        (Method::Put, ["api", "users", id, "follow"]) => follow::handle_follow(state, req, id),
        (Method::Put, ["api", "users", id, "unfollow"]) => follow::handle_unfollow(state, req, id),
        (Method::Get, ["api", "users", id, "followers"]) => follow::handle_followers_list(state, id),
        (Method::Get, ["api", "users", id, "followings"]) => follow::handle_followings_list(state, id),
        (Method::Get, ["api", "users", id, "posts"]) => posts::handle_user_posts(state, id),

        // posts
        (Method::Get, ["api", "posts", "timeline", "all"]) => posts::handle_timeline(state, req),
        (Method::Post, ["api", "posts"]) => posts::handle_create_post(state, req),
        (Method::Get, ["api", "posts", id]) => posts::handle_get_post(state, id),
        (Method::Put, ["api", "posts", id]) => posts::handle_update_post(state, req, id),
        (Method::Delete, ["api", "posts", id]) => posts::handle_delete_post(state, req, id),
        (Method::Put, ["api", "posts", id, "like"]) => posts::handle_toggle_like(state, req, id),

        // comments
        (Method::Post, ["api", "posts", id, "comments"]) => comments::handle_add_comment(state, req, id),
        (Method::Get, ["api", "posts", id, "comments"]) => comments::handle_list_comments(state, id),
        (Method::Put, ["api", "posts", id, "comments", cid]) => {
            comments::handle_edit_comment(state, req, id, cid)
        }
        (Method::Delete, ["api", "posts", id, "comments", cid]) => {
            comments::handle_delete_comment(state, req, id, cid)
        }
        (Method::Put, ["api", "posts", id, "comments", cid, "like"]) => {
            comments::handle_toggle_comment_like(state, req, id, cid)
        }

        // notifications
        (Method::Get, ["api", "notifications", user_id]) => {
            notifications::handle_list_notifications(state, user_id)
        }

        // uploaded media
        (Method::Get, ["uploads", "images", file_name]) => uploads::serve_upload(state.store(), file_name),

        _ => Err(ApiError::NotFound("No route found".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::core::db::MemoryStore;
    use std::sync::Arc;

    fn state() -> AppState {
        let config = Config {
            jwt_secret: Some("router-secret".to_string()),
            ..Config::default()
        };
        AppState::new(Arc::new(MemoryStore::new()), config).unwrap()
    }

    fn call(state: &AppState, method: Method, uri: &str, token: Option<&str>, body: serde_json::Value) -> (u16, serde_json::Value) {
        let mut builder = Request::builder();
        builder
            .method(method)
            .uri(uri)
            .header("Content-Type", "application/json");
        if let Some(token) = token {
            builder.header("Authorization", format!("Bearer {}", token));
        }
        let req = builder.body(body.to_string().into_bytes()).build();
        let resp = handle(state, req);
        let status = *resp.status();
        let json = serde_json::from_slice(resp.body()).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    fn register_and_login(state: &AppState, name: &str, password: &str) -> (String, String) {
        let (status, _) = call(
            state,
            Method::Post,
            "/api/auth/register",
            None,
            serde_json::json!({ "username": name, "email": format!("{}@example.com", name), "password": password }),
        );
        assert_eq!(status, 200);
        let (status, body) = call(
            state,
            Method::Post,
            "/api/auth/login",
            None,
            serde_json::json!({ "username": name, "password": password }),
        );
        assert_eq!(status, 200);
        (
            body["id"].as_str().unwrap().to_string(),
            body["token"].as_str().unwrap().to_string(),
        )
    }

    #[test]
    fn unknown_route_is_404() {
        let state = state();
        let (status, body) = call(&state, Method::Get, "/nope", None, serde_json::Value::Null);
        assert_eq!(status, 404);
        assert_eq!(body["error"], "No route found");
    }

    #[test]
    fn alice_follows_bob_and_likes_his_post() {
        let state = state();
        let (alice_id, alice_token) = register_and_login(&state, "alice", "pw1");
        let (bob_id, bob_token) = register_and_login(&state, "bob", "pw2");

        let (status, _) = call(
            &state,
            Method::Put,
            &format!("/api/users/{}/follow", bob_id),
            Some(&alice_token),
            serde_json::json!({ "userId": alice_id }),
        );
        assert_eq!(status, 200);

        let (status, post) = call(
            &state,
            Method::Post,
            "/api/posts",
            Some(&bob_token),
            serde_json::json!({ "userId": bob_id, "desc": "hello" }),
        );
        assert_eq!(status, 200);
        let post_id = post["id"].as_str().unwrap().to_string();

        let (status, timeline) = call(
            &state,
            Method::Get,
            &format!("/api/posts/timeline/all?userId={}", alice_id),
            None,
            serde_json::Value::Null,
        );
        assert_eq!(status, 200);
        assert!(timeline.as_array().unwrap().iter().any(|p| p["desc"] == "hello"));

        let like_uri = format!("/api/posts/{}/like", post_id);
        let (_, liked) = call(&state, Method::Put, &like_uri, Some(&alice_token), serde_json::json!({}));
        assert_eq!(liked["status"], "liked");
        let (_, stored) = call(&state, Method::Get, &format!("/api/posts/{}", post_id), None, serde_json::Value::Null);
        assert_eq!(stored["likes"], serde_json::json!([alice_id]));

        let (_, unliked) = call(&state, Method::Put, &like_uri, Some(&alice_token), serde_json::json!({}));
        assert_eq!(unliked["liked"], false);
        let (_, stored) = call(&state, Method::Get, &format!("/api/posts/{}", post_id), None, serde_json::Value::Null);
        assert_eq!(stored["likes"], serde_json::json!([]));

        let (_, notes) = call(
            &state,
            Method::Get,
            &format!("/api/notifications/{}", bob_id),
            None,
            serde_json::Value::Null,
        );
        let notes = notes.as_array().unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0]["type"], "like");
        assert_eq!(notes[0]["byUserId"], alice_id);
        assert_eq!(notes[0]["seen"], false);
    }

    #[test]
    fn error_statuses_on_the_wire() {
        let state = state();
        let (alice_id, alice_token) = register_and_login(&state, "alice", "pw1");

        let (status, _) = call(
            &state,
            Method::Post,
            "/api/auth/register",
            None,
            serde_json::json!({ "username": "alice", "email": "again@example.com", "password": "pw" }),
        );
        assert_eq!(status, 400);

        let (status, _) = call(
            &state,
            Method::Post,
            "/api/auth/login",
            None,
            serde_json::json!({ "username": "alice", "password": "bad" }),
        );
        assert_eq!(status, 400);

        let (status, _) = call(
            &state,
            Method::Post,
            "/api/auth/login",
            None,
            serde_json::json!({ "username": "zed", "password": "bad" }),
        );
        assert_eq!(status, 404);

        let (status, _) = call(
            &state,
            Method::Put,
            &format!("/api/users/{}/follow", alice_id),
            Some(&alice_token),
            serde_json::json!({}),
        );
        assert_eq!(status, 403);

        let (status, _) = call(
            &state,
            Method::Put,
            &format!("/api/users/{}/follow", alice_id),
            None,
            serde_json::json!({ "userId": "someone" }),
        );
        assert_eq!(status, 401);

        let (status, _) = call(&state, Method::Get, "/api/users/missing", None, serde_json::Value::Null);
        assert_eq!(status, 404);
    }
}
