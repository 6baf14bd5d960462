//! Social graph and content backend: accounts, follows, posts with embedded
//! comments, like toggles and a notification log, over a key/value store.
//!
//! Handlers speak `spin_sdk::http` types. Natively they sit behind actix-web
//! (see [`server`]); compiled to wasm the crate is a Spin HTTP component
//! backed by Spin's key/value store.

pub mod auth;
pub mod comments;
pub mod config;
pub mod core;
pub mod follow;
pub mod models;
pub mod notifications;
pub mod posts;
pub mod router;
#[cfg(not(target_arch = "wasm32"))]
pub mod server;
pub mod state;
pub mod uploads;
pub mod users;

#[cfg(target_arch = "wasm32")]
use spin_sdk::http::{IntoResponse, Request};
#[cfg(target_arch = "wasm32")]
use spin_sdk::http_component;

// === Component entrypoint ===
#[cfg(target_arch = "wasm32")]
#[http_component]
fn handle(req: Request) -> anyhow::Result<impl IntoResponse> {
    let store = std::sync::Arc::new(core::db::SpinStore::open_default()?);
    let state = state::AppState::new(store, config::Config::load())?;
    Ok(router::handle(&state, req))
}
