#[cfg(not(target_arch = "wasm32"))]
mod native {
    extern crate bord_social;

    use std::sync::Arc;

    use bord_social::config::Config;
    use bord_social::core::db::MemoryStore;
    use bord_social::state::AppState;
    use tracing_subscriber::EnvFilter;

    pub async fn run() -> std::io::Result<()> {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
            .init();

        let config = Config::load();
        let state = AppState::new(Arc::new(MemoryStore::new()), config)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;

        bord_social::server::run(state).await
    }
}

#[cfg(not(target_arch = "wasm32"))]
#[actix_web::main]
async fn main() -> std::io::Result<()> {
    native::run().await
}

#[cfg(target_arch = "wasm32")]
fn main() {}
