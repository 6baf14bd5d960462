use std::sync::Arc;

use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{info, warn};

use crate::auth::TokenKeys;
use crate::config::{Config, JWT_SECRET_KEY};
use crate::core::db::{init_demo_data, KvStore, KvStoreExt};
use crate::core::errors::{ApiError, ApiResult};

/// Everything a request handler needs: the store, settings and signing keys.
pub struct AppState {
    pub store: Arc<dyn KvStore>,
    pub config: Config,
    pub tokens: TokenKeys,
}

impl AppState {
    pub fn new(store: Arc<dyn KvStore>, config: Config) -> ApiResult<Self> {
        let secret = match &config.jwt_secret {
            Some(secret) => secret.clone(),
            None => load_or_create_secret(store.as_ref())?,
        };
        let tokens = TokenKeys::new(secret.as_bytes(), config.token_expiration_hours);

        if config.seed_demo_data {
            init_demo_data(store.as_ref())?;
        }

        Ok(Self {
            store,
            config,
            tokens,
        })
    }

    pub fn store(&self) -> &dyn KvStore {
        self.store.as_ref()
    }
}

/// Reuses the signing secret persisted in the store, generating it on first use
/// so that tokens stay valid across processes sharing the store.
fn load_or_create_secret(store: &dyn KvStore) -> ApiResult<String> {
    if let Some(secret) = store.get_json::<String>(JWT_SECRET_KEY)? {
        return Ok(secret);
    }

    warn!("BORD_JWT_SECRET not set, generating a signing secret in the store");
    let secret: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect();
    if store.set_if_absent(JWT_SECRET_KEY, &serde_json::to_vec(&secret)?)? {
        info!("signing secret stored");
        return Ok(secret);
    }
    // another instance stored one first
    store
        .get_json::<String>(JWT_SECRET_KEY)?
        .ok_or_else(|| ApiError::InternalError("signing secret vanished".to_string()))
}
