use std::collections::HashMap;
use std::sync::RwLock;

use serde::{de::DeserializeOwned, Serialize};
use tracing::info;

use crate::auth::register_user;
use crate::config::*;
use crate::core::errors::{ApiResult, StoreError};
use crate::follow::follow_user;
use crate::posts::{create_post, NewPost};

pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of an [`KvStore::update`] callback.
#[derive(Debug, PartialEq, Eq)]
pub enum Write {
    Keep,
    Set(Vec<u8>),
    Delete,
}

/// Byte-oriented key/value document store.
///
/// Each call is a single round-trip and each single-key write is atomic.
/// Nothing spans keys: callers that update several documents do so with
/// independent writes.
pub trait KvStore: Send + Sync {
    /// Returns `Ok(None)` if the key does not exist.
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    fn set(&self, key: &str, value: &[u8]) -> StoreResult<()>;

    /// Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> StoreResult<()>;

    /// Read-modify-write of one key. `f` sees the current value and decides
    /// what to store; no other write to `key` lands in between.
    fn update(&self, key: &str, f: &mut dyn FnMut(Option<&[u8]>) -> Write) -> StoreResult<()>;

    fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Stores `value` only if `key` is vacant. Returns whether it was stored.
    fn set_if_absent(&self, key: &str, value: &[u8]) -> StoreResult<bool> {
        let mut inserted = false;
        self.update(key, &mut |current| match current {
            Some(_) => Write::Keep,
            None => {
                inserted = true;
                Write::Set(value.to_vec())
            }
        })?;
        Ok(inserted)
    }
}

/// JSON document access on top of any [`KvStore`].
pub trait KvStoreExt: KvStore {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        match self.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn set_json<T: Serialize>(&self, key: &str, value: &T) -> StoreResult<()> {
        self.set(key, &serde_json::to_vec(value)?)
    }

    /// Atomically edits the JSON document at `key`.
    ///
    /// `f` gets the decoded document (`None` if absent) and may change it in
    /// place; leaving `None` deletes the key. When `f` fails nothing is written.
    fn update_json<T, R, E, F>(&self, key: &str, mut f: F) -> Result<R, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<StoreError>,
        F: FnMut(&mut Option<T>) -> Result<R, E>,
    {
        let mut outcome: Option<Result<R, E>> = None;
        self.update(key, &mut |current| {
            let mut doc = match current.map(|bytes| serde_json::from_slice::<T>(bytes)).transpose() {
                Ok(doc) => doc,
                Err(e) => {
                    outcome = Some(Err(StoreError::from(e).into()));
                    return Write::Keep;
                }
            };
            let result = match f(&mut doc) {
                Ok(result) => result,
                Err(e) => {
                    outcome = Some(Err(e));
                    return Write::Keep;
                }
            };
            match doc.as_ref().map(serde_json::to_vec).transpose() {
                Ok(Some(bytes)) => {
                    outcome = Some(Ok(result));
                    Write::Set(bytes)
                }
                Ok(None) => {
                    outcome = Some(Ok(result));
                    Write::Delete
                }
                Err(e) => {
                    outcome = Some(Err(StoreError::from(e).into()));
                    Write::Keep
                }
            }
        })?;
        outcome.unwrap_or_else(|| Err(StoreError::Backend(format!("update of {} did not run", key)).into()))
    }

    /// Atomically edits the id list at `key`; a missing list counts as empty.
    fn update_list<F>(&self, key: &str, mut f: F) -> StoreResult<()>
    where
        F: FnMut(&mut Vec<String>),
    {
        self.update_json(key, |doc: &mut Option<Vec<String>>| {
            f(doc.get_or_insert_with(Vec::new));
            Ok::<(), StoreError>(())
        })
    }
}

impl<S: KvStore + ?Sized> KvStoreExt for S {}

/// In-memory, HashMap-based store for tests and the native server.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend("lock poisoned".to_string())
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let map = self.entries.read().map_err(poisoned)?;
        Ok(map.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        let mut map = self.entries.write().map_err(poisoned)?;
        map.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        let mut map = self.entries.write().map_err(poisoned)?;
        map.remove(key);
        Ok(())
    }

    fn update(&self, key: &str, f: &mut dyn FnMut(Option<&[u8]>) -> Write) -> StoreResult<()> {
        let mut map = self.entries.write().map_err(poisoned)?;
        match f(map.get(key).map(Vec::as_slice)) {
            Write::Keep => {}
            Write::Set(value) => {
                map.insert(key.to_string(), value);
            }
            Write::Delete => {
                map.remove(key);
            }
        }
        Ok(())
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        let map = self.entries.read().map_err(poisoned)?;
        Ok(map.contains_key(key))
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entry_count", &self.len())
            .finish()
    }
}

/// Spin's default key/value store, available inside the wasm component.
#[cfg(target_arch = "wasm32")]
pub struct SpinStore(spin_sdk::key_value::Store);

#[cfg(target_arch = "wasm32")]
impl SpinStore {
    pub fn open_default() -> StoreResult<Self> {
        spin_sdk::key_value::Store::open_default()
            .map(SpinStore)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}

#[cfg(target_arch = "wasm32")]
impl KvStore for SpinStore {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.0.get(key).map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn set(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.0.set(key, value).map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        self.0.delete(key).map_err(|e| StoreError::Backend(e.to_string()))
    }

    // Spin's key/value interface has no compare-and-swap; each component
    // instance serves one request, so this is a plain get then write.
    fn update(&self, key: &str, f: &mut dyn FnMut(Option<&[u8]>) -> Write) -> StoreResult<()> {
        let current = self.get(key)?;
        match f(current.as_deref()) {
            Write::Keep => Ok(()),
            Write::Set(value) => self.set(key, &value),
            Write::Delete => self.delete(key),
        }
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        self.0.exists(key).map_err(|e| StoreError::Backend(e.to_string()))
    }
}

/// Seeds demo accounts and posts; a no-op once any user exists.
///
/// Accounts: `test`/`test`, `alice`/`alice`, `bob`/`bob`; `test` follows `bob`.
pub fn init_demo_data(store: &dyn KvStore) -> ApiResult<()> {
    let users: Vec<String> = store.get_json(USERS_LIST_KEY)?.unwrap_or_default();
    if !users.is_empty() {
        return Ok(());
    }

    let test = register_user(store, "test", "test@bord.local", "test")?;
    let alice = register_user(store, "alice", "alice@bord.local", "alice")?;
    let bob = register_user(store, "bob", "bob@bord.local", "bob")?;

    let seed_posts = [
        (&test.id, "This is my first post on Bord!"),
        (&alice.id, "Welcome to my board! Excited to share thoughts here."),
        (&alice.id, "Just finished an amazing project. Feeling productive today!"),
        (&bob.id, "Hey everyone! Just joined Bord, looking forward to connecting with you all."),
    ];
    for (author, desc) in seed_posts {
        create_post(
            store,
            NewPost {
                author_id: author.clone(),
                desc: desc.to_string(),
                img: None,
            },
        )?;
    }

    follow_user(store, &test.id, &bob.id)?;

    info!(users = 3, posts = seed_posts.len(), "seeded demo data");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::models::User;

    #[test]
    fn get_set_delete() {
        let store = MemoryStore::new();
        assert!(store.get("k").unwrap().is_none());
        store.set("k", b"v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some(&b"v"[..]));
        assert!(store.exists("k").unwrap());
        store.delete("k").unwrap();
        assert!(!store.exists("k").unwrap());
        // deleting twice is fine
        store.delete("k").unwrap();
    }

    #[test]
    fn json_helpers_through_trait_object() {
        let store = MemoryStore::new();
        let dyn_store: &dyn KvStore = &store;
        dyn_store.set_json("list", &vec!["a", "b"]).unwrap();
        let list: Vec<String> = dyn_store.get_json("list").unwrap().unwrap();
        assert_eq!(list, vec!["a", "b"]);
    }

    #[test]
    fn malformed_document_is_an_error() {
        let store = MemoryStore::new();
        store.set("user:x", b"{not json").unwrap();
        assert!(matches!(
            store.get_json::<User>("user:x"),
            Err(StoreError::Serde(_))
        ));
    }

    #[test]
    fn update_json_writes_only_on_success() {
        let store = MemoryStore::new();
        store.set_json("count", &1u32).unwrap();

        let doubled: Result<u32, StoreError> = store.update_json("count", |doc: &mut Option<u32>| {
            let n = doc.get_or_insert(0);
            *n *= 2;
            Ok(*n)
        });
        assert_eq!(doubled.unwrap(), 2);

        let failed: Result<(), StoreError> = store.update_json("count", |doc: &mut Option<u32>| {
            *doc = Some(99);
            Err(StoreError::Backend("nope".into()))
        });
        assert!(failed.is_err());
        assert_eq!(store.get_json::<u32>("count").unwrap(), Some(2));

        store
            .update_json("count", |doc: &mut Option<u32>| {
                *doc = None;
                Ok::<(), StoreError>(())
            })
            .unwrap();
        assert!(!store.exists("count").unwrap());
    }

    #[test]
    fn set_if_absent_has_one_winner_across_threads() {
        let store = MemoryStore::new();
        let winners: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let store = &store;
                    s.spawn(move || store.set_if_absent("username:alice", format!("u{}", i).as_bytes()).unwrap())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap() as usize).sum()
        });
        assert_eq!(winners, 1);
    }

    #[test]
    fn concurrent_list_appends_are_not_lost() {
        let store = MemoryStore::new();
        std::thread::scope(|s| {
            for t in 0..8 {
                let store = &store;
                s.spawn(move || {
                    for i in 0..50 {
                        store.update_list("feed", |ids| ids.push(format!("{}-{}", t, i))).unwrap();
                    }
                });
            }
        });
        let ids: Vec<String> = store.get_json("feed").unwrap().unwrap();
        assert_eq!(ids.len(), 400);
    }

    #[test]
    fn demo_data_is_seeded_once() {
        let store = MemoryStore::new();
        init_demo_data(&store).unwrap();
        let users: Vec<String> = store.get_json(USERS_LIST_KEY).unwrap().unwrap();
        assert_eq!(users.len(), 3);
        let feed: Vec<String> = store.get_json(FEED_KEY).unwrap().unwrap();
        assert_eq!(feed.len(), 4);

        init_demo_data(&store).unwrap();
        let users: Vec<String> = store.get_json(USERS_LIST_KEY).unwrap().unwrap();
        assert_eq!(users.len(), 3);
    }
}
