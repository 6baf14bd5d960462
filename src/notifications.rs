use tracing::{debug, info};

use crate::config::*;
use crate::core::db::{KvStore, KvStoreExt};
use crate::core::errors::{ApiResult, HandlerResult};
use crate::core::helpers::{new_id, now, ok_json};
use crate::models::models::{ContentEvent, Notification, NotificationType};
use crate::state::AppState;

/// Appends an unseen notification for `recipient_id`.
pub fn record(
    store: &dyn KvStore,
    kind: NotificationType,
    recipient_id: &str,
    actor_id: &str,
    post_id: &str,
) -> ApiResult<Notification> {
    let notification = Notification {
        id: new_id(),
        user_id: recipient_id.to_string(),
        kind,
        by_user_id: actor_id.to_string(),
        post_id: post_id.to_string(),
        date: now(),
        seen: false,
    };

    store.set_json(&notification_key(&notification.id), &notification)?;

    store.update_list(&notifications_key(recipient_id), |ids| ids.push(notification.id.clone()))?;

    info!(recipient_id, actor_id, post_id, ?kind, "recorded notification");
    Ok(notification)
}

/// Turns a content event into a notification for the post's author.
/// Acting on one's own post notifies nobody.
pub fn consume_event(store: &dyn KvStore, event: &ContentEvent) -> ApiResult<Option<Notification>> {
    let (kind, post_id, post_author, actor) = match event {
        ContentEvent::Liked {
            post_id,
            post_author,
            actor,
        } => (NotificationType::Like, post_id, post_author, actor),
        ContentEvent::Commented {
            post_id,
            post_author,
            actor,
        } => (NotificationType::Comment, post_id, post_author, actor),
    };

    if post_author == actor {
        debug!(post_id = %post_id, "self-interaction, no notification");
        return Ok(None);
    }

    record(store, kind, post_author, actor, post_id).map(Some)
}

/// The recipient's notifications, newest first.
pub fn list_for(store: &dyn KvStore, user_id: &str) -> ApiResult<Vec<Notification>> {
    let ids: Vec<String> = store.get_json(&notifications_key(user_id))?.unwrap_or_default();
    let mut notifications = Vec::with_capacity(ids.len());
    // index is append-ordered; walk it backwards so equal dates stay newest first
    for id in ids.into_iter().rev() {
        if let Some(n) = store.get_json::<Notification>(&notification_key(&id))? {
            notifications.push(n);
        }
    }
    notifications.sort_by(|a, b| b.date.cmp(&a.date));
    Ok(notifications)
}

// === HTTP Handlers ===

pub fn handle_list_notifications(state: &AppState, user_id: &str) -> HandlerResult {
    ok_json(&list_for(state.store(), user_id)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::MemoryStore;

    fn liked(author: &str, actor: &str) -> ContentEvent {
        ContentEvent::Liked {
            post_id: "p1".into(),
            post_author: author.into(),
            actor: actor.into(),
        }
    }

    #[test]
    fn record_starts_unseen() {
        let store = MemoryStore::new();
        let n = record(&store, NotificationType::Comment, "bob", "alice", "p1").unwrap();
        assert!(!n.seen);
        assert_eq!(n.user_id, "bob");
        assert_eq!(n.by_user_id, "alice");

        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["type"], "comment");
        assert_eq!(json["byUserId"], "alice");
    }

    #[test]
    fn events_notify_post_author_only() {
        let store = MemoryStore::new();
        assert!(consume_event(&store, &liked("bob", "bob")).unwrap().is_none());
        let n = consume_event(&store, &liked("bob", "alice")).unwrap().unwrap();
        assert_eq!(n.kind, NotificationType::Like);
        assert_eq!(list_for(&store, "bob").unwrap().len(), 1);
        assert!(list_for(&store, "alice").unwrap().is_empty());
    }

    #[test]
    fn concurrent_records_are_all_indexed() {
        let store = MemoryStore::new();
        std::thread::scope(|s| {
            for t in 0..4 {
                let store = &store;
                s.spawn(move || {
                    for i in 0..25 {
                        let actor = format!("actor{}", t);
                        record(store, NotificationType::Like, "bob", &actor, &format!("p{}", i)).unwrap();
                    }
                });
            }
        });
        assert_eq!(list_for(&store, "bob").unwrap().len(), 100);
    }

    #[test]
    fn list_is_newest_first() {
        let store = MemoryStore::new();
        let first = record(&store, NotificationType::Like, "bob", "alice", "p1").unwrap();
        let second = record(&store, NotificationType::Comment, "bob", "carol", "p2").unwrap();
        let third = record(&store, NotificationType::Like, "bob", "dave", "p3").unwrap();

        let listed: Vec<String> = list_for(&store, "bob").unwrap().into_iter().map(|n| n.id).collect();
        assert_eq!(listed, vec![third.id, second.id, first.id]);
    }
}
