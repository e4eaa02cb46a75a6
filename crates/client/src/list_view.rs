//! Per-list driver tying REST calls, the channel subscription and the
//! item reconciler together.
//!
//! A [`ListView`] owns one list's item collection. Local mutations go to
//! the REST API first and are applied on success; channel events from
//! collaborators are applied as they arrive. Both paths feed the same
//! [`ItemReconciler`], so an echo of our own mutation is a no-op.
//!
//! Every request the view makes races its [`CancellationToken`]. After
//! [`ListView::close`], in-flight calls resolve to [`ApiError::Cancelled`]
//! and any late mutation is dropped.

use std::future::Future;
use std::sync::Arc;

use socialtodo_core::events::{list_channel, ItemEvent};
use socialtodo_core::forms::{ItemUpdate, NewItem};
use socialtodo_core::models::{ItemPatch, TodoItem};
use socialtodo_core::reconciler::ItemReconciler;
use socialtodo_core::types::DbId;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::{ApiError, ChannelAuthorizer, ItemsApi};
use crate::realtime::{
    ChannelNotice, ChannelSubscription, RealtimeClient, ReconnectPolicy, SubscriptionState,
};

const NOTICE_BUFFER: usize = 64;

/// What a view needs to subscribe to its list's channel.
#[derive(Clone)]
pub struct RealtimeContext {
    pub client: RealtimeClient,
    pub authorizer: Arc<dyn ChannelAuthorizer>,
    pub policy: ReconnectPolicy,
}

/// Live view of one list.
pub struct ListView {
    list_id: DbId,
    api: Arc<dyn ItemsApi>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    subscription_state: Option<watch::Receiver<SubscriptionState>>,
    subscription: Mutex<Option<ChannelSubscription>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    state: RwLock<ViewState>,
    /// Bumped after every change to the collection.
    changes: watch::Sender<u64>,
}

struct ViewState {
    reconciler: ItemReconciler,
    open: bool,
}

impl Shared {
    async fn apply(&self, event: ItemEvent) -> bool {
        let mut state = self.state.write().await;
        if !state.open {
            tracing::debug!(item_id = event.item_id(), "View closed; dropping item change");
            return false;
        }
        let changed = state.reconciler.apply(event);
        if changed {
            self.changes.send_modify(|n| *n += 1);
        }
        changed
    }

    async fn replace(&self, snapshot: Vec<TodoItem>) {
        let mut state = self.state.write().await;
        if !state.open {
            return;
        }
        state.reconciler.load_snapshot(snapshot);
        self.changes.send_modify(|n| *n += 1);
    }
}

impl ListView {
    /// Fetch the list's items, then subscribe to its channel if a
    /// real-time context is given.
    ///
    /// The view works from REST alone when `realtime` is `None` or the
    /// subscription fails.
    pub async fn open(
        api: Arc<dyn ItemsApi>,
        realtime: Option<RealtimeContext>,
        list_id: DbId,
    ) -> Result<Self, ApiError> {
        let snapshot = api.list_items(list_id).await?;
        let mut reconciler = ItemReconciler::new(list_id);
        reconciler.load_snapshot(snapshot);
        tracing::info!(list_id, items = reconciler.len(), "List view opened");

        let (changes, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            state: RwLock::new(ViewState {
                reconciler,
                open: true,
            }),
            changes,
        });
        let cancel = CancellationToken::new();

        let (subscription, pump) = match realtime {
            Some(ctx) => {
                let (tx, rx) = mpsc::channel(NOTICE_BUFFER);
                let sub = ChannelSubscription::spawn(
                    ctx.client,
                    ctx.authorizer,
                    list_channel(list_id),
                    ctx.policy,
                    tx,
                    cancel.child_token(),
                );
                let pump = tokio::spawn(pump_notices(
                    list_id,
                    Arc::clone(&api),
                    Arc::clone(&shared),
                    rx,
                    cancel.clone(),
                ));
                (Some(sub), Some(pump))
            }
            None => (None, None),
        };

        Ok(Self {
            list_id,
            api,
            shared,
            cancel,
            subscription_state: subscription.as_ref().map(ChannelSubscription::watch_state),
            subscription: Mutex::new(subscription),
            pump: Mutex::new(pump),
        })
    }

    pub fn list_id(&self) -> DbId {
        self.list_id
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Current items, newest first.
    pub async fn items(&self) -> Vec<TodoItem> {
        self.shared.state.read().await.reconciler.items().to_vec()
    }

    pub async fn get(&self, item_id: DbId) -> Option<TodoItem> {
        self.shared.state.read().await.reconciler.get(item_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.shared.state.read().await.reconciler.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.shared.state.read().await.reconciler.is_empty()
    }

    pub async fn completed_count(&self) -> usize {
        self.shared.state.read().await.reconciler.completed_count()
    }

    /// `Unsubscribed` when the view has no real-time context.
    pub fn subscription_state(&self) -> SubscriptionState {
        self.subscription_state
            .as_ref()
            .map(|rx| *rx.borrow())
            .unwrap_or(SubscriptionState::Unsubscribed)
    }

    pub fn watch_subscription(&self) -> Option<watch::Receiver<SubscriptionState>> {
        self.subscription_state.clone()
    }

    /// Receiver notified after every change to the collection.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.shared.changes.subscribe()
    }

    /// Apply a transition directly. Ignored once the view is closed.
    pub async fn apply(&self, event: ItemEvent) -> bool {
        self.shared.apply(event).await
    }

    /// Re-fetch the snapshot and replace the collection.
    pub async fn reload(&self) -> Result<(), ApiError> {
        let snapshot = self.bounded(self.api.list_items(self.list_id)).await?;
        self.shared.replace(snapshot).await;
        Ok(())
    }

    /// Create an item and prepend it.
    pub async fn add_item(&self, form: &NewItem) -> Result<Option<TodoItem>, ApiError> {
        let created = self.bounded(self.api.create_item(self.list_id, form)).await?;
        match &created {
            Some(item) => {
                self.shared.apply(ItemEvent::Created(item.clone())).await;
            }
            None => tracing::warn!(list_id = self.list_id, "Create returned no item"),
        }
        Ok(created)
    }

    /// Edit an item's title or description.
    pub async fn update_item(
        &self,
        item_id: DbId,
        form: &ItemUpdate,
    ) -> Result<Option<TodoItem>, ApiError> {
        let updated = self.bounded(self.api.update_item(item_id, form)).await?;
        let patch = match &updated {
            Some(item) => ItemPatch::from(item.clone()),
            None => ItemPatch {
                id: item_id,
                title: form.title.clone(),
                description: form.description.clone(),
                ..Default::default()
            },
        };
        self.shared.apply(ItemEvent::Updated(patch)).await;
        Ok(updated)
    }

    /// Flip an item's completion flag.
    ///
    /// Uses the server's copy when one comes back, otherwise inverts the
    /// flag as it was before the request. The echo may land first.
    pub async fn toggle_item(&self, item_id: DbId) -> Result<Option<TodoItem>, ApiError> {
        let before = self.get(item_id).await.map(|item| item.completed);
        let toggled = self.bounded(self.api.toggle_item(item_id)).await?;
        let event = match (&toggled, before) {
            (Some(item), _) => ItemEvent::Updated(ItemPatch::from(item.clone())),
            (None, Some(completed)) => ItemEvent::Completed {
                id: item_id,
                completed: !completed,
            },
            (None, None) => return Ok(None),
        };
        self.shared.apply(event).await;
        Ok(toggled)
    }

    pub async fn delete_item(&self, item_id: DbId) -> Result<(), ApiError> {
        self.bounded(self.api.delete_item(item_id)).await?;
        self.shared.apply(ItemEvent::Deleted { id: item_id }).await;
        Ok(())
    }

    /// Tear the view down: cancel in-flight requests, release the
    /// subscription, and stop applying changes. Idempotent.
    pub async fn close(&self) {
        self.cancel.cancel();
        self.shared.state.write().await.open = false;

        if let Some(sub) = self.subscription.lock().await.take() {
            sub.release().await;
        }
        if let Some(pump) = self.pump.lock().await.take() {
            if let Err(e) = pump.await {
                tracing::warn!(list_id = self.list_id, error = %e, "Notice pump panicked");
            }
        }
        tracing::info!(list_id = self.list_id, "List view closed");
    }

    /// Run `request` unless the view is closed first.
    async fn bounded<T>(
        &self,
        request: impl Future<Output = Result<T, ApiError>>,
    ) -> Result<T, ApiError> {
        if self.cancel.is_cancelled() {
            return Err(ApiError::Cancelled);
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(ApiError::Cancelled),
            result = request => result,
        }
    }
}

impl Drop for ListView {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Apply channel notices to the view until it closes.
async fn pump_notices(
    list_id: DbId,
    api: Arc<dyn ItemsApi>,
    shared: Arc<Shared>,
    mut notices: mpsc::Receiver<ChannelNotice>,
    cancel: CancellationToken,
) {
    loop {
        let notice = tokio::select! {
            _ = cancel.cancelled() => break,
            notice = notices.recv() => match notice {
                Some(notice) => notice,
                None => break,
            },
        };

        match notice {
            ChannelNotice::Event { event, data } => match ItemEvent::parse(&event, &data) {
                Ok(Some(item_event)) => {
                    let item_id = item_event.item_id();
                    let changed = shared.apply(item_event).await;
                    tracing::debug!(list_id, event = %event, item_id, changed, "Channel event");
                }
                Ok(None) => tracing::debug!(list_id, event = %event, "Ignoring channel event"),
                Err(e) => tracing::warn!(list_id, event = %event, error = %e, "Malformed channel event"),
            },
            ChannelNotice::Resubscribed => {
                tracing::info!(list_id, "Resubscribed; reloading snapshot");
                let snapshot = tokio::select! {
                    _ = cancel.cancelled() => break,
                    result = api.list_items(list_id) => result,
                };
                match snapshot {
                    Ok(items) => shared.replace(items).await,
                    Err(e) => tracing::error!(list_id, error = %e, "Snapshot reload failed"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn item(id: DbId, description: &str, completed: bool) -> TodoItem {
        serde_json::from_value(json!({
            "id": id,
            "description": description,
            "completed": completed,
        }))
        .unwrap()
    }

    /// In-memory items endpoint.
    #[derive(Default)]
    struct FakeItems {
        items: std::sync::Mutex<Vec<TodoItem>>,
        next_id: std::sync::Mutex<DbId>,
        fail: AtomicBool,
        stall: AtomicBool,
        empty_bodies: AtomicBool,
    }

    impl FakeItems {
        fn with(items: Vec<TodoItem>) -> Arc<Self> {
            let next = items.iter().map(|i| i.id).max().unwrap_or(0) + 1;
            Arc::new(Self {
                items: std::sync::Mutex::new(items),
                next_id: std::sync::Mutex::new(next),
                ..Default::default()
            })
        }

        async fn gate(&self) -> Result<(), ApiError> {
            if self.stall.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(ApiError::Validation {
                    status: 422,
                    message: "The title field is required.".into(),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ItemsApi for FakeItems {
        async fn list_items(&self, _list_id: DbId) -> Result<Vec<TodoItem>, ApiError> {
            self.gate().await?;
            Ok(self.items.lock().unwrap().clone())
        }

        async fn create_item(
            &self,
            _list_id: DbId,
            form: &NewItem,
        ) -> Result<Option<TodoItem>, ApiError> {
            self.gate().await?;
            let id = {
                let mut next = self.next_id.lock().unwrap();
                *next += 1;
                *next - 1
            };
            let mut created = item(id, form.description.as_deref().unwrap_or(""), false);
            created.title = Some(form.title.clone());
            self.items.lock().unwrap().insert(0, created.clone());
            Ok(Some(created))
        }

        async fn update_item(
            &self,
            item_id: DbId,
            form: &ItemUpdate,
        ) -> Result<Option<TodoItem>, ApiError> {
            self.gate().await?;
            if self.empty_bodies.load(Ordering::SeqCst) {
                return Ok(None);
            }
            let mut items = self.items.lock().unwrap();
            let found = items.iter_mut().find(|i| i.id == item_id);
            Ok(found.map(|i| {
                if let Some(title) = &form.title {
                    i.title = Some(title.clone());
                }
                if let Some(description) = &form.description {
                    i.description = Some(description.clone());
                }
                i.clone()
            }))
        }

        async fn toggle_item(&self, item_id: DbId) -> Result<Option<TodoItem>, ApiError> {
            self.gate().await?;
            let mut items = self.items.lock().unwrap();
            let found = items.iter_mut().find(|i| i.id == item_id);
            let toggled = found.map(|i| {
                i.completed = !i.completed;
                i.clone()
            });
            if self.empty_bodies.load(Ordering::SeqCst) {
                return Ok(None);
            }
            Ok(toggled)
        }

        async fn delete_item(&self, item_id: DbId) -> Result<(), ApiError> {
            self.gate().await?;
            self.items.lock().unwrap().retain(|i| i.id != item_id);
            Ok(())
        }
    }

    async fn open(fake: &Arc<FakeItems>) -> ListView {
        ListView::open(fake.clone(), None, 1).await.unwrap()
    }

    #[tokio::test]
    async fn open_loads_snapshot_in_server_order() {
        let fake = FakeItems::with(vec![item(2, "b", false), item(1, "a", true)]);
        let view = open(&fake).await;

        let ids: Vec<_> = view.items().await.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![2, 1]);
        assert_eq!(view.completed_count().await, 1);
        assert_eq!(view.subscription_state(), SubscriptionState::Unsubscribed);
    }

    #[tokio::test]
    async fn add_then_echo_yields_one_entry() {
        let fake = FakeItems::with(vec![item(1, "a", false)]);
        let view = open(&fake).await;
        let mut changes = view.changes();

        let created = view
            .add_item(&NewItem::new("Milk", Some("2 litres")))
            .await
            .unwrap()
            .unwrap();
        assert!(changes.has_changed().unwrap());
        changes.borrow_and_update();

        // The channel echo of our own create.
        assert!(!view.apply(ItemEvent::Created(created.clone())).await);
        assert!(!changes.has_changed().unwrap());

        let items = view.items().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, created.id);
    }

    #[tokio::test]
    async fn failed_request_leaves_state_untouched() {
        let fake = FakeItems::with(vec![item(1, "a", false)]);
        let view = open(&fake).await;
        fake.fail.store(true, Ordering::SeqCst);

        let err = view.add_item(&NewItem::new("x", None)).await.unwrap_err();
        assert_eq!(err.user_message("Failed to add todo item"), "The title field is required.");
        assert_matches!(view.toggle_item(1).await, Err(ApiError::Validation { .. }));
        assert_matches!(view.delete_item(1).await, Err(ApiError::Validation { .. }));

        let items = view.items().await;
        assert_eq!(items.len(), 1);
        assert!(!items[0].completed);
    }

    #[tokio::test]
    async fn toggle_without_body_inverts_local_flag() {
        let fake = FakeItems::with(vec![item(1, "a", false)]);
        let view = open(&fake).await;
        fake.empty_bodies.store(true, Ordering::SeqCst);

        assert!(view.toggle_item(1).await.unwrap().is_none());
        assert!(view.get(1).await.unwrap().completed);

        // Echo of the same completion.
        assert!(!view.apply(ItemEvent::Completed { id: 1, completed: true }).await);
    }

    /// Items endpoint whose toggle lets the channel echo land before the
    /// empty response does.
    struct EchoFirst {
        items: Vec<TodoItem>,
        view: std::sync::Mutex<Option<Arc<Shared>>>,
    }

    #[async_trait]
    impl ItemsApi for EchoFirst {
        async fn list_items(&self, _list_id: DbId) -> Result<Vec<TodoItem>, ApiError> {
            Ok(self.items.clone())
        }

        async fn create_item(
            &self,
            _list_id: DbId,
            _form: &NewItem,
        ) -> Result<Option<TodoItem>, ApiError> {
            Ok(None)
        }

        async fn update_item(
            &self,
            _item_id: DbId,
            _form: &ItemUpdate,
        ) -> Result<Option<TodoItem>, ApiError> {
            Ok(None)
        }

        async fn toggle_item(&self, item_id: DbId) -> Result<Option<TodoItem>, ApiError> {
            let shared = self.view.lock().unwrap().clone();
            if let Some(shared) = shared {
                shared
                    .apply(ItemEvent::Completed {
                        id: item_id,
                        completed: true,
                    })
                    .await;
            }
            Ok(None)
        }

        async fn delete_item(&self, _item_id: DbId) -> Result<(), ApiError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn toggle_keeps_completion_echoed_before_response() {
        let fake = Arc::new(EchoFirst {
            items: vec![item(1, "a", false)],
            view: std::sync::Mutex::new(None),
        });
        let view = ListView::open(fake.clone(), None, 1).await.unwrap();
        *fake.view.lock().unwrap() = Some(Arc::clone(&view.shared));

        assert!(view.toggle_item(1).await.unwrap().is_none());
        assert!(view.get(1).await.unwrap().completed);
        assert_eq!(view.completed_count().await, 1);
    }

    #[tokio::test]
    async fn update_without_body_merges_form_fields() {
        let fake = FakeItems::with(vec![item(1, "a", false)]);
        let view = open(&fake).await;
        fake.empty_bodies.store(true, Ordering::SeqCst);

        view.update_item(1, &ItemUpdate::new(None, Some("renamed")))
            .await
            .unwrap();
        let updated = view.get(1).await.unwrap();
        assert_eq!(updated.description.as_deref(), Some("renamed"));
        assert!(!updated.completed);
    }

    #[tokio::test]
    async fn delete_then_echo_is_noop() {
        let fake = FakeItems::with(vec![item(2, "b", false), item(1, "a", false)]);
        let view = open(&fake).await;

        view.delete_item(2).await.unwrap();
        assert!(!view.apply(ItemEvent::Deleted { id: 2 }).await);
        assert_eq!(view.len().await, 1);
    }

    #[tokio::test]
    async fn mutations_after_close_are_ignored() {
        let fake = FakeItems::with(vec![item(1, "a", false)]);
        let view = open(&fake).await;
        view.close().await;
        view.close().await;

        assert!(view.is_closed());
        assert_matches!(view.add_item(&NewItem::new("late", None)).await, Err(ApiError::Cancelled));
        assert!(!view.apply(ItemEvent::Created(item(9, "late", false))).await);
        assert_eq!(view.len().await, 1);
    }

    #[tokio::test]
    async fn close_cancels_in_flight_request() {
        let fake = FakeItems::with(vec![]);
        let view = Arc::new(open(&fake).await);
        fake.stall.store(true, Ordering::SeqCst);

        let pending = {
            let view = Arc::clone(&view);
            tokio::spawn(async move { view.add_item(&NewItem::new("slow", None)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        view.close().await;

        let result = tokio::time::timeout(Duration::from_secs(5), pending)
            .await
            .expect("request should end with the view")
            .unwrap();
        assert_matches!(result, Err(ApiError::Cancelled));
        assert!(view.is_empty().await);
    }

    #[tokio::test]
    async fn reload_replaces_collection() {
        let fake = FakeItems::with(vec![item(1, "a", false)]);
        let view = open(&fake).await;
        fake.items.lock().unwrap().insert(0, item(5, "from elsewhere", false));

        view.reload().await.unwrap();
        let ids: Vec<_> = view.items().await.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![5, 1]);
    }
}
