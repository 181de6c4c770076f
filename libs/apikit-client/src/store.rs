//! Client cache store: query entries, in-flight deduplication and staleness.
//!
//! Every state transition on a key happens under one `parking_lot` lock with
//! no `.await` held across it. The in-flight map is checked and filled in the
//! same critical section, so callers racing on one key share a single fetch.
//! Fetches run on spawned tasks: a response always lands in the store, even
//! when every caller has gone away, and responses apply in completion order.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use apikit::Contract;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::client::{ApiClient, ClientError};
use crate::key::{derive_query_key, MutationKey, QueryKey};
use crate::mutation::MutationSlot;
use crate::transport::TransportError;

type SharedFetch = Shared<BoxFuture<'static, Result<Value, ClientError>>>;

/// Per-call cache configuration.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Age under which cached data is served without a fetch.
    /// Falls back to the contract's hint, then zero.
    pub stale_time: Option<Duration>,
    /// Display-only retention hint.
    pub cache_time: Option<Duration>,
    /// Explicit key; replaces the derived one.
    pub query_key: Option<QueryKey>,
    /// `false` skips the call entirely.
    pub enabled: bool,
    /// Always go to the network.
    pub disable_local_cache: bool,
    /// Minimum spacing between the last fetch and the next one.
    pub refresh_delay: Option<Duration>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            stale_time: None,
            cache_time: None,
            query_key: None,
            enabled: true,
            disable_local_cache: false,
            refresh_delay: None,
        }
    }
}

impl QueryOptions {
    pub fn stale_time(mut self, ttl: Duration) -> Self {
        self.stale_time = Some(ttl);
        self
    }

    pub fn cache_time(mut self, ttl: Duration) -> Self {
        self.cache_time = Some(ttl);
        self
    }

    pub fn query_key(mut self, key: impl Into<QueryKey>) -> Self {
        self.query_key = Some(key.into());
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn disable_local_cache(mut self) -> Self {
        self.disable_local_cache = true;
        self
    }

    pub fn refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = Some(delay);
        self
    }

    /// The explicit key if any, otherwise the canonical one.
    pub fn resolve_key(&self, contract: &Contract, payload: &Value, url_params: &Value) -> QueryKey {
        self.query_key
            .clone()
            .unwrap_or_else(|| derive_query_key(contract, payload, url_params))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    Idle,
    Loading,
    Error,
    Success,
}

/// Observable snapshot of one query entry.
#[derive(Debug, Clone, Default)]
pub struct QueryState {
    pub data: Option<Value>,
    pub error: Option<ClientError>,
    /// A fetch is running and there is no data yet.
    pub is_loading: bool,
    /// A fetch is running, data or not.
    pub is_fetching: bool,
    /// `data` comes from an earlier fetch, not a fresh round trip.
    pub is_cached_data: bool,
    /// Marked stale by a mutation or a push invalidation.
    pub is_invalidated: bool,
    pub last_fetched: Option<Instant>,
    pub updated_at: Option<Instant>,
    pub cache_time: Option<Duration>,
}

impl QueryState {
    pub fn status(&self) -> QueryStatus {
        if self.is_loading {
            QueryStatus::Loading
        } else if self.error.is_some() {
            QueryStatus::Error
        } else if self.data.is_some() {
            QueryStatus::Success
        } else {
            QueryStatus::Idle
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Data fields of an entry, kept to undo an optimistic write.
#[derive(Debug, Clone)]
pub(crate) struct SavedData {
    data: Option<Value>,
    last_fetched: Option<Instant>,
    updated_at: Option<Instant>,
}

impl SavedData {
    pub(crate) fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }
}

struct Entry {
    data: Option<Value>,
    error: Option<ClientError>,
    last_fetched: Option<Instant>,
    updated_at: Option<Instant>,
    invalidated: bool,
    cached: bool,
    cache_time: Option<Duration>,
    in_flight: Option<(u64, SharedFetch)>,
    tx: watch::Sender<QueryState>,
}

impl Entry {
    fn new() -> Self {
        let (tx, _) = watch::channel(QueryState::default());
        Self {
            data: None,
            error: None,
            last_fetched: None,
            updated_at: None,
            invalidated: false,
            cached: false,
            cache_time: None,
            in_flight: None,
            tx,
        }
    }

    /// Reset everything but the channel and the running fetch.
    fn clear(&mut self) {
        self.data = None;
        self.error = None;
        self.last_fetched = None;
        self.updated_at = None;
        self.invalidated = false;
        self.cached = false;
        self.cache_time = None;
    }

    fn snapshot(&self) -> QueryState {
        let fetching = self.in_flight.is_some();
        QueryState {
            data: self.data.clone(),
            error: self.error.clone(),
            is_loading: fetching && self.data.is_none(),
            is_fetching: fetching,
            is_cached_data: self.cached && self.data.is_some(),
            is_invalidated: self.invalidated,
            last_fetched: self.last_fetched,
            updated_at: self.updated_at,
            cache_time: self.cache_time,
        }
    }

    fn publish(&self) -> QueryState {
        let state = self.snapshot();
        self.tx.send_replace(state.clone());
        state
    }

    fn is_fresh(&self, now: Instant, stale_time: Duration) -> bool {
        !self.invalidated
            && self
                .last_fetched
                .is_some_and(|at| now.saturating_duration_since(at) < stale_time)
    }
}

struct StoreInner {
    client: ApiClient,
    entries: Mutex<HashMap<QueryKey, Entry>>,
    mutations: Mutex<HashMap<MutationKey, MutationSlot>>,
    next_fetch: AtomicU64,
}

/// Injectable cache of query results and mutation status.
#[derive(Clone)]
pub struct CacheStore {
    inner: Arc<StoreInner>,
}

enum Plan {
    Ready(QueryState),
    Wait(SharedFetch),
}

impl CacheStore {
    pub fn new(client: ApiClient) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                client,
                entries: Mutex::new(HashMap::new()),
                mutations: Mutex::new(HashMap::new()),
                next_fetch: AtomicU64::new(1),
            }),
        }
    }

    pub fn client(&self) -> &ApiClient {
        &self.inner.client
    }

    /// Fetch-or-reuse for one query.
    ///
    /// Fresh data returns at once. Stale data returns at once while a single
    /// background refetch runs. Without data (or with `disable_local_cache`)
    /// the call waits for the fetch; a failure keeps any earlier data.
    #[tracing::instrument(skip_all, fields(operation = %contract))]
    pub async fn execute_query(
        &self,
        contract: &Contract,
        payload: &Value,
        url_params: &Value,
        options: &QueryOptions,
    ) -> QueryState {
        let key = options.resolve_key(contract, payload, url_params);
        if !options.enabled {
            return self.query_state(&key).unwrap_or_default();
        }

        let hints = contract.cache_hints();
        let stale_time = options
            .stale_time
            .or(hints.stale_time)
            .unwrap_or(Duration::ZERO);
        let cache_time = options.cache_time.or(hints.cache_time);
        let now = Instant::now();

        let plan = {
            let mut entries = self.inner.entries.lock();
            let entry = entries.entry(key.clone()).or_insert_with(Entry::new);
            entry.cache_time = cache_time;

            if !options.disable_local_cache && entry.data.is_some() {
                if !entry.is_fresh(now, stale_time) {
                    tracing::debug!(%key, "stale entry; refetching in background");
                    // The spawned task writes the result; nobody awaits it here
                    let _ = self.ensure_fetch(
                        entry,
                        &key,
                        contract,
                        payload,
                        url_params,
                        options.refresh_delay,
                    );
                }
                entry.cached = true;
                Plan::Ready(entry.publish())
            } else {
                let fetch =
                    self.ensure_fetch(entry, &key, contract, payload, url_params, options.refresh_delay);
                entry.publish();
                Plan::Wait(fetch)
            }
        };

        match plan {
            Plan::Ready(state) => state,
            Plan::Wait(fetch) => {
                let _ = fetch.await;
                self.query_state(&key).unwrap_or_default()
            }
        }
    }

    /// Same key, always from the network.
    pub async fn refetch(
        &self,
        contract: &Contract,
        payload: &Value,
        url_params: &Value,
        options: &QueryOptions,
    ) -> QueryState {
        let mut options = options.clone();
        options.disable_local_cache = true;
        self.execute_query(contract, payload, url_params, &options).await
    }

    /// Reuse the fetch already running for `key`, or start one.
    fn ensure_fetch(
        &self,
        entry: &mut Entry,
        key: &QueryKey,
        contract: &Contract,
        payload: &Value,
        url_params: &Value,
        refresh_delay: Option<Duration>,
    ) -> SharedFetch {
        if let Some((_, fetch)) = &entry.in_flight {
            tracing::trace!(%key, "attaching to in-flight fetch");
            return fetch.clone();
        }

        let id = self.inner.next_fetch.fetch_add(1, Ordering::Relaxed);
        let not_before = refresh_delay
            .zip(entry.last_fetched)
            .map(|(delay, last)| last + delay);

        let store = self.clone();
        let key = key.clone();
        let contract = contract.clone();
        let payload = payload.clone();
        let url_params = url_params.clone();

        let task: JoinHandle<Result<Value, ClientError>> = tokio::spawn(async move {
            if let Some(at) = not_before {
                tokio::time::sleep_until(at).await;
            }
            let call = store.inner.client.call(&contract, &payload, &url_params);
            let result = AssertUnwindSafe(call)
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    Err(ClientError::Transport(TransportError::Network(
                        "fetch panicked".to_string(),
                    )))
                });
            store.complete_fetch(&key, id, &result);
            result
        });

        let fetch = async move {
            task.await.unwrap_or_else(|e| {
                Err(ClientError::Transport(TransportError::Network(format!(
                    "fetch task aborted: {e}"
                ))))
            })
        }
        .boxed()
        .shared();
        entry.in_flight = Some((id, fetch.clone()));
        fetch
    }

    fn complete_fetch(&self, key: &QueryKey, id: u64, result: &Result<Value, ClientError>) {
        let mut entries = self.inner.entries.lock();
        // Only `release_unreferenced` can drop an entry, and it skips fetching ones
        let entry = entries.entry(key.clone()).or_insert_with(Entry::new);
        if entry.in_flight.as_ref().is_some_and(|(current, _)| *current == id) {
            entry.in_flight = None;
        }
        match result {
            Ok(data) => {
                let now = Instant::now();
                entry.data = Some(data.clone());
                entry.error = None;
                entry.last_fetched = Some(now);
                entry.updated_at = Some(now);
                entry.invalidated = false;
                entry.cached = false;
            }
            Err(e) => {
                tracing::debug!(%key, error = %e, "query fetch failed");
                entry.error = Some(e.clone());
                entry.cached = entry.data.is_some();
            }
        }
        entry.publish();
    }

    pub fn query_state(&self, key: &QueryKey) -> Option<QueryState> {
        self.inner.entries.lock().get(key).map(Entry::snapshot)
    }

    pub fn query_data(&self, key: &QueryKey) -> Option<Value> {
        self.inner.entries.lock().get(key).and_then(|e| e.data.clone())
    }

    /// Watch `key`, creating an empty entry when needed.
    pub fn subscribe(&self, key: &QueryKey) -> watch::Receiver<QueryState> {
        let mut entries = self.inner.entries.lock();
        entries
            .entry(key.clone())
            .or_insert_with(Entry::new)
            .tx
            .subscribe()
    }

    /// Drop the entry's data; the next access behaves as a first access.
    ///
    /// An entry that is still watched or fetching keeps its channel and its
    /// in-flight fetch, so watchers stay attached and the key never has two
    /// calls running at once.
    pub fn remove(&self, key: &QueryKey) -> bool {
        let mut entries = self.inner.entries.lock();
        let Some(entry) = entries.get_mut(key) else {
            return false;
        };
        if entry.in_flight.is_some() || entry.tx.receiver_count() > 0 {
            entry.clear();
            entry.publish();
            tracing::debug!(%key, "query entry cleared; watchers or fetch still attached");
        } else {
            entries.remove(key);
            tracing::debug!(%key, "query entry removed");
        }
        true
    }

    /// Mark `key` stale regardless of its age.
    pub fn invalidate(&self, key: &QueryKey) -> bool {
        let mut entries = self.inner.entries.lock();
        match entries.get_mut(key) {
            Some(entry) => {
                entry.invalidated = true;
                entry.publish();
                true
            }
            None => false,
        }
    }

    /// Invalidate every key derived from `contract`. Returns how many.
    pub fn invalidate_contract(&self, contract: &Contract) -> usize {
        let mut entries = self.inner.entries.lock();
        let mut count = 0;
        for (key, entry) in entries.iter_mut() {
            if key.belongs_to(contract) {
                entry.invalidated = true;
                entry.publish();
                count += 1;
            }
        }
        count
    }

    /// Write `data` as if it had just been fetched.
    pub fn set_query_data(&self, key: QueryKey, data: Value) {
        let now = Instant::now();
        let mut entries = self.inner.entries.lock();
        let entry = entries.entry(key).or_insert_with(Entry::new);
        entry.data = Some(data);
        entry.error = None;
        entry.last_fetched = Some(now);
        entry.updated_at = Some(now);
        entry.cached = false;
        entry.publish();
    }

    pub(crate) fn save_data(&self, key: &QueryKey) -> SavedData {
        let entries = self.inner.entries.lock();
        match entries.get(key) {
            Some(e) => SavedData {
                data: e.data.clone(),
                last_fetched: e.last_fetched,
                updated_at: e.updated_at,
            },
            None => SavedData {
                data: None,
                last_fetched: None,
                updated_at: None,
            },
        }
    }

    pub(crate) fn restore_data(&self, key: &QueryKey, saved: SavedData) {
        let mut entries = self.inner.entries.lock();
        if let Some(entry) = entries.get_mut(key) {
            entry.data = saved.data;
            entry.last_fetched = saved.last_fetched;
            entry.updated_at = saved.updated_at;
            entry.publish();
        }
    }

    /// Remove entries nobody watches and nothing is fetching. Returns how many.
    pub fn release_unreferenced(&self) -> usize {
        let mut entries = self.inner.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| e.in_flight.is_some() || e.tx.receiver_count() > 0);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invalidate keys as they arrive on `feed` (e.g. pushed by a notification
    /// channel). Stops when the feed closes or the store is dropped.
    pub fn attach_invalidation_feed(&self, mut feed: mpsc::Receiver<QueryKey>) -> JoinHandle<()> {
        let weak: Weak<StoreInner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(key) = feed.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let store = CacheStore { inner };
                let hit = store.invalidate(&key);
                tracing::debug!(%key, hit, "push invalidation");
            }
        })
    }

    pub(crate) fn with_mutation_slot<R>(
        &self,
        key: &MutationKey,
        f: impl FnOnce(&mut MutationSlot) -> R,
    ) -> R {
        let mut slots = self.inner.mutations.lock();
        let slot = slots.entry(key.clone()).or_insert_with(MutationSlot::new);
        f(slot)
    }
}
