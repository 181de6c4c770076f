//! Query hook: one cache entry bound to one unit of work.

use apikit::Contract;
use serde_json::Value;
use tokio::sync::watch;

use crate::key::QueryKey;
use crate::store::{CacheStore, QueryOptions, QueryState};

pub struct Query {
    store: CacheStore,
    contract: Contract,
    payload: Value,
    url_params: Value,
    options: QueryOptions,
    key: QueryKey,
    rx: watch::Receiver<QueryState>,
}

impl CacheStore {
    /// Subscribe to the query's entry and fetch-or-reuse when enabled.
    pub async fn use_query(
        &self,
        contract: &Contract,
        payload: Value,
        url_params: Value,
        options: QueryOptions,
    ) -> Query {
        let key = options.resolve_key(contract, &payload, &url_params);
        let rx = self.subscribe(&key);
        let query = Query {
            store: self.clone(),
            contract: contract.clone(),
            payload,
            url_params,
            options,
            key,
            rx,
        };
        if query.options.enabled {
            query.run(&query.options).await;
        }
        query
    }
}

impl Query {
    async fn run(&self, options: &QueryOptions) -> QueryState {
        self.store
            .execute_query(&self.contract, &self.payload, &self.url_params, options)
            .await
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn state(&self) -> QueryState {
        self.rx.borrow().clone()
    }

    /// Wait for the next published state; `None` once the store is dropped.
    pub async fn changed(&mut self) -> Option<QueryState> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Fetch-or-reuse again with the hook's own options.
    pub async fn fetch(&self) -> QueryState {
        self.run(&self.options).await
    }

    pub async fn refetch(&self) -> QueryState {
        self.store
            .refetch(&self.contract, &self.payload, &self.url_params, &self.options)
            .await
    }

    /// Drop the cached data and keep watching the (now empty) key.
    pub fn remove(&self) {
        self.store.remove(&self.key);
    }
}
