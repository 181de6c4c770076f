//! Write path: one shared status slot per contract, cache invalidation and
//! optimistic updates.

use std::sync::Arc;

use apikit::Contract;
use serde_json::Value;
use tokio::sync::watch;

use crate::client::ClientError;
use crate::key::{MutationKey, QueryKey};
use crate::store::CacheStore;
use crate::transport::TransportError;

/// Observable status of a contract's mutation slot.
#[derive(Debug, Clone, Default)]
pub struct MutationState {
    pub is_pending: bool,
    pub error: Option<ClientError>,
    pub is_success: bool,
    pub data: Option<Value>,
}

impl MutationState {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

pub(crate) struct MutationSlot {
    state: MutationState,
    pending: usize,
    tx: watch::Sender<MutationState>,
}

impl MutationSlot {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(MutationState::default());
        Self {
            state: MutationState::default(),
            pending: 0,
            tx,
        }
    }

    fn publish(&self) {
        self.tx.send_replace(self.state.clone());
    }

    fn begin(&mut self) {
        self.state.error = None;
        self.state.is_success = false;
        self.pending += 1;
        self.state.is_pending = true;
        self.publish();
    }

    fn finish(&mut self, result: &Result<Value, ClientError>) {
        self.pending = self.pending.saturating_sub(1);
        self.state.is_pending = self.pending > 0;
        match result {
            Ok(data) => {
                self.state.data = Some(data.clone());
                self.state.error = None;
                self.state.is_success = true;
            }
            Err(e) => {
                self.state.error = Some(e.clone());
                self.state.is_success = false;
            }
        }
        self.publish();
    }

    fn reset(&mut self) {
        self.state = MutationState {
            is_pending: self.pending > 0,
            ..MutationState::default()
        };
        self.publish();
    }
}

type SuccessFn = Arc<dyn Fn(&Value, &Value) + Send + Sync>;
type ErrorFn = Arc<dyn Fn(&ClientError, &Value) + Send + Sync>;
type UpdateFn = Arc<dyn Fn(Option<&Value>) -> Value + Send + Sync>;

/// Callbacks and cache effects of a mutation.
#[derive(Clone, Default)]
pub struct MutationOptions {
    on_success: Option<SuccessFn>,
    on_error: Option<ErrorFn>,
    invalidate_queries: Vec<QueryKey>,
    optimistic: Option<(QueryKey, UpdateFn)>,
}

impl MutationOptions {
    /// Called with `(data, payload)` after a successful call.
    pub fn on_success(mut self, f: impl Fn(&Value, &Value) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(f));
        self
    }

    /// Called with `(error, payload)` after a failed call.
    pub fn on_error(mut self, f: impl Fn(&ClientError, &Value) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Mark `key` stale once the call succeeds.
    pub fn invalidate(mut self, key: impl Into<QueryKey>) -> Self {
        self.invalidate_queries.push(key.into());
        self
    }

    /// Write `update(current)` into `key` before the call; restored on failure.
    pub fn optimistic(
        mut self,
        key: impl Into<QueryKey>,
        update: impl Fn(Option<&Value>) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.optimistic = Some((key.into(), Arc::new(update)));
        self
    }

    pub fn invalidate_queries(&self) -> &[QueryKey] {
        &self.invalidate_queries
    }
}

impl std::fmt::Debug for MutationOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationOptions")
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("invalidate_queries", &self.invalidate_queries)
            .field("optimistic", &self.optimistic.as_ref().map(|(k, _)| k))
            .finish()
    }
}

impl CacheStore {
    /// Run one write through `contract`.
    ///
    /// The call runs on its own task, so dropping the returned future does not
    /// cancel it and the slot always settles.
    #[tracing::instrument(skip_all, fields(operation = %contract))]
    pub async fn execute_mutation(
        &self,
        contract: &Contract,
        payload: Value,
        url_params: Value,
        options: MutationOptions,
    ) -> Result<Value, ClientError> {
        let key = MutationKey::of(contract);
        self.with_mutation_slot(&key, MutationSlot::begin);

        let rollback = options.optimistic.as_ref().map(|(query, update)| {
            let saved = self.save_data(query);
            self.set_query_data(query.clone(), update(saved.data()));
            (query.clone(), saved)
        });

        let store = self.clone();
        let contract = contract.clone();
        let task = tokio::spawn(async move {
            let result = store.client().call(&contract, &payload, &url_params).await;

            if result.is_err() {
                if let Some((query, saved)) = rollback {
                    tracing::debug!(%query, "rolling back optimistic update");
                    store.restore_data(&query, saved);
                }
            }
            store.with_mutation_slot(&key, |slot| slot.finish(&result));

            match &result {
                Ok(data) => {
                    if let Some(f) = &options.on_success {
                        f(data, &payload);
                    }
                    for query in &options.invalidate_queries {
                        store.invalidate(query);
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "mutation failed");
                    if let Some(f) = &options.on_error {
                        f(e, &payload);
                    }
                }
            }
            result
        });

        task.await.unwrap_or_else(|e| {
            Err(ClientError::Transport(TransportError::Network(format!(
                "mutation task aborted: {e}"
            ))))
        })
    }

    pub fn mutation_state(&self, contract: &Contract) -> MutationState {
        self.with_mutation_slot(&MutationKey::of(contract), |slot| slot.state.clone())
    }

    pub fn subscribe_mutation(&self, contract: &Contract) -> watch::Receiver<MutationState> {
        self.with_mutation_slot(&MutationKey::of(contract), |slot| slot.tx.subscribe())
    }

    /// Clear result flags; a call still in flight keeps the slot pending.
    pub fn reset_mutation(&self, contract: &Contract) {
        self.with_mutation_slot(&MutationKey::of(contract), MutationSlot::reset);
    }

    /// Bind a mutation hook to `contract`.
    pub fn use_mutation(&self, contract: &Contract, options: MutationOptions) -> Mutation {
        Mutation {
            store: self.clone(),
            contract: contract.clone(),
            options,
            rx: self.subscribe_mutation(contract),
        }
    }
}

/// Mutation hook: a contract, its options and a view of the shared slot.
pub struct Mutation {
    store: CacheStore,
    contract: Contract,
    options: MutationOptions,
    rx: watch::Receiver<MutationState>,
}

impl Mutation {
    pub async fn mutate(&self, payload: Value, url_params: Value) -> Result<Value, ClientError> {
        self.store
            .execute_mutation(&self.contract, payload, url_params, self.options.clone())
            .await
    }

    pub fn state(&self) -> MutationState {
        self.rx.borrow().clone()
    }

    /// Wait for the next state change; `None` once the store is gone.
    pub async fn changed(&mut self) -> Option<MutationState> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    pub fn reset(&self) {
        self.store.reset_mutation(&self.contract);
    }

    pub fn contract(&self) -> &Contract {
        &self.contract
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn slot_stays_pending_while_any_call_runs() {
        let mut slot = MutationSlot::new();
        slot.begin();
        slot.begin();
        slot.finish(&Ok(json!(1)));
        assert!(slot.state.is_pending);
        assert!(slot.state.is_success);

        slot.finish(&Ok(json!(2)));
        assert!(!slot.state.is_pending);
        assert_eq!(slot.state.data, Some(json!(2)));
    }

    #[test]
    fn begin_clears_previous_outcome() {
        let mut slot = MutationSlot::new();
        slot.begin();
        slot.finish(&Err(ClientError::Transport(TransportError::Network("x".into()))));
        assert!(slot.state.is_error());

        slot.begin();
        assert!(!slot.state.is_error());
        assert!(!slot.state.is_success);
        assert!(slot.state.is_pending);
    }

    #[test]
    fn reset_keeps_pending_flag() {
        let mut slot = MutationSlot::new();
        slot.begin();
        slot.reset();
        assert!(slot.state.is_pending);
        assert!(slot.state.data.is_none());
    }
}
