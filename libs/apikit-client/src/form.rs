//! Form binding on top of a [`Mutation`].
//!
//! The contract's request shape is the only field validator: the same check
//! runs here before submit and again in the server pipeline.

use std::collections::BTreeMap;

use apikit::contract::errors_by_path;
use apikit::ValidationErrors;
use serde_json::{Map, Value};

use crate::client::ClientError;
use crate::mutation::Mutation;

#[derive(Debug, Clone, thiserror::Error)]
pub enum FormError {
    /// Field errors, either local or reported by the server.
    #[error("invalid form: {0}")]
    Invalid(ValidationErrors),

    /// Anything that is not a field error.
    #[error("submission failed: {0}")]
    Submission(ClientError),
}

pub struct Form {
    mutation: Mutation,
    defaults: Value,
    values: Value,
    field_errors: BTreeMap<String, String>,
    root_error: Option<String>,
}

impl Form {
    pub fn new(mutation: Mutation, defaults: Value) -> Self {
        Self {
            mutation,
            values: defaults.clone(),
            defaults,
            field_errors: BTreeMap::new(),
            root_error: None,
        }
    }

    pub fn mutation(&self) -> &Mutation {
        &self.mutation
    }

    /// Set the value at a dot path (`items.0.quantity`), creating objects on
    /// the way. Clears that field's error.
    pub fn set_value(&mut self, path: &str, value: Value) {
        let mut slot = &mut self.values;
        for segment in path.split('.').filter(|s| !s.is_empty()) {
            slot = step_mut(slot, segment);
        }
        *slot = value;
        self.field_errors.remove(path);
    }

    pub fn value(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .filter(|s| !s.is_empty())
            .try_fold(&self.values, |v, segment| match v {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            })
    }

    pub fn values(&self) -> &Value {
        &self.values
    }

    /// Check every field; on failure record the messages by path.
    pub fn validate(&mut self) -> Result<Value, ValidationErrors> {
        self.field_errors.clear();
        self.root_error = None;
        let result = self.mutation.contract().validate_request(&self.values);
        if let Err(errors) = &result {
            self.record(errors);
        }
        result
    }

    fn record(&mut self, errors: &ValidationErrors) {
        for (path, message) in errors_by_path(errors) {
            if path.is_empty() {
                self.root_error = Some(message);
            } else {
                self.field_errors.insert(path, message);
            }
        }
    }

    pub fn field_error(&self, path: &str) -> Option<&str> {
        self.field_errors.get(path).map(String::as_str)
    }

    pub fn field_errors(&self) -> &BTreeMap<String, String> {
        &self.field_errors
    }

    /// Submission-level message not tied to a field.
    pub fn root_error(&self) -> Option<&str> {
        self.root_error.as_deref()
    }

    pub fn reset(&mut self) {
        self.values = self.defaults.clone();
        self.field_errors.clear();
        self.root_error = None;
        self.mutation.reset();
    }

    /// Validate locally, then send through the mutation.
    ///
    /// Local failures never reach the network. A server 400 carrying field
    /// errors is mapped onto the fields; every other failure becomes the root
    /// error.
    pub async fn submit(&mut self, url_params: Value) -> Result<Value, FormError> {
        let values = self.validate().map_err(FormError::Invalid)?;

        match self.mutation.mutate(values, url_params).await {
            Ok(data) => Ok(data),
            Err(err) => {
                let fields = match &err {
                    ClientError::Validation { errors, .. } => Some(errors.clone()),
                    other => other
                        .field_errors()
                        .map(|list| ValidationErrors::new(list.to_vec())),
                };
                match fields {
                    Some(errors) => {
                        self.record(&errors);
                        Err(FormError::Invalid(errors))
                    }
                    None => {
                        self.root_error = Some(err.to_string());
                        Err(FormError::Submission(err))
                    }
                }
            }
        }
    }
}

/// Descend one path segment, creating the container it needs.
///
/// A numeric segment indexes an array (padded with `null` up to the index)
/// when the slot is an array or still empty; anything else is an object key.
fn step_mut<'a>(slot: &'a mut Value, segment: &str) -> &'a mut Value {
    let index = segment
        .parse::<usize>()
        .ok()
        .filter(|_| slot.is_array() || slot.is_null());
    match index {
        Some(i) => {
            if !slot.is_array() {
                *slot = Value::Array(Vec::new());
            }
            match slot {
                Value::Array(items) => {
                    if items.len() <= i {
                        items.resize(i + 1, Value::Null);
                    }
                    &mut items[i]
                }
                other => other,
            }
        }
        None => {
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            match slot {
                Value::Object(map) => map.entry(segment.to_string()).or_insert(Value::Null),
                other => other,
            }
        }
    }
}
