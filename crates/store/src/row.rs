use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

use globalcat_core::ItemKey;

use crate::error::StoreError;

/// Attribute map of a stored row.
pub type Attributes = Map<String, Value>;

/// A stored row: composite key plus a flat attribute map.
///
/// Serializes as a single object with `PK` and `SK` next to the attributes,
/// which is how rows are returned to API callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    #[serde(flatten)]
    pub key: ItemKey,
    #[serde(flatten)]
    pub attrs: Attributes,
}

impl Row {
    pub fn new(key: ItemKey, attrs: Attributes) -> Self {
        Self { key, attrs }
    }

    pub fn empty(key: ItemKey) -> Self {
        Self::new(key, Attributes::new())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attrs.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).and_then(Value::as_str)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.attrs.insert(name.into(), value.into());
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Apply atomic-add deltas. Absent or null attributes count as 0.
    ///
    /// All-or-nothing: on error the row is left untouched.
    pub fn apply_deltas(&mut self, deltas: &BTreeMap<String, i64>) -> Result<(), StoreError> {
        let mut updated = Vec::with_capacity(deltas.len());
        for (name, delta) in deltas {
            let current = match self.attrs.get(name) {
                None | Some(Value::Null) => 0,
                Some(v) => v.as_i64().ok_or_else(|| StoreError::NonNumeric {
                    key: self.key.clone(),
                    attribute: name.clone(),
                })?,
            };
            let next = current.checked_add(*delta).ok_or_else(|| StoreError::NonNumeric {
                key: self.key.clone(),
                attribute: name.clone(),
            })?;
            updated.push((name.clone(), next));
        }
        for (name, value) in updated {
            self.attrs.insert(name, Value::from(value));
        }
        Ok(())
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
