//! Range-checked values exposed through get/set requests.

use core::fmt::Debug;

use log::{debug, warn};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::error::{ProtocolError, Result};

/// JSON key holding a property value in requests and responses.
pub const PROPERTY_VALUE_KEY: &str = "value";

/// Type-erased view used by the request routes.
pub trait JsonProperty: Send + Sync {
    fn name(&self) -> &str;

    /// `{"value": <current>}`
    fn to_json(&self) -> Value;

    /// Parse `{"value": <new>}` and store it.  `Ok(true)` when the value
    /// changed.
    fn set_from_json(&self, payload: &Value) -> Result<bool>;
}

/// A named value with an inclusive `[min, max]` range.
pub struct Property<T> {
    name: String,
    value: Mutex<T>,
    min: T,
    max: T,
}

impl<T> Property<T>
where
    T: Copy + PartialOrd + Debug,
{
    pub fn new(name: impl Into<String>, value: T, min: T, max: T) -> Self {
        Self {
            name: name.into(),
            value: Mutex::new(value),
            min,
            max,
        }
    }

    pub fn get(&self) -> T {
        *self.value.lock()
    }

    /// Store `value` if it lies within range.  `Ok(true)` when it changed.
    pub fn set(&self, value: T) -> Result<bool> {
        if value < self.min || value > self.max {
            warn!(
                "property {} value {value:?} is out of range [{:?}, {:?}]",
                self.name, self.min, self.max
            );
            return Err(ProtocolError::InvalidPayload.into());
        }
        let mut current = self.value.lock();
        let changed = *current != value;
        *current = value;
        Ok(changed)
    }

    pub fn range(&self) -> (T, T) {
        (self.min, self.max)
    }
}

impl<T> JsonProperty for Property<T>
where
    T: Copy + PartialOrd + Debug + Serialize + DeserializeOwned + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn to_json(&self) -> Value {
        json!({ PROPERTY_VALUE_KEY: self.get() })
    }

    fn set_from_json(&self, payload: &Value) -> Result<bool> {
        let raw = payload
            .get(PROPERTY_VALUE_KEY)
            .ok_or(ProtocolError::InvalidPayload)?;
        let value: T = serde_json::from_value(raw.clone())?;
        let changed = self.set(value)?;
        if changed {
            debug!("property {} set to {value:?}", self.name);
        }
        Ok(changed)
    }
}
