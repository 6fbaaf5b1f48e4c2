//! Payload codec registry.
//!
//! Payload types are registered once; the registry then encodes them into
//! wire records through serde and rebuilds them by name on the way back.
//!
//! # Example
//!
//! ```
//! use std::any::Any;
//! use serde::{Deserialize, Serialize};
//! use simlink::event::EventPayload;
//! use simlink::registry::PayloadRegistry;
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct Ping { seq: u32 }
//!
//! impl EventPayload for Ping {
//!     fn as_any(&self) -> &dyn Any { self }
//!     fn into_any(self: Box<Self>) -> Box<dyn Any + Send> { self }
//! }
//!
//! let mut registry = PayloadRegistry::new();
//! registry.register::<Ping>();
//!
//! let data = registry.encode(&Ping { seq: 7 }).unwrap();
//! assert_eq!(data, serde_json::json!({ "seq": 7 }));
//!
//! let name = std::any::type_name::<Ping>();
//! let payload = registry.decode(name, data).unwrap();
//! assert_eq!(payload.as_any().downcast_ref::<Ping>().unwrap().seq, 7);
//! ```

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::EventError;
use crate::event::EventPayload;

/// Function rebuilding a payload from its encoded form.
pub type PayloadDecoder = Arc<dyn Fn(serde_json::Value) -> Result<Box<dyn EventPayload>, EventError> + Send + Sync>;

/// Function producing the encoded form of a payload.
pub type PayloadEncoder = Arc<dyn Fn(&dyn EventPayload) -> Result<serde_json::Value, EventError> + Send + Sync>;

/// Registry of payload codecs. Decoders are keyed by wire type name,
/// encoders by concrete type.
#[derive(Default, Clone)]
pub struct PayloadRegistry {
    decoders: HashMap<String, PayloadDecoder>,
    encoders: HashMap<TypeId, PayloadEncoder>,
}

impl PayloadRegistry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a serde payload: its encoder, and its decoder under its
    /// Rust type name, which is what [`EventPayload::type_name`] reports by
    /// default.
    pub fn register<T>(&mut self)
    where
        T: EventPayload + Serialize + DeserializeOwned,
    {
        self.encoders.insert(
            TypeId::of::<T>(),
            Arc::new(|payload: &dyn EventPayload| -> Result<serde_json::Value, EventError> {
                let payload = payload.as_any().downcast_ref::<T>().ok_or_else(|| {
                    EventError::Payload(format!(
                        "encoder for {} given a {}",
                        std::any::type_name::<T>(),
                        payload.type_name()
                    ))
                })?;
                Ok(serde_json::to_value(payload)?)
            }),
        );
        self.register_with(std::any::type_name::<T>(), |value| {
            let payload: T = serde_json::from_value(value)?;
            Ok(Box::new(payload) as Box<dyn EventPayload>)
        });
    }

    /// Registers a custom decoder under an explicit name.
    pub fn register_with<F>(&mut self, name: impl Into<String>, decoder: F)
    where
        F: Fn(serde_json::Value) -> Result<Box<dyn EventPayload>, EventError> + Send + Sync + 'static,
    {
        self.decoders.insert(name.into(), Arc::new(decoder));
    }

    /// Encodes `payload`, preferring its own [`EventPayload::encode`] over a
    /// registered encoder.
    pub fn encode(&self, payload: &dyn EventPayload) -> Result<serde_json::Value, EventError> {
        if let Some(data) = payload.encode() {
            return Ok(data);
        }
        let encoder = self
            .encoders
            .get(&payload.as_any().type_id())
            .ok_or_else(|| EventError::Payload(format!("no encoder registered for {}", payload.type_name())))?;
        encoder(payload)
    }

    /// Decodes a payload of the named type.
    pub fn decode(&self, type_name: &str, data: serde_json::Value) -> Result<Box<dyn EventPayload>, EventError> {
        let decoder = self
            .decoders
            .get(type_name)
            .ok_or_else(|| EventError::Payload(format!("no decoder registered for {}", type_name)))?;
        decoder(data)
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.decoders.contains_key(type_name)
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    pub fn type_names(&self) -> impl Iterator<Item = &String> {
        self.decoders.keys()
    }
}

impl std::fmt::Debug for PayloadRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadRegistry")
            .field("types", &self.decoders.keys().collect::<Vec<_>>())
            .field("encoders", &self.encoders.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::any::Any;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Credit {
        vc: u8,
        amount: u32,
    }

    impl EventPayload for Credit {
        fn type_name(&self) -> &'static str {
            "Credit"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
            self
        }
    }

    #[test]
    fn test_registry_basic() {
        let mut registry = PayloadRegistry::new();
        assert!(registry.is_empty());

        registry.register_with("Credit", |value| {
            let c: Credit = serde_json::from_value(value)?;
            Ok(Box::new(c) as Box<dyn EventPayload>)
        });

        assert!(registry.contains("Credit"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.type_names().count(), 1);
    }

    #[test]
    fn test_registry_decode() {
        let mut registry = PayloadRegistry::new();
        registry.register::<Credit>();

        let payload = registry
            .decode(std::any::type_name::<Credit>(), serde_json::json!({"vc": 1, "amount": 4}))
            .unwrap();
        let credit = payload.into_any().downcast::<Credit>().unwrap();
        assert_eq!(*credit, Credit { vc: 1, amount: 4 });
    }

    #[test]
    fn test_registry_unknown_type() {
        let registry = PayloadRegistry::new();
        let err = registry.decode("Missing", serde_json::Value::Null).unwrap_err();
        assert!(err.to_string().contains("no decoder registered for Missing"));
    }

    #[test]
    fn test_registry_bad_data() {
        let mut registry = PayloadRegistry::new();
        registry.register::<Credit>();
        let err = registry
            .decode(std::any::type_name::<Credit>(), serde_json::json!("nope"))
            .unwrap_err();
        assert!(matches!(err, EventError::Serialization(_)));
    }

    #[test]
    fn test_registry_encode() {
        let mut registry = PayloadRegistry::new();
        let credit = Credit { vc: 3, amount: 9 };
        assert!(registry.encode(&credit).is_err());

        registry.register::<Credit>();
        let data = registry.encode(&credit).unwrap();
        assert_eq!(data, serde_json::json!({"vc": 3, "amount": 9}));

        let back = registry.decode(std::any::type_name::<Credit>(), data).unwrap();
        assert_eq!(back.as_any().downcast_ref::<Credit>(), Some(&credit));
    }

    #[test]
    fn test_hand_written_encode_wins() {
        #[derive(Debug, Serialize, Deserialize)]
        struct Tagged(u32);

        impl EventPayload for Tagged {
            fn encode(&self) -> Option<serde_json::Value> {
                Some(serde_json::json!({ "tag": self.0 }))
            }

            fn as_any(&self) -> &dyn Any {
                self
            }

            fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
                self
            }
        }

        let mut registry = PayloadRegistry::new();
        registry.register::<Tagged>();
        assert_eq!(registry.encode(&Tagged(5)).unwrap(), serde_json::json!({ "tag": 5 }));
        assert_eq!(PayloadRegistry::new().encode(&Tagged(5)).unwrap(), serde_json::json!({ "tag": 5 }));
    }
}
