use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::identifier::OrderedIdentifier;
use crate::storage::KeyValueStore;

/// The persisted settings object: `{ "lastread": "<id>" | false }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSettings {
    #[serde(default, with = "lastread_format")]
    pub lastread: Option<OrderedIdentifier>,
}

/// Typed view over one namespaced key of the key-value store.
#[derive(Clone)]
pub struct Settings {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl Settings {
    /// Opens the settings under `key`, writing defaults when the key is absent.
    pub fn open(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Result<Self> {
        let settings = Self {
            store,
            key: key.into(),
        };
        if settings.store.get(&settings.key)?.is_none() {
            settings.save(&StoredSettings::default())?;
        }
        Ok(settings)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn load(&self) -> Result<StoredSettings> {
        match self.store.get(&self.key)? {
            Some(value) => serde_json::from_value(value)
                .with_context(|| format!("settings: decode {:?}", self.key)),
            None => Ok(StoredSettings::default()),
        }
    }

    pub fn save(&self, settings: &StoredSettings) -> Result<()> {
        let value = serde_json::to_value(settings).context("settings: encode")?;
        self.store.set(&self.key, &value)
    }

    /// Read-modify-write of the whole settings object.
    pub fn update(&self, apply: impl FnOnce(&mut StoredSettings)) -> Result<StoredSettings> {
        let mut settings = self.load()?;
        apply(&mut settings);
        self.save(&settings)?;
        Ok(settings)
    }
}

mod lastread_format {
    use serde::de::{self, Deserializer};
    use serde::ser::Serializer;
    use serde::Deserialize;
    use serde_json::Value;

    use crate::identifier::OrderedIdentifier;

    pub fn serialize<S: Serializer>(
        value: &Option<OrderedIdentifier>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(id) => serializer.serialize_str(id.as_str()),
            None => serializer.serialize_bool(false),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<OrderedIdentifier>, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Bool(false) | Value::Null => Ok(None),
            Value::String(raw) if raw.is_empty() => Ok(None),
            Value::String(raw) => OrderedIdentifier::parse(&raw)
                .map(Some)
                .map_err(de::Error::custom),
            Value::Number(number) => OrderedIdentifier::parse(&number.to_string())
                .map(Some)
                .map_err(de::Error::custom),
            other => Err(de::Error::custom(format!(
                "lastread must be an identifier or false, got {other}"
            ))),
        }
    }
}
