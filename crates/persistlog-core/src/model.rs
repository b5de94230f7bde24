//! Object model definitions.
//!
//! A store is opened against a named model that must be present in a
//! [`ModelBundle`]. The model fixes the schema version the store migrates to
//! and the file extension of the backing file.

use std::collections::HashMap;

use crate::error::{StoreError, StoreResult};

/// Name of the log model shipped in the built-in bundle.
pub const LOG_MODEL_NAME: &str = "LogModel";

/// Current schema version of the log model.
///
/// * 1: level, filter, timestamp, file, function, line, message
/// * 2: adds `message2`
pub const LOG_SCHEMA_VERSION: u32 = 2;

/// Extension of redb-backed store files.
pub const STORE_EXTENSION: &str = "redb";

/// A named, versioned schema for the log entry table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDefinition {
    /// Name the model is located by
    pub name: String,
    /// Schema version stores of this model are migrated to
    pub version: u32,
}

impl ModelDefinition {
    /// Define a model.
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    /// File name of the primary store file, e.g. `LogModel.redb`.
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.name, STORE_EXTENSION)
    }
}

/// Collection of model definitions, looked up by name.
#[derive(Debug, Clone, Default)]
pub struct ModelBundle {
    models: HashMap<String, ModelDefinition>,
}

impl ModelBundle {
    /// A bundle with no models.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The bundle containing [`LOG_MODEL_NAME`] at [`LOG_SCHEMA_VERSION`].
    pub fn builtin() -> Self {
        Self::empty().with_model(ModelDefinition::new(LOG_MODEL_NAME, LOG_SCHEMA_VERSION))
    }

    /// Add or replace a model.
    pub fn with_model(mut self, model: ModelDefinition) -> Self {
        self.models.insert(model.name.clone(), model);
        self
    }

    /// Find a model by name.
    pub fn locate(&self, name: &str) -> StoreResult<&ModelDefinition> {
        self.models
            .get(name)
            .ok_or_else(|| StoreError::InvalidModelPath {
                name: name.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_bundle_has_log_model() {
        let bundle = ModelBundle::builtin();
        let model = bundle.locate(LOG_MODEL_NAME).unwrap();
        assert_eq!(model.version, LOG_SCHEMA_VERSION);
        assert_eq!(model.file_name(), "LogModel.redb");
    }

    #[test]
    fn test_missing_model_is_invalid_model_path() {
        let err = ModelBundle::empty().locate("LogModel").unwrap_err();
        assert!(matches!(err, StoreError::InvalidModelPath { ref name } if name == "LogModel"));
    }
}
