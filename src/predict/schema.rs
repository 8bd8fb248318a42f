//! The container's published OpenAPI document

use crate::error::{PredictError, PredictResult};
use serde_json::Value;

/// Parsed `/openapi.json`
#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceSchema {
    document: Value,
}

impl InterfaceSchema {
    pub fn from_slice(body: &[u8]) -> PredictResult<Self> {
        let document: Value =
            serde_json::from_slice(body).map_err(|e| PredictError::SchemaFetch(e.to_string()))?;
        if !document.get("openapi").is_some_and(Value::is_string) {
            return Err(PredictError::SchemaFetch(
                "document has no openapi version".to_string(),
            ));
        }
        Ok(Self { document })
    }

    pub fn version(&self) -> &str {
        self.document["openapi"].as_str().unwrap_or_default()
    }

    /// Declared input names, in `x-order` when given, otherwise by name
    pub fn input_names(&self) -> Vec<String> {
        let Some(properties) = self.input_schema().and_then(|s| s["properties"].as_object())
        else {
            return Vec::new();
        };

        let mut names: Vec<(u64, &String)> = properties
            .iter()
            .map(|(name, prop)| (prop["x-order"].as_u64().unwrap_or(u64::MAX), name))
            .collect();
        names.sort();
        names.into_iter().map(|(_, name)| name.clone()).collect()
    }

    pub fn input_schema(&self) -> Option<&Value> {
        self.document.pointer("/components/schemas/Input")
    }

    pub fn output_schema(&self) -> Option<&Value> {
        self.document.pointer("/components/schemas/Output")
    }

    pub fn document(&self) -> &Value {
        &self.document
    }
}
