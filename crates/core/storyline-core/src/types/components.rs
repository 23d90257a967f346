//! Context providers and the state they read

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Values collected for one prompt composition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    /// String values (for template substitution)
    pub values: HashMap<String, String>,

    /// Structured data (for programmatic access)
    pub data: HashMap<String, serde_json::Value>,
}

impl State {
    /// Create a new empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a string value
    pub fn set_value(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Get a string value
    pub fn get_value(&self, key: &str) -> Option<&String> {
        self.values.get(key)
    }

    /// Set structured data
    pub fn set_data(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.data.insert(key.into(), value);
    }

    /// Fold a provider result into this state
    pub fn merge(&mut self, result: &ProviderResult) {
        if let Some(values) = &result.values {
            self.values
                .extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        if let Some(data) = &result.data {
            self.data
                .extend(data.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
    }
}

/// Provider result
#[derive(Debug, Clone, Default)]
pub struct ProviderResult {
    /// Human-readable text for the prompt
    pub text: Option<String>,

    /// Key-value pairs for template substitution
    pub values: Option<HashMap<String, String>>,

    /// Structured data for programmatic access
    pub data: Option<HashMap<String, serde_json::Value>>,
}

/// Supplies contextual information to an external consumer
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name
    fn name(&self) -> &str;

    /// Description
    fn description(&self) -> Option<String> {
        None
    }

    /// Position in provider list (affects execution order)
    fn position(&self) -> i32 {
        0
    }

    /// Get provider data
    async fn get(&self, state: &State) -> Result<ProviderResult>;
}
