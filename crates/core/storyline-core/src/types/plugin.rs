//! Plugin types

use super::{Provider, Service};
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Bundle of providers and services registered with a host
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Plugin name (unique identifier)
    fn name(&self) -> &str;

    /// Plugin description
    fn description(&self) -> &str;

    /// Plugin dependencies (other plugin names)
    fn dependencies(&self) -> Vec<String> {
        vec![]
    }

    /// Priority (higher = loads later, overrides earlier plugins)
    fn priority(&self) -> i32 {
        0
    }

    /// Initialize plugin with host-supplied settings
    async fn init(&self, _config: HashMap<String, String>) -> Result<()> {
        Ok(())
    }

    /// Providers provided by this plugin
    fn providers(&self) -> Vec<Arc<dyn Provider>> {
        vec![]
    }

    /// Services provided by this plugin
    fn services(&self) -> Vec<Arc<dyn Service>> {
        vec![]
    }

    /// Database schema for this plugin
    fn schema(&self) -> Option<serde_json::Value> {
        None
    }

    /// Configuration schema
    fn config_schema(&self) -> Option<serde_json::Value> {
        None
    }
}
