//! Registry of provider adapters keyed by name.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};

use super::Provider;

/// Holds the configured providers and the one used when none is named.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
    default_name: Option<String>,
}

impl ProviderRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            default_name: None,
        }
    }

    /// Register a provider under its name.
    ///
    /// A provider registered under an existing name replaces it. The first
    /// provider registered becomes the default.
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        let name = provider.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.providers.insert(name, provider);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Provider>> {
        self.providers.get(name)
    }

    pub fn set_default(&mut self, name: impl Into<String>) {
        self.default_name = Some(name.into());
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default_name.as_deref()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Resolve a provider by name, falling back to the default.
    pub fn resolve(&self, name: Option<&str>) -> Result<&Arc<dyn Provider>> {
        let name = name
            .or(self.default_name.as_deref())
            .context("No provider named and no default provider registered")?;
        self.providers
            .get(name)
            .with_context(|| format!("No provider registered with name: {}", name))
    }

    /// Names of all registered providers, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
