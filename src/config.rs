//! Engine configuration

use serde::{Deserialize, Serialize};

/// Resource limits and caching behaviour shared by every store of an engine.
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```
/// use wasm_embed::EngineConfig;
///
/// let config = EngineConfig::from_json(r#"{ "max_call_depth": 64 }"#).unwrap();
/// assert_eq!(config.max_call_depth, 64);
/// assert!(config.cache_modules);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Nesting allowed before `StackExhausted`. Every active guest call and
    /// every entered block, loop or if takes one level.
    pub max_call_depth: usize,
    /// Operand stack entries allowed before `StackExhausted`.
    pub max_value_stack: usize,
    /// Instructions one host-initiated call may execute, unlimited if `None`.
    pub instruction_budget: Option<u64>,
    pub cache_modules: bool,
    /// Compiled modules the cache keeps before evicting the least recently
    /// used one.
    pub max_cached_modules: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_call_depth: 512,
            max_value_stack: 1 << 20,
            instruction_budget: None,
            cache_modules: true,
            max_cached_modules: 64,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    pub fn with_max_value_stack(mut self, values: usize) -> Self {
        self.max_value_stack = values;
        self
    }

    pub fn with_instruction_budget(mut self, budget: Option<u64>) -> Self {
        self.instruction_budget = budget;
        self
    }

    pub fn with_cache_modules(mut self, cache: bool) -> Self {
        self.cache_modules = cache;
        self
    }

    pub fn with_max_cached_modules(mut self, modules: usize) -> Self {
        self.max_cached_modules = modules;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = EngineConfig::from_json("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.max_call_depth, 512);
        assert_eq!(config.instruction_budget, None);
        assert_eq!(config.max_cached_modules, 64);
    }

    #[test]
    fn test_json_round_trip_with_builder() {
        let config = EngineConfig::new()
            .with_max_call_depth(16)
            .with_instruction_budget(Some(1000))
            .with_cache_modules(false)
            .with_max_cached_modules(8);
        let json = config.to_json().unwrap();
        assert_eq!(EngineConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_rejects_wrong_types() {
        assert!(EngineConfig::from_json(r#"{ "max_call_depth": "deep" }"#).is_err());
    }
}
