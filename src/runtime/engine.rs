//! The engine: configuration plus a compiled-module cache shared by stores
//!
//! The cache holds at most `max_cached_modules` entries and evicts the least
//! recently used one to make room. A module in use by a store stays alive
//! through its own reference after eviction.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use once_cell::sync::Lazy;
use tracing::debug;

use super::module::CompiledModule;
use crate::config::EngineConfig;
use crate::error::CompileError;
use crate::parser;

struct Cached {
    compiled: Arc<CompiledModule>,
    last_used: AtomicU64,
}

struct EngineInner {
    config: EngineConfig,
    cache: RwLock<HashMap<Vec<u8>, Cached>>,
    /// Ticks on every cache lookup, ordering entries by recency.
    clock: AtomicU64,
}

impl EngineInner {
    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }
}

/// Shared compilation context. Clones refer to the same engine and may be
/// used from any thread.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

static SHARED: Lazy<Engine> = Lazy::new(Engine::default);

impl Engine {
    pub fn new(config: EngineConfig) -> Engine {
        Engine {
            inner: Arc::new(EngineInner {
                config,
                cache: RwLock::new(HashMap::new()),
                clock: AtomicU64::new(0),
            }),
        }
    }

    /// A process-wide engine with the default configuration.
    pub fn shared() -> &'static Engine {
        &SHARED
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Number of compiled modules held by the cache.
    pub fn cached_modules(&self) -> usize {
        self.inner.cache.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn clear_cache(&self) {
        self.inner.cache.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub(crate) fn compile(&self, bytes: &[u8]) -> Result<Arc<CompiledModule>, CompileError> {
        let config = &self.inner.config;
        let caching = config.cache_modules && config.max_cached_modules > 0;
        if caching {
            let cache = self.inner.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(cached) = cache.get(bytes) {
                cached.last_used.store(self.inner.tick(), Ordering::Relaxed);
                debug!(size = bytes.len(), "module cache hit");
                return Ok(cached.compiled.clone());
            }
        }

        let parsed = parser::parse(bytes)?;
        let compiled = Arc::new(CompiledModule::new(parsed, bytes.len())?);
        debug!(
            size = bytes.len(),
            functions = compiled.parsed.functions.len(),
            cached = caching,
            "compiled module"
        );

        if caching {
            let mut cache = self.inner.cache.write().unwrap_or_else(PoisonError::into_inner);
            // another store may have compiled the same bytes meanwhile
            if let Some(cached) = cache.get(bytes) {
                cached.last_used.store(self.inner.tick(), Ordering::Relaxed);
                return Ok(cached.compiled.clone());
            }
            while cache.len() >= config.max_cached_modules {
                let oldest = cache
                    .iter()
                    .min_by_key(|(_, cached)| cached.last_used.load(Ordering::Relaxed))
                    .map(|(key, _)| key.clone());
                match oldest {
                    Some(key) => {
                        cache.remove(&key);
                        debug!(size = key.len(), "evicted cached module");
                    }
                    None => break,
                }
            }
            cache.insert(
                bytes.to_vec(),
                Cached {
                    compiled: compiled.clone(),
                    last_used: AtomicU64::new(self.inner.tick()),
                },
            );
        }
        Ok(compiled)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new(EngineConfig::default())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.inner.config)
            .field("cached_modules", &self.cached_modules())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Engine>();
    }

    #[test]
    fn test_cache_shares_compiled_modules() {
        let engine = Engine::default();
        let wasm = wat::parse_str("(module (func))").unwrap();
        let first = engine.compile(&wasm).unwrap();
        let second = engine.clone().compile(&wasm).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(engine.cached_modules(), 1);

        engine.clear_cache();
        assert_eq!(engine.cached_modules(), 0);
    }

    #[test]
    fn test_cache_can_be_disabled() {
        let engine = Engine::new(EngineConfig::new().with_cache_modules(false));
        let wasm = wat::parse_str("(module)").unwrap();
        let first = engine.compile(&wasm).unwrap();
        let second = engine.compile(&wasm).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(engine.cached_modules(), 0);
    }

    #[test]
    fn test_cache_evicts_least_recently_used() {
        let engine = Engine::new(EngineConfig::new().with_max_cached_modules(2));
        let a = wat::parse_str("(module (func))").unwrap();
        let b = wat::parse_str("(module (memory 1))").unwrap();
        let c = wat::parse_str("(module (global i32 (i32.const 0)))").unwrap();

        let first_a = engine.compile(&a).unwrap();
        let first_b = engine.compile(&b).unwrap();
        // touching `a` leaves `b` as the oldest entry
        assert!(Arc::ptr_eq(&first_a, &engine.compile(&a).unwrap()));
        engine.compile(&c).unwrap();
        assert_eq!(engine.cached_modules(), 2);

        assert!(Arc::ptr_eq(&first_a, &engine.compile(&a).unwrap()));
        assert!(!Arc::ptr_eq(&first_b, &engine.compile(&b).unwrap()));
        assert_eq!(engine.cached_modules(), 2);

        for n in 0..10 {
            let wasm = wat::parse_str(format!("(module (global i64 (i64.const {n})))")).unwrap();
            engine.compile(&wasm).unwrap();
            assert!(engine.cached_modules() <= 2);
        }
    }

    #[test]
    fn test_compile_errors_are_not_cached() {
        let engine = Engine::default();
        assert!(engine.compile(b"\0asm\x02\0\0\0").is_err());
        assert_eq!(engine.cached_modules(), 0);
    }
}
