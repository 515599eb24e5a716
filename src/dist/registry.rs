//! Binding cache
//!
//! Bindings are memoized per `(environment, library name)`. Hits only take
//! the cache lock for the lookup. Misses on the same key are serialized by a
//! per-key build lock, so a key is built at most once even when several
//! threads miss at the same time, while other keys stay servable.

use crate::config::Config;
use crate::dist::strategy::select;
use crate::dist::{Binding, Distribution};
use crate::env::{Environment, EnvironmentId};
use crate::error::{Error, Result};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

type BindingKey = (EnvironmentId, String);

/// Cache entries captured by [`BindingRegistry::snapshot`].
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    bindings: HashMap<BindingKey, Arc<Binding>>,
}

impl RegistrySnapshot {
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

pub struct BindingRegistry {
    config: Config,
    distributions: RwLock<IndexMap<String, Distribution>>,
    bindings: Mutex<HashMap<BindingKey, Arc<Binding>>>,
    building: Mutex<HashMap<BindingKey, Arc<Mutex<()>>>>,
}

impl BindingRegistry {
    pub fn new(config: Config) -> Self {
        BindingRegistry {
            config,
            distributions: RwLock::new(IndexMap::new()),
            bindings: Mutex::new(HashMap::new()),
            building: Mutex::new(HashMap::new()),
        }
    }

    /// The process-wide registry: configuration from the standard files and
    /// the bundled kernel32 distribution.
    pub fn global() -> &'static BindingRegistry {
        static GLOBAL: OnceLock<BindingRegistry> = OnceLock::new();
        GLOBAL.get_or_init(|| {
            let config = Config::load_from(&Config::default_paths()).unwrap_or_else(|err| {
                warn!(error = %err, "ignoring unreadable configuration");
                Config::default()
            });
            let registry = BindingRegistry::new(config);
            registry.register(Distribution::kernel32());
            registry
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Declare how the library `distribution.name` is built. Replaces an
    /// earlier distribution of the same name; bindings already cached stay.
    pub fn register(&self, distribution: Distribution) {
        debug!(library = %distribution.name, module = %distribution.module_name, "registered distribution");
        self.distributions
            .write()
            .insert(distribution.name.clone(), distribution);
    }

    pub fn distribution(&self, name: &str) -> Option<Distribution> {
        self.distributions.read().get(name).cloned()
    }

    pub fn libraries(&self) -> Vec<String> {
        self.distributions.read().keys().cloned().collect()
    }

    /// The binding of `name` under `env`, building it on first use.
    pub fn get(&self, env: &Environment, name: &str) -> Result<Arc<Binding>> {
        let key = (env.id(), name.to_string());
        if let Some(binding) = self.cached(&key) {
            debug!(environment = %env.id(), library = name, "binding cache hit");
            return Ok(binding);
        }

        let distribution = self
            .distribution(name)
            .ok_or_else(|| Error::UnknownLibrary(name.to_string()))?;

        let build_lock = Arc::clone(self.building.lock().entry(key.clone()).or_default());
        let result = {
            let _building = build_lock.lock();
            match self.cached(&key) {
                // Built by another thread while this one waited.
                Some(binding) => Ok(binding),
                None => self.build(env, &distribution, key.clone()),
            }
        };

        let mut building = self.building.lock();
        if Arc::strong_count(&build_lock) == 2 {
            building.remove(&key);
        }
        result
    }

    fn cached(&self, key: &BindingKey) -> Option<Arc<Binding>> {
        self.bindings.lock().get(key).cloned()
    }

    fn build(&self, env: &Environment, distribution: &Distribution, key: BindingKey) -> Result<Arc<Binding>> {
        debug!(environment = %env.id(), library = %distribution.name, "binding cache miss");
        let mut config = self.config.clone();
        config.apply_env()?;

        let binding = Arc::new(select(env, distribution, &config)?);
        self.bindings.lock().insert(key, Arc::clone(&binding));
        Ok(binding)
    }

    pub fn contains(&self, env: &Environment, name: &str) -> bool {
        self.bindings
            .lock()
            .contains_key(&(env.id(), name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.bindings.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.lock().is_empty()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            bindings: self.bindings.lock().clone(),
        }
    }

    /// Drop every cached binding. Callers still holding an `Arc` keep theirs.
    pub fn clear(&self) {
        self.bindings.lock().clear();
    }

    /// Replace the cache contents with `snapshot`.
    pub fn restore(&self, snapshot: RegistrySnapshot) {
        *self.bindings.lock() = snapshot.bindings;
    }

    /// Snapshot and clear the cache; the returned guard restores it on drop.
    pub fn isolate(&self) -> IsolationGuard<'_> {
        let snapshot = self.snapshot();
        self.clear();
        IsolationGuard {
            registry: self,
            snapshot: Some(snapshot),
        }
    }
}

impl std::fmt::Debug for BindingRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingRegistry")
            .field("config", &self.config)
            .field("libraries", &self.libraries())
            .field("bindings", &self.len())
            .finish()
    }
}

/// Restores the cache captured by [`BindingRegistry::isolate`].
#[must_use = "the cache is restored when the guard is dropped"]
pub struct IsolationGuard<'a> {
    registry: &'a BindingRegistry,
    snapshot: Option<RegistrySnapshot>,
}

impl Drop for IsolationGuard<'_> {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            self.registry.restore(snapshot);
        }
    }
}
