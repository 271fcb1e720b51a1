//! The backend registry: a compile-time name→constructor map, and the
//! reification pass that turns a config section's ordered entries into
//! the single `Factory` a [`shovel_registry::StorageRegistry`] needs.
//!
//! "Dynamically locate the module" has no `dlopen` equivalent here:
//! concretely, a host binary (`shovel-cli`) registers every backend
//! it's linked against under its module/export name before reifying a
//! user's config, making this a compile-time plugin registry rather
//! than a runtime one. The constructor signature here is generic over
//! the target type rather than a type-erased `Any`: a registry is
//! always built for one specific storage kind (caches, directories, or
//! databases), so there's never a need to downcast back out, and a
//! typed registry rejects a mismatched backend at the call site
//! instead of at first use.

use hashbrown::HashMap;
use shovel_common::{Result, ShovelError};
use shovel_registry::Factory;
use std::sync::Arc;

use crate::pattern::match_entry;
use crate::schema::{BackendEntry, DatabaseEntry};

type Constructor<T> = Arc<dyn Fn(serde_json::Value) -> Result<T> + Send + Sync>;

/// Constructors registered under `(module, export)`, looked up by the
/// reifier for each config entry that names them.
pub struct BackendRegistry<T> {
    constructors: HashMap<(String, String), Constructor<T>>,
}

const DEFAULT_EXPORT: &str = "default";

impl<T> BackendRegistry<T> {
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registers a constructor under `module`/`export`. `export`
    /// defaults to `"default"` when the config entry omits one.
    pub fn register(
        &mut self,
        module: impl Into<String>,
        export: impl Into<Option<String>>,
        constructor: impl Fn(serde_json::Value) -> Result<T> + Send + Sync + 'static,
    ) {
        let key = (
            module.into(),
            export.into().unwrap_or_else(|| DEFAULT_EXPORT.to_string()),
        );
        self.constructors.insert(key, Arc::new(constructor));
    }

    pub fn construct(&self, module: &str, export: Option<&str>, opts: serde_json::Value) -> Result<T> {
        let export = export.unwrap_or(DEFAULT_EXPORT);
        let constructor = self
            .constructors
            .get(&(module.to_string(), export.to_string()))
            .ok_or_else(|| {
                ShovelError::ConfigInvalid(format!("no backend registered for {module}::{export}"))
            })?;
        constructor(opts)
    }
}

impl<T> Default for BackendRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn opts_to_json(opts: &std::collections::BTreeMap<String, toml::Value>) -> Result<serde_json::Value> {
    serde_json::to_value(opts)
        .map_err(|e| ShovelError::ConfigInvalid(format!("non-representable backend opts: {e}")))
}

/// Builds the single `Factory` a cache/directory `StorageRegistry` uses:
/// given a name at `get`-time, find the matching entry (exact then
/// first glob, in declaration order) and construct it through the
/// registry.
pub fn reify_storage_factory<T: Send + Sync + 'static>(
    entries: Vec<BackendEntry>,
    registry: Arc<BackendRegistry<T>>,
) -> Factory<T> {
    Box::new(move |name: &str| {
        let entry = match_entry(&entries, name, |e| e.name.as_str()).ok_or_else(|| {
            ShovelError::ConfigInvalid(format!("no config entry matches \"{name}\""))
        })?;
        let opts = opts_to_json(&entry.opts)?;
        registry.construct(&entry.module, entry.export.as_deref(), opts)
    })
}

/// Same as [`reify_storage_factory`] but for `databases`, whose entries
/// carry a connection `url` alongside the free-form opts.
pub fn reify_database_factory<T: Send + Sync + 'static>(
    entries: Vec<DatabaseEntry>,
    registry: Arc<BackendRegistry<T>>,
) -> Factory<T> {
    Box::new(move |name: &str| {
        let entry = match_entry(&entries, name, |e| e.name.as_str()).ok_or_else(|| {
            ShovelError::ConfigInvalid(format!("no config entry matches \"{name}\""))
        })?;
        let mut opts = entry.opts.clone();
        opts.insert("url".to_string(), toml::Value::String(entry.url.clone()));
        let opts = opts_to_json(&opts)?;
        registry.construct(&entry.module, entry.export.as_deref(), opts)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy(String);

    #[test]
    fn test_construct_dispatches_to_the_registered_constructor() {
        let mut registry: BackendRegistry<Dummy> = BackendRegistry::new();
        registry.register("mem", None, |_opts| Ok(Dummy("memory".into())));

        let result = registry
            .construct("mem", None, serde_json::json!({}))
            .unwrap();
        assert_eq!(result.0, "memory");
    }

    #[test]
    fn test_construct_fails_for_an_unknown_backend() {
        let registry: BackendRegistry<Dummy> = BackendRegistry::new();
        let result = registry.construct("missing", None, serde_json::json!({}));
        assert!(matches!(result, Err(ShovelError::ConfigInvalid(_))));
    }

    #[test]
    fn test_reify_storage_factory_matches_by_name_then_constructs() {
        let entries = vec![BackendEntry {
            name: "api-*".into(),
            module: "mem".into(),
            export: None,
            opts: Default::default(),
        }];
        let mut registry: BackendRegistry<Dummy> = BackendRegistry::new();
        registry.register("mem", None, |_opts| Ok(Dummy("cache".into())));

        let factory = reify_storage_factory(entries, Arc::new(registry));
        let built = factory("api-users").unwrap();
        assert_eq!(built.0, "cache");
        assert!(factory("unrelated").is_err());
    }
}
